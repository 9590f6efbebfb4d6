//! The `Token` value: one OTP credential and its display defaults.
//!
//! A `Token` is an immutable snapshot. Only its display fields (issuer,
//! label, image) can be edited, and editing produces a new snapshot with
//! the same `uid`. The live HOTP counter is not held here; it lives in the
//! [`SecretStore`](crate::otp::store::SecretStore) keyed by `uid`.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::otp::core::{self, DEFAULT_PERIOD, MAX_DIGITS, MIN_DIGITS};
use crate::otp::icons;
use crate::otp::types::*;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Secret
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Raw shared-secret bytes. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Wrap raw bytes; an empty secret is rejected.
    pub fn new(bytes: Vec<u8>) -> Result<Self, OtpError> {
        if bytes.is_empty() {
            return Err(OtpError::new(OtpErrorKind::InvalidSecret, "Secret is empty"));
        }
        Ok(Self(bytes))
    }

    /// Decode a Base32 secret.
    pub fn from_base32(b32: &str) -> Result<Self, OtpError> {
        core::decode_secret(b32).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base32(&self) -> String {
        core::encode_secret(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([redacted; {} bytes])", self.0.len())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Type-specific parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HOTP or TOTP together with the parameter only that type uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OtpKind {
    /// Counter-based. `counter` is the value the token was provisioned
    /// with; the live value is owned by the store.
    Hotp { counter: u64 },
    /// Time-based with a step of `period` seconds.
    Totp { period: u32 },
}

impl OtpKind {
    pub fn otp_type(&self) -> OtpType {
        match self {
            Self::Hotp { .. } => OtpType::Hotp,
            Self::Totp { .. } => OtpType::Totp,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `(type, issuer, label)` key built from the provisioned issuer and the
/// default label, so it does not move when the user edits display fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenIdentity {
    pub otp_type: OtpType,
    pub issuer: String,
    pub label: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Manual construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fields of a manually entered token (add-token form).
#[derive(Debug, Clone)]
pub struct TokenParams {
    pub otp_type: OtpType,
    pub secret: Vec<u8>,
    pub label: String,
    pub issuer: Option<String>,
    pub image: Option<String>,
    pub algorithm: Option<Algorithm>,
    pub digits: Option<u8>,
    pub period: Option<u32>,
    pub counter: Option<u64>,
}

impl TokenParams {
    /// Start a form with an already-decoded secret.
    pub fn new(otp_type: OtpType, label: impl Into<String>, secret: Vec<u8>) -> Self {
        Self {
            otp_type,
            secret,
            label: label.into(),
            issuer: None,
            image: None,
            algorithm: None,
            digits: None,
            period: None,
            counter: None,
        }
    }

    /// Start a form from a Base32 secret as typed by the user.
    pub fn with_base32_secret(
        otp_type: OtpType,
        label: impl Into<String>,
        secret_b32: &str,
    ) -> Result<Self, OtpError> {
        Ok(Self::new(otp_type, label, core::decode_secret(secret_b32)?))
    }

    /// Builder: set issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Builder: set image reference.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Builder: set algorithm.
    pub fn with_algorithm(mut self, algo: Algorithm) -> Self {
        self.algorithm = Some(algo);
        self
    }

    /// Builder: set digit count.
    pub fn with_digits(mut self, digits: u8) -> Self {
        self.digits = Some(digits);
        self
    }

    /// Builder: set time period.
    pub fn with_period(mut self, period: u32) -> Self {
        self.period = Some(period);
        self
    }

    /// Builder: set initial counter.
    pub fn with_counter(mut self, counter: u64) -> Self {
        self.counter = Some(counter);
        self
    }
}

/// Validated-but-unassembled token fields shared by the URI parser and the
/// manual form.
#[derive(Debug, Clone)]
pub(crate) struct RawToken {
    pub otp_type: OtpType,
    pub secret: Vec<u8>,
    pub algorithm: Algorithm,
    pub digits: Option<u8>,
    pub period: Option<u32>,
    pub counter: Option<u64>,
    pub label_issuer: Option<String>,
    pub issuer_param: Option<String>,
    pub label: String,
    pub image: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Display edits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// User edits to display fields. `None` restores the computed default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayEdit {
    pub issuer: Option<String>,
    pub label: Option<String>,
    pub image: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Token
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One OTP credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    uid: String,
    kind: OtpKind,
    algorithm: Algorithm,
    digits: u8,
    secret: Secret,

    issuer: String,
    label: String,
    image: Option<String>,

    issuer_default: String,
    label_default: String,
    image_default: Option<String>,

    // Provisioning inputs kept so the record form can be rebuilt.
    label_issuer: Option<String>,
    issuer_param: Option<String>,
    image_param: Option<String>,

    created_at: DateTime<Utc>,
}

impl Token {
    /// Build a token from a manual form, applying the same field rules as
    /// the URI parser.
    pub fn from_params(params: TokenParams) -> Result<Self, OtpError> {
        Self::assemble(
            RawToken {
                otp_type: params.otp_type,
                secret: params.secret,
                algorithm: params.algorithm.unwrap_or_default(),
                digits: params.digits,
                period: params.period,
                counter: params.counter,
                label_issuer: None,
                issuer_param: params.issuer,
                label: params.label,
                image: params.image,
            },
            None,
        )
    }

    /// Validate fields and compute defaults. A fresh uid is generated
    /// unless one is supplied.
    pub(crate) fn assemble(raw: RawToken, uid: Option<String>) -> Result<Self, OtpError> {
        let secret = Secret::new(raw.secret)?;

        let digits = raw.digits.unwrap_or(MIN_DIGITS);
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits) {
            return Err(OtpError::new(
                OtpErrorKind::InvalidDigits,
                format!("Digits must be between {} and {}, got {}", MIN_DIGITS, MAX_DIGITS, digits),
            ));
        }

        let kind = match raw.otp_type {
            OtpType::Hotp => {
                let counter = raw.counter.ok_or_else(|| {
                    OtpError::new(OtpErrorKind::MissingCounter, "HOTP token requires a counter")
                })?;
                OtpKind::Hotp { counter }
            }
            OtpType::Totp => {
                let period = raw.period.unwrap_or(DEFAULT_PERIOD);
                if period == 0 {
                    return Err(OtpError::new(OtpErrorKind::InvalidPeriod, "Period must be positive"));
                }
                OtpKind::Totp { period }
            }
        };

        // The query issuer wins for display; the default is the label-issuer.
        let issuer = raw
            .issuer_param
            .clone()
            .or_else(|| raw.label_issuer.clone())
            .unwrap_or_default();
        let issuer_default = raw.label_issuer.clone().unwrap_or_default();
        let label_default = raw.label.clone();
        let image_default = icons::default_image_for(&issuer);

        Ok(Self {
            uid: uid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            kind,
            algorithm: raw.algorithm,
            digits,
            secret,
            issuer,
            label: label_default.clone(),
            image: raw.image.clone(),
            issuer_default,
            label_default,
            image_default,
            label_issuer: raw.label_issuer,
            issuer_param: raw.issuer_param,
            image_param: raw.image,
            created_at: Utc::now().trunc_subsecs(0),
        })
    }

    /// New snapshot with edited display fields; the uid is unchanged.
    pub fn with_display(&self, edit: DisplayEdit) -> Self {
        let mut next = self.clone();
        next.issuer = edit.issuer.unwrap_or_else(|| self.provisioned_issuer().to_string());
        next.label = edit.label.unwrap_or_else(|| self.label_default.clone());
        next.image = edit.image.or_else(|| self.image_param.clone());
        next
    }

    pub(crate) fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn kind(&self) -> OtpKind {
        self.kind
    }

    pub fn otp_type(&self) -> OtpType {
        self.kind.otp_type()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn digits(&self) -> u8 {
        self.digits
    }

    /// TOTP step in seconds; `None` for HOTP.
    pub fn period(&self) -> Option<u32> {
        match self.kind {
            OtpKind::Totp { period } => Some(period),
            OtpKind::Hotp { .. } => None,
        }
    }

    /// Counter the token was provisioned with; `None` for TOTP.
    pub fn initial_counter(&self) -> Option<u64> {
        match self.kind {
            OtpKind::Hotp { counter } => Some(counter),
            OtpKind::Totp { .. } => None,
        }
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Explicit image reference (from the URI or a user edit).
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn issuer_default(&self) -> &str {
        &self.issuer_default
    }

    pub fn label_default(&self) -> &str {
        &self.label_default
    }

    pub fn image_default(&self) -> Option<&str> {
        self.image_default.as_deref()
    }

    /// Image to render: the explicit one, else the built-in icon.
    pub fn display_image(&self) -> Option<&str> {
        self.image().or_else(|| self.image_default())
    }

    /// Issuer the token was provisioned with: the query issuer, else the
    /// label-issuer.
    pub(crate) fn provisioned_issuer(&self) -> &str {
        self.issuer_param()
            .or_else(|| self.label_issuer())
            .unwrap_or_default()
    }

    pub(crate) fn label_issuer(&self) -> Option<&str> {
        self.label_issuer.as_deref()
    }

    pub(crate) fn issuer_param(&self) -> Option<&str> {
        self.issuer_param.as_deref()
    }

    pub(crate) fn image_param(&self) -> Option<&str> {
        self.image_param.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Stable lookup key.
    pub fn identity(&self) -> TokenIdentity {
        TokenIdentity {
            otp_type: self.otp_type(),
            issuer: self.provisioned_issuer().to_string(),
            label: self.label_default.clone(),
        }
    }

    /// Display name: "Issuer (label)" or just "label".
    pub fn display_name(&self) -> String {
        if self.issuer.is_empty() {
            self.label.clone()
        } else {
            format!("{} ({})", self.issuer, self.label)
        }
    }

    /// Secret-free view for rendering.
    pub fn view(&self) -> TokenView {
        TokenView {
            uid: self.uid.clone(),
            otp_type: self.otp_type(),
            issuer: self.issuer.clone(),
            label: self.label.clone(),
            issuer_default: self.issuer_default.clone(),
            label_default: self.label_default.clone(),
            image: self.display_image().map(str::to_string),
            image_default: self.image_default.clone(),
            algorithm: self.algorithm,
            digits: self.digits,
            period: self.period(),
            created_at: self.created_at,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Rendering view
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the UI layer receives about a token. Carries no secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenView {
    pub uid: String,
    pub otp_type: OtpType,
    pub issuer: String,
    pub label: String,
    pub issuer_default: String,
    pub label_default: String,
    pub image: Option<String>,
    pub image_default: Option<String>,
    pub algorithm: Algorithm,
    pub digits: u8,
    pub period: Option<u32>,
    pub created_at: DateTime<Utc>,
}
