//! `otpauth://` URI parsing and generation per the Google Authenticator
//! key-URI format:
//! <https://github.com/google/google-authenticator/wiki/Key-Uri-Format>
//!
//! Format: `otpauth://TYPE/[ISSUER:]LABEL?secret=BASE32&issuer=ISSUER&algorithm=SHA1&digits=6&period=30`
//!
//! The same syntax, minus `secret`, is used for the persisted record form of
//! a token: the secret stays in the [`SecretStore`] and the record carries
//! `uid`, `created` and any display edits instead.

use std::collections::HashMap;

use chrono::TimeZone;

use crate::otp::core::{DEFAULT_PERIOD, MIN_DIGITS};
use crate::otp::store::SecretStore;
use crate::otp::token::{DisplayEdit, RawToken, Token};
use crate::otp::types::*;

const SCHEME: &str = "otpauth";

// Record-only parameters.
const PARAM_UID: &str = "uid";
const PARAM_CREATED: &str = "created";
const PARAM_ISSUER_EDIT: &str = "issueredit";
const PARAM_LABEL_EDIT: &str = "labeledit";
const PARAM_IMAGE_EDIT: &str = "imageedit";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Parse
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Syntactic pieces of an `otpauth://` URI, before field validation.
struct UriParts {
    otp_type: OtpType,
    label_issuer: Option<String>,
    label: String,
    /// Lowercased names; the first occurrence of a name wins.
    params: HashMap<String, String>,
}

impl UriParts {
    fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

fn malformed(msg: impl Into<String>) -> OtpError {
    OtpError::new(OtpErrorKind::MalformedUri, msg)
}

fn split_uri(uri: &str) -> Result<UriParts, OtpError> {
    let uri = uri.trim();
    if !uri.starts_with("otpauth:") {
        return Err(malformed(format!("Expected scheme '{}'", SCHEME)));
    }

    let url = url::Url::parse(uri).map_err(|e| malformed(format!("Invalid URI: {}", e)))?;

    let host = url
        .host_str()
        .ok_or_else(|| malformed("Missing OTP type in URI authority"))?;
    let otp_type = OtpType::from_host(host).ok_or_else(|| {
        OtpError::new(OtpErrorKind::UnsupportedType, format!("Unknown OTP type: {}", host))
    })?;

    let path = url.path();
    let path = url_decode(path.strip_prefix('/').unwrap_or(path));
    if path.is_empty() {
        return Err(malformed("Missing label"));
    }

    let (label_issuer, label) = match path.split_once(':') {
        Some((issuer, label)) => (Some(issuer.to_string()), label.trim_start().to_string()),
        None => (None, path),
    };

    // Only percent escapes are decoded; a literal '+' stays a '+'.
    let mut params = HashMap::new();
    for pair in url.query().unwrap_or_default().split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(url_decode(key).to_ascii_lowercase())
            .or_insert_with(|| url_decode(value));
    }

    Ok(UriParts {
        otp_type,
        label_issuer,
        label,
        params,
    })
}

/// Validate the typed fields. `secret` is supplied by the caller so the
/// record form can take it from a store instead of the query string.
fn raw_token(parts: &UriParts, secret: Vec<u8>) -> Result<RawToken, OtpError> {
    let algorithm = match parts.get("algorithm") {
        None => Algorithm::default(),
        Some(name) => Algorithm::from_uri_name(name).ok_or_else(|| {
            OtpError::new(
                OtpErrorKind::UnsupportedAlgorithm,
                format!("Unsupported algorithm: {}", name),
            )
        })?,
    };

    let digits = match parts.get("digits") {
        None => None,
        Some(d) => Some(d.trim().parse::<u8>().map_err(|_| {
            OtpError::new(OtpErrorKind::InvalidDigits, format!("Invalid digits: {}", d))
        })?),
    };

    let (period, counter) = match parts.otp_type {
        OtpType::Totp => {
            let period = match parts.get("period") {
                None => None,
                Some(p) => Some(p.trim().parse::<u32>().map_err(|_| {
                    OtpError::new(OtpErrorKind::InvalidPeriod, format!("Invalid period: {}", p))
                })?),
            };
            (period, None)
        }
        OtpType::Hotp => {
            let counter = match parts.get("counter") {
                None => None,
                Some(c) => Some(c.trim().parse::<u64>().map_err(|_| {
                    OtpError::new(OtpErrorKind::InvalidCounter, format!("Invalid counter: {}", c))
                })?),
            };
            (None, counter)
        }
    };

    Ok(RawToken {
        otp_type: parts.otp_type,
        secret,
        algorithm,
        digits,
        period,
        counter,
        label_issuer: parts.label_issuer.clone(),
        issuer_param: parts.get("issuer").map(str::to_string),
        label: parts.label.clone(),
        image: parts.get("image").map(str::to_string),
    })
}

/// Parse a provisioning URI into a new `Token` with a fresh uid.
pub fn parse_uri(uri: &str) -> Result<Token, OtpError> {
    let parts = split_uri(uri)?;
    let secret = parts.get("secret").ok_or_else(|| {
        OtpError::new(OtpErrorKind::InvalidSecret, "Missing 'secret' parameter")
    })?;
    let secret = crate::otp::core::decode_secret(secret)?;
    Token::assemble(raw_token(&parts, secret)?, None)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Generate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared URI layout: path, then parameters in a fixed order with
/// defaults omitted.
fn build(token: &Token, path: String, mut params: Vec<String>, counter: u64) -> String {
    if token.algorithm() != Algorithm::Sha1 {
        params.push(format!("algorithm={}", token.algorithm().uri_name()));
    }
    if token.digits() != MIN_DIGITS {
        params.push(format!("digits={}", token.digits()));
    }
    match token.period() {
        Some(period) if period != DEFAULT_PERIOD => params.push(format!("period={}", period)),
        Some(_) => {}
        None => params.push(format!("counter={}", counter)),
    }
    format!("{}://{}/{}?{}", SCHEME, token.otp_type(), path, params.join("&"))
}

fn label_path(issuer: Option<&str>, label: &str) -> String {
    match issuer {
        Some(iss) if !iss.is_empty() => format!("{}:{}", url_encode(iss), url_encode(label)),
        _ => url_encode(label),
    }
}

impl Token {
    /// Parse a provisioning URI. See [`parse_uri`].
    pub fn from_uri(uri: &str) -> Result<Self, OtpError> {
        parse_uri(uri)
    }

    /// Full provisioning URI, secret included, using the current display
    /// issuer and label. HOTP tokens need the live counter from the store;
    /// `None` falls back to the provisioning counter.
    pub fn to_uri(&self, counter: Option<u64>) -> String {
        let issuer = Some(self.issuer()).filter(|i| !i.is_empty());
        let mut params = vec![format!("secret={}", self.secret().to_base32())];
        if let Some(iss) = issuer {
            params.push(format!("issuer={}", url_encode(iss)));
        }
        if let Some(image) = self.image() {
            params.push(format!("image={}", url_encode(image)));
        }
        let counter = counter.or(self.initial_counter()).unwrap_or(0);
        build(self, label_path(issuer, self.label()), params, counter)
    }

    /// Secret-free record for application storage.
    pub fn to_record(&self) -> String {
        let mut params = Vec::new();
        if let Some(iss) = self.issuer_param() {
            params.push(format!("issuer={}", url_encode(iss)));
        }
        if let Some(image) = self.image_param() {
            params.push(format!("image={}", url_encode(image)));
        }
        params.push(format!("{}={}", PARAM_UID, url_encode(self.uid())));
        params.push(format!("{}={}", PARAM_CREATED, self.created_at().timestamp()));
        if self.issuer() != self.provisioned_issuer() {
            params.push(format!("{}={}", PARAM_ISSUER_EDIT, url_encode(self.issuer())));
        }
        if self.label() != self.label_default() {
            params.push(format!("{}={}", PARAM_LABEL_EDIT, url_encode(self.label())));
        }
        if let Some(image) = self.image().filter(|i| Some(*i) != self.image_param()) {
            params.push(format!("{}={}", PARAM_IMAGE_EDIT, url_encode(image)));
        }
        // An empty issuer prefix keeps a colon inside the label from being
        // read back as a separator.
        let path = match self.label_issuer() {
            Some(iss) => format!("{}:{}", url_encode(iss), url_encode(self.label_default())),
            None if self.label_default().contains(':') => {
                format!(":{}", url_encode(self.label_default()))
            }
            None => url_encode(self.label_default()),
        };
        build(self, path, params, self.initial_counter().unwrap_or(0))
    }

    /// Rebuild a token from [`to_record`](Self::to_record) output, reading
    /// its secret from `store`.
    pub fn from_record(record: &str, store: &dyn SecretStore) -> Result<Self, OtpError> {
        let parts = split_uri(record)?;
        let uid = parts
            .get(PARAM_UID)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| malformed("Record is missing 'uid'"))?
            .to_string();
        let secret = store.get_secret(&uid)?;

        let mut token = Token::assemble(raw_token(&parts, secret.as_bytes().to_vec())?, Some(uid))?;
        if let Some(created) = parts.get(PARAM_CREATED) {
            let secs = created
                .parse::<i64>()
                .map_err(|_| malformed(format!("Invalid 'created': {}", created)))?;
            if let Some(ts) = chrono::Utc.timestamp_opt(secs, 0).single() {
                token = token.with_created_at(ts);
            }
        }

        let edit = DisplayEdit {
            issuer: parts.get(PARAM_ISSUER_EDIT).map(str::to_string),
            label: parts.get(PARAM_LABEL_EDIT).map(str::to_string),
            image: parts.get(PARAM_IMAGE_EDIT).map(str::to_string),
        };
        Ok(token.with_display(edit))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  URL encoding helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn url_encode(s: &str) -> String {
    let mut output = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                output.push(byte as char);
            }
            _ => output.push_str(&format!("%{:02X}", byte)),
        }
    }
    output
}

/// Percent-decode a path segment or query component. Escapes are collected
/// as bytes so multi-byte UTF-8 survives; malformed escapes are kept
/// literally.
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
