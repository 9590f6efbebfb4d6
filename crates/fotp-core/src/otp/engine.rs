//! Code generation over a [`Token`] and a [`SecretStore`].
//!
//! `peek` never writes. `advance` is the only path that moves an HOTP
//! counter: it reads the stored counter, computes the code at that value,
//! persists `counter + 1` and only then returns the pre-increment code.
//! Calls to `advance` for the same uid are serialised by a per-uid lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::otp::core;
use crate::otp::store::SecretStore;
use crate::otp::token::{OtpKind, Token};
use crate::otp::types::*;

/// Computes HOTP/TOTP codes for tokens.
#[derive(Debug, Default)]
pub struct CodeEngine {
    config: EngineConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CodeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── HOTP ─────────────────────────────────────────────────────

    /// Code for the token's current state without side effects. For HOTP
    /// this is the code at the stored counter (for redisplay); for TOTP
    /// it is the code for `now`.
    pub fn peek(&self, token: &Token, store: &dyn SecretStore, now: u64) -> Result<Code, OtpError> {
        match token.kind() {
            OtpKind::Totp { .. } => self.totp(token, now),
            OtpKind::Hotp { .. } => {
                let counter = read_counter(store, token.uid())?;
                Ok(hotp_code(token, counter, now))
            }
        }
    }

    /// Issue a new HOTP code, persisting the incremented counter first.
    ///
    /// Fails without returning a code if the counter cannot be read or
    /// written, or if it is already at `u64::MAX`.
    pub fn advance(&self, token: &Token, store: &dyn SecretStore, now: u64) -> Result<Code, OtpError> {
        if token.otp_type() != OtpType::Hotp {
            return Err(OtpError::new(
                OtpErrorKind::InvalidInput,
                "Only HOTP tokens have a counter to advance",
            ));
        }

        let lock = self.lock_for(token.uid())?;
        let _guard = lock
            .lock()
            .map_err(|_| OtpError::new(OtpErrorKind::InvalidInput, "Token lock poisoned"))?;

        let counter = read_counter(store, token.uid())?;
        let next = counter.checked_add(1).ok_or_else(|| {
            OtpError::new(OtpErrorKind::InvalidCounter, "HOTP counter exhausted")
                .with_detail(format!("token {}", token.uid()))
        })?;
        let code = hotp_code(token, counter, now);

        if let Err(e) = store.set_counter(token.uid(), next) {
            log::warn!("failed to persist counter for token {}: {}", token.uid(), e);
            return Err(e);
        }
        log::debug!("advanced token {} counter to {}", token.uid(), next);
        Ok(code)
    }

    /// User-requested code: `advance` for HOTP, the time code for TOTP.
    pub fn generate(&self, token: &Token, store: &dyn SecretStore, now: u64) -> Result<Code, OtpError> {
        match token.kind() {
            OtpKind::Hotp { .. } => self.advance(token, store, now),
            OtpKind::Totp { .. } => self.totp(token, now),
        }
    }

    // ── TOTP ─────────────────────────────────────────────────────

    /// TOTP code for `now` with its half-open validity window.
    pub fn totp(&self, token: &Token, now: u64) -> Result<Code, OtpError> {
        let period = totp_period(token)?;
        let step = core::time_step_at(now, period);
        let (valid_from, valid_until) = core::window_at(now, period);
        Ok(Code {
            value: core::hotp_raw(token.secret().as_bytes(), step, token.digits(), token.algorithm()),
            issued_at: now,
            valid_from,
            valid_until: Some(valid_until),
            counter: step,
        })
    }

    /// Seconds left in the current TOTP window; `None` for HOTP.
    pub fn remaining_seconds(&self, token: &Token, now: u64) -> Option<u64> {
        token
            .period()
            .map(|period| core::seconds_remaining_at(now, period))
    }

    // ── Verification ─────────────────────────────────────────────

    /// Check a code. TOTP accepts `totp_skew_steps` steps either side of
    /// `now`; HOTP looks `hotp_lookahead` counters ahead of the stored one
    /// without moving it.
    pub fn verify(
        &self,
        token: &Token,
        store: &dyn SecretStore,
        code: &str,
        now: u64,
    ) -> Result<VerifyResult, OtpError> {
        let code = code.trim();
        if code.len() != token.digits() as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(VerifyResult::rejected());
        }

        let candidates: Vec<(i64, u64)> = match token.kind() {
            OtpKind::Totp { period } => {
                let step = core::time_step_at(now, period);
                let skew = self.config.totp_skew_steps as i64;
                (-skew..=skew)
                    .filter_map(|d| offset(step, d).map(|s| (d, s)))
                    .collect()
            }
            OtpKind::Hotp { .. } => {
                let counter = read_counter(store, token.uid())?;
                (0..=self.config.hotp_lookahead as i64)
                    .filter_map(|d| offset(counter, d).map(|c| (d, c)))
                    .collect()
            }
        };

        for (drift, counter) in candidates {
            let expected =
                core::hotp_raw(token.secret().as_bytes(), counter, token.digits(), token.algorithm());
            if core::constant_time_eq(expected.as_bytes(), code.as_bytes()) {
                return Ok(VerifyResult {
                    valid: true,
                    drift,
                    matched_counter: Some(counter),
                });
            }
        }
        Ok(VerifyResult::rejected())
    }

    /// Random secret of the configured length.
    pub fn generate_secret(&self) -> Vec<u8> {
        core::generate_secret(self.config.default_secret_len)
    }

    /// Drop the advance lock for a removed token.
    pub fn forget(&self, uid: &str) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(uid);
        }
    }

    fn lock_for(&self, uid: &str) -> Result<Arc<Mutex<()>>, OtpError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| OtpError::new(OtpErrorKind::InvalidInput, "Lock table poisoned"))?;
        Ok(locks.entry(uid.to_string()).or_default().clone())
    }
}

fn read_counter(store: &dyn SecretStore, uid: &str) -> Result<u64, OtpError> {
    store.get_counter(uid).map_err(|e| {
        log::warn!("failed to read counter for token {}: {}", uid, e);
        e
    })
}

fn hotp_code(token: &Token, counter: u64, now: u64) -> Code {
    Code {
        value: core::hotp_raw(token.secret().as_bytes(), counter, token.digits(), token.algorithm()),
        issued_at: now,
        valid_from: now,
        valid_until: None,
        counter,
    }
}

fn totp_period(token: &Token) -> Result<u32, OtpError> {
    token.period().ok_or_else(|| {
        OtpError::new(OtpErrorKind::InvalidInput, "Token is not time-based")
    })
}

fn offset(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}
