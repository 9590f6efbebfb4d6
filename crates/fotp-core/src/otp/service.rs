//! High-level orchestrator: the ordered token list, the secret store and
//! the code engine behind one API.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::otp::core;
use crate::otp::engine::CodeEngine;
use crate::otp::store::{self, SecretStore};
use crate::otp::token::{DisplayEdit, Token, TokenParams, TokenView};
use crate::otp::types::*;
use crate::otp::uri;

/// Shared service handle for async callers.
pub type TokenServiceState = Arc<Mutex<TokenService>>;

/// Central token service. Tokens are kept newest first.
pub struct TokenService {
    tokens: Vec<Token>,
    store: Arc<dyn SecretStore>,
    engine: CodeEngine,
}

impl TokenService {
    /// Create a service wrapped in `Arc<Mutex<_>>` with default engine
    /// settings.
    pub fn new(store: Arc<dyn SecretStore>) -> TokenServiceState {
        Arc::new(Mutex::new(Self::with_config(store, EngineConfig::default())))
    }

    pub fn with_config(store: Arc<dyn SecretStore>, config: EngineConfig) -> Self {
        Self {
            tokens: Vec::new(),
            store,
            engine: CodeEngine::with_config(config),
        }
    }

    /// Rebuild a service from persisted records (as produced by
    /// [`records`](Self::records)), reading secrets from `store`.
    pub fn restore(
        store: Arc<dyn SecretStore>,
        config: EngineConfig,
        records: &[String],
    ) -> Result<Self, OtpError> {
        let mut svc = Self::with_config(store, config);
        for record in records {
            let token = Token::from_record(record, svc.store.as_ref())?;
            svc.tokens.push(token);
        }
        log::info!("restored {} tokens", svc.tokens.len());
        Ok(svc)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    //  Token list
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Add a token from a scanned or pasted provisioning URI.
    pub fn import_uri(&mut self, uri_str: &str) -> Result<TokenView, OtpError> {
        let token = uri::parse_uri(uri_str)?;
        self.add_token(token)
    }

    /// Add a token from the manual entry form.
    pub fn add_manual(&mut self, params: TokenParams) -> Result<TokenView, OtpError> {
        let token = Token::from_params(params)?;
        self.add_token(token)
    }

    fn add_token(&mut self, token: Token) -> Result<TokenView, OtpError> {
        let identity = token.identity();
        if self.tokens.iter().any(|t| t.identity() == identity) {
            return Err(OtpError::new(
                OtpErrorKind::DuplicateToken,
                format!("Token already exists: {}", token.display_name()),
            ));
        }
        store::register_token(self.store.as_ref(), &token)?;
        let view = token.view();
        self.tokens.insert(0, token);
        Ok(view)
    }

    /// Remove a token and its stored secret.
    pub fn remove(&mut self, uid: &str) -> Result<TokenView, OtpError> {
        let pos = self.position(uid)?;
        self.store.remove(uid)?;
        self.engine.forget(uid);
        let token = self.tokens.remove(pos);
        log::info!("removed token {}", uid);
        Ok(token.view())
    }

    /// Move the token at `from` to position `to`.
    pub fn move_token(&mut self, from: usize, to: usize) -> Result<(), OtpError> {
        let len = self.tokens.len();
        if from >= len || to >= len {
            return Err(OtpError::new(
                OtpErrorKind::InvalidInput,
                format!("Index out of range: {} -> {} (len {})", from, to, len),
            ));
        }
        let token = self.tokens.remove(from);
        self.tokens.insert(to, token);
        Ok(())
    }

    /// Replace display fields; `None` in `edit` restores the default.
    pub fn edit_display(&mut self, uid: &str, edit: DisplayEdit) -> Result<TokenView, OtpError> {
        let pos = self.position(uid)?;
        let edited = self.tokens[pos].with_display(edit);
        let view = edited.view();
        self.tokens[pos] = edited;
        Ok(view)
    }

    /// Views of every token, in display order.
    pub fn list(&self) -> Vec<TokenView> {
        self.tokens.iter().map(Token::view).collect()
    }

    pub fn get(&self, uid: &str) -> Result<TokenView, OtpError> {
        self.token(uid).map(Token::view)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Secret-free records for every token, in display order.
    pub fn records(&self) -> Vec<String> {
        self.tokens.iter().map(Token::to_record).collect()
    }

    /// Provisioning URI for a token, with the live HOTP counter.
    pub fn export_uri(&self, uid: &str) -> Result<String, OtpError> {
        let token = self.token(uid)?;
        let counter = match token.otp_type() {
            OtpType::Hotp => Some(self.store.get_counter(uid)?),
            OtpType::Totp => None,
        };
        Ok(token.to_uri(counter))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    //  Codes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Current code without side effects (redisplay).
    pub fn peek_code(&self, uid: &str) -> Result<Code, OtpError> {
        self.peek_code_at(uid, core::current_unix_time())
    }

    pub fn peek_code_at(&self, uid: &str, now: u64) -> Result<Code, OtpError> {
        self.engine.peek(self.token(uid)?, self.store.as_ref(), now)
    }

    /// A fresh code. Consumes one HOTP counter value.
    pub fn next_code(&self, uid: &str) -> Result<Code, OtpError> {
        self.next_code_at(uid, core::current_unix_time())
    }

    pub fn next_code_at(&self, uid: &str, now: u64) -> Result<Code, OtpError> {
        self.engine.generate(self.token(uid)?, self.store.as_ref(), now)
    }

    /// Seconds until the current TOTP code expires; `None` for HOTP.
    pub fn remaining_seconds(&self, uid: &str) -> Result<Option<u64>, OtpError> {
        let token = self.token(uid)?;
        Ok(self.engine.remaining_seconds(token, core::current_unix_time()))
    }

    /// Verify a code against the token without changing its counter.
    pub fn verify_code(&self, uid: &str, code: &str, now: u64) -> Result<VerifyResult, OtpError> {
        self.engine.verify(self.token(uid)?, self.store.as_ref(), code, now)
    }

    /// Random Base32 secret of the configured length.
    pub fn generate_secret(&self) -> String {
        core::encode_secret(&self.engine.generate_secret())
    }

    // ── helpers ──────────────────────────────────────────────────

    fn position(&self, uid: &str) -> Result<usize, OtpError> {
        self.tokens
            .iter()
            .position(|t| t.uid() == uid)
            .ok_or_else(|| OtpError::new(OtpErrorKind::NotFound, format!("Token not found: {}", uid)))
    }

    fn token(&self, uid: &str) -> Result<&Token, OtpError> {
        self.position(uid).map(|pos| &self.tokens[pos])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::store::MemoryStore;

    const HOTP_URI: &str = "otpauth://hotp/Acme:bob?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ&counter=0";

    fn new_svc() -> (TokenService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let svc = TokenService::with_config(store.clone(), EngineConfig::default());
        (svc, store)
    }

    #[tokio::test]
    async fn shared_state_imports_and_lists() {
        let state = TokenService::new(Arc::new(MemoryStore::new()));
        let view = state
            .lock()
            .await
            .import_uri("otpauth://totp/GitHub:alice?secret=JBSWY3DPEHPK3PXP&issuer=GitHub")
            .unwrap();
        let svc = state.lock().await;
        assert_eq!(svc.len(), 1);
        assert_eq!(svc.get(&view.uid).unwrap().label, "alice");
        assert_eq!(svc.peek_code(&view.uid).unwrap().value.len(), 6);
        assert!(svc.remaining_seconds(&view.uid).unwrap().is_some());
    }

    #[tokio::test]
    async fn new_tokens_go_first() {
        let (mut svc, _) = new_svc();
        let a = svc.import_uri("otpauth://totp/a?secret=JBSWY3DPEHPK3PXP").unwrap();
        let b = svc.import_uri("otpauth://totp/b?secret=JBSWY3DPEHPK3PXP").unwrap();
        let order: Vec<String> = svc.list().into_iter().map(|v| v.uid).collect();
        assert_eq!(order, vec![b.uid, a.uid]);
    }

    #[tokio::test]
    async fn duplicate_identity_is_rejected() {
        let (mut svc, store) = new_svc();
        svc.import_uri(HOTP_URI).unwrap();
        let err = svc.import_uri(HOTP_URI).unwrap_err();
        assert_eq!(err.kind, OtpErrorKind::DuplicateToken);
        assert_eq!(svc.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn add_manual_token() {
        let (mut svc, _) = new_svc();
        let params =
            TokenParams::with_base32_secret(OtpType::Totp, "ops", "JBSWY3DPEHPK3PXP").unwrap();
        let view = svc.add_manual(params.with_issuer("Red Hat").with_digits(8)).unwrap();
        assert_eq!(view.digits, 8);
        assert_eq!(view.image.as_deref(), Some("icon://fa-redhat"));
    }

    #[tokio::test]
    async fn next_code_advances_hotp_and_peek_does_not() {
        let (mut svc, store) = new_svc();
        let uid = svc.import_uri(HOTP_URI).unwrap().uid;
        assert_eq!(svc.peek_code(&uid).unwrap().value, "755224");
        assert_eq!(svc.next_code(&uid).unwrap().value, "755224");
        assert_eq!(svc.next_code(&uid).unwrap().value, "287082");
        assert_eq!(svc.peek_code(&uid).unwrap().value, "359152");
        assert_eq!(store.get_counter(&uid).unwrap(), 2);
        assert_eq!(svc.remaining_seconds(&uid).unwrap(), None);
    }

    #[tokio::test]
    async fn remove_drops_secret() {
        let (mut svc, store) = new_svc();
        let uid = svc.import_uri(HOTP_URI).unwrap().uid;
        svc.remove(&uid).unwrap();
        assert!(svc.is_empty());
        assert!(store.is_empty());
        assert_eq!(svc.get(&uid).unwrap_err().kind, OtpErrorKind::NotFound);
        assert_eq!(svc.remove(&uid).unwrap_err().kind, OtpErrorKind::NotFound);
    }

    #[tokio::test]
    async fn move_token_reorders() {
        let (mut svc, _) = new_svc();
        for label in ["a", "b", "c"] {
            svc.import_uri(&format!("otpauth://totp/{}?secret=JBSWY3DPEHPK3PXP", label))
                .unwrap();
        }
        svc.move_token(0, 2).unwrap();
        let labels: Vec<String> = svc.list().into_iter().map(|v| v.label).collect();
        assert_eq!(labels, vec!["b", "a", "c"]);
        assert_eq!(svc.move_token(0, 3).unwrap_err().kind, OtpErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn edit_display_keeps_uid() {
        let (mut svc, _) = new_svc();
        let uid = svc.import_uri(HOTP_URI).unwrap().uid;
        let view = svc
            .edit_display(
                &uid,
                DisplayEdit {
                    label: Some("robert".into()),
                    ..DisplayEdit::default()
                },
            )
            .unwrap();
        assert_eq!(view.uid, uid);
        assert_eq!(view.label, "robert");
        assert_eq!(view.label_default, "bob");
        assert_eq!(view.issuer, "Acme");
    }

    #[tokio::test]
    async fn records_restore_the_list() {
        let (mut svc, store) = new_svc();
        let hotp = svc.import_uri(HOTP_URI).unwrap().uid;
        svc.import_uri("otpauth://totp/Slack:me?secret=JBSWY3DPEHPK3PXP").unwrap();
        svc.next_code(&hotp).unwrap();

        let records = svc.records();
        let restored = TokenService::restore(store, EngineConfig::default(), &records).unwrap();
        assert_eq!(restored.list(), svc.list());
        // The counter lives in the store, so restoring does not rewind it.
        assert_eq!(restored.peek_code(&hotp).unwrap().value, "287082");
    }

    #[tokio::test]
    async fn export_uri_uses_live_counter() {
        let (mut svc, _) = new_svc();
        let uid = svc.import_uri(HOTP_URI).unwrap().uid;
        svc.next_code(&uid).unwrap();
        svc.next_code(&uid).unwrap();
        let uri = svc.export_uri(&uid).unwrap();
        assert!(uri.contains("counter=2"));
        assert!(uri.contains("secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ"));
    }

    #[tokio::test]
    async fn verify_code_through_service() {
        let (mut svc, store) = new_svc();
        let uid = svc.import_uri(HOTP_URI).unwrap().uid;
        let result = svc.verify_code(&uid, "969429", 0).unwrap();
        assert!(result.valid);
        assert_eq!(result.matched_counter, Some(3));
        assert_eq!(store.get_counter(&uid).unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_store_write_rejects_import() {
        let (mut svc, store) = new_svc();
        store.set_fail_writes(true);
        let err = svc.import_uri(HOTP_URI).unwrap_err();
        assert_eq!(err.kind, OtpErrorKind::StoreUnavailable);
        assert!(svc.is_empty());
    }

    #[tokio::test]
    async fn generate_secret_is_base32() {
        let (svc, _) = new_svc();
        let secret = svc.generate_secret();
        assert!(core::is_valid_base32(&secret));
        assert_eq!(core::decode_secret(&secret).unwrap().len(), 20);
    }
}
