//! # fotp-core – HOTP / TOTP token engine
//!
//! One-time password tokens as used by authenticator apps:
//!
//! - **RFC 4226 / 6238** – HOTP & TOTP generation with MD5, SHA-1, SHA-256, SHA-512
//! - **otpauth:// URIs** – Parsing & generation per the Google Authenticator key-URI format
//! - **Tokens** – Immutable snapshots with issuer / label / icon defaults and display edits
//! - **Counter discipline** – Side-effect-free `peek`, atomic store-backed `advance`
//! - **Secret stores** – Injected storage trait with in-memory and JSON-file backends
//! - **Service** – Ordered token list with async-shareable state

pub mod otp;
