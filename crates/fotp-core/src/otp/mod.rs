//! OTP token engine: sub-modules.

pub mod types;
pub mod core;
pub mod icons;
pub mod token;
pub mod uri;
pub mod store;
pub mod engine;
pub mod service;

// Re-export top-level items for convenience.
pub use types::*;
pub use engine::CodeEngine;
pub use service::{TokenService, TokenServiceState};
pub use store::{register_token, JsonFileStore, MemoryStore, SecretStore};
pub use token::{DisplayEdit, OtpKind, Secret, Token, TokenIdentity, TokenParams, TokenView};
pub use uri::parse_uri;
