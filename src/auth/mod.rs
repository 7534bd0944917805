//! Authentication
//!
//! Credentials live as ordinary documents in the reserved
//! `user_authenticate` resource and are compared as opaque strings.
//! A successful validation mints a signed, stateless bearer token with a
//! 30-day expiry; verification checks signature and expiry only, never the
//! database.

mod credentials;
mod tokens;

pub use credentials::{CredentialGate, AUTH_RESOURCE};
pub use tokens::{AuthError, Claims, TokenSigner, TOKEN_TTL_SECS};
