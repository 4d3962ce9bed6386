//! Accounts and sessions
//!
//! - Argon2id password hashes
//! - Opaque session tokens, stored hashed, carried by cookie or Bearer header
//! - Middleware that attaches the signed-in user to protected requests

pub mod middleware;
pub mod password;
pub mod session;

pub use middleware::{require_session, AuthenticatedUser};
pub use session::{IssuedSession, SessionStore, SESSION_COOKIE};
