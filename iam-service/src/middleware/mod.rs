pub mod access;
pub mod auth;

pub use access::{require_access, AccessRule};
pub use auth::{auth_middleware, verification_auth_middleware, AuthContext, AuthPrincipal};
