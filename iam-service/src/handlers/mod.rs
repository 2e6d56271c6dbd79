//! HTTP handlers for iam-service.

pub mod auth;
pub mod iam;
pub mod profile;

pub use auth::*;
pub use iam::*;
pub use profile::*;
