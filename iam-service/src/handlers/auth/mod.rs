pub mod registration;
pub mod second_factor;
pub mod session;

pub use registration::register;
pub use second_factor::{disable, regenerate_backup_codes, setup, verify};
pub use session::login;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use service_core::middleware::client_ip;
use std::convert::Infallible;

use crate::models::ClientInfo;
use crate::AppState;

/// Caller address and user agent for the login audit trail.
pub struct RequestClient(pub ClientInfo);

#[async_trait]
impl FromRequestParts<AppState> for RequestClient {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ip_address = client_ip(
            &parts.headers,
            &parts.extensions,
            state.config.rate_limit.trust_forwarded_for,
        )
        .map(|ip| ip.to_string());
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(512).collect());

        Ok(RequestClient(ClientInfo {
            ip_address,
            user_agent,
        }))
    }
}
