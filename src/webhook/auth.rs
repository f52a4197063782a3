//! Shared-secret authentication for provider callbacks.

use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use crate::error::WebhookError;

/// How a request was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Verified,
    /// No secret configured; every request is accepted.
    Unauthenticated,
}

/// Accepts `<secret>` or `Bearer <secret>` in the authorization header.
pub fn verify(secret: Option<&SecretString>, header: Option<&str>) -> Result<AuthMode, WebhookError> {
    let Some(secret) = secret else {
        tracing::warn!("Webhook secret not configured; accepting unauthenticated callback");
        return Ok(AuthMode::Unauthenticated);
    };

    let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) else {
        return Err(WebhookError::Unauthorized);
    };
    let presented = match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
        _ => header,
    };

    let expected = secret.expose_secret().as_bytes();
    if bool::from(presented.as_bytes().ct_eq(expected)) {
        Ok(AuthMode::Verified)
    } else {
        Err(WebhookError::Unauthorized)
    }
}
