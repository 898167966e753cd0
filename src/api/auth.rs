use std::collections::HashMap;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::config::AuthConfig;
use crate::errors::ScanError;
use crate::models::Identity;
use super::AppState;

/// Maps bearer tokens to identities.
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    owners: HashMap<String, String>,
    service_token: Option<String>,
}

impl TokenRegistry {
    pub fn from_config(auth: &AuthConfig) -> Self {
        Self {
            owners: auth.tokens
                .iter()
                .map(|t| (t.token.clone(), t.owner_id.clone()))
                .collect(),
            service_token: auth.service_token.clone().filter(|t| !t.is_empty()),
        }
    }

    pub fn resolve(&self, token: &str) -> Option<Identity> {
        if self.service_token.as_deref() == Some(token) {
            return Some(Identity::Service);
        }
        self.owners.get(token).map(|owner| Identity::Owner(owner.clone()))
    }
}

pub async fn api_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ScanError> {
    let auth_header = request.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok());

    let identity = match auth_header {
        Some(header) if header.starts_with("Bearer ") => {
            let token = header[7..].trim();
            state.tokens
                .resolve(token)
                .ok_or_else(|| ScanError::Unauthorized("Invalid API token".into()))?
        }
        _ => return Err(ScanError::Unauthorized("Missing Authorization header".into())),
    };

    debug!(service = identity.is_service(), "Request authenticated");
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Owner id of the caller, or `Forbidden` for the service identity.
pub fn require_owner(identity: &Identity) -> Result<&str, ScanError> {
    identity
        .owner_id()
        .ok_or_else(|| ScanError::Forbidden("this route requires an account token".into()))
}

pub fn require_service(identity: &Identity) -> Result<(), ScanError> {
    if identity.is_service() {
        Ok(())
    } else {
        Err(ScanError::Forbidden("status updates are reserved for the scan service".into()))
    }
}
