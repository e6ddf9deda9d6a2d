//! Authentication gate run before a connection is upgraded.

use crate::auth::AuthError;
use crate::error::ApiError;
use crate::AppState;

/// A caller that passed the gate: verified identity plus display metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPeer {
    pub user_id: i64,
    pub display_name: String,
}

/// Verify the bearer credential from the upgrade request and resolve the
/// user's display name. Nothing is registered until both succeed.
pub async fn authenticate(
    state: &AppState,
    credential: Option<&str>,
) -> Result<AuthenticatedPeer, ApiError> {
    let credential = credential
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| reject(AuthError::new("Missing token parameter")))?;

    let user_id = state.verifier.verify(credential).await.map_err(reject)?;

    let display_name = state
        .users
        .display_name(user_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, user_id, "display name lookup failed");
            reject(AuthError::new("User lookup failed"))
        })?
        .ok_or_else(|| reject(AuthError::new("User not found")))?;

    Ok(AuthenticatedPeer {
        user_id,
        display_name,
    })
}

fn reject(err: AuthError) -> ApiError {
    tracing::debug!(reason = err.message, "gateway upgrade rejected");
    ApiError::unauthorized(err.message)
}
