//! Credential validation used by server-side negotiation.

use async_trait::async_trait;
use lime_core::{Authentication, DomainRole, Identity};

/// Outcome of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationResult {
    /// The identity is authenticated with the given role.
    Success(DomainRole),
    /// The credentials were rejected.
    Failure,
    /// Another round is needed; the payload is sent to the client.
    Challenge(Authentication),
}

/// Validates credentials presented by a connecting client.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        identity: &Identity,
        authentication: &Authentication,
    ) -> AuthenticationResult;
}

/// Accepts every identity as a member. For tests and trusted networks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAuthenticator;

#[async_trait]
impl Authenticator for AllowAllAuthenticator {
    async fn authenticate(
        &self,
        _identity: &Identity,
        _authentication: &Authentication,
    ) -> AuthenticationResult {
        AuthenticationResult::Success(DomainRole::Member)
    }
}
