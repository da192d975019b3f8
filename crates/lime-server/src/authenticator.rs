//! In-memory credential store.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use lime_channel::{AuthenticationResult, Authenticator};
use lime_core::{Authentication, DomainRole, Identity};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Account {
    password: Option<String>,
    key: Option<String>,
    role: DomainRole,
}

/// Authenticates identities against credentials held in memory.
///
/// Accounts may have a password, a key, or both. Guests are refused
/// unless enabled with [`with_guests`](Self::with_guests).
#[derive(Debug, Default)]
pub struct MemoryAuthenticator {
    accounts: RwLock<HashMap<Identity, Account>>,
    guest_role: Option<DomainRole>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: accept the guest scheme with the given role.
    pub fn with_guests(mut self, role: DomainRole) -> Self {
        self.guest_role = Some(role);
        self
    }

    /// Sets the password for `identity`, creating the account if needed.
    pub fn set_password(&self, identity: Identity, password: impl Into<String>, role: DomainRole) {
        let mut accounts = self.write();
        let account = accounts.entry(identity).or_default();
        account.password = Some(password.into());
        account.role = role;
    }

    /// Sets the key for `identity`, creating the account if needed.
    pub fn set_key(&self, identity: Identity, key: impl Into<String>, role: DomainRole) {
        let mut accounts = self.write();
        let account = accounts.entry(identity).or_default();
        account.key = Some(key.into());
        account.role = role;
    }

    /// Removes an account. Returns true when it existed.
    pub fn remove(&self, identity: &Identity) -> bool {
        self.write().remove(identity).is_some()
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn check(&self, identity: &Identity, authentication: &Authentication) -> AuthenticationResult {
        if let Authentication::Guest = authentication {
            return match self.guest_role {
                Some(role) => AuthenticationResult::Success(role),
                None => AuthenticationResult::Failure,
            };
        }

        let accounts = self.read();
        let Some(account) = accounts.get(identity) else {
            debug!(identity = %identity, "Unknown account");
            return AuthenticationResult::Failure;
        };

        let accepted = match authentication {
            Authentication::Plain { password } => account.password.as_deref() == Some(password),
            Authentication::Key { key } => account.key.as_deref() == Some(key),
            _ => false,
        };
        if accepted {
            AuthenticationResult::Success(account.role)
        } else {
            AuthenticationResult::Failure
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Identity, Account>> {
        self.accounts.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Identity, Account>> {
        self.accounts.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Authenticator for MemoryAuthenticator {
    async fn authenticate(
        &self,
        identity: &Identity,
        authentication: &Authentication,
    ) -> AuthenticationResult {
        self.check(identity, authentication)
    }
}
