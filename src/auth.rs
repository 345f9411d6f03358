//! Authentication collaborator.
//!
//! The state machines only need a stable [`UserId`]; everything else about
//! accounts lives behind [`Authenticator`].

use crate::domain::UserId;
use crate::persistence::{atomic_write, read_file};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Shortest password accepted at sign-up
pub const MIN_PASSWORD_LEN: usize = 6;

/// Result of an authentication call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl AuthOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> AuthOutcome;

    async fn sign_up(&self, email: &str, password: &str) -> AuthOutcome;

    async fn sign_out(&self) -> AuthOutcome;

    async fn sign_in_with_oauth(&self, provider: &str) -> AuthOutcome;

    async fn reset_password(&self, email: &str) -> AuthOutcome;

    /// The signed-in user, if any
    fn current_user(&self) -> Option<UserId>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    user_id: UserId,
    email: String,
    salt: String,
    digest: String,
}

impl Account {
    fn new(email: String, password: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = digest(&salt, password);
        Self {
            user_id: UserId::generate(),
            email,
            salt,
            digest,
        }
    }

    fn verify(&self, password: &str) -> bool {
        digest(&self.salt, password) == self.digest
    }
}

/// Contents of auth.json
#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthState {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    current: Option<UserId>,
}

/// Single-machine accounts stored next to the data
pub struct LocalAuth {
    path: PathBuf,
    state: Mutex<AuthState>,
}

impl LocalAuth {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = read_file(&path)?;
        let state = if content.trim().is_empty() {
            AuthState::default()
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid auth file: {}", path.display()))?
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, state: &AuthState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        atomic_write(&self.path, &json)
    }

    /// Persist `state`, turning a write failure into a failed outcome
    fn commit(&self, state: &AuthState) -> AuthOutcome {
        match self.save(state) {
            Ok(()) => AuthOutcome::ok(),
            Err(err) => {
                tracing::warn!(error = %format!("{:#}", err), "failed to save auth state");
                AuthOutcome::failed(format!("{:#}", err))
            }
        }
    }
}

#[async_trait]
impl Authenticator for LocalAuth {
    async fn sign_in(&self, email: &str, password: &str) -> AuthOutcome {
        let email = normalize_email(email);
        let mut state = self.lock();
        let Some(user_id) = state
            .accounts
            .iter()
            .find(|a| a.email == email && a.verify(password))
            .map(|a| a.user_id.clone())
        else {
            return AuthOutcome::failed("Invalid email or password");
        };

        tracing::info!(user = %user_id, "signed in");
        state.current = Some(user_id);
        self.commit(&state)
    }

    async fn sign_up(&self, email: &str, password: &str) -> AuthOutcome {
        let email = normalize_email(email);
        if !email.contains('@') {
            return AuthOutcome::failed("Enter a valid email address");
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return AuthOutcome::failed(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            ));
        }

        let mut state = self.lock();
        if state.accounts.iter().any(|a| a.email == email) {
            return AuthOutcome::failed("An account with this email already exists");
        }

        let account = Account::new(email, password);
        tracing::info!(user = %account.user_id, "signed up");
        state.current = Some(account.user_id.clone());
        state.accounts.push(account);
        self.commit(&state)
    }

    async fn sign_out(&self) -> AuthOutcome {
        let mut state = self.lock();
        if state.current.take().is_none() {
            return AuthOutcome::ok();
        }
        tracing::info!("signed out");
        self.commit(&state)
    }

    async fn sign_in_with_oauth(&self, provider: &str) -> AuthOutcome {
        AuthOutcome::failed(format!(
            "Sign-in with {} is not available for local accounts",
            provider
        ))
    }

    async fn reset_password(&self, email: &str) -> AuthOutcome {
        let email = normalize_email(email);
        if self.lock().accounts.iter().any(|a| a.email == email) {
            tracing::info!(%email, "password reset requested");
            AuthOutcome::ok()
        } else {
            AuthOutcome::failed("No account found for that email")
        }
    }

    fn current_user(&self) -> Option<UserId> {
        self.lock().current.clone()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}
