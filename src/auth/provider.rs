use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// The coordinator's view of the identity collaborator. The coordinator
/// never inspects the token, only whether one is present, and always
/// asks for a refresh before use.
pub trait CredentialProvider: Send + Sync {
    fn is_signed_in(&self) -> bool;
    fn bearer_token(&self) -> Option<String>;

    /// Updates the token, or clears sign-in state on failure.
    fn refresh_if_needed(&self) -> impl Future<Output = Result<(), AuthError>> + Send;
}

/// Bearer token supplied directly or read from a file. `refresh_if_needed`
/// re-reads the file so externally rotated tokens are picked up; a failed
/// read clears the signed-in state.
pub struct StaticTokenProvider {
    token_file: Option<PathBuf>,
    token: StdMutex<Option<String>>,
}

impl StaticTokenProvider {
    pub fn with_token(token: String) -> Self {
        StaticTokenProvider {
            token_file: None,
            token: StdMutex::new(Some(token)),
        }
    }

    pub fn from_file(path: PathBuf) -> Self {
        StaticTokenProvider {
            token_file: Some(path),
            token: StdMutex::new(None),
        }
    }

    pub fn signed_out() -> Self {
        StaticTokenProvider {
            token_file: None,
            token: StdMutex::new(None),
        }
    }
}

impl CredentialProvider for StaticTokenProvider {
    fn is_signed_in(&self) -> bool {
        self.token
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|t| !t.is_empty())
    }

    fn bearer_token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    async fn refresh_if_needed(&self) -> Result<(), AuthError> {
        let Some(path) = &self.token_file else {
            return Ok(());
        };
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let trimmed = content.trim().to_string();
                *self.token.lock().unwrap() = Some(trimmed);
                Ok(())
            }
            Err(e) => {
                *self.token.lock().unwrap() = None;
                Err(AuthError::RefreshFailed(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
}
