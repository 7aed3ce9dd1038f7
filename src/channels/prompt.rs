//! Console prompt used during first-time login.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::auth::CredentialKind;
use crate::error::AuthError;

/// Asks the operator for a credential.
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    async fn prompt(&self, kind: CredentialKind) -> Result<String, AuthError>;
}

/// Reads answers line by line from stdin, writing questions to stderr.
pub struct StdinPrompt {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinPrompt {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialPrompt for StdinPrompt {
    async fn prompt(&self, kind: CredentialKind) -> Result<String, AuthError> {
        let failed = |reason: String| AuthError::PromptFailed {
            kind: kind.to_string(),
            reason,
        };

        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(kind.question().as_bytes())
            .await
            .map_err(|e| failed(e.to_string()))?;
        stderr.flush().await.map_err(|e| failed(e.to_string()))?;

        let mut lines = self.lines.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(failed("stdin closed".into())),
            Err(e) => Err(failed(e.to_string())),
        }
    }
}
