//! Interactive login.
//!
//! A [`LoginBackend`] says which credential it needs next; a
//! [`CredentialPrompt`] supplies it. The loop ends when the backend hands
//! back a ready [`Session`].

use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::channels::CredentialPrompt;
use crate::error::AuthError;

/// Wrong answers tolerated before the login is aborted.
pub const MAX_REJECTED_ANSWERS: u32 = 3;

/// A credential the login flow may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    PhoneNumber,
    VerificationCode,
    /// Two-factor password. May be left blank when none is set.
    Password,
    BotToken,
}

impl CredentialKind {
    pub fn question(&self) -> &'static str {
        match self {
            CredentialKind::PhoneNumber => "Please enter your phone number: ",
            CredentialKind::VerificationCode => "Please enter the code you received: ",
            CredentialKind::Password => "Please enter your 2FA password (if any): ",
            CredentialKind::BotToken => "Please enter your bot token: ",
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, CredentialKind::Password)
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CredentialKind::PhoneNumber => "phone number",
            CredentialKind::VerificationCode => "verification code",
            CredentialKind::Password => "2FA password",
            CredentialKind::BotToken => "bot token",
        };
        f.write_str(s)
    }
}

/// An authorized session credential.
#[derive(Debug, Clone)]
pub struct Session {
    credential: SecretString,
}

impl Session {
    pub fn new(credential: SecretString) -> Self {
        Self { credential }
    }

    pub fn expose(&self) -> &str {
        self.credential.expose_secret()
    }

    /// Serialized form to store as `SOURCE_SESSION_STRING`.
    pub fn save(&self) -> String {
        self.credential.expose_secret().to_string()
    }
}

/// What the backend needs next.
#[derive(Debug)]
pub enum LoginStep {
    Need(CredentialKind),
    Done(Session),
}

/// The service side of a login.
#[async_trait]
pub trait LoginBackend: Send {
    async fn next_step(&mut self) -> Result<LoginStep, AuthError>;

    /// Hand over an answer. Return `AuthError::Rejected` for a wrong answer
    /// that may be re-entered; any other error aborts the login.
    async fn submit(&mut self, kind: CredentialKind, answer: String) -> Result<(), AuthError>;
}

/// Result of submitting a login code.
#[derive(Debug)]
pub enum SignIn<P> {
    Done,
    /// The account has a 2FA password; check it with this token.
    PasswordRequired(P),
}

/// Account-level calls behind a phone number login.
#[async_trait]
pub trait AccountAuth: Send + Sync {
    type CodeToken: Send + Sync;
    type PasswordToken: Send + Sync;

    /// Ask the service to send a login code to `phone`.
    async fn request_code(&self, phone: &str) -> Result<Self::CodeToken, AuthError>;

    async fn sign_in(
        &self,
        token: &Self::CodeToken,
        code: &str,
    ) -> Result<SignIn<Self::PasswordToken>, AuthError>;

    async fn check_password(
        &self,
        token: Self::PasswordToken,
        password: &str,
    ) -> Result<(), AuthError>;

    /// Serialize the now-authorized session.
    fn export_session(&self) -> Result<Session, AuthError>;
}

/// User-account login: phone number, then the code sent to it, then the
/// 2FA password when the account has one.
pub struct UserLogin<A: AccountAuth> {
    api: A,
    code_token: Option<A::CodeToken>,
    password_token: Option<A::PasswordToken>,
    signed_in: bool,
}

impl<A: AccountAuth> UserLogin<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            code_token: None,
            password_token: None,
            signed_in: false,
        }
    }
}

#[async_trait]
impl<A: AccountAuth> LoginBackend for UserLogin<A> {
    async fn next_step(&mut self) -> Result<LoginStep, AuthError> {
        Ok(if self.signed_in {
            LoginStep::Done(self.api.export_session()?)
        } else if self.password_token.is_some() {
            LoginStep::Need(CredentialKind::Password)
        } else if self.code_token.is_some() {
            LoginStep::Need(CredentialKind::VerificationCode)
        } else {
            LoginStep::Need(CredentialKind::PhoneNumber)
        })
    }

    async fn submit(&mut self, kind: CredentialKind, answer: String) -> Result<(), AuthError> {
        match kind {
            CredentialKind::PhoneNumber => {
                self.code_token = Some(self.api.request_code(&answer).await?);
            }
            CredentialKind::VerificationCode => {
                let outcome = {
                    let Some(token) = self.code_token.as_ref() else {
                        return Err(AuthError::Rejected {
                            reason: "no login code was requested".into(),
                        });
                    };
                    self.api.sign_in(token, &answer).await?
                };
                self.code_token = None;
                match outcome {
                    SignIn::Done => self.signed_in = true,
                    SignIn::PasswordRequired(token) => self.password_token = Some(token),
                }
            }
            CredentialKind::Password => {
                // The token is single-use; a wrong password restarts from the phone number.
                let Some(token) = self.password_token.take() else {
                    return Err(AuthError::Rejected {
                        reason: "no password was requested".into(),
                    });
                };
                self.api.check_password(token, &answer).await?;
                self.signed_in = true;
            }
            CredentialKind::BotToken => {
                return Err(AuthError::Rejected {
                    reason: format!("unexpected {kind}"),
                });
            }
        }
        Ok(())
    }
}

/// Drive `backend` to a session, asking `prompt` for each credential.
pub async fn login(
    backend: &mut dyn LoginBackend,
    prompt: &dyn CredentialPrompt,
) -> Result<Session, AuthError> {
    let mut rejected = 0;

    loop {
        let kind = match backend.next_step().await? {
            LoginStep::Done(session) => {
                info!("Login completed");
                return Ok(session);
            }
            LoginStep::Need(kind) => kind,
        };

        let answer = prompt.prompt(kind).await?.trim().to_string();
        if answer.is_empty() && !kind.is_optional() {
            return Err(AuthError::EmptyAnswer {
                kind: kind.to_string(),
            });
        }

        match backend.submit(kind, answer).await {
            Ok(()) => {}
            Err(AuthError::Rejected { reason }) => {
                rejected += 1;
                warn!(%kind, attempt = rejected, "Credential rejected: {reason}");
                if rejected >= MAX_REJECTED_ANSWERS {
                    return Err(AuthError::TooManyAttempts { attempts: rejected });
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Print the new session so it can be saved for the next start.
pub fn print_session_banner(session: &Session) {
    eprintln!("\n=== IMPORTANT ===");
    eprintln!("Please save this session string in your .env file as SOURCE_SESSION_STRING:");
    eprintln!("{}", session.save());
    eprintln!("=== END ===\n");
}
