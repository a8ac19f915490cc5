use thiserror::Error;

/// Closed set of session/authentication failures.
///
/// Call sites can tell "no connectivity, try again" (`Network`) apart from
/// "the session is dead, log in again" (`RefreshRejected`, `SessionExpired`).
/// Storage failures always propagate: a silently-failed token write would
/// produce a session the app believes is valid but cannot reproduce.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Secure storage unavailable: {0}")]
    Storage(String),

    #[error("Token refresh rejected by server")]
    RefreshRejected,

    #[error("Network error during authentication: {0}")]
    Network(String),

    #[error("Session expired - login required")]
    SessionExpired,
}

impl From<keyring::Error> for AuthError {
    fn from(error: keyring::Error) -> Self {
        AuthError::Storage(error.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        AuthError::Network(error.to_string())
    }
}
