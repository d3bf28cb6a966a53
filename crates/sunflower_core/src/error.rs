use thiserror::Error;

/// Errors surfaced by sessions, pages and the namespace registry.
#[derive(Debug, Error)]
pub enum Error {
    /// Reserved characters in a title, or the wiki reported it as invalid.
    #[error("title invalid: {0}")]
    InvalidTitle(String),
    #[error("malformed siteinfo: {0}")]
    MalformedSiteInfo(String),
    #[error("empty or no summary")]
    EmptySummary,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("unable to log in: {0}")]
    AuthenticationFailed(String),
    #[error("bad username: {0}")]
    InvalidUsername(String),
    #[error("no sessions present")]
    NoSession,
    #[error("a wiki must be named when several sessions are open")]
    AmbiguousSession,
    #[error("no session for {0}")]
    UnknownSession(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to write page text")]
    Io(#[from] std::io::Error),
    /// Anything raised by the transport collaborator, passed through untouched.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
