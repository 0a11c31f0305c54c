use thiserror::Error;

/// Everything that can go wrong while asking the provider for a reply.
///
/// Clients never see these; the relay logs them and broadcasts a fixed text instead.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Credentials are missing or still hold their placeholder values.
    #[error("completion is not configured: {0}")]
    Config(String),

    #[error("http: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Parse(String),
}
