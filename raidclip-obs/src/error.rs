use obws::client::HandshakeError;
use obws::error::Error as ObwsError;
use obws::responses::WebSocketCloseCode;
use thiserror::Error;

/// Control-link failures. Cloneable so the last attempt's error can be
/// published in [`crate::LinkStatus`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("Control link is not ready")]
    NotReady,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl LinkError {
    /// Classifies an `obws` error raised while opening a session.
    ///
    /// obs-websocket rejects a bad or missing password by closing the socket
    /// with code 4009 during the handshake; everything else is transport.
    pub(crate) fn from_connect(err: ObwsError) -> Self {
        match &err {
            ObwsError::Handshake(HandshakeError::ConnectionClosed(Some(details)))
                if u16::from(details.code) == WebSocketCloseCode::AuthenticationFailed as u16 =>
            {
                LinkError::AuthFailed(details.reason.clone())
            }
            ObwsError::Handshake(inner) => LinkError::Transport(format!("{}: {}", err, inner)),
            ObwsError::Timeout => LinkError::Timeout(err.to_string()),
            _ => LinkError::Transport(err.to_string()),
        }
    }
}

impl From<ObwsError> for LinkError {
    fn from(err: ObwsError) -> Self {
        LinkError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
