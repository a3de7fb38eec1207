//! Error types for Narrator

use thiserror::Error;

/// Why a command or session did not go the way the host asked.
///
/// Every kind except [`ErrorKind::ProtocolViolation`] ends the current session:
/// the machine moves to `Error`, publishes the kind and waits for a fresh `play`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Audio focus was denied or the output hardware is busy.
    #[error("audio output unavailable")]
    ResourceUnavailable,

    /// The platform does not allow this application to play audio.
    #[error("audio playback not permitted")]
    PermissionDenied,

    /// The narration content could not be read or is unsupported.
    #[error("narration source failed to load")]
    SourceLoadFailure,

    /// The source did not become ready within the configured bound.
    #[error("narration source load timed out")]
    Timeout,

    /// The command is not valid in the current state. Recoverable.
    #[error("command not valid in the current state")]
    ProtocolViolation,
}

impl ErrorKind {
    /// Returns true when this kind ends the session it occurred in.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ProtocolViolation)
    }
}

/// Failures reported by the platform audio service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("audio output unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("audio playback not permitted: {0}")]
    PermissionDenied(String),
}

impl From<&GuardError> for ErrorKind {
    fn from(err: &GuardError) -> Self {
        match err {
            GuardError::ResourceUnavailable(_) => Self::ResourceUnavailable,
            GuardError::PermissionDenied(_) => Self::PermissionDenied,
        }
    }
}

impl From<GuardError> for ErrorKind {
    fn from(err: GuardError) -> Self {
        Self::from(&err)
    }
}

/// Failures while preparing a narration source.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported source: {0}")]
    Unsupported(String),

    #[error("Source decode probe failed: {0}")]
    Probe(String),
}

impl From<&LoadError> for ErrorKind {
    fn from(_: &LoadError) -> Self {
        Self::SourceLoadFailure
    }
}

/// Errors returned to the host by the engine itself, never by playback commands.
#[derive(Error, Debug)]
pub enum NarratorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NarratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_kinds() {
        assert!(ErrorKind::ResourceUnavailable.is_terminal());
        assert!(ErrorKind::PermissionDenied.is_terminal());
        assert!(ErrorKind::SourceLoadFailure.is_terminal());
        assert!(ErrorKind::Timeout.is_terminal());
        assert!(!ErrorKind::ProtocolViolation.is_terminal());
    }

    #[test]
    fn test_guard_error_mapping() {
        let busy = GuardError::ResourceUnavailable("phone call".into());
        let denied = GuardError::PermissionDenied("muted by policy".into());
        assert_eq!(ErrorKind::from(&busy), ErrorKind::ResourceUnavailable);
        assert_eq!(ErrorKind::from(denied), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_load_error_is_source_failure() {
        let err = LoadError::Unsupported("epub".into());
        assert_eq!(ErrorKind::from(&err), ErrorKind::SourceLoadFailure);
    }
}
