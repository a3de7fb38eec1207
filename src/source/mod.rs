//! Narration sources and how they are prepared for playback

mod symphonia_probe;

pub use symphonia_probe::{SymphoniaProbe, probe_file};

use crate::error::LoadError;
use std::path::Path;
use std::time::Duration;

/// Opaque reference to narration content, usually a path or URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceHandle(String);

impl SourceHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl std::fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SourceHandle({})", self.0)
    }
}

impl From<&str> for SourceHandle {
    fn from(handle: &str) -> Self {
        Self::new(handle)
    }
}

impl From<String> for SourceHandle {
    fn from(handle: String) -> Self {
        Self(handle)
    }
}

/// What is known about a source once it is ready to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceInfo {
    /// Total length, if the source reports one
    pub duration: Option<Duration>,
}

impl SourceInfo {
    pub fn with_duration(duration: Duration) -> Self {
        Self {
            duration: Some(duration),
        }
    }

    pub fn unknown_duration() -> Self {
        Self { duration: None }
    }
}

/// Trait for preparing narration sources.
///
/// Loading runs on a worker thread, off the control thread, so implementations may block
/// on IO. The result is fed back to the state machine through the command queue.
///
/// Closures with the matching signature implement this trait:
///
/// ```
/// use narrator::error::LoadError;
/// use narrator::source::{SourceHandle, SourceInfo, SourceLoader};
/// use std::time::Duration;
///
/// let loader = |_: &SourceHandle| -> Result<SourceInfo, LoadError> {
///     Ok(SourceInfo::with_duration(Duration::from_secs(300)))
/// };
/// let info = loader.load(&SourceHandle::new("chapter-1")).unwrap();
/// assert_eq!(info.duration, Some(Duration::from_secs(300)));
/// ```
pub trait SourceLoader: Send + Sync {
    /// Prepares `source` and reports its duration.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] when the content is unreadable or unsupported; the session
    /// then fails with `SourceLoadFailure`.
    fn load(&self, source: &SourceHandle) -> Result<SourceInfo, LoadError>;
}

impl<F> SourceLoader for F
where
    F: Fn(&SourceHandle) -> Result<SourceInfo, LoadError> + Send + Sync,
{
    fn load(&self, source: &SourceHandle) -> Result<SourceInfo, LoadError> {
        self(source)
    }
}
