//! Error taxonomy for the autopilot core, per the retry/propagation design.
//!
//! Errors are split into three classes: retriable transient, optional-skip,
//! and fatal. The fatal set is closed and is checked both by discriminant
//! (`AutopilotError::retriable`) and by name (`is_retriable_kind`) so the
//! retry supervisor can classify errors raised by external collaborators
//! that only carry a string kind.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutopilotError>;

/// Closed set of error kinds the retry supervisor treats as non-retriable,
/// regardless of which concrete `AutopilotError` variant carries them.
pub const NON_RETRIABLE_KINDS: &[&str] = &[
    "BrowserCrash",
    "AutomationFatal",
    "ArtifactWrite",
    "OSError",
    "ProfileNotFound",
    "ProfilePermission",
    "ProfileEncoding",
    "ProfileValidation",
    "Resolution",
];

/// Returns true if the given error kind name is in the closed non-retriable
/// set. Used both for our own `AutopilotError` and for externally thrown
/// errors that only expose a string kind.
pub fn is_retriable_kind(kind: &str) -> bool {
    !NON_RETRIABLE_KINDS.contains(&kind)
}

#[derive(Debug, Error)]
pub enum AutopilotError {
    #[error("element not visible: {0}")]
    ElementNotVisible(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("element went stale: {0}")]
    StaleElement(String),

    #[error("find-in-page produced no match: {0}")]
    FindInPageNoMatch(String),

    #[error("locator could not resolve dimension '{0}'")]
    LocatorNotFound(String),

    #[error("network blip: {0}")]
    NetworkBlip(String),

    #[error("retries exhausted for step '{step}' after {attempts} attempt(s): {source}")]
    RetryExhausted {
        step: String,
        attempts: u32,
        #[source]
        source: Box<AutopilotError>,
    },

    #[error("retries exhausted for optional step '{step}', skipping")]
    RetrySkipped { step: String },

    #[error("browser process crashed: {0}")]
    BrowserCrash(String),

    #[error("automation encountered a fatal condition: {0}")]
    AutomationFatal(String),

    #[error("failed to write artifact at {path}: {source}")]
    ArtifactWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operating system error: {0}")]
    OSError(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("insufficient permission to read profile: {0}")]
    ProfilePermission(String),

    #[error("profile file is not valid UTF-8: {0}")]
    ProfileEncoding(String),

    #[error("profile failed validation: {0}")]
    ProfileValidation(String),

    #[error("failed to resolve a required path or reference: {0}")]
    Resolution(String),
}

impl AutopilotError {
    /// The stable kind name used in log lines and for cross-boundary
    /// classification (mirrors the `#[error]` variant name).
    pub fn kind(&self) -> &'static str {
        match self {
            AutopilotError::ElementNotVisible(_) => "ElementNotVisible",
            AutopilotError::Timeout(_) => "Timeout",
            AutopilotError::NavigationFailed(_) => "NavigationFailed",
            AutopilotError::StaleElement(_) => "StaleElement",
            AutopilotError::FindInPageNoMatch(_) => "FindInPageNoMatch",
            AutopilotError::LocatorNotFound(_) => "LocatorNotFound",
            AutopilotError::NetworkBlip(_) => "NetworkBlip",
            AutopilotError::RetryExhausted { .. } => "RetryExhausted",
            AutopilotError::RetrySkipped { .. } => "RetrySkipped",
            AutopilotError::BrowserCrash(_) => "BrowserCrash",
            AutopilotError::AutomationFatal(_) => "AutomationFatal",
            AutopilotError::ArtifactWrite { .. } => "ArtifactWrite",
            AutopilotError::OSError(_) => "OSError",
            AutopilotError::ProfileNotFound(_) => "ProfileNotFound",
            AutopilotError::ProfilePermission(_) => "ProfilePermission",
            AutopilotError::ProfileEncoding(_) => "ProfileEncoding",
            AutopilotError::ProfileValidation(_) => "ProfileValidation",
            AutopilotError::Resolution(_) => "Resolution",
        }
    }

    /// Whether the retry supervisor should retry this error. `RetryExhausted`
    /// and `RetrySkipped` are terminal by construction and are never
    /// themselves retried.
    pub fn retriable(&self) -> bool {
        match self {
            AutopilotError::RetryExhausted { .. } | AutopilotError::RetrySkipped { .. } => false,
            other => is_retriable_kind(other.kind()),
        }
    }

    /// Whether this error aborts the enclosing operation outright (bypasses
    /// the retry supervisor entirely rather than being absorbed by it).
    pub fn fatal(&self) -> bool {
        !self.retriable()
            && !matches!(
                self,
                AutopilotError::RetryExhausted { .. } | AutopilotError::RetrySkipped { .. }
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds_are_not_retriable() {
        for kind in NON_RETRIABLE_KINDS {
            assert!(!is_retriable_kind(kind), "{kind} should be non-retriable");
        }
    }

    #[test]
    fn unknown_kind_is_retriable() {
        assert!(is_retriable_kind("SomeNewTransientThing"));
    }

    #[test]
    fn browser_crash_is_fatal() {
        let err = AutopilotError::BrowserCrash("gone".into());
        assert!(err.fatal());
        assert!(!err.retriable());
    }

    #[test]
    fn timeout_is_retriable() {
        let err = AutopilotError::Timeout("waiting".into());
        assert!(err.retriable());
        assert!(!err.fatal());
    }
}
