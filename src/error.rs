use thiserror::Error;

/// Failures raised while acquiring listings from the upstream site.
///
/// "Nothing matched" is never an error: extractors return `Ok` with an empty
/// or partial list for selector drift and selector-wait timeouts.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("network request failed: {0}")]
    Network(String),

    #[error("upstream responded with status {0}")]
    UpstreamStatus(u16),

    /// The upstream served a robot-check page instead of results.
    #[error("upstream is blocking automated requests")]
    Blocked,

    #[error("failed to launch browser: {0}")]
    BrowserInit(String),

    #[error("browser navigation failed: {0}")]
    Navigation(String),

    #[error("in-page extraction failed: {0}")]
    Script(String),

    #[error("acquisition exceeded the {0:?} deadline")]
    DeadlineExceeded(std::time::Duration),
}

impl AcquisitionError {
    /// Whether a failure from the final (browser) tier may be reported as an
    /// empty result instead of failing the request.
    pub fn is_degradable(&self) -> bool {
        matches!(self, AcquisitionError::Blocked)
    }
}

impl From<reqwest::Error> for AcquisitionError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => AcquisitionError::UpstreamStatus(status.as_u16()),
            None => AcquisitionError::Network(e.to_string()),
        }
    }
}

pub type AcquisitionResult<T> = std::result::Result<T, AcquisitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_blocked_is_degradable() {
        assert!(AcquisitionError::Blocked.is_degradable());
        assert!(!AcquisitionError::BrowserInit("no chrome".into()).is_degradable());
        assert!(!AcquisitionError::Navigation("dns".into()).is_degradable());
        assert!(!AcquisitionError::Script("bad json".into()).is_degradable());
    }

    #[test]
    fn test_messages_name_the_cause() {
        let err = AcquisitionError::UpstreamStatus(503);
        assert_eq!(err.to_string(), "upstream responded with status 503");
        let err = AcquisitionError::BrowserInit("exec format error".into());
        assert!(err.to_string().contains("exec format error"));
    }
}
