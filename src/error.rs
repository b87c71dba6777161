use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("request failed after {attempts} attempt(s): {url}: {message}")]
    Transport {
        url: String,
        attempts: usize,
        message: String,
    },
    #[error("expected {what} not found in {locator}")]
    Structure { what: String, locator: String },
    #[error("config invalid: {0}")]
    InvalidConfig(String),
    #[error("listing unavailable: {0}")]
    ListingUnavailable(String),
}

impl MirrorError {
    pub fn structure(what: impl Into<String>, locator: impl Into<String>) -> Self {
        Self::Structure {
            what: what.into(),
            locator: locator.into(),
        }
    }
}
