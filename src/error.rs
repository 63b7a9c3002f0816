//! Error types for discovery, conversion and spec fetching.

use std::fmt;

use thiserror::Error;

/// Failure to resolve a probe's port into a management port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The probe refers to a named port the container does not declare.
    #[error("missing named port {0:?}")]
    MissingNamedPort(String),

    /// The probe's port value cannot be used as a port number.
    #[error("incorrect port type {0:?}")]
    IncorrectPortType(String),
}

/// Every conversion error collected while walking a pod's probes.
///
/// One misconfigured container must not hide the valid probes of the others,
/// so conversion keeps going and reports all failures together.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConversionErrors(pub Vec<ConversionError>);

impl ConversionErrors {
    /// Adds an error to the set.
    pub fn push(&mut self, err: ConversionError) {
        self.0.push(err);
    }

    /// Returns `true` if no errors were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of collected errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `None` when empty, otherwise the collected errors.
    #[must_use]
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() { None } else { Some(self) }
    }
}

impl fmt::Display for ConversionErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [only] => write!(f, "1 error occurred: {only}"),
            errs => {
                write!(f, "{} errors occurred:", errs.len())?;
                for err in errs {
                    write!(f, "\n\t* {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConversionErrors {}

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes client failure.
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP failure while fetching a spec document.
    #[error("spec fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service exposes no port a spec can be fetched from.
    #[error("service {0} has no HTTP port")]
    NoHttpPort(String),

    /// The fetched document is not valid JSON.
    #[error("invalid spec document: {0}")]
    InvalidSpec(#[from] serde_json::Error),

    /// Downstream regeneration failed.
    #[error("regeneration failed: {0}")]
    Regeneration(String),

    /// Probe ports could not be resolved.
    #[error(transparent)]
    Conversion(#[from] ConversionErrors),
}

/// Result type for discovery operations.
pub type Result<T> = std::result::Result<T, Error>;
