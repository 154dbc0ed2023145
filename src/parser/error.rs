//! Error type for target classification.

use thiserror::Error;

/// Classification failures are non-fatal; the caller logs and skips.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The input matches none of the recognized target forms.
    #[error("unrecognized target: {input}")]
    Unrecognized {
        /// The offending input, trimmed.
        input: String,
    },
}

impl ClassifyError {
    pub(crate) fn unrecognized(input: impl Into<String>) -> Self {
        Self::Unrecognized {
            input: input.into(),
        }
    }
}
