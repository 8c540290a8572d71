use thiserror::Error;

/// An identifier string could not be turned into its typed form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("{kind} is empty")]
    Empty { kind: &'static str },

    #[error("{kind} is malformed: {reason}")]
    Malformed { kind: &'static str, reason: String },
}
