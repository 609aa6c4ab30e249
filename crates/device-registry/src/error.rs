use thiserror::Error;

pub type Result<T, E = CodecError> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("invalid raw value {raw:?}: {reason}")]
    InvalidRaw { raw: String, reason: &'static str },
    #[error("invalid value {value:?}: {reason}")]
    InvalidValue { value: String, reason: &'static str },
    #[error("value {value} does not fit in {bits} bits")]
    Overflow { value: String, bits: u32 },
    #[error("assertion failed: expected {expected}, decoded {value}")]
    AssertionFailed { value: String, expected: String },
    #[error("no bit layout declared; masked writes need size and byte order")]
    NoLayout,
}

impl CodecError {
    /// Diagnostic text reported in place of a value whose assertion failed.
    pub fn sentinel(&self) -> Option<String> {
        match self {
            CodecError::AssertionFailed { value, .. } => {
                Some(format!("Assertion failed with value: {value}"))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProfileError {
    #[error("profile {0} has no device resources")]
    Incomplete(String),
    #[error("object {object}: {reason}")]
    InvalidProperty { object: String, reason: String },
    #[error("resource {resource}: operation must name exactly one of object or resource")]
    InvalidOperation { resource: String },
    #[error("resource reference cycle: {}", path.join(" -> "))]
    ResourceCycle { path: Vec<String> },
}
