//! Error types shared by every HAL component.

use crate::pcm::PcmError;

/// Failure reported by a HAL operation.
///
/// The first four variants mirror the framework's generic status codes; `Device`
/// carries a PCM driver error through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    #[error("not initialized")]
    NotInitialized,
    #[error("bad value")]
    BadValue,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("already exists")]
    AlreadyExists,
    #[error("pcm device: {0}")]
    Device(#[from] PcmError),
}

impl HalError {
    /// Framework status integer for this error.
    pub fn status_code(&self) -> i32 {
        match self {
            HalError::NotInitialized => -19,
            HalError::BadValue => -22,
            HalError::InvalidOperation => -38,
            HalError::AlreadyExists => -17,
            HalError::Device(err) => err.errno(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_negative_errnos() {
        assert_eq!(HalError::NotInitialized.status_code(), -19);
        assert_eq!(HalError::BadValue.status_code(), -22);
        assert_eq!(HalError::Device(PcmError::Xrun).status_code(), -32);
    }

    #[test]
    fn pcm_errors_convert_with_question_mark() {
        fn fails() -> Result<()> {
            Err(PcmError::BadFd)?
        }
        assert_eq!(fails(), Err(HalError::Device(PcmError::BadFd)));
    }
}
