use std::{fmt, sync::Arc};

use rand::distr::{Alphanumeric, Distribution};
use rearch::CapsuleHandle;
use thiserror::Error;

/// Length of every freshly generated [`ShortCode`].
pub const SHORT_CODE_LEN: usize = 8;

/// Shortest code accepted from the outside world.
pub const MIN_SHORT_CODE_LEN: usize = 6;

/// A 6 to 8 character identifier drawn from `[A-Za-z0-9]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShortCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortCodeValidationError {
    #[error("short code must be at least {MIN_SHORT_CODE_LEN} characters")]
    TooShort,
    #[error("short code must be at most {SHORT_CODE_LEN} characters")]
    TooLong,
    #[error("short code contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

impl ShortCode {
    /// # Errors
    /// Will return [`Err`] if `code` is not 6 to 8 ASCII alphanumerics.
    pub fn new(code: String) -> Result<Self, ShortCodeValidationError> {
        let invalid_chars: String = code
            .chars()
            .filter(|c| !c.is_ascii_alphanumeric())
            .collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }

        match code.len() {
            len if len < MIN_SHORT_CODE_LEN => Err(ShortCodeValidationError::TooShort),
            len if len > SHORT_CODE_LEN => Err(ShortCodeValidationError::TooLong),
            _ => Ok(Self(code)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces candidate short codes.
///
/// Implementations make no attempt at uniqueness; that is enforced by the
/// `url_mappings` unique index and the retry loop in the URL service.
#[cfg_attr(test, mockall::automock)]
pub trait ShortCodeGenerator: Send + Sync {
    fn generate(&self) -> ShortCode;
}

pub fn short_code_generator_capsule(_: CapsuleHandle) -> Arc<dyn ShortCodeGenerator> {
    Arc::new(RandomShortCodeGenerator)
}

/// Draws [`SHORT_CODE_LEN`] independent, uniform symbols from the
/// thread-local CSPRNG, which is seeded from OS entropy.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomShortCodeGenerator;

impl ShortCodeGenerator for RandomShortCodeGenerator {
    fn generate(&self) -> ShortCode {
        let code = Alphanumeric
            .sample_iter(rand::rng())
            .take(SHORT_CODE_LEN)
            .map(char::from)
            .collect();
        // NOTE: Alphanumeric only yields [A-Za-z0-9], so this is valid by construction
        ShortCode(code)
    }
}
