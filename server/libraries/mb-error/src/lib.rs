//
// Copyright 2025 Tabs Data Inc.
//

pub mod display_vec;

pub use mm_error::mb_error;

use derive_builder::UninitializedFieldError;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use strum::AsRefStr;

/// Error class enum for conversion to API errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
pub enum ApiError {
    /// Discriminants from 0 to 999 are reserved for input errors
    InputError = 0,
    /// Discriminants from 1000 to 1999 are reserved for not found errors
    NotFound = 1000,
    /// Discriminants from 2000 to 2999 are reserved for conflict errors
    Conflict = 2000,
    /// Discriminants from 3000 to 3999 are reserved for forbidden errors
    Forbidden = 3000,
    /// Discriminants from 4000 to 4999 are reserved for authorization errors
    NotAuthorized = 4000,
    /// Discriminants from 5000 to 5999 are reserved for rate limit errors
    RateLimited = 5000,
    /// Discriminants from 6000 to 6999 are reserved for timeout errors
    Timeout = 6000,
    /// Discriminants from 7000 to 7999 are reserved for internal errors
    InternalError = 7000,
    /// Discriminants from 8000 to u16::MAX are unexpected
    Unexpected = u16::MAX as isize,
}

impl From<u16> for ApiError {
    fn from(discriminant: u16) -> Self {
        match discriminant {
            i if i < Self::InputError as u16 + 1000 => Self::InputError,
            i if i < Self::NotFound as u16 + 1000 => Self::NotFound,
            i if i < Self::Conflict as u16 + 1000 => Self::Conflict,
            i if i < Self::Forbidden as u16 + 1000 => Self::Forbidden,
            i if i < Self::NotAuthorized as u16 + 1000 => Self::NotAuthorized,
            i if i < Self::RateLimited as u16 + 1000 => Self::RateLimited,
            i if i < Self::Timeout as u16 + 1000 => Self::Timeout,
            i if i < Self::InternalError as u16 + 1000 => Self::InternalError,
            _i => Self::Unexpected,
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// Trait implemented by minibase errors. This trait is automatically implemented by
/// error enums annotated with the [`#mb_error`] macro.
pub trait MbDomainError: Error + Send + Sync {
    /// Returns the domain of the error. The name of the enum type is the domain error.
    fn domain(&self) -> &str;

    /// Returns the error code, the [`Self::domain()`] concatenated with the variant discriminant.
    fn code(&self) -> String;

    /// Returns the API error type of the error.
    fn api_error(&self) -> ApiError;
}

/// Generic minibase error type to be returned when there is no need to use a specific error type,
/// and the error should be propagated up the call stack.
///
/// [`MbDomainError`] errors are automatically converted to [`MbError`] using the '?' operator.
#[derive(Debug)]
pub struct MbError {
    domain: String,
    code: String,
    api_error: ApiError,
    mb_error: anyhow::Error,
}

impl MbError {
    /// Creates a new [`MbError`] from an error implementing [`MbDomainError`].
    ///
    /// This constructor should not be used directly, instead use the '?' operator to convert
    /// or a `.map_err(MbError::from)` to convert a [`Result<T, impl MbDomainError>`].
    pub fn new<E>(error: E) -> Self
    where
        E: MbDomainError + 'static,
    {
        Self {
            domain: error.domain().to_string(),
            code: error.code(),
            api_error: error.api_error(),
            mb_error: anyhow::Error::new(error),
        }
    }

    /// Returns the domain of the error.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the error code of the error.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the API error class of the error.
    pub fn api_error(&self) -> ApiError {
        self.api_error
    }

    /// Downcasts to the source [`MbDomainError`].
    pub fn domain_err<E: MbDomainError + 'static>(&self) -> &E {
        self.source().unwrap().downcast_ref::<E>().unwrap()
    }

    /// Returns whether the source error is of the given [`MbDomainError`] type.
    pub fn is_domain_err<E: MbDomainError + 'static>(&self) -> bool {
        self.source()
            .map(|s| s.downcast_ref::<E>().is_some())
            .unwrap_or(false)
    }
}

impl Display for MbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mb::error {}[{}] - {}",
            self.api_error(),
            self.code(),
            self.mb_error
        )
    }
}

impl Error for MbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.mb_error.as_ref())
    }
}

// useful for types using derive_builder
impl From<UninitializedFieldError> for MbError {
    fn from(ufe: UninitializedFieldError) -> MbError {
        MbError {
            domain: "UninitializedFieldError".to_string(),
            code: "UninitializedFieldError::0000".to_string(),
            api_error: ApiError::InternalError,
            mb_error: anyhow::Error::new(ufe),
        }
    }
}

/// Macro to create an inline error with a specific API error code. This macro is used to create
/// errors without the need to define a specific error type.
#[macro_export]
macro_rules! api_error {
    ($api_error:expr, $($arg:tt)*) => {{
        $crate::MbError::new($crate::InlineError::new(
            format!($($arg)*),
            format!(
                "{}:{}[{}]",
                module_path!(),
                file!(),
                line!(),
            ),
            format!("Error::{:04}", $api_error as u16),
            $api_error,
        ))
    }};
}

pub struct InlineError {
    msg: String,
    domain: String,
    code: String,
    api_error: ApiError,
}

impl InlineError {
    /// Creates a new inline error with the given message, domain, code, and API error.
    pub fn new(msg: String, domain: String, code: String, api_error: ApiError) -> Self {
        Self {
            msg,
            domain,
            code,
            api_error,
        }
    }
}

impl Display for InlineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl Debug for InlineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "InlineError({})", self.msg)
    }
}

impl Error for InlineError {}

impl MbDomainError for InlineError {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn code(&self) -> String {
        self.code.clone()
    }

    fn api_error(&self) -> ApiError {
        self.api_error
    }
}

#[cfg(test)]
mod tests {
    use crate as mb_error;

    use super::*;
    use mb_error::mb_error;
    use std::error::Error;

    #[test]
    fn test_api_error_ranges() {
        assert_eq!(ApiError::InputError as u16, 0);
        assert_eq!(ApiError::NotFound as u16, 1000);
        assert_eq!(ApiError::Conflict as u16, 2000);
        assert_eq!(ApiError::Forbidden as u16, 3000);
        assert_eq!(ApiError::NotAuthorized as u16, 4000);
        assert_eq!(ApiError::RateLimited as u16, 5000);
        assert_eq!(ApiError::Timeout as u16, 6000);
        assert_eq!(ApiError::InternalError as u16, 7000);
        assert_eq!(ApiError::Unexpected as u16, u16::MAX);

        assert_eq!(ApiError::from(0), ApiError::InputError);
        assert_eq!(ApiError::from(999), ApiError::InputError);
        assert_eq!(ApiError::from(1000), ApiError::NotFound);
        assert_eq!(ApiError::from(1999), ApiError::NotFound);
        assert_eq!(ApiError::from(2000), ApiError::Conflict);
        assert_eq!(ApiError::from(2999), ApiError::Conflict);
        assert_eq!(ApiError::from(3000), ApiError::Forbidden);
        assert_eq!(ApiError::from(3999), ApiError::Forbidden);
        assert_eq!(ApiError::from(4000), ApiError::NotAuthorized);
        assert_eq!(ApiError::from(4999), ApiError::NotAuthorized);
        assert_eq!(ApiError::from(5000), ApiError::RateLimited);
        assert_eq!(ApiError::from(5999), ApiError::RateLimited);
        assert_eq!(ApiError::from(6000), ApiError::Timeout);
        assert_eq!(ApiError::from(6999), ApiError::Timeout);
        assert_eq!(ApiError::from(7000), ApiError::InternalError);
        assert_eq!(ApiError::from(7999), ApiError::InternalError);
        assert_eq!(ApiError::from(8000), ApiError::Unexpected);
        assert_eq!(ApiError::from(u16::MAX), ApiError::Unexpected);
    }

    #[mb_error]
    #[derive(Clone, PartialEq, Eq)]
    pub enum MyErrorA {
        #[error("A0")]
        A0 = 0,
        #[error("A1({0})")]
        A1(String) = 1000,
    }

    #[mb_error]
    #[derive(Clone, PartialEq, Eq)]
    pub enum MyErrorB {
        #[error("B0")]
        B0 = 0,

        #[error("B1({0})")]
        // using an arbitrary discriminant to verify it is correctly assigned to the shadow enum
        B1(#[from] MyErrorA) = 1,
    }

    #[allow(unused)]
    fn f_returning_typed_error() -> Result<(), MyErrorB> {
        Err(MyErrorB::B0)
    }

    #[allow(unused)]
    fn f_early_exit_with_error_conversion() -> Result<(), MbError> {
        f_returning_typed_error()?;
        Ok(())
    }

    #[allow(unused)]
    fn f_with_explicit_typed_error_conversion() -> Result<(), MbError> {
        f_returning_typed_error().map_err(MbError::from)
    }

    #[test]
    fn test_mb_error() {
        let error_a = MyErrorA::A1("foo".to_string());
        let error_b = MyErrorB::B1(error_a.clone());
        let mb_error = MbError::new(error_b.clone());

        assert_eq!(mb_error.domain(), "MyErrorB");
        assert_eq!(mb_error.code(), "MyErrorB::0001");
        assert!(matches!(mb_error.api_error(), ApiError::InputError));

        mb_error
            .source()
            .unwrap()
            .downcast_ref::<MyErrorB>()
            .unwrap();
    }

    #[test]
    fn test_inline_error() {
        let err = api_error!(ApiError::Conflict, "value {} already taken", "a@x");
        assert!(matches!(err.api_error(), ApiError::Conflict));
        assert!(err.to_string().contains("already taken"));
    }
}
