//! ABOUTME: Uniform result envelope returned by every repository operation
//! ABOUTME: Callers check is_succeed instead of catching errors

use mx_core::{Error, Result};
use tracing::debug;

/// Outcome of a repository call.
///
/// On failure `data` is `None`. `exception` is only set for unexpected
/// failures; business failures (not found, validation, conflict) carry
/// messages in `errors` alone.
#[derive(Debug)]
pub struct RepositoryResponse<T> {
    pub is_succeed: bool,
    pub data: Option<T>,
    pub errors: Vec<String>,
    pub exception: Option<Error>,
    /// Business error behind `errors`, kept for `into_result`
    business: Option<Error>,
}

impl<T> RepositoryResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            is_succeed: true,
            data: Some(data),
            errors: Vec::new(),
            exception: None,
            business: None,
        }
    }

    pub fn failure(error: Error) -> Self {
        if error.is_business() {
            debug!("Repository business failure: {}", error);
            Self {
                is_succeed: false,
                data: None,
                errors: vec![error.to_string()],
                exception: None,
                business: Some(error),
            }
        } else {
            Self {
                is_succeed: false,
                data: None,
                errors: vec![error.to_string()],
                exception: Some(error),
                business: None,
            }
        }
    }

    pub fn with_errors(errors: Vec<String>) -> Self {
        Self {
            is_succeed: false,
            data: None,
            errors,
            exception: None,
            business: None,
        }
    }

    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(e) => Self::failure(e),
        }
    }

    /// Back to a `Result` carrying the original error kind. Failures built
    /// from bare messages come back as `Validation`.
    pub fn into_result(self) -> Result<T> {
        if let Some(exception) = self.exception {
            return Err(exception);
        }
        if let Some(error) = self.business {
            return Err(error);
        }
        match (self.is_succeed, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(Error::NotFound("response carried no data".to_string())),
            (false, _) => Err(Error::Validation(self.errors.join("; "))),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RepositoryResponse<U> {
        RepositoryResponse {
            is_succeed: self.is_succeed,
            data: self.data.map(f),
            errors: self.errors,
            exception: self.exception,
            business: self.business,
        }
    }

    /// Same failure, different payload type
    pub fn cast_failure<U>(self) -> RepositoryResponse<U> {
        RepositoryResponse {
            is_succeed: false,
            data: None,
            errors: self.errors,
            exception: self.exception,
            business: self.business,
        }
    }
}
