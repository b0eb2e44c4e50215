//! ABOUTME: Root versus borrowed session ownership for repository calls
//! ABOUTME: Only the call that opened a session commits or rolls it back

use crate::response::RepositoryResponse;
use crate::session::{DataContext, DataSession};
use mx_core::Result;
use tracing::{debug, error, warn};

/// Session handle for one repository call.
///
/// `Root` sessions were opened by this call and are finished by
/// [`UnitOfWork::complete`]. `Borrowed` sessions belong to an outer caller and
/// are never committed, rolled back, or dropped here, so nested calls join the
/// outer transaction.
pub enum UnitOfWork<'a, S: DataSession> {
    Root(S),
    Borrowed(&'a mut S),
}

impl<'a, S: DataSession> UnitOfWork<'a, S> {
    /// Reuse `outer` when given, otherwise open a fresh transactional session
    pub async fn begin<C>(context: &C, outer: Option<&'a mut S>) -> Result<Self>
    where
        C: DataContext<Session = S>,
    {
        match outer {
            Some(session) => Ok(UnitOfWork::Borrowed(session)),
            None => {
                let session = context.begin().await?;
                debug!("Opened root session");
                Ok(UnitOfWork::Root(session))
            }
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, UnitOfWork::Root(_))
    }

    pub fn session(&mut self) -> &mut S {
        match self {
            UnitOfWork::Root(session) => session,
            UnitOfWork::Borrowed(session) => session,
        }
    }

    pub async fn complete<T>(self, result: Result<T>) -> RepositoryResponse<T> {
        self.complete_response(RepositoryResponse::from_result(result))
            .await
    }

    /// Commit a successful root session, roll back a failed one
    pub async fn complete_response<T>(self, response: RepositoryResponse<T>) -> RepositoryResponse<T> {
        let session = match self {
            UnitOfWork::Borrowed(_) => return response,
            UnitOfWork::Root(session) => session,
        };

        if response.is_succeed {
            return match session.commit().await {
                Ok(()) => response,
                Err(e) => {
                    error!("Failed to commit root session: {}", e);
                    RepositoryResponse::failure(e)
                }
            };
        }

        match &response.exception {
            Some(exception) => error!("Rolling back root session: {}", exception),
            None => debug!("Rolling back root session: {}", response.errors.join("; ")),
        }
        if let Err(e) = session.rollback().await {
            warn!("Rollback failed, connection will be discarded: {}", e);
        }
        response
    }
}

/// Open a unit of work or return the failure from the enclosing operation
macro_rules! begin_unit_of_work {
    ($context:expr, $session:expr) => {
        match $crate::unit_of_work::UnitOfWork::begin($context, $session).await {
            Ok(uow) => uow,
            Err(e) => return $crate::response::RepositoryResponse::failure(e),
        }
    };
}

pub(crate) use begin_unit_of_work;
