use actix_web::http::StatusCode;

use pole_types::CatalogError;

/// Everything `Engine::exec` and the lock operations can fail with. The
/// HTTP layer maps these onto status codes; the RPC layer flattens them
/// into `(code, message)`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("index already exists")]
    IndexExists,
    #[error("index not found")]
    IndexNotFound,
    #[error("no leader is known to this node")]
    NoLeader,
    #[error(transparent)]
    Sql(#[from] pole_sql::SqlError),
    #[error(transparent)]
    Index(#[from] pole_index::Error),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Raft(#[from] pole_raft::Error),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Statements the caller got wrong are 400s; everything that went
    /// wrong on our side is a 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Sql(_) | Error::IndexExists | Error::IndexNotFound | Error::Catalog(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NoLeader
            | Error::Index(_)
            | Error::Raft(_)
            | Error::Rpc(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
