//! Database connection management and PostgreSQL repositories.

mod connections;

#[cfg(feature = "postgres")]
mod config_repo;
#[cfg(feature = "postgres")]
mod event_repo;

#[cfg(feature = "postgres")]
pub mod entity;

pub use connections::DatabaseConfig;

#[cfg(feature = "postgres")]
pub use config_repo::PostgresConfigRepository;
#[cfg(feature = "postgres")]
pub use connections::DatabaseConnections;
#[cfg(feature = "postgres")]
pub use event_repo::PostgresEventRepository;

#[cfg(feature = "postgres")]
pub(crate) fn repo_err(e: sea_orm::DbErr) -> bulwark_core::RepoError {
    use sea_orm::DbErr;
    match e {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => {
            bulwark_core::RepoError::Connection(e.to_string())
        }
        other => bulwark_core::RepoError::Query(other.to_string()),
    }
}

#[cfg(feature = "postgres")]
#[cfg(test)]
mod tests;
