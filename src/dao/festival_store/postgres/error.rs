use thiserror::Error;

pub type PgResult<T> = std::result::Result<T, PgDaoError>;

#[derive(Debug, Error)]
pub enum PgDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse Postgres connection URL")]
    InvalidUrl {
        #[source]
        source: sqlx::Error,
    },
    #[error("Postgres ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },
    #[error("Postgres health check failed")]
    HealthPing {
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to begin transaction")]
    Begin {
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to commit transaction")]
    Commit {
        #[source]
        source: sqlx::Error,
    },
    #[error("query `{operation}` failed")]
    Query {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("unexpected value `{value}` in column `{column}`")]
    UnexpectedValue { column: &'static str, value: String },
}

impl PgDaoError {
    pub(super) fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> PgDaoError {
        move |source| PgDaoError::Query { operation, source }
    }
}
