use std::str::FromStr;

use sqlx::postgres::PgConnectOptions;

use super::error::{PgDaoError, PgResult};

const DEFAULT_MAX_CONNECTIONS: u32 = 16;

#[derive(Clone, Debug)]
pub struct PgConfig {
    pub options: PgConnectOptions,
    pub max_connections: u32,
}

impl PgConfig {
    pub fn from_url(url: &str) -> PgResult<Self> {
        let options =
            PgConnectOptions::from_str(url).map_err(|source| PgDaoError::InvalidUrl { source })?;
        Ok(Self {
            options,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        })
    }

    pub fn from_env() -> PgResult<Self> {
        let url = std::env::var("DATABASE_URL").map_err(|_| PgDaoError::MissingEnvVar {
            var: "DATABASE_URL",
        })?;
        let mut config = Self::from_url(&url)?;
        if let Some(max) = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|max| *max > 0)
        {
            config.max_connections = max;
        }
        Ok(config)
    }
}
