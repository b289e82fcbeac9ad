// src/utils/db_connect.rs
use anyhow::{Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::info;
use std::time::Duration;
use tokio_postgres::{Config, NoTls};

use crate::utils::env::{parse_or, process_env};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Connection settings for the catalog database, read from `POSTGRES_*`.
#[derive(Debug, Clone, PartialEq)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
}

impl DbSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            host: get("POSTGRES_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(get("POSTGRES_PORT"), 5432u16),
            dbname: get("POSTGRES_DB").unwrap_or_else(|| "nfce".to_string()),
            user: get("POSTGRES_USER").unwrap_or_else(|| "postgres".to_string()),
            password: get("POSTGRES_PASSWORD").unwrap_or_default(),
            pool_size: parse_or(get("POSTGRES_POOL_SIZE"), 8u32).max(1),
        }
    }

    pub fn log_config(&self) {
        info!(
            "DB Config: Host={}, Port={}, DB={}, User={}, Pool size={}",
            self.host, self.port, self.dbname, self.user, self.pool_size
        );
    }

    fn pg_config(&self) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(&self.password)
            .application_name("product_matching")
            .connect_timeout(Duration::from_secs(10));
        config
    }
}

/// Builds the pool from `POSTGRES_*` and checks it with a test query.
pub async fn connect() -> Result<PgPool> {
    let settings = DbSettings::from_env();
    settings.log_config();
    connect_with(&settings).await
}

pub async fn connect_with(settings: &DbSettings) -> Result<PgPool> {
    info!("Connecting to PostgreSQL database...");
    let manager = PostgresConnectionManager::new(settings.pg_config(), NoTls);
    let pool = Pool::builder()
        .max_size(settings.pool_size)
        .min_idle(Some(1))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    {
        let conn = pool
            .get()
            .await
            .context("Failed to get test connection from pool")?;
        conn.query_one("SELECT 1", &[])
            .await
            .context("Test query 'SELECT 1' failed")?;
    }
    info!("Database connection pool ready ({} max connections)", settings.pool_size);
    Ok(pool)
}

/// (connections, idle connections) currently held by the pool.
pub fn get_pool_status(pool: &PgPool) -> (u32, u32) {
    let state = pool.state();
    (state.connections, state.idle_connections)
}
