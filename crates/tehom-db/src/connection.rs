//! Connection pool and schema bootstrap

use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

pub type DbPool = Pool;

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct PoolSettings<'a> {
    pub host: &'a str,
    pub port: u16,
    pub database: &'a str,
    pub user: &'a str,
    pub password: &'a str,
    pub max_connections: u32,
}

/// Tables owned by the certifier. The vessel-tracking tables are read-only
/// and maintained elsewhere.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS certification_progress (
    sensor        TEXT        NOT NULL,
    begin_at      TIMESTAMPTZ NOT NULL,
    certified_end TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (sensor, begin_at)
);
CREATE TABLE IF NOT EXISTS certified_spans (
    id       BIGSERIAL PRIMARY KEY,
    sensor   TEXT             NOT NULL,
    begin_at TIMESTAMPTZ      NOT NULL,
    end_at   TIMESTAMPTZ      NOT NULL CHECK (end_at > begin_at),
    lat      DOUBLE PRECISION NOT NULL,
    lon      DOUBLE PRECISION NOT NULL
);
CREATE INDEX IF NOT EXISTS certified_spans_sensor_end ON certified_spans (sensor, end_at);
CREATE TABLE IF NOT EXISTS coverage_ranges (
    sensor    TEXT        NOT NULL,
    extension TEXT        NOT NULL,
    begin_at  TIMESTAMPTZ NOT NULL,
    end_at    TIMESTAMPTZ NOT NULL CHECK (end_at > begin_at),
    PRIMARY KEY (sensor, extension, begin_at)
);
";

/// Create a PostgreSQL connection pool
pub fn create_pool(settings: &PoolSettings<'_>) -> anyhow::Result<DbPool> {
    let mut cfg = Config::new();
    cfg.host = Some(settings.host.to_string());
    cfg.port = Some(settings.port);
    cfg.dbname = Some(settings.database.to_string());
    cfg.user = Some(settings.user.to_string());
    cfg.password = Some(settings.password.to_string());
    cfg.application_name = Some("tehom".to_string());
    cfg.pool = Some(PoolConfig::new(settings.max_connections.max(1) as usize));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    Ok(cfg.create_pool(Some(Runtime::Tokio1), NoTls)?)
}

/// Round-trip a trivial query
pub async fn test_connection(pool: &DbPool) -> anyhow::Result<()> {
    let client = pool.get().await?;
    let row = client.query_one("SELECT 1::INT4", &[]).await?;
    let one: i32 = row.get(0);
    if one != 1 {
        anyhow::bail!("Database connection test failed");
    }
    Ok(())
}

/// Create the certification tables if they do not exist yet
pub async fn ensure_schema(pool: &DbPool) -> anyhow::Result<()> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    log::debug!("Certification schema is in place");
    Ok(())
}

#[cfg(test)]
pub(crate) fn local_settings() -> PoolSettings<'static> {
    PoolSettings {
        host: "localhost",
        port: 5432,
        database: "tehom",
        user: "tehom_user",
        password: "tehom_pass",
        max_connections: 2,
    }
}
