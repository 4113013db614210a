//! Database connection management for the supported SQL backends.

use historiandb_core::{StoreError, StoreResult};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::sync::Once;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::store_err;

/// SQL dialect spoken by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// PostgreSQL (including TimescaleDB)
    Postgres,
    /// SQLite
    Sqlite,
}

impl Dialect {
    /// Dialect of a connection string.
    pub fn from_dsn(dsn: &str) -> StoreResult<Self> {
        let url = Url::parse(dsn).map_err(|err| {
            StoreError::InvalidConfig(format!("invalid database URL '{}': {err}", redact(dsn)))
        })?;
        match url.scheme() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(StoreError::InvalidConfig(format!(
                "unsupported database scheme '{other}': expected postgres, postgresql or sqlite"
            ))),
        }
    }

    /// Bind parameter number `n` (1-based).
    pub(crate) fn param(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            Dialect::Sqlite => "?".to_string(),
        }
    }

    /// `(p, p, ..)` tuple of `count` parameters numbered from `first`.
    pub(crate) fn tuple(self, first: usize, count: usize) -> String {
        let params: Vec<String> = (first..first + count).map(|n| self.param(n)).collect();
        format!("({})", params.join(", "))
    }

    /// Physical row locator, the last sort key when `(t_stamp, tagid)` ties.
    pub(crate) fn row_locator(self) -> &'static str {
        match self {
            Dialect::Postgres => "ctid",
            Dialect::Sqlite => "rowid",
        }
    }

    /// Column type used for `datevalue`.
    pub(crate) fn date_type(self) -> &'static str {
        match self {
            Dialect::Postgres => "TIMESTAMPTZ",
            Dialect::Sqlite => "BIGINT",
        }
    }

    /// Expression reading `datevalue` as epoch milliseconds.
    pub(crate) fn date_as_millis(self, column: &str) -> String {
        match self {
            Dialect::Postgres => {
                format!("CAST(EXTRACT(EPOCH FROM {column}) * 1000 AS BIGINT)")
            }
            Dialect::Sqlite => format!("CAST({column} AS BIGINT)"),
        }
    }

    /// Expression turning an epoch-millisecond parameter into a `datevalue`.
    pub(crate) fn millis_as_date(self, param: &str) -> String {
        match self {
            Dialect::Postgres => {
                format!("to_timestamp(CAST({param} AS DOUBLE PRECISION) / 1000.0)")
            }
            Dialect::Sqlite => param.to_string(),
        }
    }
}

/// Configuration for database connections.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl DatabaseConfig {
    /// Create a new database configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Size the pool for `workers` concurrent batch writers plus the orchestrator.
    pub fn for_workers(mut self, workers: usize) -> Self {
        let wanted = u32::try_from(workers.saturating_add(2)).unwrap_or(u32::MAX);
        self.max_connections = self.max_connections.max(wanted);
        self
    }

    /// Connect to the database.
    pub async fn connect(&self) -> StoreResult<Database> {
        let dialect = Dialect::from_dsn(&self.url)?;
        install_drivers();
        debug!(url = %redact(&self.url), ?dialect, max_connections = self.max_connections, "connecting");
        let pool = AnyPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .connect(&self.url)
            .await
            .map_err(store_err)?;
        Ok(Database {
            pool,
            dialect,
            url: self.url.clone(),
        })
    }
}

/// Pooled connection to one database, shared by every collaborator using it.
#[derive(Debug, Clone)]
pub struct Database {
    pool: AnyPool,
    dialect: Dialect,
    url: String,
}

impl Database {
    /// Connect with default pool settings.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        DatabaseConfig::new(url).connect().await
    }

    /// Underlying pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Dialect of this database.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Whether `url` names this database.
    pub fn is_same(&self, url: &str) -> bool {
        self.url == url
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn install_drivers() {
    static DRIVERS: Once = Once::new();
    DRIVERS.call_once(sqlx::any::install_default_drivers);
}

/// Query parameters that carry credentials.
const SECRET_PARAMS: [&str; 3] = ["password", "sslpassword", "passfile"];
const MASK: &str = "***";

/// Connection string with credentials masked, for logs and errors.
///
/// Masks the userinfo password and credential query parameters. A string
/// that does not parse as a URL is not echoed at all.
pub fn redact(dsn: &str) -> String {
    let Ok(mut url) = Url::parse(dsn) else {
        return "<unparseable database URL>".to_string();
    };
    if url.password().is_some() {
        // only fails for URLs that cannot carry credentials
        let _ = url.set_password(Some(MASK));
    }
    let secret = |key: &str| SECRET_PARAMS.iter().any(|p| key.eq_ignore_ascii_case(p));
    if url.query_pairs().any(|(key, _)| secret(&key)) {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                let value = if secret(&key) {
                    MASK.to_string()
                } else {
                    value.into_owned()
                };
                (key.into_owned(), value)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_dsn() {
        assert_eq!(
            Dialect::from_dsn("postgres://u:p@localhost/historian").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(
            Dialect::from_dsn("postgresql://localhost/historian").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(Dialect::from_dsn("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert!(matches!(
            Dialect::from_dsn("mysql://localhost/historian"),
            Err(StoreError::InvalidConfig(_))
        ));
        assert!(matches!(
            Dialect::from_dsn("historian.db"),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_placeholders_per_dialect() {
        assert_eq!(Dialect::Postgres.tuple(3, 2), "($3, $4)");
        assert_eq!(Dialect::Sqlite.tuple(3, 2), "(?, ?)");
    }

    #[test]
    fn test_redact_hides_password() {
        assert_eq!(
            redact("postgres://ignition:secret@db:5432/historian"),
            "postgres://ignition:***@db:5432/historian"
        );
        assert_eq!(
            redact("sqlite:///tmp/h.db?mode=rwc"),
            "sqlite:///tmp/h.db?mode=rwc"
        );
    }

    #[test]
    fn test_redact_hides_password_query_parameters() {
        let redacted = redact("postgres://db/historian?user=ignition&password=secret&sslmode=require");
        assert!(!redacted.contains("secret"), "{redacted}");
        assert!(redacted.contains("user=ignition"));
        assert!(redacted.contains("password=***"));
        assert!(redacted.contains("sslmode=require"));

        let both = redact("postgresql://u:one@db/h?PASSWORD=two");
        assert!(!both.contains("one") && !both.contains("two"), "{both}");
    }

    #[test]
    fn test_redact_never_echoes_unparseable_input() {
        let redacted = redact("not a url with secret");
        assert!(!redacted.contains("secret"));
    }

    #[test]
    fn test_pool_sized_for_workers() {
        let config = DatabaseConfig::new("sqlite::memory:").for_workers(16);
        assert_eq!(config.max_connections, 18);
        let config = DatabaseConfig::new("sqlite::memory:").for_workers(1);
        assert_eq!(config.max_connections, 10);
    }

    #[tokio::test]
    async fn test_connect_sqlite_memory() {
        let mut config = DatabaseConfig::new("sqlite::memory:");
        config.max_connections = 1;
        let db = config.connect().await.unwrap();
        assert_eq!(db.dialect(), Dialect::Sqlite);
        assert!(db.is_same("sqlite::memory:"));
        db.close().await;
    }
}
