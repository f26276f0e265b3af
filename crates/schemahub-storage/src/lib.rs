//! # schemahub-storage
//!
//! Storage backends implementing `schemahub_core::SchemaStore`:
//!
//! 1. **In-memory** — fast, ephemeral; tests and embedded use
//! 2. **SQLite** — single-file durability (feature: `sqlite`)
//! 3. **PostgreSQL** — production deployments (feature: `postgres`)
//!
//! All backends share the same registration semantics: per-subject version
//! allocation, fingerprint dedup against a per-context id space, and
//! soft-then-hard delete with orphan cleanup.

#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod retry;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
pub use retry::{RetryConfig, RetryPolicy};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};

/// Database connection settings for the SQL backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    /// libpq-style sslmode: "disable" | "require" | "verify-full"
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Maximum lifetime of a pooled connection, in seconds.
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,
}

fn default_port() -> u16 {
    5432
}
fn default_ssl_mode() -> String {
    "disable".into()
}
fn default_max_connections() -> u32 {
    25
}
fn default_min_connections() -> u32 {
    5
}
fn default_max_lifetime_secs() -> u64 {
    300
}

impl DbConfig {
    /// Render a postgres connection URL.
    pub fn postgres_url(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_config_defaults_and_url() {
        let config: DbConfig = serde_json::from_str(
            r#"{"host": "db.internal", "user": "registry", "database": "schemas"}"#,
        )
        .unwrap();
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_connections, 25);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.max_lifetime_secs, 300);
        assert_eq!(
            config.postgres_url(),
            "postgresql://registry:@db.internal:5432/schemas?sslmode=disable"
        );
    }
}
