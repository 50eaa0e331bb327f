use crate::assets::MigrationAssets;
use crate::config::DatabaseConfig;
use anyhow::Result;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub mod unit_of_work;

pub use unit_of_work::{SqlValue, Statement, UnitOfWork};

/// Placeholder substituted with the schema namespace in migrations and
/// unit-of-work statements.
pub const SCHEMA_PLACEHOLDER: &str = "{schema}";

/// Schema-qualified table names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    schema: String,
    pub image: String,
    pub link: String,
    pub cache: String,
}

impl Tables {
    pub fn new<S: Into<String>>(schema: S) -> Self {
        let schema = schema.into();
        Self {
            image: format!("{schema}.pluto_image"),
            link: format!("{schema}.pluto_image_link"),
            cache: format!("{schema}.pluto_cache"),
            schema,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Replace the schema placeholder in `sql`.
    pub fn qualify(&self, sql: &str) -> String {
        sql.replace(SCHEMA_PLACEHOLDER, &self.schema)
    }
}

impl Default for Tables {
    fn default() -> Self {
        Self::new("main")
    }
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    tables: Tables,
}

impl Database {
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        // Create database if it doesn't exist (for SQLite)
        if !Sqlite::database_exists(&config.url).await? {
            Sqlite::create_database(&config.url).await?;
        }

        let options = SqliteConnectOptions::from_str(&config.url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .foreign_keys(true);

        let mut pool_options =
            SqlitePoolOptions::new().max_connections(config.max_connections.unwrap_or(10));

        if config.schema != "main" {
            if let Some(path) = &config.schema_path {
                let attach = format!(
                    "ATTACH DATABASE '{}' AS {}",
                    path.display().to_string().replace('\'', "''"),
                    config.schema
                );
                debug!("Attaching schema on connect: {}", attach);
                pool_options = pool_options.after_connect(move |conn, _meta| {
                    let attach = attach.clone();
                    Box::pin(async move {
                        sqlx::query(&attach).execute(&mut *conn).await?;
                        Ok(())
                    })
                });
            }
        }

        let pool = pool_options.connect_with(options).await?;

        Ok(Self {
            pool,
            tables: Tables::new(config.schema.clone()),
        })
    }

    pub async fn migrate(&self) -> Result<()> {
        self.run_embedded_migrations().await?;
        Ok(())
    }

    async fn run_embedded_migrations(&self) -> Result<()> {
        let ledger = format!("{}._sqlx_migrations", self.tables.schema());

        // Create migrations table if it doesn't exist
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {ledger} (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                success BOOLEAN NOT NULL,
                checksum BLOB NOT NULL,
                execution_time BIGINT NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        for (name, content) in MigrationAssets::get_migrations() {
            // Extract version from filename (e.g., "001_initial_schema.sql" -> 1)
            let version: i64 = name
                .split('_')
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("Migration {} has no numeric prefix", name))?;

            let existing = sqlx::query_scalar::<_, i64>(&format!(
                "SELECT COUNT(*) FROM {ledger} WHERE version = ? AND success = true"
            ))
            .bind(version)
            .fetch_one(&self.pool)
            .await?;

            if existing > 0 {
                continue; // Migration already applied
            }

            let sql = self.tables.qualify(&content);
            let start = std::time::Instant::now();
            let mut transaction = self.pool.begin().await?;

            match sqlx::query(&sql).execute(&mut *transaction).await {
                Ok(_) => {
                    let execution_time = start.elapsed().as_millis() as i64;
                    let checksum = Self::calculate_checksum(&content);

                    sqlx::query(&format!(
                        r#"
                        INSERT INTO {ledger} (version, description, success, checksum, execution_time)
                        VALUES (?, ?, true, ?, ?)
                        "#
                    ))
                    .bind(version)
                    .bind(&name)
                    .bind(&checksum)
                    .bind(execution_time)
                    .execute(&mut *transaction)
                    .await?;

                    transaction.commit().await?;
                    info!("Applied migration: {} ({}ms)", name, execution_time);
                }
                Err(e) => {
                    transaction.rollback().await?;
                    return Err(anyhow::anyhow!("Migration {} failed: {}", name, e));
                }
            }
        }

        Ok(())
    }

    fn calculate_checksum(content: &str) -> Vec<u8> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        hasher.finish().to_be_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_schema_qualified() {
        let tables = Tables::new("media");
        assert_eq!(tables.image, "media.pluto_image");
        assert_eq!(tables.link, "media.pluto_image_link");
        assert_eq!(tables.cache, "media.pluto_cache");
        assert_eq!(
            tables.qualify("DELETE FROM {schema}.audit WHERE id = ?"),
            "DELETE FROM media.audit WHERE id = ?"
        );
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("test.db").display()),
            max_connections: Some(2),
            schema: "main".to_string(),
            schema_path: None,
            transaction_timeout_secs: None,
        };

        let database = Database::new(&config).await.unwrap();
        database.migrate().await.unwrap();
        database.migrate().await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM main._sqlx_migrations")
            .fetch_one(&database.pool())
            .await
            .unwrap();
        assert_eq!(applied as usize, MigrationAssets::get_migrations().len());
    }

    #[tokio::test]
    async fn test_attached_schema() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("main.db").display()),
            max_connections: Some(2),
            schema: "media".to_string(),
            schema_path: Some(dir.path().join("media.db")),
            transaction_timeout_secs: None,
        };

        let database = Database::new(&config).await.unwrap();
        database.migrate().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media.pluto_image")
            .fetch_one(&database.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
