//! SQL access for seed methods.
//!
//! Methods never hold a connection themselves; they go through the
//! [`Database`] trait so that stage logic can run against [`MockDatabase`]
//! in tests.
//!
//! [`MockDatabase`]: crate::mock::MockDatabase

use std::time::Duration;

use async_trait::async_trait;
use seed_agent_core::BackupMetadata;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{MySql, Row};

use crate::config::MysqlConfig;
use crate::error::Result;

/// Database operations the seed methods rely on.
#[async_trait]
pub trait Database: Send + Sync {
    /// `PLUGIN_STATUS` of an installed plugin, `None` if it is not installed.
    async fn plugin_status(&self, plugin: &str) -> Result<Option<String>>;

    /// Current binlog coordinates of the server.
    ///
    /// Returns the zero value when binary logging is disabled.
    async fn master_status(&self) -> Result<BackupMetadata>;

    /// Coordinates recorded by the last clone operation, if any.
    async fn clone_status(&self) -> Result<Option<BackupMetadata>>;

    /// The global `sql_mode`.
    async fn sql_mode(&self) -> Result<String>;

    /// Execute a statement whose result is not needed.
    async fn execute(&self, statement: &str) -> Result<()>;

    /// Take a global read lock and read the coordinates it pins.
    ///
    /// The lock is held until [`SnapshotLock::release`] is called. Dropping
    /// the returned value without releasing closes its session, which also
    /// frees the lock.
    async fn lock_for_snapshot(&self) -> Result<Box<dyn SnapshotLock>>;
}

/// A held `FLUSH TABLES WITH READ LOCK`.
#[async_trait]
pub trait SnapshotLock: Send {
    /// Coordinates read while the lock was held.
    fn coordinates(&self) -> &BackupMetadata;

    /// Release the lock.
    async fn release(self: Box<Self>) -> Result<()>;
}

// ============================================================================
// MySQL
// ============================================================================

/// [`Database`] backed by a small `sqlx` pool on the local server.
#[derive(Debug, Clone)]
pub struct MySqlDatabase {
    pool: MySqlPool,
}

impl MySqlDatabase {
    /// Create a pool that connects on first use, as the seed account.
    #[must_use]
    pub fn connect_lazy(config: &MysqlConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.seed_user)
            .password(&config.seed_password);

        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy_with(options);

        Self { pool }
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn with_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Database for MySqlDatabase {
    async fn plugin_status(&self, plugin: &str) -> Result<Option<String>> {
        let status = sqlx::query_scalar::<_, String>(
            "SELECT PLUGIN_STATUS FROM information_schema.PLUGINS WHERE PLUGIN_NAME = ?",
        )
        .bind(plugin)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status)
    }

    async fn master_status(&self) -> Result<BackupMetadata> {
        let mut conn = self.pool.acquire().await?;
        binlog_status(&mut conn).await
    }

    async fn clone_status(&self) -> Result<Option<BackupMetadata>> {
        let row = sqlx::query(
            "SELECT BINLOG_FILE, BINLOG_POSITION, GTID_EXECUTED \
             FROM performance_schema.clone_status",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let log_file: Option<String> = row.try_get("BINLOG_FILE")?;
        let log_pos: Option<i64> = row.try_get("BINLOG_POSITION")?;
        let gtid: Option<String> = row.try_get("GTID_EXECUTED")?;

        Ok(Some(
            BackupMetadata::positional(log_file.unwrap_or_default(), log_pos.unwrap_or_default())
                .with_gtid(normalize_gtid(gtid.as_deref().unwrap_or_default())),
        ))
    }

    async fn sql_mode(&self) -> Result<String> {
        let mode = sqlx::query_scalar::<_, String>("SELECT @@GLOBAL.sql_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode)
    }

    async fn execute(&self, statement: &str) -> Result<()> {
        sqlx::raw_sql(statement).execute(&self.pool).await?;
        Ok(())
    }

    async fn lock_for_snapshot(&self) -> Result<Box<dyn SnapshotLock>> {
        let mut conn = self.pool.acquire().await?;
        // FTWRL is session-scoped: the session must never go back to the pool.
        conn.close_on_drop();
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql("FLUSH TABLES WITH READ LOCK")).await?;

        match binlog_status(&mut conn).await {
            Ok(coordinates) => {
                tracing::info!(
                    log_file = %coordinates.log_file,
                    log_pos = coordinates.log_pos,
                    "Global read lock acquired"
                );
                Ok(Box::new(MySqlSnapshotLock { conn, coordinates }))
            }
            Err(e) => {
                if let Err(unlock) = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql("UNLOCK TABLES")).await {
                    tracing::warn!(error = %unlock, "Failed to unlock tables, closing session");
                }
                Err(e)
            }
        }
    }
}

struct MySqlSnapshotLock {
    conn: PoolConnection<MySql>,
    coordinates: BackupMetadata,
}

#[async_trait]
impl SnapshotLock for MySqlSnapshotLock {
    fn coordinates(&self) -> &BackupMetadata {
        &self.coordinates
    }

    async fn release(mut self: Box<Self>) -> Result<()> {
        sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql("UNLOCK TABLES")).await?;
        tracing::info!("Global read lock released");
        Ok(())
    }
}

async fn binlog_status(conn: &mut MySqlConnection) -> Result<BackupMetadata> {
    let row = match sqlx::query("SHOW MASTER STATUS")
        .fetch_optional(&mut *conn)
        .await
    {
        Ok(row) => row,
        // Removed in 8.4 in favour of SHOW BINARY LOG STATUS.
        Err(sqlx::Error::Database(e)) => {
            tracing::debug!(error = %e, "SHOW MASTER STATUS rejected, retrying with new syntax");
            sqlx::query("SHOW BINARY LOG STATUS")
                .fetch_optional(&mut *conn)
                .await?
        }
        Err(e) => return Err(e.into()),
    };

    row.map_or_else(|| Ok(BackupMetadata::default()), |row| coordinates_from_row(&row))
}

fn coordinates_from_row(row: &MySqlRow) -> Result<BackupMetadata> {
    let log_file: String = row.try_get("File")?;
    let position: u64 = row.try_get("Position")?;
    let gtid = row
        .try_get::<Option<String>, _>("Executed_Gtid_Set")
        .ok()
        .flatten()
        .unwrap_or_default();

    Ok(
        BackupMetadata::positional(log_file, i64::try_from(position).unwrap_or(i64::MAX))
            .with_gtid(normalize_gtid(&gtid)),
    )
}

/// Strip the line breaks and spaces the server inserts into long GTID sets.
pub(crate) fn normalize_gtid(set: &str) -> String {
    set.chars().filter(|c| !c.is_whitespace()).collect()
}
