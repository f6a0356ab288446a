//! SQLite-backed command queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use stampede_core::{Command, CommandStatus, CommandType};
use stampede_interfaces::{CommandStore, StorageError};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Stored error text is capped; earlier entries win, the tail is cut.
const ERROR_DESCRIPTION_LIMIT: usize = 250;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS commands (
    command_id           INTEGER PRIMARY KEY AUTOINCREMENT,
    command_type         TEXT    NOT NULL,
    scope                TEXT    NOT NULL,
    run_id               INTEGER NOT NULL,
    script_ids           TEXT    NOT NULL DEFAULT '[]',
    percentage_of_target INTEGER,
    increase_rps         INTEGER NOT NULL DEFAULT -1,
    status               TEXT    NOT NULL DEFAULT 'created',
    error_description    TEXT    NOT NULL DEFAULT '',
    hostname             TEXT    NOT NULL,
    created_at           TEXT    NOT NULL,
    updated_at           TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_commands_lease ON commands (status, hostname, command_type);
CREATE INDEX IF NOT EXISTS idx_commands_run ON commands (run_id, command_type, status);
";

/// Priority buckets for leasing; stops beat starts, Update fills in.
const PRIORITY_CASE: &str = "CASE command_type \
    WHEN 'stop_scenario' THEN 0 \
    WHEN 'stop_script' THEN 1 \
    WHEN 'run_script' THEN 2 \
    WHEN 'run_simple_script' THEN 3 \
    WHEN 'run_scenario' THEN 4 \
    WHEN 'adjustment' THEN 5 \
    WHEN 'increase' THEN 6 \
    ELSE 7 END";

/// Durable command queue backed by SQLite.
///
/// The lease is a single `UPDATE … WHERE command_id = (SELECT … LIMIT 1)
/// RETURNING *` statement: selection and the Created→Processed flip are
/// one atomic step, so concurrent replicas can never claim the same row.
#[derive(Clone)]
pub struct SqliteCommandStore {
    pool: SqlitePool,
    shared_host_pool: bool,
}

impl SqliteCommandStore {
    /// Open (and create if missing) the queue database at `path`.
    pub async fn connect(path: &str, shared_host_pool: bool) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(StorageError::internal)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: e.to_string(),
            })?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(StorageError::internal)?;

        Ok(Self {
            pool,
            shared_host_pool,
        })
    }

    fn host_filter<'a>(&self, hostname: &'a str) -> Option<&'a str> {
        if self.shared_host_pool {
            None
        } else {
            Some(hostname)
        }
    }
}

#[async_trait]
impl CommandStore for SqliteCommandStore {
    async fn enqueue(&self, mut command: Command) -> Result<Command, StorageError> {
        // A fast self-chaining Update loop must not pile up a backlog.
        if command.command_type == CommandType::Update {
            self.delete_pending_updates(command.run_id).await?;
        }

        let now = Utc::now();
        command.status = CommandStatus::Created;
        command.created_at = now;
        command.updated_at = now;

        let script_ids =
            serde_json::to_string(&command.script_ids).map_err(StorageError::internal)?;

        let result = sqlx::query(
            "INSERT INTO commands (command_type, scope, run_id, script_ids, \
             percentage_of_target, increase_rps, status, error_description, hostname, \
             created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(command.command_type.as_str())
        .bind(command.scope.as_str())
        .bind(command.run_id)
        .bind(&script_ids)
        .bind(command.percentage_of_target)
        .bind(command.increase_rps)
        .bind(command.status.as_str())
        .bind(&command.error_description)
        .bind(&command.hostname)
        .bind(command.created_at)
        .bind(command.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::internal)?;

        command.id = result.last_insert_rowid();
        debug!(id = command.id, command_type = %command.command_type, run_id = command.run_id, "command enqueued");
        Ok(command)
    }

    async fn lease_next(&self, hostname: &str) -> Result<Option<Command>, StorageError> {
        let sql = format!(
            "UPDATE commands SET status = 'processed', updated_at = ?1 \
             WHERE command_id = ( \
                 SELECT command_id FROM commands \
                 WHERE status = 'created' AND (?2 IS NULL OR hostname = ?2) \
                 ORDER BY {PRIORITY_CASE}, command_id \
                 LIMIT 1) \
             RETURNING command_id, command_type, scope, run_id, script_ids, \
                 percentage_of_target, increase_rps, status, error_description, hostname, \
                 created_at, updated_at"
        );

        let row = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(self.host_filter(hostname))
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::internal)?;

        row.map(|r| command_from_row(&r)).transpose()
    }

    async fn update_status(
        &self,
        command: &mut Command,
        status: CommandStatus,
        error_append: &str,
    ) -> Result<(), StorageError> {
        command.append_error(error_append);
        command.status = status;
        command.updated_at = Utc::now();

        if status == CommandStatus::Failed {
            warn!(
                id = command.id,
                command_type = %command.command_type,
                run_id = command.run_id,
                error = %command.error_description,
                "command failed"
            );
        }

        sqlx::query(
            "UPDATE commands SET status = ?1, error_description = ?2, updated_at = ?3 \
             WHERE command_id = ?4",
        )
        .bind(command.status.as_str())
        .bind(truncate_error(&command.error_description))
        .bind(command.updated_at)
        .bind(command.id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::internal)?;

        Ok(())
    }

    async fn complete(&self, command: &Command) -> Result<bool, StorageError> {
        if command.status == CommandStatus::Completed && command.error_description.is_empty() {
            sqlx::query("DELETE FROM commands WHERE command_id = ?1")
                .bind(command.id)
                .execute(&self.pool)
                .await
                .map_err(StorageError::internal)?;
            return Ok(true);
        }

        debug!(
            id = command.id,
            status = %command.status,
            "command retained for diagnosis"
        );
        sqlx::query(
            "UPDATE commands SET status = ?1, error_description = ?2, updated_at = ?3 \
             WHERE command_id = ?4",
        )
        .bind(command.status.as_str())
        .bind(truncate_error(&command.error_description))
        .bind(Utc::now())
        .bind(command.id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::internal)?;
        Ok(false)
    }

    async fn count_created(&self, hostname: &str) -> Result<u64, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM commands \
             WHERE status = 'created' AND (?1 IS NULL OR hostname = ?1)",
        )
        .bind(self.host_filter(hostname))
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::internal)?;

        let count: i64 = row.try_get("cnt").map_err(StorageError::internal)?;
        Ok(count as u64)
    }

    async fn delete_pending_updates(&self, run_id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM commands \
             WHERE command_type = 'update' AND run_id = ?1 AND status = 'created'",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::internal)?;

        Ok(result.rows_affected())
    }
}

fn truncate_error(text: &str) -> String {
    if text.chars().count() <= ERROR_DESCRIPTION_LIMIT {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(ERROR_DESCRIPTION_LIMIT).collect();
    truncated.push_str("...");
    truncated
}

fn command_from_row(row: &SqliteRow) -> Result<Command, StorageError> {
    let command_type: String = row.try_get("command_type").map_err(StorageError::internal)?;
    let scope: String = row.try_get("scope").map_err(StorageError::internal)?;
    let status: String = row.try_get("status").map_err(StorageError::internal)?;
    let script_ids: String = row.try_get("script_ids").map_err(StorageError::internal)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(StorageError::internal)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(StorageError::internal)?;

    Ok(Command {
        id: row.try_get("command_id").map_err(StorageError::internal)?,
        command_type: command_type.parse().map_err(StorageError::internal)?,
        scope: scope.parse().map_err(StorageError::internal)?,
        run_id: row.try_get("run_id").map_err(StorageError::internal)?,
        script_ids: serde_json::from_str(&script_ids).map_err(StorageError::internal)?,
        percentage_of_target: row
            .try_get("percentage_of_target")
            .map_err(StorageError::internal)?,
        increase_rps: row.try_get("increase_rps").map_err(StorageError::internal)?,
        status: status.parse().map_err(StorageError::internal)?,
        error_description: row
            .try_get("error_description")
            .map_err(StorageError::internal)?,
        hostname: row.try_get("hostname").map_err(StorageError::internal)?,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn store(dir: &tempfile::TempDir) -> SqliteCommandStore {
        let path = format!("sqlite://{}", dir.path().join("queue.db").display());
        SqliteCommandStore::connect(&path, false).await.unwrap()
    }

    #[tokio::test]
    async fn leases_respect_priority_and_host() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store.enqueue(Command::update(1, "h1")).await.unwrap();
        store
            .enqueue(Command::run_scenario(1, 100, "h1"))
            .await
            .unwrap();
        store.enqueue(Command::stop_scenario(1, "h1")).await.unwrap();
        store
            .enqueue(Command::adjustment(1, 50, "h2"))
            .await
            .unwrap();

        let c1 = store.lease_next("h1").await.unwrap().unwrap();
        assert_eq!(c1.command_type, CommandType::StopScenario);
        assert_eq!(c1.status, CommandStatus::Processed);
        let c2 = store.lease_next("h1").await.unwrap().unwrap();
        assert_eq!(c2.command_type, CommandType::RunScenario);
        let c3 = store.lease_next("h1").await.unwrap().unwrap();
        assert_eq!(c3.command_type, CommandType::Update);
        // h2's adjustment is invisible to h1.
        assert!(store.lease_next("h1").await.unwrap().is_none());
        assert!(store.lease_next("h2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_leases_claim_distinct_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(store(&dir).await);

        for run_id in 0..4 {
            store
                .enqueue(Command::run_scenario(run_id, 100, "h1"))
                .await
                .unwrap();
        }

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.spawn(async move { store.lease_next("h1").await.unwrap() });
        }

        let mut leased = Vec::new();
        while let Some(result) = tasks.join_next().await {
            if let Some(cmd) = result.unwrap() {
                leased.push(cmd.id);
            }
        }

        let distinct: HashSet<i64> = leased.iter().copied().collect();
        assert_eq!(leased.len(), 4, "exactly min(callers, rows) leases");
        assert_eq!(distinct.len(), 4, "no row leased twice");
    }

    #[tokio::test]
    async fn complete_deletes_only_clean_commands() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let mut clean = store.enqueue(Command::update(1, "h1")).await.unwrap();
        store
            .update_status(&mut clean, CommandStatus::Completed, "")
            .await
            .unwrap();
        assert!(store.complete(&clean).await.unwrap());

        let mut dirty = store.enqueue(Command::update(2, "h1")).await.unwrap();
        store
            .update_status(&mut dirty, CommandStatus::Failed, "agent unreachable")
            .await
            .unwrap();
        assert!(!store.complete(&dirty).await.unwrap());
        // The failed row is still there for diagnosis, but not leasable.
        assert_eq!(store.count_created("h1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn enqueueing_update_replaces_pending_update_for_same_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let first = store.enqueue(Command::update(7, "h1")).await.unwrap();
        let second = store.enqueue(Command::update(7, "h1")).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.count_created("h1").await.unwrap(), 1);

        // Updates for other runs are untouched.
        store.enqueue(Command::update(8, "h1")).await.unwrap();
        assert_eq!(store.count_created("h1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn error_description_is_truncated_at_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let mut cmd = store.enqueue(Command::update(1, "h1")).await.unwrap();
        let long = "x".repeat(400);
        store
            .update_status(&mut cmd, CommandStatus::Failed, &long)
            .await
            .unwrap();

        // Lease cannot return it (Failed); read back via a fresh lease of
        // nothing plus the in-struct state instead.
        assert_eq!(cmd.error_description.len(), 400);
        assert_eq!(truncate_error(&cmd.error_description).len(), 253);
    }

    #[tokio::test]
    async fn shared_pool_ignores_hostname() {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("sqlite://{}", dir.path().join("pool.db").display());
        let store = SqliteCommandStore::connect(&path, true).await.unwrap();

        store.enqueue(Command::update(1, "other-host")).await.unwrap();
        assert!(store.lease_next("this-host").await.unwrap().is_some());
    }
}
