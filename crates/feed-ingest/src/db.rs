//! Database layer
//!
//! The engine's shared mutable state lives here: PREMIS event rows, the
//! dispatch queue, the error journal, minted handles, and the ingest log.
//! All writes that may repeat across retries or reingests use `REPLACE
//! INTO` keyed on the natural primary key, so they are idempotent.

use crate::error::{IngestError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Open a connection pool, creating the database file if needed.
///
/// In-memory databases get a single connection so every query sees the
/// same store.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let max_connections = if url.contains(":memory:") { 1 } else { 10 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create the schema if it doesn't exist yet
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS premis_events (
            namespace     TEXT NOT NULL,
            id            TEXT NOT NULL,
            eventid       TEXT NOT NULL,
            eventtype_id  TEXT NOT NULL,
            outcome       TEXT,
            date          TEXT NOT NULL,
            PRIMARY KEY (namespace, id, eventtype_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS feed_queue (
            namespace      TEXT NOT NULL,
            id             TEXT NOT NULL,
            pkg_type       TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'ready',
            node           TEXT,
            failure_count  INTEGER NOT NULL DEFAULT 0,
            priority       INTEGER NOT NULL DEFAULT 0,
            release_date   TEXT,
            PRIMARY KEY (namespace, id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS errors (
            namespace  TEXT NOT NULL,
            id         TEXT NOT NULL,
            date       TEXT NOT NULL,
            stage      TEXT,
            operation  TEXT,
            file       TEXT,
            field      TEXT,
            detail     TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS handles (
            handle       TEXT NOT NULL PRIMARY KEY,
            url          TEXT NOT NULL,
            root_admin   TEXT NOT NULL,
            local_admin  TEXT NOT NULL,
            created      TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS ingest_log (
            namespace   TEXT NOT NULL,
            id          TEXT NOT NULL,
            is_repeat   INTEGER NOT NULL DEFAULT 0,
            ingest_date TEXT NOT NULL,
            PRIMARY KEY (namespace, id)
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Stored PREMIS event row for one (object, event code)
#[derive(Debug, Clone)]
pub struct EventInfo {
    pub eventid: String,
    pub date: String,
    pub outcome: Option<String>,
}

/// Idempotently record a PREMIS event. The primary key guarantees at most
/// one event of each type per object; re-recording replaces the row.
pub async fn replace_premis_event(
    pool: &SqlitePool,
    namespace: &str,
    id: &str,
    eventid: &str,
    code: &str,
    date: &str,
    outcome: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        REPLACE INTO premis_events (namespace, id, eventid, eventtype_id, outcome, date)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(namespace)
    .bind(id)
    .bind(eventid)
    .bind(code)
    .bind(outcome)
    .bind(date)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch the stored event row for an event code, if any
pub async fn get_event_info(
    pool: &SqlitePool,
    namespace: &str,
    id: &str,
    code: &str,
) -> Result<Option<EventInfo>> {
    let row = sqlx::query(
        r#"
        SELECT eventid, date, outcome
        FROM premis_events
        WHERE namespace = ? AND id = ? AND eventtype_id = ?
        "#,
    )
    .bind(namespace)
    .bind(id)
    .bind(code)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| EventInfo {
        eventid: r.get("eventid"),
        date: r.get("date"),
        outcome: r.get("outcome"),
    }))
}

/// Remove all recorded events for an object, after they have been
/// committed to its archived METS
pub async fn clear_premis_events(pool: &SqlitePool, namespace: &str, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM premis_events WHERE namespace = ? AND id = ?")
        .bind(namespace)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Append a row to the error journal
pub async fn journal_error(
    pool: &SqlitePool,
    namespace: &str,
    id: &str,
    stage: &str,
    error: &IngestError,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO errors (namespace, id, date, stage, operation, file, field, detail)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(namespace)
    .bind(id)
    .bind(now_iso())
    .bind(stage)
    .bind(error.code())
    .bind(error.file())
    .bind(error.field())
    .bind(error.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a successful collation; repeats replace the prior row
pub async fn log_ingest_success(
    pool: &SqlitePool,
    namespace: &str,
    id: &str,
    is_repeat: bool,
) -> Result<()> {
    sqlx::query(
        r#"
        REPLACE INTO ingest_log (namespace, id, is_repeat, ingest_date)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(namespace)
    .bind(id)
    .bind(is_repeat as i32)
    .bind(now_iso())
    .execute(pool)
    .await?;

    Ok(())
}

/// Emit (or refresh) a minted handle row
pub async fn replace_handle(
    pool: &SqlitePool,
    handle: &str,
    url: &str,
    root_admin: &str,
    local_admin: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        REPLACE INTO handles (handle, url, root_admin, local_admin, created)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(handle)
    .bind(url)
    .bind(root_admin)
    .bind(local_admin)
    .bind(now_iso())
    .execute(pool)
    .await?;

    Ok(())
}

/// A queue row ready for dispatch
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueRow {
    pub namespace: String,
    pub id: String,
    pub pkg_type: String,
    pub status: String,
    pub failure_count: i64,
}

/// Add (or reset) a volume on the dispatch queue
pub async fn enqueue(
    pool: &SqlitePool,
    namespace: &str,
    id: &str,
    pkg_type: &str,
    status: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        REPLACE INTO feed_queue (namespace, id, pkg_type, status, node, failure_count)
        VALUES (?, ?, ?, ?, NULL, 0)
        "#,
    )
    .bind(namespace)
    .bind(id)
    .bind(pkg_type)
    .bind(status)
    .execute(pool)
    .await?;

    Ok(())
}

/// Unclaimed, unreleased queue rows in priority order
pub async fn pending_rows(
    pool: &SqlitePool,
    release_states: &[String],
) -> Result<Vec<QueueRow>> {
    let rows = sqlx::query_as::<_, QueueRow>(
        r#"
        SELECT namespace, id, pkg_type, status, failure_count
        FROM feed_queue
        WHERE node IS NULL
        ORDER BY priority DESC, namespace, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter(|row| !release_states.iter().any(|s| *s == row.status))
        .collect())
}

/// Claim one queue row for this node. Returns false when another worker
/// got there first.
pub async fn claim(pool: &SqlitePool, namespace: &str, id: &str, node: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE feed_queue SET node = ?
        WHERE namespace = ? AND id = ? AND node IS NULL
        "#,
    )
    .bind(node)
    .bind(namespace)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Checkpoint a job result onto the queue row
pub async fn update_queue(
    pool: &SqlitePool,
    namespace: &str,
    id: &str,
    status: &str,
    failed: bool,
    release: bool,
) -> Result<()> {
    let release_date = release.then(now_iso);

    sqlx::query(
        r#"
        UPDATE feed_queue
        SET status = ?,
            failure_count = failure_count + ?,
            release_date = COALESCE(?, release_date)
        WHERE namespace = ? AND id = ?
        "#,
    )
    .bind(status)
    .bind(if failed { 1 } else { 0 })
    .bind(release_date)
    .bind(namespace)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Release a node claim after a dispatch finishes
pub async fn release_claim(pool: &SqlitePool, namespace: &str, id: &str) -> Result<()> {
    sqlx::query("UPDATE feed_queue SET node = NULL WHERE namespace = ? AND id = ?")
        .bind(namespace)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Fetch a queue row (diagnostics and tests)
pub async fn queue_row(
    pool: &SqlitePool,
    namespace: &str,
    id: &str,
) -> Result<Option<QueueRow>> {
    let row = sqlx::query_as::<_, QueueRow>(
        r#"
        SELECT namespace, id, pkg_type, status, failure_count
        FROM feed_queue
        WHERE namespace = ? AND id = ?
        "#,
    )
    .bind(namespace)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_premis_event_replace_is_idempotent() {
        let pool = memory_pool().await;

        replace_premis_event(
            &pool,
            "test",
            "obj1",
            "uuid-1",
            "ingestion",
            "2024-01-01T00:00:00Z",
            None,
        )
        .await
        .unwrap();
        replace_premis_event(
            &pool,
            "test",
            "obj1",
            "uuid-1",
            "ingestion",
            "2024-01-01T00:00:00Z",
            Some("<outcome/>"),
        )
        .await
        .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM premis_events")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let info = get_event_info(&pool, "test", "obj1", "ingestion")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.eventid, "uuid-1");
        assert_eq!(info.outcome.as_deref(), Some("<outcome/>"));
    }

    #[tokio::test]
    async fn test_clear_premis_events() {
        let pool = memory_pool().await;
        replace_premis_event(&pool, "test", "obj1", "u", "ingestion", "2024", None)
            .await
            .unwrap();
        clear_premis_events(&pool, "test", "obj1").await.unwrap();

        assert!(get_event_info(&pool, "test", "obj1", "ingestion")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_queue_claim_is_exclusive() {
        let pool = memory_pool().await;
        enqueue(&pool, "test", "obj1", "simple", "ready").await.unwrap();

        assert!(claim(&pool, "test", "obj1", "node-a").await.unwrap());
        assert!(!claim(&pool, "test", "obj1", "node-b").await.unwrap());

        release_claim(&pool, "test", "obj1").await.unwrap();
        assert!(claim(&pool, "test", "obj1", "node-b").await.unwrap());
    }

    #[tokio::test]
    async fn test_pending_rows_skips_released() {
        let pool = memory_pool().await;
        enqueue(&pool, "test", "obj1", "simple", "ready").await.unwrap();
        enqueue(&pool, "test", "obj2", "simple", "collated").await.unwrap();

        let release_states = vec!["collated".to_string(), "punted".to_string()];
        let rows = pending_rows(&pool, &release_states).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "obj1");
    }

    #[tokio::test]
    async fn test_update_queue_counts_failures() {
        let pool = memory_pool().await;
        enqueue(&pool, "test", "obj1", "simple", "ready").await.unwrap();

        update_queue(&pool, "test", "obj1", "ready", true, false)
            .await
            .unwrap();
        update_queue(&pool, "test", "obj1", "punted", true, true)
            .await
            .unwrap();

        let row = queue_row(&pool, "test", "obj1").await.unwrap().unwrap();
        assert_eq!(row.status, "punted");
        assert_eq!(row.failure_count, 2);
    }
}
