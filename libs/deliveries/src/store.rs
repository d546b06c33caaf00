//! Event-log backend. The log is append-only and read at search time through
//! parameterized SQL; `SqliteEventLog` is the shipped embedded backend and
//! also serves as the dispatch pipeline's event sink.

use async_trait::async_trait;
use peregrine_core::{DeliveryEvent, EventSink};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Number, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::query::SqlValue;

/// Append-only event log with parameterized query execution. Rows stream
/// until the result set is exhausted or `cancel` fires; rows are immutable so
/// cancellation needs no rollback.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, workspace_id: Uuid, events: Vec<DeliveryEvent>) -> anyhow::Result<()>;

    /// Executes a parameterized statement, returning each row as a JSON
    /// object keyed by column name.
    async fn query_rows(
        &self,
        sql: &str,
        params: &[(String, SqlValue)],
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Value>>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS delivery_events (
    workspace_id TEXT NOT NULL,
    user_or_anonymous_id TEXT NOT NULL,
    anonymous INTEGER NOT NULL DEFAULT 0,
    event TEXT NOT NULL,
    event_time INTEGER NOT NULL,
    processing_time INTEGER NOT NULL,
    message_id TEXT NOT NULL,
    hidden INTEGER NOT NULL DEFAULT 0,
    properties TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_delivery_events_search
    ON delivery_events (workspace_id, event, event_time);
CREATE INDEX IF NOT EXISTS idx_delivery_events_message
    ON delivery_events (workspace_id, message_id);
CREATE TABLE IF NOT EXISTS group_user_assignments (
    workspace_id TEXT NOT NULL,
    group_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    assigned INTEGER NOT NULL,
    assigned_at INTEGER NOT NULL
);
";

/// Embedded SQLite event log. The log enforces no `message_id` uniqueness;
/// de-duplication stays with the caller choosing message ids.
pub struct SqliteEventLog {
    conn: Mutex<Connection>,
}

impl SqliteEventLog {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Records a group membership change; search resolves membership by the
    /// latest assignment per `(group, user)`.
    pub async fn set_group_assignment(
        &self,
        workspace_id: Uuid,
        group_id: &str,
        user_id: &str,
        assigned: bool,
        assigned_at: i64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO group_user_assignments \
             (workspace_id, group_id, user_id, assigned, assigned_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                workspace_id.to_string(),
                group_id,
                user_id,
                assigned as i64,
                assigned_at
            ],
        )?;
        Ok(())
    }
}

fn to_sqlite(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => rusqlite::types::Value::Null,
        SqlValue::Integer(i) => rusqlite::types::Value::Integer(*i),
        SqlValue::Real(f) => rusqlite::types::Value::Real(*f),
        SqlValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(&self, workspace_id: Uuid, events: Vec<DeliveryEvent>) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO delivery_events \
             (workspace_id, user_or_anonymous_id, anonymous, event, event_time, \
              processing_time, message_id, hidden, properties) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for event in events {
            stmt.execute(rusqlite::params![
                workspace_id.to_string(),
                event.user_or_anonymous_id,
                event.anonymous as i64,
                event.event,
                event.event_time,
                event.processing_time,
                event.message_id,
                event.hidden as i64,
                event.properties.to_string(),
            ])?;
        }
        Ok(())
    }

    async fn query_rows(
        &self,
        sql: &str,
        params: &[(String, SqlValue)],
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<Value>> {
        if cancel.is_cancelled() {
            anyhow::bail!("delivery query cancelled");
        }
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let converted: Vec<(String, rusqlite::types::Value)> = params
            .iter()
            .map(|(name, value)| (name.clone(), to_sqlite(value)))
            .collect();
        let bound: Vec<(&str, &dyn rusqlite::ToSql)> = converted
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
            .collect();

        let mut rows = stmt.query(bound.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            if cancel.is_cancelled() {
                anyhow::bail!("delivery query cancelled");
            }
            let mut object = Map::with_capacity(column_names.len());
            for (index, name) in column_names.iter().enumerate() {
                object.insert(name.clone(), to_json(row.get_ref(index)?));
            }
            out.push(Value::Object(object));
        }
        Ok(out)
    }
}

#[async_trait]
impl EventSink for SqliteEventLog {
    async fn append_events(
        &self,
        workspace_id: Uuid,
        events: Vec<DeliveryEvent>,
    ) -> anyhow::Result<()> {
        EventLog::append(self, workspace_id, events).await
    }
}
