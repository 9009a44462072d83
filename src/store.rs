//! Document store contract and the SQLite implementation the daemon ships with.
//!
//! Every write appends to a change log in the same transaction. Subscribers
//! keep a cursor into that log; a batch is the current ordered document set
//! plus the log entries past the cursor, coalesced per document.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        }
    }

    fn parse(s: &str) -> Option<ChangeKind> {
        match s {
            "created" => Some(ChangeKind::Created),
            "modified" => Some(ChangeKind::Modified),
            "removed" => Some(ChangeKind::Removed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    /// For removals, the last body the document had.
    pub document: Document,
    pub has_pending_write: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub documents: Vec<Document>,
    pub changes: Vec<DocumentChange>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("document body must be a JSON object")]
    NotAnObject,
    #[error("corrupt change log: {0}")]
    Corrupt(String),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[allow(dead_code)]
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type BatchResult = Result<ChangeBatch, StoreError>;

/// A live feed of batches. Cancelling (or dropping) it detaches from the store.
pub struct Subscription {
    batches: mpsc::UnboundedReceiver<BatchResult>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(batches: mpsc::UnboundedReceiver<BatchResult>, cancel: CancellationToken) -> Self {
        Subscription { batches, cancel }
    }

    /// `None` once the feed is cancelled or the store hung up.
    pub async fn next_batch(&mut self) -> Option<BatchResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            batch = self.batches.recv() => batch,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn subscribe(&self, collection: &str, order_field: &str) -> Result<Subscription, StoreError>;
    async fn create(&self, collection: &str, data: Value) -> Result<String, StoreError>;
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError>;
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;
}

struct Subscriber {
    session: String,
    collection: String,
    order_field: String,
    cursor: i64,
    tx: mpsc::UnboundedSender<BatchResult>,
    cancel: CancellationToken,
}

struct Shared {
    conn: Mutex<Connection>,
    subscribers: Mutex<Vec<Subscriber>>,
}

/// One client session over a SQLite document database. Clones share the
/// session; `fork_session` opens another client over the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    shared: Arc<Shared>,
    session: String,
    poll_interval: Duration,
}

struct LogEntry {
    seq: i64,
    doc_id: String,
    kind: String,
    origin: String,
    body: String,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        SqliteStore {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                subscribers: Mutex::new(Vec::new()),
            }),
            session: Uuid::new_v4().to_string(),
            poll_interval: Duration::from_millis(500),
        }
    }

    /// How often subscriptions look for writes made by other processes.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    #[cfg(test)]
    pub fn fork_session(&self) -> SqliteStore {
        SqliteStore {
            shared: Arc::clone(&self.shared),
            session: Uuid::new_v4().to_string(),
            poll_interval: self.poll_interval,
        }
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let out = {
            let mut conn = self.shared.conn.lock().map_err(|_| StoreError::Poisoned)?;
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            out
        };
        pump(&self.shared);
        Ok(out)
    }

    fn append_change(
        &self,
        conn: &Connection,
        collection: &str,
        doc_id: &str,
        kind: ChangeKind,
        body: &str,
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO changes(collection, doc_id, kind, origin, body, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                collection,
                doc_id,
                kind.as_str(),
                self.session,
                body,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

fn load_body(conn: &Connection, collection: &str, id: &str) -> Result<Map<String, Value>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(body) = body else {
        return Err(StoreError::NotFound(id.to_string()));
    };
    match serde_json::from_str(&body)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Corrupt(format!("document {id} is not an object"))),
    }
}

fn load_documents(conn: &Connection, collection: &str, order_field: &str) -> Result<Vec<Document>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, body FROM documents WHERE collection = ?1
         ORDER BY json_extract(body, ?2), id",
    )?;
    let rows = stmt
        .query_map(params![collection, format!("$.{order_field}")], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, body)| {
            Ok(Document {
                id,
                data: serde_json::from_str(&body)?,
            })
        })
        .collect()
}

fn log_head(conn: &Connection, collection: &str) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) FROM changes WHERE collection = ?1",
        params![collection],
        |r| r.get(0),
    )?)
}

/// Log head and document set read from one snapshot, so a write committed
/// by another process lands either in the baseline or past the cursor.
fn baseline(conn: &Connection, collection: &str, order_field: &str) -> Result<(i64, Vec<Document>), StoreError> {
    let snapshot = conn.unchecked_transaction()?;
    let cursor = log_head(&snapshot, collection)?;
    let documents = load_documents(&snapshot, collection, order_field)?;
    snapshot.finish()?;
    Ok((cursor, documents))
}

/// Folds consecutive log entries into one change per document, in first-seen order.
fn coalesce(entries: Vec<LogEntry>, session: &str) -> Result<Vec<DocumentChange>, StoreError> {
    let mut out: Vec<Option<DocumentChange>> = Vec::new();
    let mut pos: HashMap<String, usize> = HashMap::new();
    for e in entries {
        let kind = ChangeKind::parse(&e.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown change kind {} at seq {}", e.kind, e.seq)))?;
        let change = DocumentChange {
            kind,
            document: Document {
                id: e.doc_id.clone(),
                data: serde_json::from_str(&e.body)?,
            },
            has_pending_write: e.origin == session,
        };
        let prev_kind = pos
            .get(&e.doc_id)
            .and_then(|i| out[*i].as_ref())
            .map(|c| c.kind);
        match (prev_kind, kind) {
            (Some(ChangeKind::Created), ChangeKind::Removed) => {
                if let Some(i) = pos.remove(&e.doc_id) {
                    out[i] = None;
                }
            }
            (Some(ChangeKind::Created), ChangeKind::Modified) => {
                let i = pos[&e.doc_id];
                out[i] = Some(DocumentChange {
                    kind: ChangeKind::Created,
                    ..change
                });
            }
            (Some(_), _) => {
                let i = pos[&e.doc_id];
                out[i] = Some(change);
            }
            (None, _) => {
                pos.insert(e.doc_id, out.len());
                out.push(Some(change));
            }
        }
    }
    Ok(out.into_iter().flatten().collect())
}

fn read_log(conn: &Connection, collection: &str, cursor: i64) -> Result<Vec<LogEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT seq, doc_id, kind, origin, body FROM changes
         WHERE collection = ?1 AND seq > ?2
         ORDER BY seq",
    )?;
    let entries = stmt
        .query_map(params![collection, cursor], |r| {
            Ok(LogEntry {
                seq: r.get(0)?,
                doc_id: r.get(1)?,
                kind: r.get(2)?,
                origin: r.get(3)?,
                body: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

fn next_batch(conn: &Connection, sub: &mut Subscriber) -> Result<Option<ChangeBatch>, StoreError> {
    // The document set must match the log up to the new cursor.
    let snapshot = conn.unchecked_transaction()?;
    let entries = read_log(&snapshot, &sub.collection, sub.cursor)?;
    let Some(last) = entries.last() else {
        return Ok(None);
    };
    let cursor = last.seq;
    let changes = coalesce(entries, &sub.session)?;
    let documents = if changes.is_empty() {
        Vec::new()
    } else {
        load_documents(&snapshot, &sub.collection, &sub.order_field)?
    };
    snapshot.finish()?;
    sub.cursor = cursor;
    if changes.is_empty() {
        return Ok(None);
    }
    Ok(Some(ChangeBatch { documents, changes }))
}

/// Delivers pending log entries to every live subscriber. A subscriber whose
/// batch cannot be built gets the error and is detached.
fn pump(shared: &Shared) {
    let Ok(mut subs) = shared.subscribers.lock() else {
        return;
    };
    subs.retain(|s| !s.cancel.is_cancelled() && !s.tx.is_closed());
    if subs.is_empty() {
        return;
    }
    let Ok(conn) = shared.conn.lock() else {
        for s in subs.drain(..) {
            let _ = s.tx.send(Err(StoreError::Poisoned));
        }
        return;
    };
    subs.retain_mut(|sub| match next_batch(&conn, sub) {
        Ok(None) => true,
        Ok(Some(batch)) => sub.tx.send(Ok(batch)).is_ok(),
        Err(e) => {
            tracing::warn!(collection = %sub.collection, error = %e, "subscription feed failed");
            let _ = sub.tx.send(Err(e));
            false
        }
    });
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn subscribe(&self, collection: &str, order_field: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        {
            let mut subs = self.shared.subscribers.lock().map_err(|_| StoreError::Poisoned)?;
            let conn = self.shared.conn.lock().map_err(|_| StoreError::Poisoned)?;
            let (cursor, documents) = baseline(&conn, collection, order_field)?;
            let changes = documents
                .iter()
                .map(|d| DocumentChange {
                    kind: ChangeKind::Created,
                    document: d.clone(),
                    has_pending_write: false,
                })
                .collect();
            let _ = tx.send(Ok(ChangeBatch { documents, changes }));
            subs.push(Subscriber {
                session: self.session.clone(),
                collection: collection.to_string(),
                order_field: order_field.to_string(),
                cursor,
                tx,
                cancel: cancel.clone(),
            });
        }

        let shared = Arc::clone(&self.shared);
        let stop = cancel.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => pump(&shared),
                }
            }
        });

        tracing::debug!(collection, order_field, session = %self.session, "subscribed");
        Ok(Subscription::new(rx, cancel))
    }

    async fn create(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        let Value::Object(map) = data else {
            return Err(StoreError::NotAnObject);
        };
        let id = Uuid::new_v4().to_string();
        let body = serde_json::to_string(&map)?;
        self.write(|tx| {
            tx.execute(
                "INSERT INTO documents(collection, id, body, updated_at) VALUES(?1, ?2, ?3, ?4)",
                params![collection, id, body, Utc::now().to_rfc3339()],
            )?;
            self.append_change(tx, collection, &id, ChangeKind::Created, &body)
        })?;
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<(), StoreError> {
        let Value::Object(patch) = patch else {
            return Err(StoreError::NotAnObject);
        };
        self.write(|tx| {
            let mut map = load_body(tx, collection, id)?;
            for (k, v) in patch {
                map.insert(k, v);
            }
            let body = serde_json::to_string(&map)?;
            tx.execute(
                "UPDATE documents SET body = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
                params![collection, id, body, Utc::now().to_rfc3339()],
            )?;
            self.append_change(tx, collection, id, ChangeKind::Modified, &body)
        })
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.write(|tx| {
            let body = serde_json::to_string(&load_body(tx, collection, id)?)?;
            tx.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
            self.append_change(tx, collection, id, ChangeKind::Removed, &body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    const COLLECTION: &str = "students";

    fn memory_store() -> SqliteStore {
        SqliteStore::new(db::open_in_memory().expect("open db"))
    }

    async fn next(sub: &mut Subscription) -> ChangeBatch {
        tokio::time::timeout(Duration::from_secs(2), sub.next_batch())
            .await
            .expect("batch before timeout")
            .expect("feed open")
            .expect("batch ok")
    }

    fn names(batch: &ChangeBatch) -> Vec<String> {
        batch
            .documents
            .iter()
            .map(|d| d.data["firstName"].as_str().unwrap_or("").to_string())
            .collect()
    }

    #[tokio::test]
    async fn first_batch_is_the_ordered_snapshot() {
        let store = memory_store();
        for name in ["Chai", "Anan", "Boon"] {
            store
                .create(COLLECTION, json!({ "firstName": name }))
                .await
                .expect("create");
        }
        let mut sub = store.subscribe(COLLECTION, "firstName").await.expect("subscribe");
        let batch = next(&mut sub).await;
        assert_eq!(names(&batch), vec!["Anan", "Boon", "Chai"]);
        assert_eq!(batch.changes.len(), 3);
        assert!(batch
            .changes
            .iter()
            .all(|c| c.kind == ChangeKind::Created && !c.has_pending_write));
    }

    #[tokio::test]
    async fn own_writes_carry_the_pending_flag_and_others_do_not() {
        let local = memory_store();
        let remote = local.fork_session();
        let mut sub = local.subscribe(COLLECTION, "firstName").await.expect("subscribe");
        let _ = next(&mut sub).await;

        local
            .create(COLLECTION, json!({ "firstName": "Mine" }))
            .await
            .expect("local create");
        let batch = next(&mut sub).await;
        assert_eq!(batch.changes.len(), 1);
        assert!(batch.changes[0].has_pending_write);

        remote
            .create(COLLECTION, json!({ "firstName": "Theirs" }))
            .await
            .expect("remote create");
        let batch = next(&mut sub).await;
        assert_eq!(batch.changes.len(), 1);
        assert!(!batch.changes[0].has_pending_write);
        assert_eq!(names(&batch), vec!["Mine", "Theirs"]);
    }

    #[tokio::test]
    async fn baseline_and_cursor_come_from_one_snapshot() {
        let workspace = std::env::temp_dir().join(format!("rosterd-store-{}", Uuid::new_v4()));
        let reader = db::open_db(&workspace).expect("open reader");
        let writer = SqliteStore::new(db::open_db(&workspace).expect("open writer"));
        writer
            .create(COLLECTION, json!({ "firstName": "Anan" }))
            .await
            .expect("create before");

        let snapshot = reader.unchecked_transaction().expect("begin");
        let head = log_head(&snapshot, COLLECTION).expect("head");
        writer
            .create(COLLECTION, json!({ "firstName": "Boon" }))
            .await
            .expect("create between reads");
        let documents = load_documents(&snapshot, COLLECTION, "firstName").expect("load");
        drop(snapshot);
        assert_eq!(head, 1);
        assert_eq!(documents.len(), 1);

        let (cursor, documents) = baseline(&reader, COLLECTION, "firstName").expect("baseline");
        assert_eq!(cursor, 2);
        assert_eq!(documents.len(), 2);

        // A later document reaches a subscriber once, past the baseline.
        let local = SqliteStore::new(reader).with_poll_interval(Duration::from_millis(20));
        let mut sub = local.subscribe(COLLECTION, "firstName").await.expect("subscribe");
        assert_eq!(next(&mut sub).await.documents.len(), 2);
        writer
            .create(COLLECTION, json!({ "firstName": "Chai" }))
            .await
            .expect("create after");
        let batch = next(&mut sub).await;
        assert_eq!(batch.changes.len(), 1);
        assert_eq!(batch.changes[0].document.data["firstName"], "Chai");
        assert!(!batch.changes[0].has_pending_write);

        drop(sub);
        let _ = std::fs::remove_dir_all(&workspace);
    }

    #[tokio::test]
    async fn update_merges_top_level_fields() {
        let store = memory_store();
        let id = store
            .create(COLLECTION, json!({ "firstName": "Anan", "lastName": "Dee" }))
            .await
            .expect("create");
        let mut sub = store.subscribe(COLLECTION, "firstName").await.expect("subscribe");
        let _ = next(&mut sub).await;

        store
            .update(COLLECTION, &id, json!({ "lastName": "Jaidee" }))
            .await
            .expect("update");
        let batch = next(&mut sub).await;
        assert_eq!(batch.changes[0].kind, ChangeKind::Modified);
        assert_eq!(batch.documents[0].data["firstName"], "Anan");
        assert_eq!(batch.documents[0].data["lastName"], "Jaidee");
    }

    #[tokio::test]
    async fn delete_reports_the_last_body() {
        let store = memory_store();
        let id = store
            .create(COLLECTION, json!({ "firstName": "Anan" }))
            .await
            .expect("create");
        let mut sub = store.subscribe(COLLECTION, "firstName").await.expect("subscribe");
        let _ = next(&mut sub).await;

        store.delete(COLLECTION, &id).await.expect("delete");
        let batch = next(&mut sub).await;
        assert!(batch.documents.is_empty());
        assert_eq!(batch.changes[0].kind, ChangeKind::Removed);
        assert_eq!(batch.changes[0].document.data["firstName"], "Anan");
    }

    #[tokio::test]
    async fn missing_documents_reject() {
        let store = memory_store();
        let err = store
            .update(COLLECTION, "nope", json!({ "a": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(matches!(
            store.delete(COLLECTION, "nope").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            store.create(COLLECTION, json!([1, 2])).await.unwrap_err(),
            StoreError::NotAnObject
        ));
    }

    #[tokio::test]
    async fn cancelled_subscription_goes_quiet() {
        let store = memory_store();
        let mut sub = store.subscribe(COLLECTION, "firstName").await.expect("subscribe");
        let _ = next(&mut sub).await;
        sub.cancel();
        store
            .create(COLLECTION, json!({ "firstName": "Late" }))
            .await
            .expect("create");
        assert!(sub.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn writes_from_another_connection_arrive_by_polling() {
        let dir = std::env::temp_dir().join(format!(
            "rosterd-store-poll-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let a = SqliteStore::new(db::open_db(&dir).expect("open a"))
            .with_poll_interval(Duration::from_millis(20));
        let b = SqliteStore::new(db::open_db(&dir).expect("open b"));
        let mut sub = a.subscribe(COLLECTION, "firstName").await.expect("subscribe");
        let _ = next(&mut sub).await;

        b.create(COLLECTION, json!({ "firstName": "Elsewhere" }))
            .await
            .expect("create");
        let batch = next(&mut sub).await;
        assert_eq!(names(&batch), vec!["Elsewhere"]);
        assert!(!batch.changes[0].has_pending_write);
    }

    fn entry(seq: i64, doc: &str, kind: &str, origin: &str) -> LogEntry {
        LogEntry {
            seq,
            doc_id: doc.to_string(),
            kind: kind.to_string(),
            origin: origin.to_string(),
            body: json!({ "seq": seq }).to_string(),
        }
    }

    #[test]
    fn coalesce_folds_changes_per_document() {
        let out = coalesce(
            vec![
                entry(1, "a", "created", "me"),
                entry(2, "a", "modified", "other"),
                entry(3, "b", "created", "me"),
                entry(4, "b", "removed", "me"),
                entry(5, "c", "modified", "me"),
                entry(6, "c", "removed", "other"),
            ],
            "me",
        )
        .expect("coalesce");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].document.id, "a");
        assert_eq!(out[0].kind, ChangeKind::Created);
        assert_eq!(out[0].document.data["seq"], 2);
        assert!(!out[0].has_pending_write);
        assert_eq!(out[1].document.id, "c");
        assert_eq!(out[1].kind, ChangeKind::Removed);
    }

    #[test]
    fn coalesce_rejects_unknown_kinds() {
        let err = coalesce(vec![entry(1, "a", "renamed", "me")], "me").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
