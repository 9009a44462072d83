use serde::Serialize;
use serde_json::Value;

use crate::model::StudentRecord;
use crate::store::{ChangeBatch, ChangeKind, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MirrorState {
    Unsubscribed,
    Subscribing,
    Live,
}

/// A change from another session worth telling the user about.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeCandidate {
    pub kind: ChangeKind,
    pub doc_id: String,
    pub subject_name: String,
}

/// In-memory copy of the roster, rebuilt wholesale from every batch.
#[derive(Debug)]
pub struct RosterMirror {
    state: MirrorState,
    snapshot: Vec<StudentRecord>,
    awaiting_baseline: bool,
    last_error: Option<String>,
}

impl Default for RosterMirror {
    fn default() -> Self {
        RosterMirror::new()
    }
}

impl RosterMirror {
    pub fn new() -> Self {
        RosterMirror {
            state: MirrorState::Unsubscribed,
            snapshot: Vec::new(),
            awaiting_baseline: true,
            last_error: None,
        }
    }

    pub fn state(&self) -> MirrorState {
        self.state
    }

    pub fn snapshot(&self) -> &[StudentRecord] {
        &self.snapshot
    }

    pub fn get(&self, storage_key: &str) -> Option<&StudentRecord> {
        self.snapshot
            .iter()
            .find(|s| s.storage_key.as_deref() == Some(storage_key))
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn begin(&mut self) {
        self.state = MirrorState::Subscribing;
        self.awaiting_baseline = true;
        self.last_error = None;
    }

    /// Replaces the snapshot and returns the changes to notify about. The
    /// first batch after `begin` is the baseline and yields nothing; so do
    /// removals and changes still carrying a pending local write.
    pub fn apply(&mut self, batch: &ChangeBatch) -> Vec<ChangeCandidate> {
        if self.state == MirrorState::Unsubscribed {
            return Vec::new();
        }
        self.snapshot = batch.documents.iter().filter_map(decode).collect();
        self.state = MirrorState::Live;
        if std::mem::replace(&mut self.awaiting_baseline, false) {
            return Vec::new();
        }
        batch
            .changes
            .iter()
            .filter(|c| matches!(c.kind, ChangeKind::Created | ChangeKind::Modified))
            .filter(|c| !c.has_pending_write)
            .map(|c| ChangeCandidate {
                kind: c.kind,
                doc_id: c.document.id.clone(),
                subject_name: subject_name(&c.document.data),
            })
            .collect()
    }

    /// The feed is gone; the roster is stale until a new subscription is live.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = MirrorState::Unsubscribed;
        self.snapshot.clear();
        self.awaiting_baseline = true;
        self.last_error = Some(reason.into());
    }

    pub fn teardown(&mut self) {
        self.state = MirrorState::Unsubscribed;
        self.snapshot.clear();
        self.awaiting_baseline = true;
    }
}

fn decode(doc: &Document) -> Option<StudentRecord> {
    match serde_json::from_value::<StudentRecord>(doc.data.clone()) {
        Ok(mut record) => {
            record.storage_key = Some(doc.id.clone());
            Some(record)
        }
        Err(e) => {
            tracing::warn!(doc_id = %doc.id, error = %e, "skipping undecodable student document");
            None
        }
    }
}

fn subject_name(data: &Value) -> String {
    let first = data.get("firstName").and_then(Value::as_str).unwrap_or("");
    let last = data.get("lastName").and_then(Value::as_str).unwrap_or("");
    format!("{} {}", first.trim(), last.trim()).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentChange;
    use serde_json::json;

    fn doc(id: &str, first: &str) -> Document {
        Document {
            id: id.to_string(),
            data: json!({ "firstName": first, "lastName": "Test" }),
        }
    }

    fn change(kind: ChangeKind, d: &Document, pending: bool) -> DocumentChange {
        DocumentChange {
            kind,
            document: d.clone(),
            has_pending_write: pending,
        }
    }

    fn baseline(docs: &[Document]) -> ChangeBatch {
        ChangeBatch {
            documents: docs.to_vec(),
            changes: docs
                .iter()
                .map(|d| change(ChangeKind::Created, d, false))
                .collect(),
        }
    }

    fn live_mirror(docs: &[Document]) -> RosterMirror {
        let mut m = RosterMirror::new();
        m.begin();
        assert!(m.apply(&baseline(docs)).is_empty());
        m
    }

    #[test]
    fn first_batch_is_a_silent_baseline() {
        let docs = [doc("a", "Anan"), doc("b", "Boon")];
        let mut m = RosterMirror::new();
        m.begin();
        assert_eq!(m.state(), MirrorState::Subscribing);
        assert!(m.apply(&baseline(&docs)).is_empty());
        assert_eq!(m.state(), MirrorState::Live);
        assert_eq!(m.snapshot().len(), 2);
        assert_eq!(m.get("b").map(|s| s.first_name.as_str()), Some("Boon"));
    }

    #[test]
    fn remote_modification_yields_one_candidate() {
        let docs = [doc("a", "Anan"), doc("b", "Boon")];
        let mut m = live_mirror(&docs);
        let edited = doc("b", "Boonma");
        let out = m.apply(&ChangeBatch {
            documents: vec![docs[0].clone(), edited.clone()],
            changes: vec![change(ChangeKind::Modified, &edited, false)],
        });
        assert_eq!(
            out,
            vec![ChangeCandidate {
                kind: ChangeKind::Modified,
                doc_id: "b".into(),
                subject_name: "Boonma Test".into(),
            }]
        );
        assert_eq!(m.get("b").map(|s| s.first_name.as_str()), Some("Boonma"));
    }

    #[test]
    fn local_echo_and_removals_are_silent() {
        let docs = [doc("a", "Anan"), doc("b", "Boon")];
        let mut m = live_mirror(&docs);
        let out = m.apply(&ChangeBatch {
            documents: docs.to_vec(),
            changes: vec![change(ChangeKind::Modified, &docs[1], true)],
        });
        assert!(out.is_empty());
        let out = m.apply(&ChangeBatch {
            documents: vec![docs[1].clone()],
            changes: vec![change(ChangeKind::Removed, &docs[0], false)],
        });
        assert!(out.is_empty());
        assert_eq!(m.snapshot().len(), 1);
    }

    #[test]
    fn snapshot_follows_batch_order_and_skips_bad_documents() {
        let mut m = RosterMirror::new();
        m.begin();
        let bad = Document {
            id: "x".into(),
            data: json!({ "firstName": "Bad", "weight": "heavy" }),
        };
        m.apply(&ChangeBatch {
            documents: vec![doc("c", "Chai"), bad, doc("a", "Anan")],
            changes: Vec::new(),
        });
        let keys: Vec<_> = m
            .snapshot()
            .iter()
            .filter_map(|s| s.storage_key.as_deref())
            .collect();
        assert_eq!(keys, vec!["c", "a"]);
    }

    #[test]
    fn teardown_resets_baseline_and_ignores_late_batches() {
        let docs = [doc("a", "Anan")];
        let mut m = live_mirror(&docs);
        m.teardown();
        assert!(m.snapshot().is_empty());
        let late = doc("z", "Zed");
        let out = m.apply(&ChangeBatch {
            documents: vec![late.clone()],
            changes: vec![change(ChangeKind::Created, &late, false)],
        });
        assert!(out.is_empty());
        assert!(m.snapshot().is_empty());
        assert_eq!(m.state(), MirrorState::Unsubscribed);

        m.begin();
        assert!(m.apply(&baseline(&[late])).is_empty());
    }

    #[test]
    fn failure_empties_the_roster() {
        let mut m = live_mirror(&[doc("a", "Anan")]);
        m.fail("disk gone");
        assert_eq!(m.state(), MirrorState::Unsubscribed);
        assert!(m.snapshot().is_empty());
        assert_eq!(m.last_error(), Some("disk gone"));
    }
}
