use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::mirror::ChangeCandidate;
use crate::store::ChangeKind;

pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppNotification {
    pub id: String,
    pub kind: ChangeKind,
    pub subject_name: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl AppNotification {
    /// Text for the transient alert.
    pub fn message(&self) -> String {
        let prefix = match self.kind {
            ChangeKind::Created => "📝 เพิ่ม:",
            ChangeKind::Modified => "🔄️ แก้ไข:",
            ChangeKind::Removed => "🗑️ ลบ:",
        };
        format!("{prefix} {}", self.subject_name)
    }
}

/// Newest-first, bounded. Read state never evicts; only the bound does.
#[derive(Debug)]
pub struct NotificationQueue {
    entries: VecDeque<AppNotification>,
    capacity: usize,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        NotificationQueue::new(DEFAULT_CAPACITY)
    }
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        NotificationQueue {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &AppNotification> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, candidate: ChangeCandidate, now: DateTime<Utc>) -> &AppNotification {
        let id = self.unique_id(&format!("{}-{}", now.timestamp_millis(), candidate.doc_id));
        self.entries.push_front(AppNotification {
            id,
            kind: candidate.kind,
            subject_name: candidate.subject_name,
            timestamp: now,
            read: false,
        });
        self.entries.truncate(self.capacity);
        &self.entries[0]
    }

    fn unique_id(&self, base: &str) -> String {
        let taken = |id: &str| self.entries.iter().any(|n| n.id == id);
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}-{n}"))
            .find(|id| !taken(id))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.entries.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) -> usize {
        let mut flipped = 0;
        for n in self.entries.iter_mut().filter(|n| !n.read) {
            n.read = true;
            flipped += 1;
        }
        flipped
    }

    /// The one notification surfaced as an alert: the newest unread entry.
    pub fn alert(&self) -> Option<&AppNotification> {
        self.entries.iter().find(|n| !n.read)
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|n| !n.read).count()
    }

    pub fn badge(&self) -> Option<String> {
        match self.unread_count() {
            0 => None,
            n if n > 9 => Some("9+".to_string()),
            n => Some(n.to_string()),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub fn format_time_ago(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - at).num_seconds().max(0);
    if seconds < 60 {
        return "เมื่อสักครู่".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes} นาทีที่แล้ว");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours} ชั่วโมงที่แล้ว");
    }
    format!("{} วันที่แล้ว", hours / 24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).single().expect("time")
    }

    fn candidate(doc: &str) -> ChangeCandidate {
        ChangeCandidate {
            kind: ChangeKind::Modified,
            doc_id: doc.to_string(),
            subject_name: format!("Student {doc}"),
        }
    }

    #[test]
    fn queue_is_bounded_and_evicts_oldest() {
        let mut q = NotificationQueue::default();
        for i in 0..25 {
            q.push(candidate(&format!("d{i}")), t0() + Duration::seconds(i));
        }
        assert_eq!(q.len(), 10);
        let names: Vec<_> = q.entries().map(|n| n.subject_name.clone()).collect();
        assert_eq!(names.first().map(String::as_str), Some("Student d24"));
        assert_eq!(names.last().map(String::as_str), Some("Student d15"));
    }

    #[test]
    fn ids_stay_unique_for_same_instant_and_document() {
        let mut q = NotificationQueue::default();
        let a = q.push(candidate("d1"), t0()).id.clone();
        let b = q.push(candidate("d1"), t0()).id.clone();
        let c = q.push(candidate("d1"), t0()).id.clone();
        assert_eq!(a, format!("{}-d1", t0().timestamp_millis()));
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn mark_read_flips_exactly_one() {
        let mut q = NotificationQueue::default();
        let first = q.push(candidate("a"), t0()).id.clone();
        q.push(candidate("b"), t0());
        assert!(q.mark_read(&first));
        assert!(!q.mark_read("missing"));
        assert_eq!(q.unread_count(), 1);
        assert_eq!(q.mark_all_read(), 1);
        assert_eq!(q.unread_count(), 0);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn alert_is_newest_unread_and_dismissal_is_targeted() {
        let mut q = NotificationQueue::default();
        let older = q.push(candidate("a"), t0()).id.clone();
        let newer = q.push(candidate("b"), t0() + Duration::seconds(1)).id.clone();
        assert_eq!(q.alert().map(|n| n.id.clone()), Some(newer.clone()));
        q.mark_read(&newer);
        assert_eq!(q.alert().map(|n| n.id.clone()), Some(older.clone()));
        q.mark_read(&older);
        assert!(q.alert().is_none());
    }

    #[test]
    fn badge_caps_at_nine_plus() {
        let mut q = NotificationQueue::default();
        assert_eq!(q.badge(), None);
        for i in 0..3 {
            q.push(candidate(&i.to_string()), t0());
        }
        assert_eq!(q.badge().as_deref(), Some("3"));
        for i in 3..10 {
            q.push(candidate(&i.to_string()), t0());
        }
        assert_eq!(q.badge().as_deref(), Some("9+"));
    }

    #[test]
    fn alert_text_names_the_change() {
        let mut q = NotificationQueue::default();
        let n = q.push(candidate("a"), t0());
        assert_eq!(n.message(), "🔄️ แก้ไข: Student a");
    }

    #[test]
    fn time_ago_buckets() {
        let now = t0();
        assert_eq!(format_time_ago(now - Duration::seconds(30), now), "เมื่อสักครู่");
        assert_eq!(format_time_ago(now - Duration::minutes(5), now), "5 นาทีที่แล้ว");
        assert_eq!(format_time_ago(now - Duration::hours(3), now), "3 ชั่วโมงที่แล้ว");
        assert_eq!(format_time_ago(now - Duration::days(2), now), "2 วันที่แล้ว");
    }
}
