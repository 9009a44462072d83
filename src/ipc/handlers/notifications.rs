use crate::ipc::error::{get_required_str, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify::{format_time_ago, AppNotification};
use chrono::{DateTime, Utc};
use serde_json::json;

fn notification_json(n: &AppNotification, now: DateTime<Utc>) -> serde_json::Value {
    let mut v = serde_json::to_value(n).unwrap_or_else(|_| json!({}));
    if let Some(obj) = v.as_object_mut() {
        obj.insert("message".into(), json!(n.message()));
        obj.insert("timeAgo".into(), json!(format_time_ago(n.timestamp, now)));
    }
    v
}

fn list(state: &AppState) -> serde_json::Value {
    let now = Utc::now();
    let queue = state.roster.notifications();
    let entries: Vec<_> = queue.entries().map(|n| notification_json(n, now)).collect();
    json!({
        "notifications": entries,
        "total": queue.len(),
        "unreadCount": queue.unread_count(),
        "badge": queue.badge(),
    })
}

fn alert(state: &AppState) -> serde_json::Value {
    let now = Utc::now();
    json!({
        "alert": state.roster.notifications().alert().map(|n| notification_json(n, now)),
    })
}

fn mark_read(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(&req.params, "id")?;
    let queue = state.roster.notifications_mut();
    if !queue.mark_read(&id) {
        return Err(HandlerErr::new("not_found", format!("notification not found: {id}")));
    }
    Ok(json!({ "id": id, "unreadCount": queue.unread_count() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "notifications.list" => Ok(list(state)),
        "notifications.markRead" => mark_read(state, req),
        "notifications.markAllRead" => {
            let queue = state.roster.notifications_mut();
            let marked = queue.mark_all_read();
            Ok(json!({ "marked": marked, "unreadCount": queue.unread_count() }))
        }
        "notifications.alert" => Ok(alert(state)),
        // Dismissing the alert reads that entry only; the next unread one surfaces.
        "notifications.dismiss" => mark_read(state, req).map(|mut v| {
            v["alert"] = alert(state)["alert"].take();
            v
        }),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
