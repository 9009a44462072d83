use crate::filter;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::mirror::MirrorState;
use crate::model::{StudentRecord, CLASS_LEVELS};
use chrono::{Local, NaiveDate};
use serde_json::json;

/// A stored record plus the derived fields the roster screen shows.
pub(super) fn student_json(student: &StudentRecord, today: NaiveDate) -> serde_json::Value {
    let mut v = serde_json::to_value(student).unwrap_or_else(|_| json!({}));
    if let Some(obj) = v.as_object_mut() {
        obj.insert("fullName".into(), json!(student.full_name()));
        obj.insert("displayTitle".into(), json!(student.display_title()));
        obj.insert("age".into(), json!(student.age_on(today)));
        obj.insert(
            "hasPlaceholderNumber".into(),
            json!(student.has_placeholder_number()),
        );
    }
    v
}

pub(super) fn require_live(state: &AppState) -> Result<(), HandlerErr> {
    match state.roster.mirror().state() {
        MirrorState::Unsubscribed => {
            let mut e = HandlerErr::new("not_subscribed", "roster is not subscribed");
            if let Some(last) = state.roster.mirror().last_error() {
                e = e.with_details(json!({ "lastError": last }));
            }
            Err(e)
        }
        _ => Ok(()),
    }
}

async fn subscribe(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let store = state.store()?;
    state
        .roster
        .subscribe(&store, &state.config.collection, &state.config.order_field)
        .await?;
    Ok(json!({ "state": state.roster.mirror().state() }))
}

fn status(state: &AppState) -> serde_json::Value {
    let mirror = state.roster.mirror();
    json!({
        "state": mirror.state(),
        "studentCount": mirror.snapshot().len(),
        "lastError": mirror.last_error(),
        "unreadCount": state.roster.notifications().unread_count(),
    })
}

fn list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_live(state)?;
    let query = filter::parse_query(&req.params)?;
    let roster = state.roster.mirror().snapshot();
    let today = Local::now().date_naive();
    let students: Vec<serde_json::Value> = filter::apply(roster, &query)
        .into_iter()
        .map(|s| student_json(s, today))
        .collect();
    Ok(json!({
        "total": roster.len(),
        "matched": students.len(),
        "students": students,
    }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "roster.subscribe" => subscribe(state).await,
        "roster.unsubscribe" => {
            state.roster.teardown();
            tracing::info!("roster subscription torn down");
            Ok(json!({ "state": state.roster.mirror().state() }))
        }
        "roster.status" => Ok(status(state)),
        "roster.list" => list(state, req),
        "roster.classLevels" => Ok(json!({ "classLevels": CLASS_LEVELS })),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
