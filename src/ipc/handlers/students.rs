use crate::ipc::error::{get_optional_str, get_required_str, ok, HandlerErr};
use crate::ipc::handlers::roster::{require_live, student_json};
use crate::ipc::types::{AppState, Request};
use crate::model::{format_class_name, GuardianSource, StudentRecord};
use crate::store::DocumentStore;
use chrono::Local;
use serde_json::{json, Map, Value};

fn get_student(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    require_live(state)?;
    let id = get_required_str(&req.params, "id")?;
    let student = state
        .roster
        .mirror()
        .get(&id)
        .ok_or_else(|| HandlerErr::new("not_found", format!("student not found: {id}")))?;
    Ok(json!({ "student": student_json(student, Local::now().date_naive()) }))
}

fn parse_guardian_source(params: &Value) -> Result<Option<GuardianSource>, HandlerErr> {
    match get_optional_str(params, "useGuardian").as_deref() {
        None => Ok(None),
        Some("father") => Ok(Some(GuardianSource::Father)),
        Some("mother") => Ok(Some(GuardianSource::Mother)),
        Some(other) => Err(HandlerErr::bad_params(format!(
            "useGuardian must be father or mother, got {other}"
        ))),
    }
}

async fn create_student(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let store = state.store()?;
    let raw = req
        .params
        .get("student")
        .cloned()
        .ok_or_else(|| HandlerErr::bad_params("missing params.student"))?;
    let mut draft: StudentRecord = serde_json::from_value(raw)
        .map_err(|e| HandlerErr::bad_params(format!("invalid student: {e}")))?;
    if let Some(source) = parse_guardian_source(&req.params)? {
        draft.adopt_guardian(source);
    }
    draft.validate()?;
    draft.prepare_for_save();

    let body = serde_json::to_value(&draft)
        .map_err(|e| HandlerErr::new("store_failed", e.to_string()))?;
    let id = store.create(&state.config.collection, body).await?;
    tracing::info!(id = %id, "student created");
    Ok(json!({ "id": id }))
}

/// Applies the save rules to a partial record: class names are canonical,
/// blank measures are 0, and the storage key never reaches the body.
fn prepare_patch(mut patch: Map<String, Value>) -> Map<String, Value> {
    patch.remove("storageKey");
    if let Some(Value::String(level)) = patch.get("classLevel") {
        let canonical = format_class_name(level);
        patch.insert("classLevel".into(), Value::String(canonical));
    }
    for key in ["weight", "height"] {
        let blank = match patch.get(key) {
            Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            _ => false,
        };
        if blank {
            patch.insert(key.into(), json!(0.0));
        }
    }
    patch
}

/// Rejects patches that would leave the mirrored record undecodable.
fn check_patch(state: &AppState, id: &str, patch: &Map<String, Value>) -> Result<(), HandlerErr> {
    let Some(current) = state.roster.mirror().get(id) else {
        return Ok(());
    };
    let mut merged = serde_json::to_value(current)
        .map_err(|e| HandlerErr::new("store_failed", e.to_string()))?;
    if let Some(obj) = merged.as_object_mut() {
        for (k, v) in patch {
            obj.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value::<StudentRecord>(merged)
        .map(|_| ())
        .map_err(|e| HandlerErr::bad_params(format!("invalid patch: {e}")))
}

async fn update_student(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let store = state.store()?;
    let id = get_required_str(&req.params, "id")?;
    let Some(Value::Object(patch)) = req.params.get("patch").cloned() else {
        return Err(HandlerErr::bad_params("params.patch must be an object"));
    };
    let patch = prepare_patch(patch);
    check_patch(state, &id, &patch)?;
    store
        .update(&state.config.collection, &id, Value::Object(patch))
        .await?;
    tracing::info!(id = %id, "student updated");
    Ok(json!({ "id": id }))
}

async fn delete_student(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let store = state.store()?;
    let id = get_required_str(&req.params, "id")?;
    store.delete(&state.config.collection, &id).await?;
    tracing::info!(id = %id, "student deleted");
    Ok(json!({ "id": id }))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.get" => get_student(state, req),
        "students.create" => create_student(state, req).await,
        "students.update" => update_student(state, req).await,
        "students.delete" => delete_student(state, req).await,
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
