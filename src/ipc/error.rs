use serde_json::json;

use crate::filter::FilterError;
use crate::import::ImportError;
use crate::model::ValidationErrors;
use crate::store::StoreError;

const STORE_FAILED_MESSAGE: &str = "เกิดข้อผิดพลาดในการเชื่อมต่อฐานข้อมูล";

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr::new("bad_params", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => {
                HandlerErr::new("not_found", format!("student not found: {id}"))
                    .with_details(json!({ "id": id }))
            }
            StoreError::NotAnObject => HandlerErr::bad_params(e.to_string()),
            other => {
                tracing::warn!(error = %other, "store operation failed");
                HandlerErr::new("store_failed", STORE_FAILED_MESSAGE)
                    .with_details(json!({ "error": other.to_string() }))
            }
        }
    }
}

impl From<ImportError> for HandlerErr {
    fn from(e: ImportError) -> Self {
        let details = match &e {
            ImportError::WriteFailed { committed, failed } => {
                Some(json!({ "committed": committed, "failed": failed }))
            }
            _ => None,
        };
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

impl From<ValidationErrors> for HandlerErr {
    fn from(e: ValidationErrors) -> Self {
        HandlerErr::new("validation_failed", e.to_string())
            .with_details(json!({ "fields": e.fields }))
    }
}

impl From<FilterError> for HandlerErr {
    fn from(e: FilterError) -> Self {
        HandlerErr::bad_params(e.message)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing params.{key}")))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
