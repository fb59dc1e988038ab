use rusqlite::ErrorCode;
use serde_json::json;

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

/// Map a database failure to a wire error. SQLITE_BUSY/SQLITE_LOCKED after the
/// bounded busy timeout becomes `store_busy` (transient, retryable); anything
/// else keeps the operation-specific code.
pub fn db_err(
    id: &str,
    op_code: &str,
    e: &rusqlite::Error,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let code = match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => "store_busy",
        _ => op_code,
    };
    err(id, code, e.to_string(), details)
}
