use rusqlite::Connection;
use serde_json::json;

use crate::config::{self, GradingConfig};
use crate::error::EngineError;
use crate::ipc::error::err;
use crate::locks::Role;
use crate::model::Moment;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent and `null` both read as `None`; any other non-string is an error.
pub fn optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn required_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Moments arrive as numbers or numeric strings.
pub fn required_moment(params: &serde_json::Value, key: &str) -> Result<Moment, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    let n = v
        .as_i64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("{} must be an integer", key),
            details: Some(json!({ "field": key, "value": v })),
        })?;
    Ok(Moment::new(n)?)
}

pub fn actor_role(params: &serde_json::Value) -> Result<Role, HandlerErr> {
    let raw = required_str(params, "actorRole")?;
    Role::parse(&raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "actorRole must be administrator or teacher".to_string(),
        details: Some(json!({ "actorRole": raw })),
    })
}

pub fn load_config(conn: &Connection) -> Result<GradingConfig, HandlerErr> {
    config::load(conn).map_err(|e| HandlerErr {
        code: "db_error",
        message: format!("failed to load grading settings: {e}"),
        details: None,
    })
}

pub fn no_workspace(id: &str) -> serde_json::Value {
    err(id, "no_workspace", "select a workspace first", None)
}
