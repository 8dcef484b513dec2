use rusqlite::ffi;
use serde_json::json;
use thiserror::Error;

use crate::model::Moment;

/// Failure taxonomy shared by every engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input. Never retried.
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Write attempted against a locked moment. Never retried.
    #[error("moment {moment} is locked for assignment {assignment_id}")]
    LockedMoment {
        assignment_id: String,
        moment: Moment,
    },

    /// Concurrent writers collided on the same grade slot.
    #[error("concurrent write collided on {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    #[error("{0}")]
    Forbidden(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl EngineError {
    pub fn validation(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        EngineError::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "bad_params",
            EngineError::NotFound { .. } => "not_found",
            EngineError::LockedMoment { .. } => "moment_locked",
            EngineError::Conflict { .. } => "conflict",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::Storage(_) => "db_error",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::Validation { details, .. } => details.clone(),
            EngineError::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            EngineError::LockedMoment {
                assignment_id,
                moment,
            } => Some(json!({ "assignmentId": assignment_id, "moment": moment.get() })),
            EngineError::Conflict { entity, id } => Some(json!({ "entity": entity, "id": id })),
            EngineError::Forbidden(_) => None,
            EngineError::Storage(e) => Some(json!({ "cause": e.to_string() })),
        }
    }

    /// Reclassifies a storage failure caused by a concurrent writer as a
    /// `Conflict`; everything else passes through unchanged.
    pub fn from_write(e: rusqlite::Error, entity: &'static str, id: &str) -> Self {
        if is_write_race(&e) {
            EngineError::Conflict {
                entity,
                id: id.to_string(),
            }
        } else {
            EngineError::Storage(e)
        }
    }
}

fn is_write_race(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(f, _) => {
            matches!(
                f.code,
                ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked
            ) || f.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}
