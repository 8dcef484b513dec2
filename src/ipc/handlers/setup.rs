use crate::config::{self, GRADING_SECTION_KEY};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::no_workspace;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

const GRADING_SECTION: &str = "grading";

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let grading = match config::load_section(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_error", e.to_string(), None),
    };
    ok(&req.id, json!({ "grading": grading }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let Some(section) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    if section != GRADING_SECTION {
        return err(
            &req.id,
            "bad_params",
            "unknown section",
            Some(json!({ "section": section })),
        );
    }
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match config::load_section(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_error", e.to_string(), None),
    };
    if let Err(msg) = config::merge_grading_patch(&mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, GRADING_SECTION_KEY, &current) {
        return err(&req.id, "db_error", e.to_string(), None);
    }
    info!(fields = patch_obj.len(), "grading settings updated");
    ok(&req.id, json!({ "ok": true, "grading": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
