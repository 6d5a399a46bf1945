//! Wire types for the control surface.
//!
//! One JSON object per line in each direction. Requests are a tagged union
//! on `op`; every response carries a `success` flag, with `names` populated
//! for list replies and `error` for failures.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// A control request, one per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    Load {
        name: String,
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        remap_source: Vec<String>,
        #[serde(default)]
        remap_target: Vec<String>,
        #[serde(default)]
        args: Vec<String>,
        /// Empty means no liveness monitoring.
        #[serde(default)]
        liveness_id: String,
    },
    Unload {
        name: String,
    },
    List,
    Heartbeat {
        liveness_id: String,
    },
}

/// A control response, one per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            names: None,
            error: None,
        }
    }

    pub fn with_names(names: Vec<String>) -> Self {
        Self {
            success: true,
            names: Some(names),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            names: None,
            error: Some(error.into()),
        }
    }
}

/// Resolve a possibly-relative name against the host namespace.
///
/// Absolute names (leading `/`) pass through unchanged.
pub fn resolve_name(namespace: &str, name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("{}/{}", namespace.trim_end_matches('/'), name)
    }
}

/// Build the remapping table for one load request.
///
/// Source and target arrays of unequal length invalidate the whole table:
/// the condition is logged and an empty table is returned, never a partial
/// one.
pub(crate) fn build_remap_table(
    namespace: &str,
    remap_source: &[String],
    remap_target: &[String],
) -> HashMap<String, String> {
    if remap_source.len() != remap_target.len() {
        error!(
            sources = remap_source.len(),
            targets = remap_target.len(),
            "bad remappings provided, target and source of different length"
        );
        return HashMap::new();
    }

    let mut remappings = HashMap::new();
    for (source, target) in remap_source.iter().zip(remap_target) {
        let source = resolve_name(namespace, source);
        let target = resolve_name(namespace, target);
        debug!(%source, %target, "remapping");
        remappings.insert(source, target);
    }
    remappings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_request_round_trips() {
        let line = r#"{"op":"load","name":"cam","type":"driver::Camera","args":["--fps","30"]}"#;
        let request: ControlRequest = serde_json::from_str(line).unwrap();

        match request {
            ControlRequest::Load {
                name,
                type_name,
                remap_source,
                remap_target,
                args,
                liveness_id,
            } => {
                assert_eq!(name, "cam");
                assert_eq!(type_name, "driver::Camera");
                assert!(remap_source.is_empty());
                assert!(remap_target.is_empty());
                assert_eq!(args, vec!["--fps".to_string(), "30".to_string()]);
                assert!(liveness_id.is_empty());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn list_response_omits_error() {
        let response = ControlResponse::with_names(vec!["cam".to_string()]);
        let encoded = serde_json::to_string(&response).unwrap();
        assert_eq!(encoded, r#"{"success":true,"names":["cam"]}"#);
    }

    #[test]
    fn resolves_relative_names_against_namespace() {
        assert_eq!(resolve_name("/", "cam"), "/cam");
        assert_eq!(resolve_name("/sensors", "cam"), "/sensors/cam");
        assert_eq!(resolve_name("/sensors", "/lidar"), "/lidar");
    }

    #[test]
    fn mismatched_remap_arrays_yield_empty_table() {
        let table = build_remap_table(
            "/",
            &["a".to_string(), "b".to_string()],
            &["x".to_string()],
        );
        assert!(table.is_empty());
    }

    #[test]
    fn remap_table_resolves_both_sides() {
        let table = build_remap_table("/sensors", &["image".to_string()], &["/raw".to_string()]);
        assert_eq!(table.get("/sensors/image"), Some(&"/raw".to_string()));
    }
}
