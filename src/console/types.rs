//! Serializable request and response types for the console MCP tools.
//!
//! All types implement `Serialize`, `Deserialize` and `JsonSchema`. Unsigned
//! counters use [`uint`] so the generated schema stays plain JSON Schema.

use schemars::{JsonSchema, Schema, json_schema};
use serde::{Deserialize, Serialize};

/// Unsigned integer schema: `{"type": "integer", "minimum": 0}`
///
/// Use with `#[schemars(schema_with = "crate::console::types::uint")]`.
pub fn uint(_generator: &mut schemars::SchemaGenerator) -> Schema {
    json_schema!({
        "type": "integer",
        "minimum": 0
    })
}

/// Metadata for one open console.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleInfo {
    pub session_id: String,
    /// Optional human-readable name for the console
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Jump host as `user@host:port`
    pub target: String,
    pub created_at: String,
    /// `menu` or `shell`
    pub login_state: String,
    /// `idle`, `checking` or `confirmed`
    pub health_state: String,
    /// Successful probes seen by the current health check
    #[schemars(schema_with = "uint")]
    pub check_count: u32,
    /// Output lines waiting for `console_read`
    #[schemars(schema_with = "uint")]
    pub buffered_lines: usize,
    pub closed: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleConnectResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleReadResponse {
    pub session_id: String,
    /// Output lines, oldest first
    pub lines: Vec<String>,
    /// Lines still buffered after this read
    #[schemars(schema_with = "uint")]
    pub remaining: usize,
    /// Whether the remote shell has terminated
    pub closed: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleListResponse {
    pub consoles: Vec<ConsoleInfo>,
    #[schemars(schema_with = "uint")]
    pub count: usize,
}

/// Status of a script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScriptRunStatus {
    Running,
    Completed,
    /// A load-balancer change failed and the rest was skipped
    Aborted,
    Cancelled,
}

impl std::fmt::Display for ScriptRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptRunStatus::Running => write!(f, "running"),
            ScriptRunStatus::Completed => write!(f, "completed"),
            ScriptRunStatus::Aborted => write!(f, "aborted"),
            ScriptRunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Metadata for one script run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScriptRunInfo {
    pub run_id: String,
    pub session_id: String,
    pub started_at: String,
    pub status: ScriptRunStatus,
    /// Abort reason, when aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleExecuteResponse {
    pub run_id: String,
    pub session_id: String,
    #[schemars(schema_with = "uint")]
    pub directives: usize,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleCancelResponse {
    pub run_id: String,
    pub cancelled: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleStatusResponse {
    pub console: ConsoleInfo,
    pub runs: Vec<ScriptRunInfo>,
}

/// A stored script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptEntry {
    pub name: String,
    pub script: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ScriptListResponse {
    pub scripts: Vec<ScriptEntry>,
    #[schemars(schema_with = "uint")]
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::SchemaGenerator;

    mod schemas {
        use super::*;

        #[test]
        fn test_uint_schema_structure() {
            let json = serde_json::to_value(uint(&mut SchemaGenerator::default())).unwrap();
            assert_eq!(json.get("type"), Some(&serde_json::json!("integer")));
            assert_eq!(json.get("minimum"), Some(&serde_json::json!(0)));
            assert!(json.get("format").is_none());
        }

        #[test]
        fn test_console_list_schema_has_no_uint_format() {
            let schema = SchemaGenerator::default().into_root_schema_for::<ConsoleListResponse>();
            let json = serde_json::to_string(&schema).unwrap();
            assert!(!json.contains("\"uint"), "unexpected uint format: {}", json);
        }
    }

    mod serialization {
        use super::*;

        #[test]
        fn test_run_status_snake_case() {
            let json = serde_json::to_string(&ScriptRunStatus::Aborted).unwrap();
            assert_eq!(json, "\"aborted\"");
            assert_eq!(ScriptRunStatus::Running.to_string(), "running");
        }

        #[test]
        fn test_run_info_omits_empty_message() {
            let info = ScriptRunInfo {
                run_id: "r1".to_string(),
                session_id: "s1".to_string(),
                started_at: "2024-01-01T00:00:00Z".to_string(),
                status: ScriptRunStatus::Completed,
                message: None,
            };
            let json = serde_json::to_value(&info).unwrap();
            assert!(json.get("message").is_none());
            assert_eq!(json["status"], "completed");
        }

        #[test]
        fn test_console_info_omits_missing_name() {
            let info = ConsoleInfo {
                session_id: "s1".to_string(),
                name: None,
                target: "ops@jump:22".to_string(),
                created_at: "2024-01-01T00:00:00Z".to_string(),
                login_state: "menu".to_string(),
                health_state: "idle".to_string(),
                check_count: 0,
                buffered_lines: 3,
                closed: false,
            };
            let json = serde_json::to_value(&info).unwrap();
            assert!(json.get("name").is_none());
            assert_eq!(json["buffered_lines"], 3);
        }
    }
}
