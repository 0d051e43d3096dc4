//! Mailbox entry model.
//!
//! Requester hooks drop small JSON files into the mailbox directory; these
//! types mirror that wire format. Fields the daemon does not interpret
//! (project dir, pre-rendered detail text, ...) are preserved through a
//! flattened map so the pending listing returns exactly what the requester
//! wrote.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The two kinds of primary mailbox entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A tool call waiting for an allow/deny decision.
    PermissionRequest,
    /// A "ready for next instruction" marker.
    PromptWaiting,
}

impl EntryKind {
    /// File-name suffix of the primary file, written once by the requester.
    pub const fn primary_suffix(self) -> &'static str {
        match self {
            Self::PermissionRequest => ".request.json",
            Self::PromptWaiting => ".prompt-waiting.json",
        }
    }

    /// File-name suffix of the paired response file, written at most once
    /// by the operator side.
    pub const fn response_suffix(self) -> &'static str {
        match self {
            Self::PermissionRequest => ".response.json",
            Self::PromptWaiting => ".prompt-response.json",
        }
    }
}

/// A pending permission request, as written by the requester hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    #[serde(default, deserialize_with = "stringly")]
    pub session_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    /// Owning requester process, used for liveness reaping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Policy file an "always allow" decision should patch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_pattern: Option<String>,
    /// Split patterns for compound commands; takes precedence over
    /// `allow_pattern` when both are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_patterns: Option<Vec<String>>,
    /// Unix seconds, as reported by the requester.
    #[serde(default)]
    pub timestamp: f64,
    /// Display-only context the daemon passes through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl PermissionRequest {
    /// Parse from the raw file contents, dropping any stale `type` tag so
    /// re-serialization under [`PendingEntry`] does not emit it twice.
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        let mut req: Self = serde_json::from_str(raw)?;
        req.extra.remove("type");
        Ok(req)
    }

    /// Classify the opaque `tool_input` payload.
    pub fn parsed_input(&self) -> ToolInput {
        ToolInput::classify(&self.tool_name, &self.tool_input)
    }

    /// Patterns an "always allow" decision should persist when the caller
    /// supplies no override: `allow_patterns` wins over `allow_pattern`.
    pub fn stored_patterns(&self) -> Vec<String> {
        if let Some(patterns) = &self.allow_patterns {
            if !patterns.is_empty() {
                return patterns.clone();
            }
        }
        self.allow_pattern.iter().cloned().collect()
    }
}

/// A "ready for next instruction" marker, as written by the requester hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptWaiting {
    pub id: String,
    #[serde(default, deserialize_with = "stringly")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// When set, the requester is a live terminal pane rather than a
    /// process polling a response file.
    #[serde(default)]
    pub tmux_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_pane: Option<String>,
    /// Text of the previous turn, for display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<String>,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl PromptWaiting {
    /// Parse from the raw file contents, dropping any stale `type` tag.
    pub fn from_json_str(raw: &str) -> serde_json::Result<Self> {
        let mut waiting: Self = serde_json::from_str(raw)?;
        waiting.extra.remove("type");
        Ok(waiting)
    }
}

/// A live mailbox entry of either kind, tagged for the data-plane listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PendingEntry {
    #[serde(rename = "permission-request")]
    PermissionRequest(PermissionRequest),
    #[serde(rename = "prompt-waiting")]
    PromptWaiting(PromptWaiting),
}

impl PendingEntry {
    pub fn id(&self) -> &str {
        match self {
            Self::PermissionRequest(req) => &req.id,
            Self::PromptWaiting(waiting) => &waiting.id,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::PermissionRequest(req) => &req.session_id,
            Self::PromptWaiting(waiting) => &waiting.session_id,
        }
    }

    pub const fn kind(&self) -> EntryKind {
        match self {
            Self::PermissionRequest(_) => EntryKind::PermissionRequest,
            Self::PromptWaiting(_) => EntryKind::PromptWaiting,
        }
    }
}

/// Classified `tool_input` payload.
///
/// The mailbox keeps the raw JSON; this view is derived on demand so an
/// unrecognized tool never blocks an entry from being surfaced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    Bash {
        command: String,
        description: Option<String>,
    },
    /// Write / Edit / NotebookEdit and their MCP-wrapped variants.
    FileEdit { file_path: PathBuf },
    Read { file_path: PathBuf },
    Question { questions: Vec<QuestionSpec> },
    Plan { plan: String },
    /// Anything the daemon has no schema for.
    Other(Value),
}

/// One question inside an `AskUserQuestion` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSpec {
    #[serde(default)]
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, rename = "multiSelect")]
    pub multi_select: bool,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolInput {
    /// Classify a payload by tool name first, then shape. Parse failures
    /// fall through to [`ToolInput::Other`].
    pub fn classify(tool_name: &str, input: &Value) -> Self {
        #[derive(Deserialize)]
        struct BashInput {
            command: String,
            #[serde(default)]
            description: Option<String>,
        }
        #[derive(Deserialize)]
        struct PathInput {
            file_path: PathBuf,
        }
        #[derive(Deserialize)]
        struct QuestionsInput {
            questions: Vec<QuestionSpec>,
        }
        #[derive(Deserialize)]
        struct PlanInput {
            plan: String,
        }

        let parsed = match tool_name {
            "ExitPlanMode" => serde_json::from_value::<PlanInput>(input.clone())
                .ok()
                .map(|p| Self::Plan { plan: p.plan }),
            "AskUserQuestion" => serde_json::from_value::<QuestionsInput>(input.clone())
                .ok()
                .map(|q| Self::Question {
                    questions: q.questions,
                }),
            name if is_bash_tool(name) => serde_json::from_value::<BashInput>(input.clone())
                .ok()
                .map(|b| Self::Bash {
                    command: b.command,
                    description: b.description,
                }),
            name if is_file_edit_tool(name) => serde_json::from_value::<PathInput>(input.clone())
                .ok()
                .map(|p| Self::FileEdit {
                    file_path: p.file_path,
                }),
            name if is_read_tool(name) => serde_json::from_value::<PathInput>(input.clone())
                .ok()
                .map(|p| Self::Read {
                    file_path: p.file_path,
                }),
            _ => None,
        };
        parsed.unwrap_or_else(|| Self::Other(input.clone()))
    }
}

fn is_bash_tool(name: &str) -> bool {
    name == "Bash" || (name.starts_with("mcp__") && name.ends_with("__Bash"))
}

fn is_file_edit_tool(name: &str) -> bool {
    matches!(name, "Write" | "Edit" | "NotebookEdit")
        || (name.starts_with("mcp__")
            && (name.contains("Write") || name.contains("Edit")))
}

fn is_read_tool(name: &str) -> bool {
    name == "Read" || (name.starts_with("mcp__") && name.contains("Read"))
}

/// Decision requested by the operator for a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
    /// Allow, and persist the request's allow-pattern(s) durably. Recorded
    /// on the wire as `allow`: requesters only distinguish approved from
    /// denied.
    Always,
}

/// Outcome recorded in a `<id>.response.json` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

/// Payload of a `<id>.response.json` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub decision: Verdict,
    /// Optional feedback routed back to the requester (plan rejection
    /// instructions, free-text question answers, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Patterns persisted by an "always" decision, normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_patterns: Option<Vec<String>>,
}

impl DecisionResponse {
    pub const fn allow() -> Self {
        Self {
            decision: Verdict::Allow,
            message: None,
            applied_patterns: None,
        }
    }

    pub const fn deny() -> Self {
        Self {
            decision: Verdict::Deny,
            message: None,
            applied_patterns: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Payload of a `<id>.prompt-response.json` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PromptResponse {
    Submit { prompt: String },
    Dismiss,
}

/// Accept both JSON strings and numbers for session ids; requester hooks
/// are not consistent about which they write.
fn stringly<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_request_with_numeric_session_id() {
        let raw = r#"{
            "id": "r1",
            "session_id": 42,
            "tool_name": "Bash",
            "tool_input": {"command": "ls -la"},
            "pid": 1234,
            "timestamp": 1754300000.5,
            "project_dir": "/home/dev/proj",
            "type": "permission-request"
        }"#;
        let req = PermissionRequest::from_json_str(raw).unwrap();
        assert_eq!(req.session_id, "42");
        assert_eq!(req.pid, Some(1234));
        assert_eq!(req.extra.get("project_dir"), Some(&json!("/home/dev/proj")));
        assert!(!req.extra.contains_key("type"));
    }

    #[test]
    fn pending_entry_round_trips_with_type_tag() {
        let raw = r#"{"id": "r1", "session_id": "s1", "tool_name": "Read", "tool_input": {}}"#;
        let req = PermissionRequest::from_json_str(raw).unwrap();
        let entry = PendingEntry::PermissionRequest(req);

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "permission-request");
        assert_eq!(value["id"], "r1");

        let back: PendingEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back.id(), "r1");
        assert_eq!(back.kind(), EntryKind::PermissionRequest);
    }

    #[test]
    fn classifies_bash_input() {
        let input = json!({"command": "cargo build", "description": "Build"});
        let parsed = ToolInput::classify("Bash", &input);
        assert_eq!(
            parsed,
            ToolInput::Bash {
                command: "cargo build".to_string(),
                description: Some("Build".to_string()),
            }
        );
    }

    #[test]
    fn classifies_mcp_wrapped_tools() {
        let input = json!({"command": "ls"});
        assert!(matches!(
            ToolInput::classify("mcp__acp__Bash", &input),
            ToolInput::Bash { .. }
        ));

        let input = json!({"file_path": "/tmp/x.rs", "content": "fn main() {}"});
        assert!(matches!(
            ToolInput::classify("mcp__fs__WriteFile", &input),
            ToolInput::FileEdit { .. }
        ));
    }

    #[test]
    fn classifies_question_input() {
        let input = json!({"questions": [{
            "question": "Which backend?",
            "header": "Backend",
            "multiSelect": false,
            "options": [
                {"label": "sqlite", "description": "file-backed"},
                {"label": "postgres"}
            ]
        }]});
        let ToolInput::Question { questions } = ToolInput::classify("AskUserQuestion", &input)
        else {
            panic!("expected question input");
        };
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].options.len(), 2);
        assert!(!questions[0].multi_select);
    }

    #[test]
    fn unknown_tool_falls_back_to_other() {
        let input = json!({"anything": true});
        assert_eq!(
            ToolInput::classify("SomeNewTool", &input),
            ToolInput::Other(input)
        );
    }

    #[test]
    fn malformed_known_tool_falls_back_to_other() {
        // Bash without a command string has no recognized shape.
        let input = json!({"cmd": "ls"});
        assert!(matches!(
            ToolInput::classify("Bash", &input),
            ToolInput::Other(_)
        ));
    }

    #[test]
    fn stored_patterns_prefers_split_list() {
        let raw = r#"{
            "id": "r1",
            "session_id": "s1",
            "allow_pattern": "Bash(ls *)",
            "allow_patterns": ["Bash(ls *)", "Bash(cat *)"]
        }"#;
        let req = PermissionRequest::from_json_str(raw).unwrap();
        assert_eq!(req.stored_patterns().len(), 2);
    }

    #[test]
    fn prompt_response_wire_format() {
        let submit = PromptResponse::Submit {
            prompt: "continue".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&submit).unwrap(),
            json!({"action": "submit", "prompt": "continue"})
        );
        assert_eq!(
            serde_json::to_value(PromptResponse::Dismiss).unwrap(),
            json!({"action": "dismiss"})
        );
    }

    #[test]
    fn decision_response_always_records_allow() {
        let resp = DecisionResponse {
            decision: Verdict::Allow,
            message: None,
            applied_patterns: Some(vec!["Bash(ls *)".to_string()]),
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["decision"], "allow");
        assert_eq!(value["applied_patterns"][0], "Bash(ls *)");
        assert!(value.get("message").is_none());
    }
}
