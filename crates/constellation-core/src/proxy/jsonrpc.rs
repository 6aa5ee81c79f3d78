//! JSON-RPC 2.0 envelope handling for the line-delimited MCP dialect.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// A parsed JSON-RPC 2.0 message. Any field may be absent; the broker never
/// validates shapes beyond what it needs to dispatch.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Envelope {
    pub id: Option<Value>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<Value>,
}

impl Envelope {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    pub fn is_tool_call(&self) -> bool {
        self.method.as_deref() == Some("tools/call")
    }

    pub fn is_response(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Extract `params.name` and `params.arguments` from a tools/call
    /// request. Missing `arguments` becomes an empty map; a missing or
    /// malformed `name` yields `None`.
    pub fn tool_call_params(&self) -> Option<ToolCallParams> {
        if !self.is_tool_call() {
            return None;
        }
        serde_json::from_value(self.params.clone()?).ok()
    }
}

#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: i32,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    jsonrpc: &'static str,
    id: Value,
    error: ErrorBody,
}

/// Build the denial written in place of a forwarded tools/call. The id
/// echoes the request's; the code deliberately reuses the standard
/// "Invalid Request" value for client compatibility.
pub fn deny_response(id: Value, reason: &str) -> String {
    let response = ErrorResponse {
        jsonrpc: "2.0",
        id,
        error: ErrorBody {
            code: error_codes::INVALID_REQUEST,
            message: format!("tool call denied by policy: {reason}"),
        },
    };
    serde_json::to_string(&response).unwrap_or_default()
}

#[derive(Deserialize)]
struct ToolListResult<'a> {
    #[serde(borrow, default)]
    tools: Vec<&'a RawValue>,
    #[serde(rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Serialize)]
struct FilteredResult<'a> {
    tools: Vec<&'a RawValue>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ToolName {
    name: String,
}

/// Filter a tools/list response down to the allowed set.
///
/// Kept entries keep their original raw bytes; only the `result` object is
/// rebuilt (`tools` plus `nextCursor` when present). Entries without a
/// parseable `name` are dropped. Returns `None` when the line is not a
/// tool-list response or when the allow-list is empty; in both cases the
/// caller forwards the line unchanged.
pub fn filter_tool_list(raw: &str, allowed: &BTreeSet<String>) -> Option<String> {
    if allowed.is_empty() {
        return None;
    }

    let mut envelope: BTreeMap<String, Box<RawValue>> = serde_json::from_str(raw).ok()?;
    let result_raw = envelope.get("result")?.get().to_owned();

    let list: ToolListResult = serde_json::from_str(&result_raw).ok()?;
    if list.tools.is_empty() {
        return None;
    }

    let kept: Vec<&RawValue> = list
        .tools
        .iter()
        .copied()
        .filter(|tool| {
            serde_json::from_str::<ToolName>(tool.get())
                .map(|tool| allowed.contains(&tool.name))
                .unwrap_or(false)
        })
        .collect();

    let filtered = FilteredResult {
        tools: kept,
        next_cursor: list.next_cursor,
    };
    let new_result = RawValue::from_string(serde_json::to_string(&filtered).ok()?).ok()?;
    envelope.insert("result".to_string(), new_result);
    serde_json::to_string(&envelope).ok()
}
