//! Tool execution framework glue: a small `Tool` trait, typed parameter
//! validation, and a uniform execution wrapper that normalizes both
//! validation and runtime failures into structured results.
//!
//! A demonstrative catalog (an `echo` tool and a `fail` tool used in
//! tests) stands in for the wide tool surface (file/bash/web/MCP tools)
//! that the orchestration engine is scoped around rather than owning.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;

use crate::error::EngineError;
use crate::model::tool_result::ToolOutput;

/// Tool execution carries a per-tool timeout; ten minutes unless a tool
/// overrides it.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Per-call context a tool may need: the conversation/agent it's running
/// under, and the tool-call id it should report results against.
#[derive(Clone, Debug, Default)]
pub struct ToolCallContext {
    pub conversation_id: Option<String>,
    pub agent_slug: Option<String>,
    pub tool_call_id: String,
}

/// One typed tool the execution engine can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Validates `params` before `call` runs. Field-level failures surface
    /// as `EngineError::Validation`.
    fn validate(&self, params: &Value) -> Result<(), EngineError>;

    /// Runs the tool. Implementations should treat runtime failures as
    /// `EngineError::Execution`, not a panic.
    async fn call(&self, params: Value, ctx: &ToolCallContext) -> Result<ToolOutput, EngineError>;

    /// Overridable per-tool timeout; defaults to `DEFAULT_TOOL_TIMEOUT`.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }
}

/// Registry of tools by name, used to dispatch an incoming tool call.
#[derive(Default)]
pub struct ToolCatalog {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Validates, executes (honoring the tool's timeout), and normalizes
    /// the result. This is the single seam the `ExecutionEngine` calls
    /// through for every tool invocation.
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolCallContext) -> Result<ToolOutput, EngineError> {
        let Some(tool) = self.get(name) else {
            return Err(EngineError::execution(name, "no such tool registered"));
        };

        tool.validate(&params)?;

        match timeout(tool.timeout(), tool.call(params, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(format!("tool '{name}' exceeded its timeout"))),
        }
    }
}

/// Echoes its `text` parameter back as the tool output; used in tests and
/// as a minimal worked example of a well-formed `Tool`.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn validate(&self, params: &Value) -> Result<(), EngineError> {
        match params.get("text") {
            Some(Value::String(_)) => Ok(()),
            Some(_) => Err(EngineError::validation("text", "must be a string")),
            None => Err(EngineError::validation("text", "is required")),
        }
    }

    async fn call(&self, params: Value, _ctx: &ToolCallContext) -> Result<ToolOutput, EngineError> {
        let text = params["text"].as_str().unwrap_or_default().to_string();
        Ok(ToolOutput::Text(text))
    }
}

/// Always fails with an execution error; used to exercise the failure
/// path in tests.
pub struct AlwaysFailsTool;

#[async_trait]
impl Tool for AlwaysFailsTool {
    fn name(&self) -> &str {
        "always_fails"
    }

    fn validate(&self, _params: &Value) -> Result<(), EngineError> {
        Ok(())
    }

    async fn call(&self, _params: Value, _ctx: &ToolCallContext) -> Result<ToolOutput, EngineError> {
        Err(EngineError::execution("always_fails", "this tool never succeeds"))
    }
}
