//! Tool execution boundary
//!
//! Looks up the handler, validates arguments against the declared schema,
//! and invokes it under a bounded wall-clock budget. Every failure past this
//! point is data: an unknown tool, a rejected argument set, a handler error,
//! or a timeout all become a `ToolResult` with `success = false`. Nothing a
//! tool does may crash the agent loop.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::registry::ToolRegistry;
use super::{ParameterSchema, ToolCall, ToolContext, ToolResult};

/// Dispatches tool calls against an immutable registry
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a single tool call
    #[instrument(skip(self, ctx), fields(tool = %call.name))]
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let tool = match self.registry.get(&call.name) {
            Some(t) => t,
            None => {
                warn!(tool = %call.name, "Unknown tool");
                return ToolResult::error(format!("Unknown tool: {}", call.name));
            }
        };

        if let Err(msg) = validate_arguments(&tool.parameters_schema(), &call.arguments) {
            warn!(tool = %call.name, error = %msg, "Argument validation failed");
            return ToolResult::error(msg);
        }

        let budget = tool.timeout(ctx);
        debug!(budget_secs = budget.as_secs(), "Executing tool");

        match tokio::time::timeout(budget, tool.execute(&call.arguments, ctx)).await {
            Ok(Ok(result)) => {
                if result.success {
                    info!(
                        tool = %call.name,
                        output_len = result.output.len(),
                        "Tool executed successfully"
                    );
                } else {
                    warn!(tool = %call.name, error = ?result.error, "Tool reported failure");
                }
                result
            }
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "Tool execution error");
                ToolResult::error(format!("Tool error: {}", e))
            }
            Err(_) => {
                warn!(tool = %call.name, budget_secs = budget.as_secs(), "Tool timed out");
                ToolResult::error(format!(
                    "Tool '{}' timed out after {} seconds",
                    call.name,
                    budget.as_secs()
                ))
            }
        }
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("registry", &self.registry)
            .finish()
    }
}

/// Check the argument object against the schema's required list. The handler
/// is not invoked on a mismatch.
fn validate_arguments(schema: &ParameterSchema, args: &Value) -> Result<(), String> {
    if !args.is_object() && !args.is_null() {
        return Err(format!("Arguments must be a JSON object, got: {}", args));
    }

    let missing: Vec<&str> = schema
        .required
        .iter()
        .filter(|name| args.get(name.as_str()).map_or(true, |v| v.is_null()))
        .map(|s| s.as_str())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Missing required parameter(s): {}",
            missing.join(", ")
        ))
    }
}
