//! Tool framework for the agent loop
//!
//! Tools are registered once at startup and dispatched by name. Every tool
//! failure is normalized into a [`ToolResult`] at the executor boundary and
//! fed back to the model as data.

pub mod builtin;
pub mod executor;
pub mod registry;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Result of tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,
    /// Output from the tool (tool-specific JSON payload or plain text)
    pub output: String,
    /// Error message if failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// Create a failed result
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// Create a failed result with output
    pub fn failure(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }

    /// Serialized form appended to the conversation as a tool message
    pub fn as_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.output.clone())
    }
}

/// Context provided to tools during execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Device command timeout in seconds
    pub adb_timeout_secs: u64,
    /// Build API query timeout in seconds
    pub http_timeout_secs: u64,
    /// Artifact download timeout in seconds
    pub download_timeout_secs: u64,
    /// Package install timeout in seconds
    pub install_timeout_secs: u64,
    /// Maximum output length (truncate if exceeded)
    pub max_output_len: usize,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            adb_timeout_secs: 30,
            http_timeout_secs: 10,
            download_timeout_secs: 60,
            install_timeout_secs: 60,
            max_output_len: 50_000,
        }
    }
}

impl ToolContext {
    pub fn with_adb_timeout(mut self, secs: u64) -> Self {
        self.adb_timeout_secs = secs;
        self
    }

    pub fn with_http_timeout(mut self, secs: u64) -> Self {
        self.http_timeout_secs = secs;
        self
    }

    pub fn with_download_timeout(mut self, secs: u64) -> Self {
        self.download_timeout_secs = secs;
        self
    }

    pub fn with_install_timeout(mut self, secs: u64) -> Self {
        self.install_timeout_secs = secs;
        self
    }
}

/// Schema for a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterProperty {
    /// Parameter type (string, number, boolean)
    #[serde(rename = "type")]
    pub param_type: String,
    /// Parameter description
    pub description: String,
    /// Default value if applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterProperty {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            param_type: "string".to_string(),
            description: description.into(),
            default: None,
        }
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self {
            param_type: "number".to_string(),
            description: description.into(),
            default: None,
        }
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self {
            param_type: "boolean".to_string(),
            description: description.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Schema describing tool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Type is always "object"
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Parameter properties
    pub properties: std::collections::HashMap<String, ParameterProperty>,
    /// Required parameter names
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: std::collections::HashMap::new(),
            required: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        self.properties.insert(name.into(), prop);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>, prop: ParameterProperty) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), prop);
        self.required.push(name);
        self
    }
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Tool definition exposed to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function definition
    pub function: FunctionDefinition,
}

/// Function definition within a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ParameterSchema,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// One tool invocation request, taken from a model response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier assigned by the model; may be empty
    pub id: String,
    /// Tool/function name
    pub name: String,
    /// Arguments as JSON
    pub arguments: Value,
}

/// The Tool trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get a description of what the tool does
    fn description(&self) -> &str;

    /// Get the parameter schema
    fn parameters_schema(&self) -> ParameterSchema;

    /// Wall-clock budget the executor enforces around `execute`
    fn timeout(&self, _ctx: &ToolContext) -> Duration {
        Duration::from_secs(60)
    }

    /// Execute the tool with the given arguments
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult>;

    /// Convert to a tool definition for the model
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters_schema())
    }
}
