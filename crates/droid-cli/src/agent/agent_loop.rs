//! Agent loop implementation
//!
//! Drives the request–act–observe cycle: hand the conversation and tool
//! catalog to the model, dispatch any tool calls it returns, append the
//! results, and go again until the model answers in plain text or the
//! iteration budget runs out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use llm_client::{
    ChatBackend, ChatMessage, FunctionDefinition as LlmFunctionDefinition,
    ToolDefinition as LlmToolDefinition,
};
use tracing::{debug, info, instrument, warn};

use crate::tools::executor::ToolExecutor;
use crate::tools::{ToolCall, ToolContext};

use super::state::{AgentConfig, AgentState};

// ANSI colors
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const CYAN: &str = "\x1b[96m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Fixed message reported when the iteration budget is exhausted
pub const EXHAUSTION_MESSAGE: &str = "Max iterations reached";

/// The agent loop orchestrator
pub struct AgentLoop {
    backend: Arc<dyn ChatBackend>,
    executor: ToolExecutor,
    config: AgentConfig,
    tool_ctx: ToolContext,
    cancelled: Arc<AtomicBool>,
}

impl AgentLoop {
    /// Create a new agent loop
    pub fn new(backend: Arc<dyn ChatBackend>, executor: ToolExecutor, config: AgentConfig) -> Self {
        Self {
            backend,
            executor,
            config,
            tool_ctx: ToolContext::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the tool execution context
    pub fn with_tool_context(mut self, ctx: ToolContext) -> Self {
        self.tool_ctx = ctx;
        self
    }

    /// Handle the caller can set to abort the run before its next model call
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Run the agent on a single query
    ///
    /// Returns the terminal run state. Tool failures are recovered into the
    /// conversation as data; only a model backend failure is returned as an
    /// `Err`.
    #[instrument(skip(self, query), fields(model = %self.config.model))]
    pub async fn run(&self, query: &str) -> Result<AgentState> {
        info!(
            query_len = query.len(),
            max_iterations = self.config.max_iterations,
            "Starting agent run"
        );
        let mut state = AgentState::new();

        let system = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| self.default_system_prompt());
        state.conversation.append(ChatMessage::system(system));
        state.conversation.append(ChatMessage::user(query));

        let tool_defs = self.tool_definitions();

        while !state.finished && state.iteration < self.config.max_iterations {
            if self.cancelled.load(Ordering::SeqCst) {
                info!(iteration = state.iteration, "Run cancelled by caller");
                state.mark_error("Run cancelled");
                break;
            }

            state.increment_iteration();
            debug!(
                iteration = state.iteration,
                messages = state.conversation.len(),
                "Starting iteration"
            );

            if self.config.verbose {
                println!("{}[Iteration {}]{}", DIM, state.iteration, RESET);
            }

            let response = self
                .backend
                .chat(
                    &self.config.model,
                    state.conversation.snapshot(),
                    Some(&tool_defs),
                )
                .await
                .context("Model request failed")?;

            state.token_usage.record(
                response.prompt_eval_count.unwrap_or(0),
                response.eval_count.unwrap_or(0),
                response.total_duration.unwrap_or(0),
            );

            let content = response.message.content;
            let tool_calls = response.message.tool_calls;

            if tool_calls.is_empty() {
                if content.trim().is_empty() {
                    warn!(
                        iteration = state.iteration,
                        "Model returned neither tool calls nor text"
                    );
                    state.mark_error("Model returned neither tool calls nor a final answer");
                    break;
                }

                info!(iterations = state.iteration, "Agent completed");
                if self.config.verbose {
                    println!("{}Done{}", GREEN, RESET);
                }
                state.conversation.append(ChatMessage::assistant(content.clone()));
                state.mark_finished(content);
                break;
            }

            // Tool calls take precedence over any accompanying text. The
            // model's own turn is recorded before any of its effects.
            state
                .conversation
                .append(ChatMessage::assistant_with_tools(content, tool_calls.clone()));

            debug!(tool_count = tool_calls.len(), "Dispatching tool calls");
            for llm_call in &tool_calls {
                let call = ToolCall {
                    id: llm_call.id.clone(),
                    name: llm_call.function.name.clone(),
                    arguments: llm_call.function.arguments.clone(),
                };

                if self.config.verbose {
                    println!("{}[Tool: {}]{}", CYAN, call.name, RESET);
                }

                let result = self.executor.execute(&call, &self.tool_ctx).await;

                if self.config.verbose {
                    if result.success {
                        println!("  {}OK{}", GREEN, RESET);
                    } else {
                        println!("  {}Failed{}", YELLOW, RESET);
                    }
                }

                // One tool-role message per call, in emission order.
                let call_ref = if call.id.is_empty() {
                    call.name.clone()
                } else {
                    call.id.clone()
                };
                state
                    .conversation
                    .append(ChatMessage::tool_result(call_ref, result.as_json()));
            }
        }

        if !state.finished && state.iteration >= self.config.max_iterations {
            warn!(
                max_iterations = self.config.max_iterations,
                "Iteration budget exhausted"
            );
            state.mark_error(EXHAUSTION_MESSAGE);
        }

        if self.config.verbose && state.token_usage.call_count > 0 {
            println!("{}[Usage]{} {}", DIM, RESET, state.token_usage.summary());
        }

        info!(
            iterations = state.iteration,
            answered = state.final_response.is_some(),
            prompt_tokens = state.token_usage.prompt_tokens,
            completion_tokens = state.token_usage.completion_tokens,
            error = ?state.error,
            "Agent run completed"
        );

        Ok(state)
    }

    fn default_system_prompt(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str(
            "You are an Android automation assistant with access to tools for driving a \
             connected device over adb and installing CI build artifacts.\n\n",
        );

        prompt.push_str("## Available Tools\n");
        for tool in self.executor.registry().catalog() {
            prompt.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
        }

        prompt.push_str(
            "\nUse tools to gather information before answering. Tool failures are reported \
             back as data; read the error and adapt. When the task is complete, reply with a \
             final summary and no further tool calls.",
        );

        prompt
    }

    fn tool_definitions(&self) -> Vec<LlmToolDefinition> {
        self.executor
            .registry()
            .catalog()
            .iter()
            .map(|t| {
                let def = t.to_definition();
                LlmToolDefinition {
                    tool_type: def.tool_type,
                    function: LlmFunctionDefinition {
                        name: def.function.name,
                        description: def.function.description,
                        parameters: serde_json::to_value(&def.function.parameters)
                            .unwrap_or_default(),
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::ToolRegistry;
    use crate::tools::{ParameterProperty, ParameterSchema, Tool, ToolResult};
    use async_trait::async_trait;
    use llm_client::{ChatResponse, FunctionCall, ResponseMessage, Role, ToolCall as LlmToolCall};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Backend that replays a scripted sequence of responses; when the
    /// script runs dry it repeats the fallback, or errors if there is none.
    struct ScriptedBackend {
        responses: Mutex<VecDeque<ChatResponse>>,
        fallback: Option<ChatResponse>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                fallback: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn repeating(response: ChatResponse) -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                fallback: Some(response),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _tools: Option<&[LlmToolDefinition]>,
        ) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.responses.lock().unwrap().pop_front() {
                return Ok(next);
            }
            self.fallback
                .clone()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            message: ResponseMessage {
                content: text.to_string(),
                tool_calls: Vec::new(),
            },
            done: true,
            ..Default::default()
        }
    }

    fn tool_call(id: &str, name: &str, arguments: Value) -> LlmToolCall {
        LlmToolCall {
            id: id.to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        }
    }

    fn tool_response(content: &str, calls: Vec<LlmToolCall>) -> ChatResponse {
        ChatResponse {
            message: ResponseMessage {
                content: content.to_string(),
                tool_calls: calls,
            },
            done: true,
            ..Default::default()
        }
    }

    struct StubTool {
        name: &'static str,
        output: &'static str,
        fail: bool,
        invocations: Arc<AtomicUsize>,
    }

    impl StubTool {
        fn ok(name: &'static str, output: &'static str) -> (Self, Arc<AtomicUsize>) {
            let invocations = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    output,
                    fail: false,
                    invocations: Arc::clone(&invocations),
                },
                invocations,
            )
        }

        fn failing(name: &'static str) -> (Self, Arc<AtomicUsize>) {
            let invocations = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    output: "",
                    fail: true,
                    invocations: Arc::clone(&invocations),
                },
                invocations,
            )
        }
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn parameters_schema(&self) -> ParameterSchema {
            ParameterSchema::new().with_property("command", ParameterProperty::string("anything"))
        }

        async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Ok(ToolResult::error("no device connected"))
            } else {
                Ok(ToolResult::success(self.output))
            }
        }
    }

    fn loop_with(
        backend: Arc<ScriptedBackend>,
        registry: ToolRegistry,
        max_iterations: usize,
    ) -> AgentLoop {
        let config = AgentConfig::new("test-model").with_max_iterations(max_iterations);
        AgentLoop::new(backend, ToolExecutor::new(Arc::new(registry)), config)
    }

    #[tokio::test]
    async fn test_done_after_single_model_call() {
        let backend = Arc::new(ScriptedBackend::new(vec![text_response("All good")]));
        let agent = loop_with(Arc::clone(&backend), ToolRegistry::new(), 10);

        let state = agent.run("anything to report?").await.unwrap();

        assert!(state.finished);
        assert_eq!(state.final_response.as_deref(), Some("All good"));
        assert!(state.error.is_none());
        assert_eq!(state.iteration, 1);
        assert_eq!(backend.call_count(), 1);
        // system + user + assistant
        assert_eq!(state.conversation.len(), 3);
    }

    #[tokio::test]
    async fn test_device_listing_scenario() {
        let (tool, invocations) = StubTool::ok("adb", "emulator-5554 device");
        let mut registry = ToolRegistry::new();
        registry.register(tool);

        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_response(
                "",
                vec![tool_call("c1", "adb", json!({"command": "devices -l"}))],
            ),
            text_response("One device connected: emulator-5554"),
        ]));
        let agent = loop_with(Arc::clone(&backend), registry, 10);

        let state = agent.run("What devices are connected?").await.unwrap();

        assert_eq!(
            state.final_response.as_deref(),
            Some("One device connected: emulator-5554")
        );
        assert_eq!(state.iteration, 2);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        // system, user, assistant(tool call), tool, assistant
        let messages = state.conversation.snapshot();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].role, Role::Assistant);
        assert!(messages[2].tool_calls.is_some());
        assert_eq!(messages[3].role, Role::Tool);
        assert!(messages[3].content.contains("emulator-5554"));
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_batch_appends_one_tool_message_per_call_in_order() {
        let (first, first_count) = StubTool::ok("first", "one");
        let (failing, failing_count) = StubTool::failing("failing");
        let (last, last_count) = StubTool::ok("last", "three");

        let mut registry = ToolRegistry::new();
        registry.register(first);
        registry.register(failing);
        registry.register(last);

        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_response(
                "",
                vec![
                    tool_call("c1", "first", json!({})),
                    tool_call("c2", "failing", json!({})),
                    tool_call("c3", "missing", json!({})),
                    tool_call("c4", "last", json!({})),
                ],
            ),
            text_response("done"),
        ]));
        let agent = loop_with(Arc::clone(&backend), registry, 10);

        let state = agent.run("run the batch").await.unwrap();

        // A failure mid-batch blocks nothing.
        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(failing_count.load(Ordering::SeqCst), 1);
        assert_eq!(last_count.load(Ordering::SeqCst), 1);

        let tool_messages: Vec<_> = state
            .conversation
            .snapshot()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_messages.len(), 4);
        let ids: Vec<_> = tool_messages
            .iter()
            .map(|m| m.tool_call_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);

        // The unknown tool still produced exactly one tool message.
        assert!(tool_messages[2].content.contains("Unknown tool"));
        assert_eq!(state.final_response.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_exhausted_after_max_iterations() {
        let (tool, invocations) = StubTool::ok("adb", "ok");
        let mut registry = ToolRegistry::new();
        registry.register(tool);

        let backend = Arc::new(ScriptedBackend::repeating(tool_response(
            "",
            vec![tool_call("c", "adb", json!({"command": "devices"}))],
        )));
        let agent = loop_with(Arc::clone(&backend), registry, 3);

        let state = agent.run("loop forever").await.unwrap();

        assert!(state.finished);
        assert_eq!(state.error.as_deref(), Some(EXHAUSTION_MESSAGE));
        assert!(state.final_response.is_none());
        assert_eq!(state.iteration, 3);
        assert_eq!(backend.call_count(), 3);
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_model_turn_is_explicit_error() {
        let backend = Arc::new(ScriptedBackend::new(vec![text_response("   ")]));
        let agent = loop_with(Arc::clone(&backend), ToolRegistry::new(), 10);

        let state = agent.run("hello?").await.unwrap();

        assert!(state.finished);
        assert!(state
            .error
            .as_deref()
            .unwrap()
            .contains("neither tool calls nor a final answer"));
        assert_eq!(state.iteration, 1);
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let agent = loop_with(Arc::clone(&backend), ToolRegistry::new(), 10);

        let err = agent.run("anyone there?").await.unwrap_err();
        assert!(err.to_string().contains("Model request failed"));
    }

    #[tokio::test]
    async fn test_cancellation_checked_before_model_call() {
        let backend = Arc::new(ScriptedBackend::new(vec![text_response("never seen")]));
        let agent = loop_with(Arc::clone(&backend), ToolRegistry::new(), 10);

        agent.cancel_handle().store(true, Ordering::SeqCst);
        let state = agent.run("cancelled query").await.unwrap();

        assert_eq!(state.error.as_deref(), Some("Run cancelled"));
        assert_eq!(backend.call_count(), 0);
        assert_eq!(state.iteration, 0);
    }

    #[tokio::test]
    async fn test_tool_calls_take_precedence_over_text() {
        let (tool, invocations) = StubTool::ok("adb", "ok");
        let mut registry = ToolRegistry::new();
        registry.register(tool);

        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_response(
                "Let me check the device first.",
                vec![tool_call("c1", "adb", json!({"command": "devices"}))],
            ),
            text_response("No devices attached"),
        ]));
        let agent = loop_with(Arc::clone(&backend), registry, 10);

        let state = agent.run("is anything connected?").await.unwrap();

        // The accompanying text did not finish the run.
        assert_eq!(state.final_response.as_deref(), Some("No devices attached"));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(state.iteration, 2);
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back_as_data() {
        let (tool, _) = StubTool::failing("adb");
        let mut registry = ToolRegistry::new();
        registry.register(tool);

        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_response("", vec![tool_call("c1", "adb", json!({"command": "devices"}))]),
            text_response("No device is connected; plug one in and retry."),
        ]));
        let agent = loop_with(Arc::clone(&backend), registry, 10);

        let state = agent.run("install the build").await.unwrap();

        let tool_msg = state
            .conversation
            .snapshot()
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        let parsed: Value = serde_json::from_str(&tool_msg.content).unwrap();
        assert_eq!(parsed["success"], false);
        assert_eq!(parsed["error"], "no device connected");
        assert!(state.final_response.is_some());
    }
}
