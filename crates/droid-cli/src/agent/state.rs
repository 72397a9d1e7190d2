//! Agent run state

use crate::conversation::Conversation;

/// Default model round-trips before a run is declared exhausted
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Configuration for a single agent run
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use
    pub model: String,
    /// System prompt; the built-in one is used when absent
    pub system_prompt: Option<String>,
    /// Maximum iterations before stopping
    pub max_iterations: usize,
    /// Whether to narrate iterations and tool calls on stdout
    pub verbose: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-oss:20b".to_string(),
            system_prompt: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            verbose: false,
        }
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// State of one run; built by `AgentLoop::run` and returned to the caller
#[derive(Debug)]
pub struct AgentState {
    /// Append-only message history
    pub conversation: Conversation,
    /// Model round-trips completed so far
    pub iteration: usize,
    /// Whether a terminal state was reached
    pub finished: bool,
    /// Final answer text (terminal success)
    pub final_response: Option<String>,
    /// Terminal error (exhaustion, cancellation, empty model turn)
    pub error: Option<String>,
    /// Accumulated token accounting
    pub token_usage: TokenUsage,
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            conversation: Conversation::new(),
            iteration: 0,
            finished: false,
            final_response: None,
            error: None,
            token_usage: TokenUsage::default(),
        }
    }

    pub fn mark_finished(&mut self, response: String) {
        self.finished = true;
        self.final_response = Some(response);
    }

    pub fn mark_error(&mut self, error: impl Into<String>) {
        self.finished = true;
        self.error = Some(error.into());
    }

    pub fn increment_iteration(&mut self) {
        self.iteration += 1;
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

/// Token accounting across model round-trips
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub call_count: u64,
    pub total_duration_ns: u64,
}

impl TokenUsage {
    pub fn record(&mut self, prompt: u64, completion: u64, duration_ns: u64) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_duration_ns += duration_ns;
        self.call_count += 1;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn summary(&self) -> String {
        format!(
            "{} prompt + {} completion tokens over {} call(s) in {:.1}s",
            self.prompt_tokens,
            self.completion_tokens,
            self.call_count,
            self.total_duration_ns as f64 / 1e9
        )
    }
}
