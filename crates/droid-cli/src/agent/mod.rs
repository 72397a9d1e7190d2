//! Agent loop and run state

mod agent_loop;
mod state;

pub use agent_loop::{AgentLoop, EXHAUSTION_MESSAGE};
pub use state::{AgentConfig, AgentState, TokenUsage, DEFAULT_MAX_ITERATIONS};
