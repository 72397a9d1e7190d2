//! CLI command implementations

use anyhow::Result;
use llm_client::{Config, OllamaClient};
use std::sync::Arc;

use crate::agent::{AgentConfig, AgentLoop};
use crate::tools::builtin::create_default_registry;
use crate::tools::executor::ToolExecutor;
use crate::tools::ToolContext;

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const BLUE: &str = "\x1b[94m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn print_status(ok: bool, msg: &str) {
    let icon = if ok {
        format!("{}✓{}", GREEN, RESET)
    } else {
        format!("{}✗{}", RED, RESET)
    };
    println!("  {} {}", icon, msg);
}

/// Run a one-shot agent query
pub async fn run(
    query: &str,
    model: Option<String>,
    max_iterations: Option<usize>,
    json: bool,
    verbose: bool,
) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("Query must not be empty");
    }

    let config = Config::try_load().unwrap_or_else(Config::default_minimal);
    let client = OllamaClient::new(config.ollama_url());

    let model = model.unwrap_or_else(|| config.agent.model.clone());
    let max_iterations = max_iterations.unwrap_or(config.agent.max_iterations);

    let mut agent_config = AgentConfig::new(model)
        .with_max_iterations(max_iterations)
        .with_verbose(verbose && !json);
    if let Some(ref system) = config.agent.system_prompt {
        agent_config = agent_config.with_system_prompt(system.clone());
    }

    let tool_ctx = ToolContext::default()
        .with_adb_timeout(config.timeouts.adb_secs)
        .with_http_timeout(config.timeouts.http_secs)
        .with_download_timeout(config.timeouts.download_secs)
        .with_install_timeout(config.timeouts.install_secs);

    let registry = Arc::new(create_default_registry());
    let executor = ToolExecutor::new(registry);
    let agent = AgentLoop::new(Arc::new(client), executor, agent_config)
        .with_tool_context(tool_ctx);

    let state = agent.run(query).await?;

    if json {
        let out = serde_json::json!({
            "answer": state.final_response,
            "error": state.error,
            "iterations": state.iteration,
            "prompt_tokens": state.token_usage.prompt_tokens,
            "completion_tokens": state.token_usage.completion_tokens,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    match (state.final_response, state.error) {
        (Some(answer), None) => {
            println!("{}", answer);
            Ok(())
        }
        (_, Some(err)) => anyhow::bail!(err),
        _ => anyhow::bail!("Agent finished without a response"),
    }
}

/// Show Ollama and adb availability
pub async fn status() -> Result<()> {
    let config = Config::try_load().unwrap_or_else(Config::default_minimal);
    let client = OllamaClient::new(config.ollama_url());

    println!("{}droid status{}", BOLD, RESET);
    println!("  Endpoint: {}", config.ollama_url());

    let ollama_ok = client.health_check().await.unwrap_or(false);
    print_status(ollama_ok, "Ollama is running");
    if !ollama_ok {
        println!("  Start with: {}ollama serve{}", BLUE, RESET);
    }

    match tokio::process::Command::new("adb").arg("version").output().await {
        Ok(out) if out.status.success() => {
            let version = String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .unwrap_or("")
                .to_string();
            print_status(true, &version);
        }
        _ => print_status(false, "adb not found on PATH"),
    }

    println!("\n{}Agent{}", BOLD, RESET);
    println!("  Model: {}", config.agent.model);
    println!("  Max iterations: {}", config.agent.max_iterations);

    Ok(())
}

/// List the registered tool catalog
pub async fn tools_list() -> Result<()> {
    let registry = create_default_registry();

    println!("{}Registered tools ({}){}", BOLD, registry.len(), RESET);
    for tool in registry.catalog() {
        println!("\n  {}{}{}", BOLD, tool.name(), RESET);
        println!("    {}", tool.description());
        let schema = tool.parameters_schema();
        if !schema.required.is_empty() {
            println!("    required: {}", schema.required.join(", "));
        }
    }

    Ok(())
}
