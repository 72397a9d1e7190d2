//! Azure DevOps build fetch-and-install tool
//!
//! Three bounded stages: query the latest successful build on a branch,
//! download and extract the artifact package, install the contained APK via
//! adb. Each stage failure short-circuits the rest and comes back as data.

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::tools::{ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult};

const DEFAULT_BASE_URL: &str = "https://dev.azure.com";
const DEFAULT_ARTIFACT: &str = "drop";
const DEFAULT_BRANCH: &str = "refs/heads/main";
const API_VERSION: &str = "7.0";

/// Shared HTTP client for connection pooling
static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("droid-agent/0.1")
            .build()
            .expect("Failed to create HTTP client")
    })
}

#[derive(Debug, Deserialize)]
struct BuildsResponse {
    #[serde(default)]
    value: Vec<Build>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Build {
    id: u64,
    build_number: String,
    #[serde(default, rename = "_links")]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    web: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct ArtifactsResponse {
    #[serde(default)]
    value: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    name: String,
    #[serde(default)]
    resource: ArtifactResource,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactResource {
    download_url: Option<String>,
}

/// Tool that installs the latest successful pipeline build on the device
pub struct InstallBuildTool {
    base_url: String,
}

impl InstallBuildTool {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the tool at a different build server (used by tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for InstallBuildTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for InstallBuildTool {
    fn name(&self) -> &str {
        "get_and_install_latest_build"
    }

    fn description(&self) -> &str {
        "Download the latest successful build artifact from an Azure DevOps pipeline and install \
         the contained APK on the connected device via adb. Combines querying the build, \
         downloading the artifact, and installing in one step."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required(
                "organization",
                ParameterProperty::string("Azure DevOps organization name (e.g. 'mycompany')"),
            )
            .with_required(
                "project",
                ParameterProperty::string("Project name in Azure DevOps"),
            )
            .with_required(
                "pipeline_id",
                ParameterProperty::string("Pipeline definition ID (numeric or name)"),
            )
            .with_required(
                "pat_token",
                ParameterProperty::string("Personal Access Token for authentication"),
            )
            .with_property(
                "artifact_name",
                ParameterProperty::string("Name of the artifact containing the APK")
                    .with_default(json!(DEFAULT_ARTIFACT)),
            )
            .with_property(
                "branch",
                ParameterProperty::string("Branch to take the build from")
                    .with_default(json!(DEFAULT_BRANCH)),
            )
    }

    fn timeout(&self, ctx: &ToolContext) -> Duration {
        // Sum of the stage budgets plus slack; the stages below carry their
        // own individual bounds.
        Duration::from_secs(
            ctx.http_timeout_secs * 2
                + ctx.download_timeout_secs
                + ctx.install_timeout_secs
                + 30,
        )
    }

    #[instrument(skip(self, args, ctx), fields(branch = tracing::field::Empty))]
    async fn execute(&self, args: &Value, ctx: &ToolContext) -> Result<ToolResult> {
        let organization = require_str(args, "organization")?;
        let project = require_str(args, "project")?;
        let pipeline_id = require_str(args, "pipeline_id")?;
        let pat_token = require_str(args, "pat_token")?;
        let artifact_name = args
            .get("artifact_name")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_ARTIFACT);
        let branch = args
            .get("branch")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_BRANCH);

        tracing::Span::current().record("branch", branch);

        let auth = basic_auth_header(pat_token);
        let client = shared_client();
        let builds_url = builds_url(&self.base_url, organization, project);

        // Stage 1: latest successful build on the branch
        debug!(url = %builds_url, "Querying builds");
        let response = match client
            .get(&builds_url)
            .query(&[
                ("definitions", pipeline_id),
                ("branchName", branch),
                ("resultFilter", "succeeded"),
                ("$top", "1"),
                ("api-version", API_VERSION),
            ])
            .header("Authorization", &auth)
            .timeout(Duration::from_secs(ctx.http_timeout_secs))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::error(format!("Failed to query builds: {}", e))),
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Build query rejected");
            return Ok(ToolResult::error(format!(
                "Failed to get builds: {}",
                status.as_u16()
            )));
        }

        let builds: BuildsResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "Malformed builds response: {}",
                    e
                )))
            }
        };

        let build = match builds.value.into_iter().next() {
            Some(b) => b,
            None => {
                return Ok(ToolResult::error(format!(
                    "No successful builds found for branch {}",
                    branch
                )))
            }
        };
        debug!(build_id = build.id, build_number = %build.build_number, "Found build");

        // Stage 2: resolve the artifact download URL
        let artifact_url = format!("{}/{}/artifacts", builds_url, build.id);
        let response = match client
            .get(&artifact_url)
            .query(&[("artifactName", artifact_name), ("api-version", API_VERSION)])
            .header("Authorization", &auth)
            .timeout(Duration::from_secs(ctx.http_timeout_secs))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "Failed to query artifact: {}",
                    e
                )))
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(ToolResult::error(format!(
                "Failed to get artifact: {}",
                status.as_u16()
            )));
        }

        let artifacts: ArtifactsResponse = match response.json().await {
            Ok(a) => a,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "Malformed artifact response: {}",
                    e
                )))
            }
        };

        let available: Vec<&str> = artifacts.value.iter().map(|a| a.name.as_str()).collect();
        let artifact = match artifacts.value.iter().find(|a| a.name == artifact_name) {
            Some(a) => a,
            None => {
                return Ok(ToolResult::error(format!(
                    "Artifact '{}' not found in build {} (available: {})",
                    artifact_name,
                    build.build_number,
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                )))
            }
        };

        let download_url = match artifact.resource.download_url.as_deref() {
            Some(u) => u,
            None => {
                return Ok(ToolResult::error(
                    "Download URL not found in artifact response",
                ))
            }
        };

        // Stage 3: download and extract
        debug!(timeout_secs = ctx.download_timeout_secs, "Downloading artifact");
        let response = match client
            .get(download_url)
            .header("Authorization", &auth)
            .timeout(Duration::from_secs(ctx.download_timeout_secs))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "Failed to download artifact: {}",
                    e
                )))
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(ToolResult::error(format!(
                "Failed to download artifact: {}",
                status.as_u16()
            )));
        }

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "Failed to read artifact download: {}",
                    e
                )))
            }
        };

        let temp_dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "Failed to create temp directory: {}",
                    e
                )))
            }
        };

        let zip_path = temp_dir.path().join("artifact.zip");
        if let Err(e) = std::fs::write(&zip_path, &bytes) {
            return Ok(ToolResult::error(format!(
                "Failed to write artifact to disk: {}",
                e
            )));
        }

        if let Err(e) = extract_zip(&zip_path, temp_dir.path()) {
            return Ok(ToolResult::error(format!(
                "Failed to extract artifact: {}",
                e
            )));
        }

        let apk = match find_apk(temp_dir.path()) {
            Some(p) => p,
            None => return Ok(ToolResult::error("No APK file found in artifact")),
        };
        let apk_file = apk
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        // Stage 4: install on the device
        debug!(apk = %apk_file, timeout_secs = ctx.install_timeout_secs, "Installing");
        let mut cmd = Command::new("adb");
        cmd.args(["install", "-r"]).arg(&apk);

        let output = match timeout(
            Duration::from_secs(ctx.install_timeout_secs),
            cmd.output(),
        )
        .await
        {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => return Ok(ToolResult::error(format!("Failed to run adb install: {}", e))),
            Err(_) => {
                return Ok(ToolResult::error(
                    "adb install timed out - check device connection",
                ))
            }
        };

        let install_output = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let install_error = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let success = output.status.success();

        let payload = json!({
            "success": success,
            "build_id": build.id,
            "build_number": build.build_number,
            "branch": branch,
            "apk_file": apk_file,
            "install_output": install_output,
            "install_error": if install_error.is_empty() {
                Value::Null
            } else {
                Value::String(install_error)
            },
            "web_url": build.links.web.as_ref().map(|l| l.href.clone()),
        });
        let payload = serde_json::to_string_pretty(&payload).unwrap_or_default();

        if success {
            Ok(ToolResult::success(payload))
        } else {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Ok(ToolResult::failure(
                payload,
                format!("adb install exited with code {}", code),
            ))
        }
    }
}

fn require_str<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing required parameter: {}", name))
}

fn builds_url(base: &str, organization: &str, project: &str) -> String {
    format!(
        "{}/{}/{}/_apis/build/builds",
        base.trim_end_matches('/'),
        organization,
        project
    )
}

/// Azure DevOps PAT auth: basic scheme with an empty username
fn basic_auth_header(pat: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!(":{}", pat));
    format!("Basic {}", encoded)
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    archive.extract(dest)?;
    Ok(())
}

/// First .apk under the extracted artifact, walking in file-name order
fn find_apk(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| {
            e.file_type().is_file()
                && e.path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("apk"))
                    .unwrap_or(false)
        })
        .map(|e| e.into_path())
}
