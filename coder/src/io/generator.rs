//! Generation collaborator: the text-generation backend behind every role.
//!
//! The [`Generator`] trait decouples nodes from the actual agent backend
//! (currently an agent CLI such as `codex exec`). Tests use scripted
//! generators that return predetermined replies without spawning processes.
//! Structured replies are schema-validated before they are deserialized;
//! any failure surfaces as [`GenerationUnavailable`].

use std::cell::Cell;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::Draft;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::graph::NodeId;
use crate::core::types::{CodeResult, DecisionResult, MutantResult, SpecVerdict, TestResult};
use crate::io::config::GeneratorConfig;
use crate::io::process::run_command_with_timeout;

/// Parameters for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Role issuing the request.
    pub role: NodeId,
    /// Rendered prompt text.
    pub prompt: String,
    /// JSON Schema the reply must satisfy, when a structured reply is expected.
    pub schema: Option<&'static str>,
    /// Maximum time to wait for the reply.
    pub timeout: Duration,
}

/// Abstraction over text-generation backends.
pub trait Generator {
    /// Return the raw reply text for `request`.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Raised when a generation call fails or its reply cannot be used.
///
/// Fatal for the run; nothing retries at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationUnavailable {
    pub role: NodeId,
    pub reason: String,
}

impl fmt::Display for GenerationUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation failed for {}: {}", self.role, self.reason)
    }
}

impl std::error::Error for GenerationUnavailable {}

/// A typed reply with the schema that constrains it.
pub trait StructuredReply: DeserializeOwned {
    const SCHEMA: &'static str;
}

impl StructuredReply for SpecVerdict {
    const SCHEMA: &'static str = include_str!("../../schemas/spec_verdict.schema.json");
}

impl StructuredReply for TestResult {
    const SCHEMA: &'static str = include_str!("../../schemas/test_result.schema.json");
}

impl StructuredReply for CodeResult {
    const SCHEMA: &'static str = include_str!("../../schemas/code_result.schema.json");
}

impl StructuredReply for DecisionResult {
    const SCHEMA: &'static str = include_str!("../../schemas/decision.schema.json");
}

impl StructuredReply for MutantResult {
    const SCHEMA: &'static str = include_str!("../../schemas/mutant.schema.json");
}

/// Request free-form prose for `role`.
#[instrument(skip_all, fields(role = %role))]
pub fn generate_text<G: Generator>(
    generator: &G,
    role: NodeId,
    prompt: String,
    timeout: Duration,
) -> Result<String> {
    let request = GenerationRequest {
        role,
        prompt,
        schema: None,
        timeout,
    };
    let reply = generator
        .generate(&request)
        .map_err(|err| unavailable(role, format!("{err:#}")))?;
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(unavailable(role, "empty reply"));
    }
    debug!(bytes = reply.len(), "received text reply");
    Ok(reply.to_string())
}

/// Request a reply for `role` and extract it as `T`.
#[instrument(skip_all, fields(role = %role))]
pub fn generate_structured<G: Generator, T: StructuredReply>(
    generator: &G,
    role: NodeId,
    prompt: String,
    timeout: Duration,
) -> Result<T> {
    let request = GenerationRequest {
        role,
        prompt,
        schema: Some(T::SCHEMA),
        timeout,
    };
    let reply = generator
        .generate(&request)
        .map_err(|err| unavailable(role, format!("{err:#}")))?;
    extract_structured(&reply).map_err(|err| unavailable(role, format!("{err:#}")))
}

fn unavailable(role: NodeId, reason: impl Into<String>) -> anyhow::Error {
    let err = GenerationUnavailable {
        role,
        reason: reason.into(),
    };
    warn!(role = %err.role, reason = %err.reason, "generation unavailable");
    err.into()
}

/// Parse, schema-validate and deserialize a structured reply.
fn extract_structured<T: StructuredReply>(reply: &str) -> Result<T> {
    let body = strip_code_fence(reply);
    let instance: Value = serde_json::from_str(body).context("parse reply json")?;
    validate_schema(&instance, T::SCHEMA)?;
    let value = serde_json::from_value(instance).context("deserialize reply")?;
    Ok(value)
}

/// Remove a surrounding Markdown code fence, if any.
fn strip_code_fence(reply: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n(.*?)\n?\s*```\s*$").expect("fence regex")
    });
    match FENCE_RE.captures(reply).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str(),
        None => reply.trim(),
    }
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema_raw: &str) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_raw).context("parse schema json")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "schema validation failed:\n- {}",
            messages.join("\n- ")
        ));
    }
    Ok(())
}

/// Generator that spawns the configured agent CLI once per request.
///
/// Each request gets its own directory under `log_dir` holding the prompt,
/// the schema, the reply file and the agent's combined output log.
pub struct CommandGenerator {
    config: GeneratorConfig,
    log_dir: PathBuf,
    seq: Cell<u32>,
}

impl CommandGenerator {
    pub fn new(config: GeneratorConfig, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            log_dir: log_dir.into(),
            seq: Cell::new(0),
        }
    }

    fn next_request_dir(&self, role: NodeId) -> Result<PathBuf> {
        let seq = self.seq.get() + 1;
        self.seq.set(seq);
        let dir = self.log_dir.join(format!("{seq:03}-{role}"));
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(dir)
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(role = %request.role, timeout_secs = request.timeout.as_secs()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let program = self
            .config
            .command
            .first()
            .ok_or_else(|| anyhow!("generator command must not be empty"))?;
        let dir = self.next_request_dir(request.role)?;
        info!(dir = %dir.display(), "starting generation");

        let prompt_path = dir.join("prompt.md");
        fs::write(&prompt_path, &request.prompt)
            .with_context(|| format!("write {}", prompt_path.display()))?;

        let mut cmd = Command::new(program);
        cmd.args(&self.config.command[1..]).current_dir(&dir);

        if let (Some(schema), Some(flag)) = (request.schema, &self.config.schema_flag) {
            let schema_path = dir.join("schema.json");
            fs::write(&schema_path, schema)
                .with_context(|| format!("write {}", schema_path.display()))?;
            cmd.arg(flag).arg(&schema_path);
        }
        let reply_path = self.config.output_flag.as_ref().map(|flag| {
            let path = dir.join("reply.txt");
            cmd.arg(flag).arg(&path);
            path
        });
        if let Some(marker) = &self.config.stdin_marker {
            cmd.arg(marker);
        }

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            self.config.output_limit_bytes,
        )
        .with_context(|| format!("run {program}"))?;

        let log_path = dir.join("generator.log");
        fs::write(&log_path, output.combined_log("generator"))
            .with_context(|| format!("write {}", log_path.display()))?;

        if output.timed_out {
            return Err(anyhow!("{program} timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "{program} failed with status {:?}",
                output.status.code()
            ));
        }

        let reply = match reply_path {
            Some(path) => fs::read_to_string(&path)
                .with_context(|| format!("read reply {}", path.display()))?,
            None => String::from_utf8_lossy(&output.stdout).into_owned(),
        };
        debug!(bytes = reply.len(), "generation completed");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedGenerator(Result<String, String>);

    impl Generator for FixedGenerator {
        fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            self.0.clone().map_err(|msg| anyhow!(msg))
        }
    }

    fn fixed(reply: &str) -> FixedGenerator {
        FixedGenerator(Ok(reply.to_string()))
    }

    /// Verifies fenced JSON replies are unwrapped before parsing.
    #[test]
    fn structured_reply_accepts_code_fence() {
        let reply = "```json\n{\"thought\": \"t\", \"impl_code\": \"def f(): return 1\"}\n```";
        let code: CodeResult = generate_structured(
            &fixed(reply),
            NodeId::Implementer,
            "p".to_string(),
            Duration::from_secs(1),
        )
        .expect("extract");
        assert_eq!(code.impl_code, "def f(): return 1");
    }

    /// Verifies a reply missing required fields is rejected by the schema.
    #[test]
    fn schema_violation_is_generation_unavailable() {
        let err = generate_structured::<_, TestResult>(
            &fixed(r#"{"thought": "only a thought"}"#),
            NodeId::TestAuthor,
            "p".to_string(),
            Duration::from_secs(1),
        )
        .unwrap_err();
        let unavailable = err
            .downcast_ref::<GenerationUnavailable>()
            .expect("downcast");
        assert_eq!(unavailable.role, NodeId::TestAuthor);
        assert!(unavailable.reason.contains("schema validation failed"));
    }

    /// Verifies backend errors and empty prose are both reported as unavailable.
    #[test]
    fn backend_failure_and_empty_text_are_unavailable() {
        let err = generate_text(
            &FixedGenerator(Err("service down".to_string())),
            NodeId::Critic,
            "p".to_string(),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(err.to_string().contains("service down"));
        assert!(err.downcast_ref::<GenerationUnavailable>().is_some());

        let err = generate_text(
            &fixed("   \n"),
            NodeId::Critic,
            "p".to_string(),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(err.to_string().contains("empty reply"));
    }

    /// Verifies unknown decision actions pass the schema and parse as unrecognized.
    #[test]
    fn decision_accepts_any_action_string() {
        let decision: DecisionResult = generate_structured(
            &fixed(r#"{"analysis": "a", "action": "escalate", "feedback": "f"}"#),
            NodeId::Reflector,
            "p".to_string(),
            Duration::from_secs(1),
        )
        .expect("extract");
        assert_eq!(
            decision.action,
            crate::core::types::DecisionAction::Unrecognized
        );
    }

    fn sh_config(script: &str, output_flag: Option<&str>) -> GeneratorConfig {
        GeneratorConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string(), "sh".to_string()],
            schema_flag: Some("--schema".to_string()),
            output_flag: output_flag.map(str::to_string),
            stdin_marker: None,
            timeout_secs: 5,
            output_limit_bytes: 10_000,
        }
    }

    /// Verifies the command generator feeds the prompt on stdin and reads stdout.
    #[test]
    fn command_generator_reads_stdout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let generator = CommandGenerator::new(sh_config("cat", None), temp.path());
        let reply = generator
            .generate(&GenerationRequest {
                role: NodeId::ProductOwner,
                prompt: "user stories please".to_string(),
                schema: None,
                timeout: Duration::from_secs(5),
            })
            .expect("generate");
        assert_eq!(reply, "user stories please");

        let request_dir = temp.path().join("001-product_owner");
        assert!(request_dir.join("prompt.md").exists());
        assert!(request_dir.join("generator.log").exists());
    }

    /// Verifies the schema and reply-file flags are passed and the reply file is read.
    #[test]
    fn command_generator_reads_output_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        // Positional args after the script: $1=--schema $2=<schema> $3=--out $4=<reply>.
        let script = concat!(
            r#"test "$1" = --schema && test -f "$2" && "#,
            r#"printf '{"mutant_code": "m", "description": "d"}' > "$4""#,
        );
        let generator = CommandGenerator::new(sh_config(script, Some("--out")), temp.path());
        let mutant: MutantResult = generate_structured(
            &generator,
            NodeId::MutationAuditor,
            "mutate".to_string(),
            Duration::from_secs(5),
        )
        .expect("generate");
        assert_eq!(mutant.description, "d");
        assert!(
            temp.path()
                .join("001-mutation_auditor/schema.json")
                .exists()
        );
    }

    /// Verifies a non-zero agent exit is an error that names the status.
    #[test]
    fn command_generator_failure_is_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let generator = CommandGenerator::new(sh_config("exit 7", None), temp.path());
        let err = generator
            .generate(&GenerationRequest {
                role: NodeId::Architect,
                prompt: "p".to_string(),
                schema: None,
                timeout: Duration::from_secs(5),
            })
            .unwrap_err();
        assert!(err.to_string().contains("Some(7)"));
    }
}
