//! Subprocess orchestrator.
//!
//! Each provider is an external command. The prompt is written to its stdin,
//! and its stdout is the answer, reported to the observer as a cumulative
//! snapshot after every read. A provider that wants to be resumed later
//! prints a final line
//!
//! ```text
//! @@parley-context {"chat_id": "..."}
//! ```
//!
//! which is stripped from the answer and returned as continuation metadata.
//! On the next turn that value is handed back in `PARLEY_CONTEXT`.

use crate::config::FileProviderConfig;
use async_trait::async_trait;
use futures::future::join_all;
use parley_application::{
    FanoutObserver, FanoutOutcome, FanoutRequest, FanoutResult, Orchestrator, PartialChunk,
};
use parley_domain::ProviderError;
use parley_domain::util::truncate_str;
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Marker opening the continuation line.
pub const CONTEXT_MARKER: &str = "@@parley-context";

const READ_BUF_SIZE: usize = 4096;
const STDERR_SNIPPET_BYTES: usize = 200;

/// How to launch one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCommand {
    pub program: String,
    pub args: Vec<String>,
    pub thinking_args: Vec<String>,
    pub timeout: Duration,
    pub env: BTreeMap<String, String>,
}

impl ProviderCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            thinking_args: Vec::new(),
            timeout: Duration::from_secs(300),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&FileProviderConfig> for ProviderCommand {
    fn from(config: &FileProviderConfig) -> Self {
        Self {
            program: config.command.clone(),
            args: config.args.clone(),
            thinking_args: config.thinking_args.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            env: config.env.clone(),
        }
    }
}

/// Orchestrator running every provider as a local subprocess.
pub struct ProcessOrchestrator {
    commands: BTreeMap<String, ProviderCommand>,
}

impl ProcessOrchestrator {
    pub fn new(commands: BTreeMap<String, ProviderCommand>) -> Self {
        Self { commands }
    }

    pub fn from_config(providers: &BTreeMap<String, FileProviderConfig>) -> Self {
        Self::new(
            providers
                .iter()
                .map(|(id, config)| (id.clone(), ProviderCommand::from(config)))
                .collect(),
        )
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    fn spawn(
        &self,
        provider: &str,
        command: &ProviderCommand,
        request: &FanoutRequest,
    ) -> std::io::Result<Child> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if request.use_thinking {
            cmd.args(&command.thinking_args);
        }
        cmd.envs(&command.env)
            .env("PARLEY_PROVIDER", provider)
            .env("PARLEY_SESSION_ID", &request.session_id);
        if let Some(context) = request.provider_contexts.get(provider) {
            cmd.env("PARLEY_CONTEXT", context.to_string());
        }
        if let Some(meta) = request.provider_meta.get(provider) {
            cmd.env("PARLEY_PROVIDER_META", meta.to_string());
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    async fn run_one(
        &self,
        provider: &str,
        request: &FanoutRequest,
        observer: &dyn FanoutObserver,
    ) -> Result<FanoutResult, ProviderError> {
        let Some(command) = self.commands.get(provider) else {
            return Err(ProviderError::hard(provider, "no command configured"));
        };

        let mut child = self.spawn(provider, command, request).map_err(|e| {
            ProviderError::hard(provider, format!("failed to start {}: {}", command.program, e))
        })?;
        debug!("Started provider {} ({})", provider, command.program);

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt.clone();
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
            });
        }

        let mut collected = Vec::new();
        let mut stderr_buf = Vec::new();
        let run = Self::drive(&mut child, provider, observer, &mut collected, &mut stderr_buf);
        let outcome = tokio::time::timeout(command.timeout, run).await;

        let (text, meta) = split_context(&String::from_utf8_lossy(&collected));
        let stderr = String::from_utf8_lossy(&stderr_buf);
        let failure = match outcome {
            Ok(Ok(status)) if status.success() => {
                if text.trim().is_empty() {
                    return Err(ProviderError::hard(provider, "empty response"));
                }
                return Ok(FanoutResult::new(text, meta));
            }
            Ok(Ok(status)) => format!("{}{}", status, stderr_snippet(&stderr)),
            Ok(Err(e)) => format!("I/O error: {}", e),
            Err(_) => {
                let _ = child.start_kill();
                format!("timed out after {}s", command.timeout.as_secs_f32())
            }
        };

        if text.trim().is_empty() {
            Err(ProviderError::hard(provider, failure))
        } else {
            let result = FanoutResult::salvaged(text, meta, provider, failure);
            if let Some(e) = &result.soft_error {
                warn!("{}", e);
            }
            Ok(result)
        }
    }

    /// Pump stdout into `collected` (notifying the observer), drain stderr,
    /// then wait for exit.
    async fn drive(
        child: &mut Child,
        provider: &str,
        observer: &dyn FanoutObserver,
        collected: &mut Vec<u8>,
        stderr_buf: &mut Vec<u8>,
    ) -> std::io::Result<ExitStatus> {
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let read_stdout = async {
            let mut buf = [0u8; READ_BUF_SIZE];
            if let Some(out) = stdout.as_mut() {
                loop {
                    let n = out.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    collected.extend_from_slice(&buf[..n]);
                    let text = streamed_text(&collected[..]);
                    observer.on_partial(provider, &PartialChunk::new(text));
                }
            }
            Ok::<(), std::io::Error>(())
        };
        let read_stderr = async {
            match stderr.as_mut() {
                Some(err) => err.read_to_end(stderr_buf).await.map(|_| ()),
                None => Ok(()),
            }
        };

        let (out, err) = tokio::join!(read_stdout, read_stderr);
        out?;
        err?;
        child.wait().await
    }
}

#[async_trait]
impl Orchestrator for ProcessOrchestrator {
    async fn execute_parallel_fanout(
        &self,
        request: FanoutRequest,
        observer: &dyn FanoutObserver,
    ) -> FanoutOutcome {
        let runs = request.providers.iter().map(|provider| {
            let request = &request;
            async move { (provider.clone(), self.run_one(provider, request, observer).await) }
        });

        let mut outcome = FanoutOutcome::default();
        for (provider, result) in join_all(runs).await {
            match result {
                Ok(result) => {
                    outcome.results.insert(provider, result);
                }
                Err(e) => {
                    outcome.errors.insert(provider, e);
                }
            }
        }
        outcome
    }
}

/// Split the continuation line off the output. Returns the answer text and
/// the parsed metadata (`Null` when absent or unparsable).
fn split_context(output: &str) -> (String, Value) {
    let marker_line = format!("\n{}", CONTEXT_MARKER);
    let cut = if output.starts_with(CONTEXT_MARKER) {
        Some(0)
    } else {
        output.find(&marker_line)
    };

    match cut {
        Some(at) => {
            let tail = output[at..].trim_start_matches('\n');
            let raw = tail[CONTEXT_MARKER.len()..].lines().next().unwrap_or("").trim();
            let meta = serde_json::from_str(raw).unwrap_or(Value::Null);
            (output[..at].trim_end().to_string(), meta)
        }
        None => (output.trim_end().to_string(), Value::Null),
    }
}

/// Visible text of an unfinished stdout stream.
///
/// A multibyte character cut by a read boundary and a trailing line that may
/// still grow into the continuation marker are both held back until more
/// output arrives.
fn streamed_text(collected: &[u8]) -> String {
    let complete = &collected[..collected.len() - incomplete_utf8_tail(collected)];
    let text = String::from_utf8_lossy(complete);

    let line_start = text.rfind('\n').map_or(0, |i| i + 1);
    let last_line = &text[line_start..];
    let held = if !last_line.is_empty() && CONTEXT_MARKER.starts_with(last_line) {
        &text[..line_start]
    } else {
        &text[..]
    };
    split_context(held).0
}

/// Length of a trailing UTF-8 sequence that is cut short.
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    let tail = match std::str::from_utf8(bytes) {
        Ok(_) => return 0,
        Err(e) if e.error_len().is_none() => return bytes.len() - e.valid_up_to(),
        Err(_) => &bytes[bytes.len().saturating_sub(3)..],
    };
    // Invalid bytes earlier in the stream; inspect the last few on their own.
    for (back, &byte) in tail.iter().rev().enumerate() {
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if width > back + 1 { back + 1 } else { 0 };
    }
    0
}

fn stderr_snippet(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", truncate_str(trimmed, STDERR_SNIPPET_BYTES))
    }
}
