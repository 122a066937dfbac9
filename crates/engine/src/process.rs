//! Process-backed engine.
//!
//! Spawns the configured command once per conversation and speaks
//! newline-delimited JSON over its stdin/stdout.  Turns are written as
//! [`UserInput`] lines; every JSON line on stdout decodes into an
//! [`EngineEvent`].  Stderr is forwarded to the log at debug level.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use aw_domain::config::EngineConfig;
use aw_domain::{BoxStream, EngineEvent, Turn};

use crate::engine::{ConversationEngine, EngineConnection, EngineControl, EngineError, EventStream};
use crate::options::EngineOptions;
use crate::protocol::{ControlRequest, UserInput};

/// Maximum number of consecutive non-JSON lines to skip before declaring the
/// engine broken.
const MAX_SKIP_LINES: usize = 1000;

/// Engine that runs one child process per conversation.
pub struct ProcessEngine {
    config: EngineConfig,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn command(&self, options: &EngineOptions) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .args(options.to_args())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl ConversationEngine for ProcessEngine {
    async fn connect(
        &self,
        options: EngineOptions,
        turns: BoxStream<'static, Turn>,
    ) -> Result<EngineConnection, EngineError> {
        let mut child = self.command(&options).spawn().map_err(EngineError::Spawn)?;

        let stdin = child.stdin.take().ok_or_else(|| broken_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| broken_pipe("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            let agent_id = options.agent_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(agent_id = %agent_id, line = %line, "engine stderr");
                }
            });
        }

        tracing::debug!(
            agent_id = %options.agent_id,
            command = %self.config.command,
            resume = ?options.resume,
            pid = ?child.id(),
            "engine process spawned"
        );

        let stdin = Arc::new(Mutex::new(Some(stdin)));
        let writer = tokio::spawn(pump_turns(turns, Arc::clone(&stdin)));

        let control = Arc::new(ProcessControl {
            stdin,
            child: Mutex::new(child),
            writer: parking_lot::Mutex::new(Some(writer)),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        });

        Ok(EngineConnection {
            events: read_events(stdout),
            control,
        })
    }
}

fn broken_pipe(which: &str) -> EngineError {
    EngineError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("failed to capture engine {which}"),
    ))
}

/// Write one line of JSON to the child's stdin.
async fn write_line(stdin: &Mutex<Option<ChildStdin>>, json: &str) -> Result<(), EngineError> {
    let mut guard = stdin.lock().await;
    let stdin = guard.as_mut().ok_or(EngineError::ProcessExited)?;
    stdin.write_all(json.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

/// Forward turns to stdin until the turn stream ends, then close stdin so
/// the engine can finish and exit.
async fn pump_turns(mut turns: BoxStream<'static, Turn>, stdin: Arc<Mutex<Option<ChildStdin>>>) {
    while let Some(turn) = turns.next().await {
        let line = match serde_json::to_string(&UserInput::from(&turn)) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode turn");
                continue;
            }
        };
        if let Err(e) = write_line(&stdin, &line).await {
            tracing::warn!(error = %e, "failed to write turn to engine");
            return;
        }
    }

    if let Some(mut stdin) = stdin.lock().await.take() {
        if let Err(e) = stdin.shutdown().await {
            tracing::debug!(error = %e, "error closing engine stdin");
        }
    }
}

/// Decode stdout into engine events, skipping empty and non-JSON lines.
///
/// End of stdout ends the stream.  Gives up after [`MAX_SKIP_LINES`]
/// consecutive unusable lines.
fn read_events(stdout: ChildStdout) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut lines = BufReader::new(stdout).lines();
        let mut skipped = 0usize;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    yield Err(EngineError::Io(e));
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                match serde_json::from_str::<EngineEvent>(trimmed) {
                    Ok(event) => {
                        skipped = 0;
                        yield Ok(event);
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, line = %trimmed, "undecodable line from engine stdout");
                    }
                }
            } else {
                tracing::debug!(line = %trimmed, "skipping non-JSON line from engine stdout");
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                yield Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "engine produced too many non-JSON lines on stdout",
                )));
                break;
            }
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ProcessControl {
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Mutex<Child>,
    writer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

#[async_trait]
impl EngineControl for ProcessControl {
    fn supports_interrupt(&self) -> bool {
        true
    }

    async fn interrupt(&self) -> Result<(), EngineError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::ProcessExited);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = ControlRequest::interrupt(format!("req_{id}"));
        let json = serde_json::to_string(&req)?;
        tracing::debug!(request_id = %req.request_id, "sending interrupt to engine");
        write_line(&self.stdin, &json).await
    }

    async fn shutdown(&self, grace: Duration) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(writer) = self.writer.lock().take() {
            writer.abort();
        }
        // Close stdin to signal the process to exit.
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing engine stdin");
            }
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "engine process exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "error waiting for engine process");
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "engine process did not exit within grace period, killing"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill engine process");
                }
            }
        }
    }
}
