//! One `/v1/messages` stream: launch, read loop, cutoffs, and the closing events.
//!
//! A session moves through `Starting -> Streaming -> DrainingStderr -> Closed`.
//! Every path that reaches the client ends with `content_block_stop`,
//! `message_delta` and `message_stop`, and every path releases the agent.

use std::time::Duration;

use axum::body::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::context::ExecutionContext;
use crate::launch::LaunchSpec;
use crate::messages::{next_message_id, MessageStreamEvent};
use crate::process::{AgentProcess, LaunchError};
use crate::sse::encode_stream_event;
use crate::translate::{translate_line, TranslateMode};

pub const STDERR_MARKER: &str = "\n[Codex stderr]\n";
pub const AGENT_UNAVAILABLE: &str = "agent not available";

/// How long an agent that closed stdout gets to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Starting,
    Streaming,
    DrainingStderr,
    Closed,
}

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Eof,
    HardCutoff,
    IdleCutoff,
    ClientGone,
    ReadFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    AgentUnavailable,
    Finished(StreamEnd),
}

#[derive(Debug, Error)]
#[error("client disconnected")]
pub struct ClientGone;

/// Write side of a response stream.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Bytes>,
}

impl FrameSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn send(&self, event: &MessageStreamEvent) -> Result<(), ClientGone> {
        let frame = match encode_stream_event(event) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(error = %err, "dropping unencodable sse event");
                return Ok(());
            }
        };
        self.tx.send(frame).await.map_err(|_| ClientGone)
    }

    /// Resolves once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

#[derive(Debug)]
struct SessionState {
    started_at: Instant,
    last_turn_completed: Option<Instant>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            last_turn_completed: None,
        }
    }

    fn hard_deadline(&self, cutoff: Option<Duration>) -> Option<Instant> {
        cutoff.map(|cutoff| self.started_at + cutoff)
    }

    fn idle_deadline(&self, cutoff: Duration) -> Option<Instant> {
        self.last_turn_completed.map(|at| at + cutoff)
    }
}

#[derive(Debug)]
pub struct StreamSession {
    context: ExecutionContext,
    launch: LaunchSpec,
    mode: TranslateMode,
    prompt: String,
    model: String,
    sink: FrameSink,
    phase: SessionPhase,
}

impl StreamSession {
    pub fn new(
        context: ExecutionContext,
        launch: LaunchSpec,
        mode: TranslateMode,
        prompt: String,
        model: String,
        sink: FrameSink,
    ) -> Self {
        Self {
            context,
            launch,
            mode,
            prompt,
            model,
            sink,
            phase: SessionPhase::Starting,
        }
    }

    pub async fn run(mut self) -> SessionOutcome {
        let message_id = next_message_id();
        tracing::info!(
            message_id = %message_id,
            cwd = %self.context.working_dir.display(),
            mode = ?self.mode,
            "session starting"
        );

        for event in MessageStreamEvent::opening(message_id, &self.model) {
            if self.sink.send(&event).await.is_err() {
                tracing::info!("client disconnected before launch");
                self.enter(SessionPhase::Closed);
                return SessionOutcome::Finished(StreamEnd::ClientGone);
            }
        }

        let mut agent = match AgentProcess::spawn(&self.launch, &self.context.working_dir) {
            Ok(agent) => agent,
            Err(err) => {
                let message = agent_unavailable_message(&self.launch, &err);
                tracing::error!(error = %err, "agent not available");
                if self.emit_text(message).await.is_ok() {
                    self.close().await;
                }
                self.enter(SessionPhase::Closed);
                return SessionOutcome::AgentUnavailable;
            }
        };

        agent.send_prompt(std::mem::take(&mut self.prompt));
        self.enter(SessionPhase::Streaming);
        let mut state = SessionState::new();
        let end = self.stream(&mut agent, &mut state).await;

        self.enter(SessionPhase::DrainingStderr);
        let grace = if end == StreamEnd::Eof {
            EXIT_GRACE
        } else {
            Duration::ZERO
        };
        let tail = agent.shutdown(grace).await;

        if end != StreamEnd::ClientGone {
            self.finish(&tail).await;
        }
        self.enter(SessionPhase::Closed);

        tracing::info!(
            reason = ?end,
            elapsed_ms = state.started_at.elapsed().as_millis() as u64,
            "session closed"
        );
        SessionOutcome::Finished(end)
    }

    async fn stream(&self, agent: &mut AgentProcess, state: &mut SessionState) -> StreamEnd {
        let hard_deadline = state.hard_deadline(self.context.hard_cutoff);

        loop {
            let idle_deadline = state.idle_deadline(self.context.idle_cutoff);

            let read = tokio::select! {
                biased;
                _ = self.sink.closed() => {
                    tracing::info!(pid = agent.pid(), "client disconnected, stopping agent");
                    return StreamEnd::ClientGone;
                }
                _ = sleep_until_opt(hard_deadline) => {
                    tracing::info!(
                        pid = agent.pid(),
                        limit_sec = self.context.hard_cutoff.map(|d| d.as_secs()),
                        "hard cutoff reached"
                    );
                    return StreamEnd::HardCutoff;
                }
                _ = sleep_until_opt(idle_deadline) => {
                    tracing::info!(
                        pid = agent.pid(),
                        idle_sec = self.context.idle_cutoff.as_secs(),
                        "turn completed and agent idle, closing stream"
                    );
                    return StreamEnd::IdleCutoff;
                }
                read = agent.next_line() => read,
            };

            let line = match read {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::debug!(pid = agent.pid(), "agent stdout closed");
                    return StreamEnd::Eof;
                }
                Err(err) => {
                    tracing::warn!(pid = agent.pid(), error = %err, "agent stdout read failed");
                    return StreamEnd::ReadFailed;
                }
            };

            let Some(translation) = translate_line(&line, self.mode) else {
                continue;
            };
            if translation.turn_completed {
                state.last_turn_completed = Some(Instant::now());
            }
            // A slow reader can fill the channel; the hard cutoff still applies.
            let sent = tokio::select! {
                biased;
                _ = sleep_until_opt(hard_deadline) => {
                    tracing::info!(
                        pid = agent.pid(),
                        limit_sec = self.context.hard_cutoff.map(|d| d.as_secs()),
                        "hard cutoff reached while client was not reading"
                    );
                    return StreamEnd::HardCutoff;
                }
                sent = self.emit_text(translation.text) => sent,
            };
            if sent.is_err() {
                tracing::info!(pid = agent.pid(), "client disconnected, stopping agent");
                return StreamEnd::ClientGone;
            }
        }
    }

    async fn finish(&self, stderr_tail: &str) {
        if !stderr_tail.trim().is_empty() {
            tracing::info!(stderr = stderr_tail.trim(), "agent stderr tail");
            let text = format!("{STDERR_MARKER}{stderr_tail}");
            if self
                .sink
                .send(&MessageStreamEvent::text_delta(text))
                .await
                .is_err()
            {
                return;
            }
        }
        self.close().await;
    }

    async fn close(&self) {
        for event in MessageStreamEvent::closing() {
            if self.sink.send(&event).await.is_err() {
                tracing::debug!("client disconnected during closing events");
                return;
            }
        }
    }

    async fn emit_text(&self, mut text: String) -> Result<(), ClientGone> {
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.sink.send(&MessageStreamEvent::text_delta(text)).await
    }

    fn enter(&mut self, phase: SessionPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "session phase");
        self.phase = phase;
    }
}

fn agent_unavailable_message(launch: &LaunchSpec, err: &LaunchError) -> String {
    if err.is_not_found() {
        format!(
            "{AGENT_UNAVAILABLE}: Codex CLI not found (`{}`). Install it with `npm i -g @openai/codex`, then run `codex login`.",
            launch.program.display()
        )
    } else {
        format!("{AGENT_UNAVAILABLE}: {err}")
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
