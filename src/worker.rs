//! Message-driven front of the transcoder.
//!
//! A [`Worker`] owns at most one running session. Callers talk to it with
//! [`Request`]s and read [`Response`]s from its event stream; nothing else
//! is shared.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use media_bus::MediaBackend;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::TranscodeError;
use crate::media::cancel::CancelController;
use crate::media::inspector::inspect_file;
use crate::media::session::{Outcome, Session, SessionState};
use crate::media::types::{MediaInfo, TranscodeSettings};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Inspect {
        file: PathBuf,
    },
    Start {
        file: PathBuf,
        #[serde(default)]
        settings: TranscodeSettings,
    },
    Cancel,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedOutput {
    /// The finished file. Kept out of the JSON form; front ends store it
    /// and report `path`.
    #[serde(skip)]
    pub output: Bytes,
    #[serde(skip)]
    pub source: PathBuf,
    pub extension: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    AnalysisResult(MediaInfo),
    Progress { percent: u8 },
    Complete(CompletedOutput),
    Cancelled,
    Error { message: String },
}

impl Response {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Response::Complete(_) | Response::Cancelled | Response::Error { .. }
        )
    }

    fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed(output) => Response::Complete(CompletedOutput {
                size: output.data.len() as u64,
                extension: output.extension().to_string(),
                mime_type: output.mime_type().to_string(),
                output: output.data,
                source: output.source,
                path: None,
            }),
            Outcome::Cancelled => Response::Cancelled,
            Outcome::Failed(e) => Response::Error {
                message: e.to_string(),
            },
        }
    }
}

enum WorkerCommand {
    Request(Request),
    RunFinished { run: u64, outcome: Outcome },
}

struct ActiveRun {
    id: u64,
    cancel: CancelController,
}

struct WorkerState {
    backend: Arc<dyn MediaBackend>,
    events: mpsc::UnboundedSender<Response>,
    commands: mpsc::Sender<WorkerCommand>,
    phase: SessionState,
    available: bool,
    run: Option<ActiveRun>,
    next_run: u64,
}

impl WorkerState {
    fn emit(&self, response: Response) {
        let _ = self.events.send(response);
    }

    fn enter(&mut self, next: SessionState) {
        if self.phase.can_transition(next) {
            log::debug!("worker: {:?} -> {:?}", self.phase, next);
            self.phase = next;
        } else {
            log::warn!("worker: ignoring {:?} -> {:?}", self.phase, next);
        }
    }
}

pub struct Worker {
    cancel: CancellationToken,
    tx: mpsc::Sender<WorkerCommand>,
}

impl Worker {
    /// Starts the worker loop. Responses arrive on the returned stream in
    /// the order they were produced.
    pub fn spawn(backend: Arc<dyn MediaBackend>) -> (Self, UnboundedReceiverStream<Response>) {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);
        let (events, events_rx) = mpsc::unbounded_channel();

        let state = WorkerState {
            backend,
            events,
            commands: tx.clone(),
            phase: SessionState::Idle,
            available: true,
            run: None,
            next_run: 0,
        };
        let cancel_clone = cancel.clone();
        tokio::spawn(async move { Self::inner_loop(cancel_clone, state, rx).await });
        (Self { cancel, tx }, UnboundedReceiverStream::new(events_rx))
    }

    pub async fn send(&self, request: Request) -> Result<(), TranscodeError> {
        self.tx
            .send(WorkerCommand::Request(request))
            .await
            .map_err(|_| TranscodeError::Transcode("worker stopped".into()))
    }

    /// Stops the loop and cancels any active run.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn inner_loop(
        cancel: CancellationToken,
        mut state: WorkerState,
        mut rx: mpsc::Receiver<WorkerCommand>,
    ) {
        if let Err(e) = state.backend.check_available() {
            let e = TranscodeError::from(e);
            log::error!("backend {} unavailable: {}", state.backend.name(), e);
            state.available = false;
            state.emit(Response::Error {
                message: e.to_string(),
            });
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(run) = state.run.take() {
                        run.cancel.cancel();
                    }
                    break;
                },
                Some(cmd) = rx.recv() => {
                    Self::inner_command_handler(&mut state, cmd).await;
                },
            }
        }
    }

    async fn inner_command_handler(state: &mut WorkerState, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Request(_) if !state.available => {
                log::debug!("backend unavailable, request ignored");
            }
            WorkerCommand::Request(Request::Inspect { file }) => {
                if state.run.is_some() {
                    state.emit(Response::Error {
                        message: "a conversion is running".into(),
                    });
                    return;
                }
                let previous = state.phase;
                state.enter(SessionState::Inspecting);
                match inspect_file(state.backend.clone(), file.clone()).await {
                    Ok(info) => {
                        log::info!("inspected {}", file.display());
                        state.enter(SessionState::Ready);
                        state.emit(Response::AnalysisResult(info));
                    }
                    Err(e) => {
                        log::warn!("inspect {} failed: {}", file.display(), e);
                        state.enter(if previous == SessionState::Idle {
                            SessionState::Idle
                        } else {
                            SessionState::Ready
                        });
                        state.emit(Response::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }
            WorkerCommand::Request(Request::Start { file, settings }) => {
                if state.run.is_some() {
                    state.emit(Response::Error {
                        message: "a conversion is already running".into(),
                    });
                    return;
                }
                state.next_run += 1;
                let id = state.next_run;
                let cancel = CancelController::new();
                state.run = Some(ActiveRun {
                    id,
                    cancel: cancel.clone(),
                });
                state.enter(SessionState::Running);
                log::info!("run {} started: {}", id, file.display());

                let session = Session::new(file, settings, cancel);
                let backend = state.backend.clone();
                let events = state.events.clone();
                let commands = state.commands.clone();
                tokio::spawn(async move {
                    let outcome = session
                        .run(backend, move |percent| {
                            let _ = events.send(Response::Progress { percent });
                        })
                        .await;
                    let _ = commands
                        .send(WorkerCommand::RunFinished { run: id, outcome })
                        .await;
                });
            }
            WorkerCommand::Request(Request::Cancel) => match &state.run {
                Some(run) => {
                    log::info!("run {} cancel requested", run.id);
                    run.cancel.cancel();
                }
                None => log::debug!("cancel without an active run ignored"),
            },
            WorkerCommand::RunFinished { run, outcome } => {
                let Some(active) = state.run.take_if(|active| active.id == run) else {
                    log::warn!("stale result of run {} dropped", run);
                    return;
                };
                // A cancel that arrived while the run was finishing wins.
                let response = if active.cancel.is_user_cancelled() {
                    Response::Cancelled
                } else {
                    Response::from_outcome(outcome)
                };
                state.enter(match &response {
                    Response::Complete(_) => SessionState::Completed,
                    Response::Cancelled => SessionState::Cancelled,
                    _ => SessionState::Failed,
                });
                log::info!("run {} finished: {:?}", run, state.phase);
                state.emit(response);
                state.enter(SessionState::Ready);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod worker_test;
