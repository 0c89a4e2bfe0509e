//! Bounded retry driver around [`advance`].
//!
//! Each trigger drives one project: `advance` runs on the blocking pool under
//! `step_timeout`, the project is persisted after every call, and the next
//! call is scheduled after `retry_delay` when the step failed or
//! `requeue_delay` when it made progress. A trigger gives up after
//! `max_rounds` calls. A step that overruns `step_timeout` is waited out and
//! counts as a failed round. Triggers for a project that is already being
//! driven are coalesced into one extra pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::Instant;

use opencorps_core::{Project, ProjectKey, StoreExt};
use opencorps_sync::{advance, save_project, Stage};

use crate::error::DaemonError;
use crate::services::Services;

/// How a trigger ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DriveOutcome {
    /// Onboarding finished.
    Complete { rounds: u32 },
    /// `advance` reported nothing left to retry without completing,
    /// e.g. an invalid fork config.
    Halted { rounds: u32, message: String },
    /// `max_rounds` calls made, still not done.
    Exhausted { rounds: u32 },
    /// `advance` returned an error; the project is left for a later trigger.
    Failed { rounds: u32, error: String },
    /// Another driver already owns the project and will make one more pass.
    Coalesced,
}

impl DriveOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DriveOutcome::Complete { .. } => "complete",
            DriveOutcome::Halted { .. } => "halted",
            DriveOutcome::Exhausted { .. } => "exhausted",
            DriveOutcome::Failed { .. } => "failed",
            DriveOutcome::Coalesced => "coalesced",
        }
    }
}

/// Last known state of a driven project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub project: String,
    pub stage: String,
    pub rounds: u32,
    pub failure_count: u32,
    pub message: String,
    pub outcome: Option<String>,
    pub updated_at_unix: u64,
}

pub type StatusBoard = HashMap<ProjectKey, ProjectStatus>;

pub(crate) struct Trigger {
    key: ProjectKey,
    source: &'static str,
    respond_to: Option<oneshot::Sender<DriveOutcome>>,
}

/// Receiving side of the trigger queue, consumed by [`processor_task`].
pub struct TriggerQueue {
    rx: mpsc::Receiver<Trigger>,
}

/// Cheap, cloneable handle for submitting work and reading status.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Trigger>,
    board: Arc<RwLock<StatusBoard>>,
}

/// A connected handle and queue with room for `capacity` pending triggers.
pub fn channel(capacity: usize) -> (SchedulerHandle, TriggerQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    let handle = SchedulerHandle {
        tx,
        board: Arc::new(RwLock::new(HashMap::new())),
    };
    (handle, TriggerQueue { rx })
}

impl SchedulerHandle {
    /// Queue `key` for driving without waiting for the result.
    pub async fn trigger(&self, key: ProjectKey, source: &'static str) -> Result<(), DaemonError> {
        self.tx
            .send(Trigger {
                key,
                source,
                respond_to: None,
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed("scheduler"))
    }

    /// Queue `key` and wait until its driver finishes.
    pub async fn drive(
        &self,
        key: ProjectKey,
        source: &'static str,
    ) -> Result<DriveOutcome, DaemonError> {
        let (respond_to, response) = oneshot::channel();
        self.tx
            .send(Trigger {
                key,
                source,
                respond_to: Some(respond_to),
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed("scheduler"))?;
        response
            .await
            .map_err(|_| DaemonError::ChannelClosed("scheduler response"))
    }

    /// Status of every project driven so far, ordered by key.
    pub async fn status(&self) -> Vec<ProjectStatus> {
        let board = self.board.read().await;
        let mut out: Vec<ProjectStatus> = board.values().cloned().collect();
        out.sort_by(|a, b| a.project.cmp(&b.project));
        out
    }

    pub async fn status_of(&self, key: &ProjectKey) -> Option<ProjectStatus> {
        self.board.read().await.get(key).cloned()
    }
}

/// Projects with a running driver, mapped to "run again when done".
type InFlight = Arc<Mutex<HashMap<ProjectKey, bool>>>;

/// Receive triggers until shutdown, running one driver per project.
pub async fn processor_task(
    services: Arc<Services>,
    handle: SchedulerHandle,
    mut queue: TriggerQueue,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
    let mut drivers = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_trigger = queue.rx.recv() => {
                let Some(trigger) = maybe_trigger else { break };
                {
                    let mut flights = in_flight.lock().await;
                    if let Some(again) = flights.get_mut(&trigger.key) {
                        tracing::debug!(project = %trigger.key, source = trigger.source, "project already being driven");
                        *again = true;
                        if let Some(tx) = trigger.respond_to {
                            let _ = tx.send(DriveOutcome::Coalesced);
                        }
                        continue;
                    }
                    flights.insert(trigger.key.clone(), false);
                }
                tracing::info!(project = %trigger.key, source = trigger.source, "driving project");
                drivers.spawn(drive_project(
                    services.clone(),
                    handle.board.clone(),
                    in_flight.clone(),
                    trigger,
                ));
            }
            Some(joined) = drivers.join_next(), if !drivers.is_empty() => {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "project driver failed");
                }
            }
        }
    }

    drivers.shutdown().await;
    Ok(())
}

async fn drive_project(
    services: Arc<Services>,
    board: Arc<RwLock<StatusBoard>>,
    in_flight: InFlight,
    trigger: Trigger,
) {
    let key = trigger.key;
    let started = Instant::now();
    let outcome = loop {
        let outcome = drive_rounds(&services, &board, &key).await;
        let mut flights = in_flight.lock().await;
        if flights.get(&key).copied().unwrap_or(false) {
            flights.insert(key.clone(), false);
            continue;
        }
        flights.remove(&key);
        break outcome;
    };

    tracing::info!(
        project = %key,
        outcome = outcome.label(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "finished driving project"
    );
    if let Some(status) = board.write().await.get_mut(&key) {
        status.outcome = Some(outcome.label().to_owned());
        status.updated_at_unix = unix_seconds_now();
    }
    if let Some(tx) = trigger.respond_to {
        let _ = tx.send(outcome);
    }
}

async fn drive_rounds(
    services: &Arc<Services>,
    board: &RwLock<StatusBoard>,
    key: &ProjectKey,
) -> DriveOutcome {
    let config = &services.config;

    for round in 1..=config.max_rounds {
        let mut task = {
            let services = services.clone();
            let key = key.clone();
            tokio::task::spawn_blocking(move || step(&services, &key))
        };

        let report = match tokio::time::timeout(config.step_timeout, &mut task).await {
            Err(_) => {
                // A blocking step cannot be cancelled. Let it finish before
                // the next round so a project never has two steps running.
                tracing::warn!(project = %key, round, timeout = ?config.step_timeout, "advance timed out, waiting for it to finish");
                if let Ok(Err(err)) = task.await {
                    tracing::warn!(project = %key, round, error = %err, "timed-out advance failed");
                }
                tokio::time::sleep(config.retry_delay).await;
                continue;
            }
            Ok(Err(err)) => {
                return DriveOutcome::Failed {
                    rounds: round,
                    error: format!("advance task failed: {err}"),
                }
            }
            Ok(Ok(Err(err))) => {
                tracing::error!(project = %key, round, error = %err, "advance failed");
                return DriveOutcome::Failed {
                    rounds: round,
                    error: err.to_string(),
                };
            }
            Ok(Ok(Ok(report))) => report,
        };

        board.write().await.insert(
            key.clone(),
            ProjectStatus {
                project: key.to_string(),
                stage: report.stage.to_string(),
                rounds: round,
                failure_count: report.failures_after,
                message: report.message.clone(),
                outcome: None,
                updated_at_unix: unix_seconds_now(),
            },
        );

        if report.done {
            return if report.init_complete {
                DriveOutcome::Complete { rounds: round }
            } else {
                DriveOutcome::Halted {
                    rounds: round,
                    message: report.message,
                }
            };
        }

        let delay = next_delay(services, &report);
        tracing::debug!(project = %key, round, stage = %report.stage, ?delay, "requeueing");
        tokio::time::sleep(delay).await;
    }

    DriveOutcome::Exhausted {
        rounds: config.max_rounds,
    }
}

fn next_delay(services: &Services, report: &StepReport) -> Duration {
    if report.failures_after > report.failures_before {
        services.config.retry_delay
    } else {
        services.config.requeue_delay
    }
}

struct StepReport {
    stage: Stage,
    done: bool,
    init_complete: bool,
    failures_before: u32,
    failures_after: u32,
    message: String,
}

/// Load, advance and persist one project. Runs on the blocking pool.
fn step(services: &Services, key: &ProjectKey) -> Result<StepReport, DaemonError> {
    let Some(mut project) = services.store.get::<Project>(key.as_str())? else {
        return Err(DaemonError::UnknownProject(key.clone()));
    };
    let stage = Stage::next(&project);
    let failures_before = project.failure_count;

    let result = advance(&services.context(), &mut project);
    save_project(services.store.as_ref(), &mut project)?;
    let done = result?;

    Ok(StepReport {
        stage,
        done,
        init_complete: project.progress.init_complete,
        failures_before,
        failures_after: project.failure_count,
        message: project.system_message,
    })
}

pub(crate) fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
