use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use opencorps_core::{Project, StoreExt};

use crate::error::DaemonError;
use crate::scheduler::{self, processor_task, SchedulerHandle};
use crate::services::Services;

const QUEUE_CAPACITY: usize = 64;

/// A running scheduler.
pub struct Daemon {
    handle: SchedulerHandle,
    shutdown_tx: broadcast::Sender<()>,
    processor: JoinHandle<Result<(), DaemonError>>,
}

impl Daemon {
    /// Spawn the trigger processor on the current runtime.
    pub fn start(services: Arc<Services>) -> Self {
        let (shutdown_tx, _) = broadcast::channel::<()>(16);
        let (handle, queue) = scheduler::channel(QUEUE_CAPACITY);

        let processor = {
            let shutdown = shutdown_tx.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                let result = processor_task(services, handle, queue, shutdown.subscribe()).await;
                let _ = shutdown.send(());
                result
            })
        };

        Self {
            handle,
            shutdown_tx,
            processor,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown and wait for the processor to exit. Drivers still
    /// running are aborted; their projects were persisted after their last
    /// completed step.
    pub async fn stop(self) -> Result<(), DaemonError> {
        let _ = self.shutdown_tx.send(());
        handle_join("scheduler", self.processor.await)
    }
}

/// Resume every unfinished project, then serve triggers until `stop`
/// resolves. An embedding binary passes its signal handling as `stop`.
pub async fn serve<F>(services: Arc<Services>, stop: F) -> Result<(), DaemonError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let daemon = Daemon::start(services.clone());

    let resume_handle = {
        let services = services.clone();
        let handle = daemon.handle();
        tokio::spawn(async move { resume_incomplete(&services, &handle).await.map(|_| ()) })
    };

    let stop_handle = {
        let mut shutdown_rx = daemon.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                _ = stop => tracing::info!("stop requested, shutting down daemon"),
            }
            Ok::<(), DaemonError>(())
        })
    };

    let (resume_result, stop_result) = tokio::join!(resume_handle, stop_handle);
    let stopped = daemon.stop().await;

    handle_join("resume", resume_result)?;
    handle_join("stop", stop_result)?;
    stopped
}

/// Trigger every project that has a webhook and is either unfinished or has
/// upstream pushes waiting. Returns how many were queued.
pub async fn resume_incomplete(
    services: &Arc<Services>,
    handle: &SchedulerHandle,
) -> Result<usize, DaemonError> {
    let store = services.clone();
    let projects = tokio::task::spawn_blocking(move || {
        store.store.query::<Project>(|p| {
            p.progress.has_webhook && (!p.progress.init_complete || !p.pending_merges.is_empty())
        })
    })
    .await
    .map_err(|err| DaemonError::Join {
        task: "resume",
        message: err.to_string(),
    })??;

    for project in &projects {
        handle.trigger(project.key.clone(), "startup").await?;
    }
    tracing::info!(count = projects.len(), "resumed unfinished projects");
    Ok(projects.len())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join {
            task,
            message: err.to_string(),
        }),
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides
/// `default_level`; `OPENCORPS_LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var("OPENCORPS_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}
