pub mod pregeneration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::db::config::env_bool;
use crate::engine::PracticeEngine;

pub use pregeneration::{PregenerationQueue, PregenerationRequest, PregenerationWorker};

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    engine: PracticeEngine,
    queue: PregenerationQueue,
    schedule: String,
    batch: u32,
}

impl WorkerManager {
    pub async fn new(engine: PracticeEngine, queue: PregenerationQueue) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await.map_err(WorkerError::Scheduler)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let generation = engine.generation_config();
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            schedule: generation.pregeneration_schedule.clone(),
            batch: generation.pregeneration_batch,
            engine,
            queue,
        })
    }

    /// Starts the queue worker and the periodic sweep.
    pub async fn start(
        &self,
        receiver: mpsc::Receiver<PregenerationRequest>,
    ) -> Result<(), WorkerError> {
        let worker = PregenerationWorker::new(self.engine.clone(), receiver);
        tokio::spawn(worker.run(self.shutdown_tx.subscribe()));

        if !env_bool("ENABLE_PREGENERATION_SWEEP", true) {
            info!("pre-generation sweep disabled");
            return Ok(());
        }

        let scheduler = self.scheduler.lock().await;
        let engine = self.engine.clone();
        let queue = self.queue.clone();
        let batch = self.batch;
        let shutdown_rx = self.shutdown_tx.subscribe();
        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _lock| {
            let engine = engine.clone();
            let queue = queue.clone();
            let mut rx = shutdown_rx.resubscribe();
            Box::pin(async move {
                tokio::select! {
                    _ = rx.recv() => {},
                    result = pregeneration::sweep(&engine, &queue, batch) => {
                        if let Err(e) = result {
                            error!(error = %e, code = e.code(), "pre-generation sweep error");
                        }
                    }
                }
            })
        })
        .map_err(WorkerError::Scheduler)?;
        scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
        scheduler.start().await.map_err(WorkerError::Scheduler)?;
        info!(schedule = %self.schedule, batch, "pre-generation sweep scheduled");

        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping workers...");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "Error shutting down scheduler");
        }
        info!("Workers stopped");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
}
