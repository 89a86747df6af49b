//! Background pre-generation of practice content.
//!
//! Requests go through a bounded channel and are delivered at least once:
//! a request accepted by [`PregenerationQueue::enqueue`] is processed unless
//! the process exits first. Duplicates are harmless because generation is
//! skipped whenever an unused question is already cached.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::engine::PracticeEngine;
use crate::response::PracticeError;
use crate::types::QuestionType;

const QUEUE_CAPACITY: usize = 1024;
/// How far ahead the sweep looks for tracks about to fall due.
const SWEEP_LOOKAHEAD_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PregenerationRequest {
    pub concept_id: String,
    pub question_type: QuestionType,
}

#[derive(Clone)]
pub struct PregenerationQueue {
    sender: mpsc::Sender<PregenerationRequest>,
}

impl PregenerationQueue {
    pub fn channel() -> (Self, mpsc::Receiver<PregenerationRequest>) {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<PregenerationRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Waits for room when the queue is full. Returns how many requests were
    /// accepted; zero once the worker is gone.
    pub async fn enqueue(&self, requests: impl IntoIterator<Item = PregenerationRequest>) -> usize {
        let mut accepted = 0;
        for request in requests {
            if self.sender.send(request).await.is_err() {
                warn!("pre-generation worker stopped, request dropped");
                break;
            }
            accepted += 1;
        }
        accepted
    }
}

/// Drains the queue with bounded concurrency. Per-item failures are logged
/// and never stop the worker.
pub struct PregenerationWorker {
    engine: PracticeEngine,
    receiver: mpsc::Receiver<PregenerationRequest>,
    in_flight: Arc<Mutex<HashSet<PregenerationRequest>>>,
}

impl PregenerationWorker {
    pub fn new(engine: PracticeEngine, receiver: mpsc::Receiver<PregenerationRequest>) -> Self {
        Self {
            engine,
            receiver,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let limit = self.engine.concurrency();
        let engine = self.engine;
        let in_flight = self.in_flight;
        info!(concurrency = limit, "pre-generation worker started");

        let requests = stream::unfold(self.receiver, |mut rx| async move {
            rx.recv().await.map(|request| (request, rx))
        });
        let work = requests.for_each_concurrent(limit, |request| {
            let engine = engine.clone();
            let in_flight = Arc::clone(&in_flight);
            async move {
                process(&engine, &in_flight, request).await;
            }
        });

        tokio::select! {
            _ = shutdown.recv() => info!("pre-generation worker stopping"),
            _ = work => info!("pre-generation queue closed"),
        }
    }
}

async fn process(
    engine: &PracticeEngine,
    in_flight: &Mutex<HashSet<PregenerationRequest>>,
    request: PregenerationRequest,
) {
    if !in_flight.lock().insert(request.clone()) {
        debug!(concept_id = %request.concept_id, question_type = %request.question_type, "already generating");
        return;
    }

    let result = engine
        .get_or_generate_content(&request.concept_id, request.question_type)
        .await;
    in_flight.lock().remove(&request);

    match result {
        Ok(question) => {
            debug!(concept_id = %request.concept_id, question_id = %question.id, "content ready");
        }
        Err(PracticeError::NotFound(_)) => {
            debug!(concept_id = %request.concept_id, "concept gone before pre-generation");
        }
        Err(e) if e.is_soft() => {
            warn!(concept_id = %request.concept_id, question_type = %request.question_type, error = %e, "pre-generation failed");
        }
        Err(e) => {
            error!(concept_id = %request.concept_id, question_type = %request.question_type, error = %e, "pre-generation failed");
        }
    }
}

/// Queues content for tracks falling due within the next hour that have
/// nothing cached.
pub async fn sweep(
    engine: &PracticeEngine,
    queue: &PregenerationQueue,
    batch: u32,
) -> Result<usize, PracticeError> {
    let start = Instant::now();
    let horizon = engine.clock_now() + Duration::minutes(SWEEP_LOOKAHEAD_MINUTES);
    let missing = engine.tracks_missing_content(horizon, batch).await?;
    let found = missing.len();
    let queued = queue
        .enqueue(
            missing
                .into_iter()
                .map(|(concept_id, question_type)| PregenerationRequest {
                    concept_id,
                    question_type,
                }),
        )
        .await;

    info!(
        found,
        queued,
        duration_ms = start.elapsed().as_millis() as u64,
        "pre-generation sweep completed"
    );
    Ok(queued)
}
