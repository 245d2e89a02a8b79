use crate::corpus::Corpus;
use crate::error::{DorError, Result};
use crate::transport::{MllpTransport, Transport};
use crate::types::{ReplayConfig, ReplaySummary, WorkerOutcome, WorkerResult};
use crate::worker::ReplayWorker;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Replay Coordinator
///
/// Starts one worker per configured connection against the same corpus,
/// waits for all of them and folds their results into one summary. A failed
/// worker's remaining messages are not handed to anyone else.
pub struct ReplayCoordinator {
    config: ReplayConfig,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

impl ReplayCoordinator {
    pub fn new(config: ReplayConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            cancel: CancellationToken::new(),
        })
    }

    /// Coordinator sending over MLLP to the configured destination
    pub fn mllp(config: ReplayConfig) -> Result<Self> {
        let transport = MllpTransport::new(config.host.clone(), config.port, config.ack_timeout());
        Self::new(config, Arc::new(transport))
    }

    /// Cancelling this token interrupts every worker's pause
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub async fn run(&self, corpus: &Corpus) -> Result<ReplaySummary> {
        // Fail before any connection is opened if continuity cannot be seeded
        let policy = corpus.policy()?;
        let run_id = Uuid::new_v4().to_string();

        log::info!(
            "Starting replay {}: {} workers x {} messages to {} ({:?})",
            run_id,
            self.config.workers,
            self.config.messages_per_worker,
            self.transport.destination(),
            policy
        );

        let handles: Vec<_> = (0..self.config.workers)
            .map(|id| {
                let worker = ReplayWorker::new(
                    id,
                    corpus.clone(),
                    Arc::clone(&self.transport),
                    &self.config,
                    self.cancel.child_token(),
                );
                tokio::spawn(worker.run())
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut first_error: Option<DorError> = None;

        for (id, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => {
                    log::error!("Worker {} could not start: {}", id, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    log::error!("Worker {} aborted: {}", id, e);
                    let mut result = WorkerResult::new(id);
                    result.outcome = WorkerOutcome::Interrupted;
                    results.push(result);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        log::info!("All workers completed");

        Ok(ReplaySummary::from_results(
            run_id,
            self.transport.destination(),
            results,
        ))
    }
}
