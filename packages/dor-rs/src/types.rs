use crate::continuity::TimestampMode;
use crate::error::{DorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete replay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub host: String,
    pub port: u16,
    /// Messages each worker sends; may exceed the corpus length
    pub messages_per_worker: u64,
    /// Target spacing between consecutive sends of one worker
    pub delay_ms: u64,
    pub workers: usize,
    #[serde(default)]
    pub timestamp_mode: TimestampMode,
    pub ack_timeout_secs: u64,
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(DorError::Config("destination host is empty".to_string()));
        }
        if self.workers == 0 {
            return Err(DorError::Config("at least one worker is required".to_string()));
        }
        if self.ack_timeout_secs == 0 {
            return Err(DorError::Config("ack timeout must be positive".to_string()));
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn destination(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How a worker's run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerOutcome {
    Completed,
    ConnectFailed,
    Interrupted,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Per-worker counters. Written only by the owning worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub worker_id: usize,
    pub outcome: WorkerOutcome,
    #[serde(rename = "total_elapsed_ms", with = "duration_ms")]
    pub total_elapsed: Duration,
    #[serde(rename = "send_elapsed_ms", with = "duration_ms")]
    pub send_elapsed: Duration,
    /// Send attempts made, including failed ones
    pub attempted: u64,
    pub sent: u64,
    pub failed_messages: u64,
    pub failed_connections: u64,
}

impl WorkerResult {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            outcome: WorkerOutcome::Completed,
            total_elapsed: Duration::ZERO,
            send_elapsed: Duration::ZERO,
            attempted: 0,
            sent: 0,
            failed_messages: 0,
            failed_connections: 0,
        }
    }
}

/// Aggregate of one replay run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub run_id: String,
    pub destination: String,
    pub workers: Vec<WorkerResult>,
    pub total_elapsed_ms: u64,
    pub total_send_ms: u64,
    pub mean_elapsed_ms: u64,
    pub mean_send_ms: u64,
    pub sent: u64,
    pub failed_messages: u64,
    pub failed_connections: u64,
    pub interrupted_workers: usize,
    pub created_at: String,
}

impl ReplaySummary {
    pub fn from_results(run_id: String, destination: String, workers: Vec<WorkerResult>) -> Self {
        let total_elapsed_ms: u64 = workers
            .iter()
            .map(|w| w.total_elapsed.as_millis() as u64)
            .sum();
        let total_send_ms: u64 = workers
            .iter()
            .map(|w| w.send_elapsed.as_millis() as u64)
            .sum();
        let count = (workers.len() as u64).max(1);

        Self {
            run_id,
            destination,
            total_elapsed_ms,
            total_send_ms,
            mean_elapsed_ms: total_elapsed_ms / count,
            mean_send_ms: total_send_ms / count,
            sent: workers.iter().map(|w| w.sent).sum(),
            failed_messages: workers.iter().map(|w| w.failed_messages).sum(),
            failed_connections: workers.iter().map(|w| w.failed_connections).sum(),
            interrupted_workers: workers
                .iter()
                .filter(|w| w.outcome == WorkerOutcome::Interrupted)
                .count(),
            workers,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// True when every worker completed and every message was acknowledged.
    pub fn is_clean(&self) -> bool {
        self.failed_messages == 0 && self.failed_connections == 0 && self.interrupted_workers == 0
    }

    pub fn report_lines(&self) -> Vec<String> {
        vec![
            format!("Total runtime (including delay) ms: {}", self.total_elapsed_ms),
            format!("Total runtime (sending only) ms: {}", self.total_send_ms),
            format!("Average runtime per worker (including delay) ms: {}", self.mean_elapsed_ms),
            format!("Average runtime per worker (sending only) ms: {}", self.mean_send_ms),
            format!("Successfully sent messages: {}", self.sent),
            format!("Failed messages: {}", self.failed_messages),
            format!("Failed connections: {}", self.failed_connections),
        ]
    }
}
