// Replay worker - one connection, one cursor, one offset
//
// States: connect -> send loop -> close. Every worker owns its connection,
// its continuity state and its result; the only thing shared with other
// workers is the read-only corpus.

use crate::continuity::{Continuity, TimestampMode};
use crate::corpus::Corpus;
use crate::error::{DorError, Result};
use crate::message::Message;
use crate::offset;
use crate::transport::{Connection, Transport};
use crate::types::{ReplayConfig, WorkerOutcome, WorkerResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct ReplayWorker {
    id: usize,
    corpus: Corpus,
    transport: Arc<dyn Transport>,
    messages: u64,
    delay: Duration,
    mode: TimestampMode,
    cancel: CancellationToken,
}

impl ReplayWorker {
    pub fn new(
        id: usize,
        corpus: Corpus,
        transport: Arc<dyn Transport>,
        config: &ReplayConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            corpus,
            transport,
            messages: config.messages_per_worker,
            delay: config.delay(),
            mode: config.timestamp_mode,
            cancel,
        }
    }

    /// Run to a terminal state.
    ///
    /// Only a corpus that cannot seed continuity is an error; connection,
    /// send and interrupt failures are reported through the result.
    pub async fn run(self) -> Result<WorkerResult> {
        let started = Instant::now();
        let mut result = WorkerResult::new(self.id);

        let mut continuity = Continuity::new(&self.corpus.first()?, &self.corpus.last()?)?;

        log::debug!("Worker {} connecting to {}", self.id, self.transport.destination());
        let mut connection = match self.transport.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                log::error!("Worker {} failed to connect: {}", self.id, e);
                result.failed_connections += 1;
                result.outcome = WorkerOutcome::ConnectFailed;
                result.total_elapsed = started.elapsed();
                return Ok(result);
            }
        };

        // Seed from the moment sending starts, not from construction
        continuity.reseed_at(Utc::now());

        log::debug!("Worker {} sending messages", self.id);
        if let Err(e) = self
            .send_loop(&mut connection, &mut continuity, &mut result)
            .await
        {
            log::warn!("Worker {} stopped early: {}", self.id, e);
            result.outcome = WorkerOutcome::Interrupted;
        }

        connection.close().await;
        result.total_elapsed = started.elapsed();

        log::info!(
            "Worker {} sent {} messages in {} milliseconds ({} failed)",
            self.id,
            result.sent,
            result.total_elapsed.as_millis(),
            result.failed_messages
        );

        Ok(result)
    }

    async fn send_loop(
        &self,
        connection: &mut Box<dyn Connection>,
        continuity: &mut Continuity,
        result: &mut WorkerResult,
    ) -> Result<()> {
        let mut cursor = 0usize;

        while result.attempted < self.messages {
            if self.cancel.is_cancelled() {
                return Err(DorError::Interrupted);
            }

            let iteration = Instant::now();
            log::debug!("Worker {} sending message {}...", self.id, cursor);

            match self.send_one(connection, cursor, continuity, result).await {
                Ok(()) => result.sent += 1,
                Err(e) => {
                    log::error!("Worker {} failed to send message {}: {}", self.id, cursor, e);
                    result.failed_messages += 1;
                }
            }
            result.attempted += 1;

            cursor += 1;
            if cursor >= self.corpus.len() {
                cursor = 0;
                continuity.on_cycle_wrap();
            }

            if result.attempted < self.messages && !self.delay.is_zero() {
                // Already behind schedule means no pause at all
                if let Some(pause) = self.delay.checked_sub(iteration.elapsed()) {
                    tokio::select! {
                        biased;

                        _ = self.cancel.cancelled() => return Err(DorError::Interrupted),
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }
        }

        Ok(())
    }

    async fn send_one(
        &self,
        connection: &mut Box<dyn Connection>,
        cursor: usize,
        continuity: &Continuity,
        result: &mut WorkerResult,
    ) -> Result<()> {
        let text = self
            .corpus
            .get(cursor)
            .ok_or_else(|| DorError::Decode(format!("no message at position {}", cursor)))?;
        let mut message = Message::decode(text)?;
        offset::apply(&mut message, continuity.offset(), self.mode)?;

        if !connection.is_open() {
            log::info!("Worker {} reconnecting to {}", self.id, self.transport.destination());
            *connection = self
                .transport
                .connect()
                .await
                .map_err(|e| DorError::Send(format!("reconnect failed: {}", e)))?;
        }

        let send_started = Instant::now();
        let sent = connection.send(&message).await;
        result.send_elapsed += send_started.elapsed();

        sent.map(|ack| log::debug!("Message acknowledged with {}", ack.code))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::Ack;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every encoded message and when it was handed to `send`.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub sent: Mutex<Vec<(Instant, String)>>,
        pub connects: AtomicUsize,
        pub attempts: AtomicUsize,
        pub fail_attempts: HashSet<usize>,
        pub refuse_connect: bool,
        pub refuse_reconnect: bool,
        pub close_after_send: bool,
    }

    impl Recorder {
        pub(crate) fn texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
        }
    }

    pub(crate) struct MockTransport(pub Arc<Recorder>);

    struct MockConnection {
        recorder: Arc<Recorder>,
        open: bool,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self) -> Result<Box<dyn Connection>> {
            let previous = self.0.connects.fetch_add(1, Ordering::SeqCst);
            if self.0.refuse_connect || (self.0.refuse_reconnect && previous > 0) {
                return Err(DorError::Connect("refused".to_string()));
            }
            Ok(Box::new(MockConnection {
                recorder: Arc::clone(&self.0),
                open: true,
            }))
        }

        fn destination(&self) -> String {
            "mock:0".to_string()
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn send(&mut self, message: &Message) -> Result<Ack> {
            let attempt = self.recorder.attempts.fetch_add(1, Ordering::SeqCst);
            if self.recorder.close_after_send {
                self.open = false;
            }
            if self.recorder.fail_attempts.contains(&attempt) {
                return Err(DorError::Send("injected".to_string()));
            }
            self.recorder
                .sent
                .lock()
                .unwrap()
                .push((Instant::now(), message.encode()));
            Ok(Ack {
                code: "AA".to_string(),
                control_id: message.control_id().map(str::to_string),
            })
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn close(&mut self) {
            self.open = false;
        }
    }

    pub(crate) fn waveform(control_id: &str, start: &str, end: &str) -> String {
        format!(
            "MSH|^~\\&|A|B|C|D|20120530112345||ORU^R01|{}|P|2.6\r\
             OBR|1||X|WAVEFORM|||{}|{}\r\
             OBX|1|NA|131329^MDC_ECG_LEAD_I^MDC|1|0.1^0.2|mV||||||||{}\r",
            control_id, start, end, start
        )
    }

    pub(crate) fn config(messages: u64, delay_ms: u64) -> ReplayConfig {
        ReplayConfig {
            host: "mock".to_string(),
            port: 0,
            messages_per_worker: messages,
            delay_ms,
            workers: 1,
            timestamp_mode: TimestampMode::Shift,
            ack_timeout_secs: 1,
        }
    }

    fn worker(corpus: Corpus, recorder: &Arc<Recorder>, config: &ReplayConfig) -> ReplayWorker {
        ReplayWorker::new(
            0,
            corpus,
            Arc::new(MockTransport(Arc::clone(recorder))),
            config,
            CancellationToken::new(),
        )
    }

    fn three_message_corpus() -> Corpus {
        Corpus::from_texts(vec![
            waveform("1", "20150615145531.000", "20150615145532.000"),
            waveform("2", "20150615145532.000", "20150615145533.000"),
            waveform("3", "20150615145533.000", "20150615145534.000"),
        ])
        .unwrap()
    }

    fn order_times(text: &str) -> (String, String) {
        let message = Message::decode(text).unwrap();
        let group = &message.groups()[0];
        (
            message.time(group.start).unwrap().unwrap().to_string(),
            message.time(group.end).unwrap().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_sends_exactly_n_with_wraparound() {
        let recorder = Arc::new(Recorder::default());
        let result = worker(three_message_corpus(), &recorder, &config(7, 0))
            .run()
            .await
            .unwrap();

        assert_eq!(result.outcome, WorkerOutcome::Completed);
        assert_eq!(result.sent, 7);
        assert_eq!(result.attempted, 7);

        let ids: Vec<String> = recorder
            .texts()
            .iter()
            .map(|t| Message::decode(t).unwrap().control_id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "1", "2", "3", "1"]);
    }

    #[tokio::test]
    async fn test_wrapped_cycle_continues_time_axis() {
        let corpus = Corpus::from_texts(vec![
            waveform("1", "20150615145531.000", "20150615145532.000"),
            waveform("2", "20150615145532.000", "20150615145533.000"),
        ])
        .unwrap();
        let recorder = Arc::new(Recorder::default());
        worker(corpus, &recorder, &config(5, 0)).run().await.unwrap();

        let times: Vec<(String, String)> = recorder.texts().iter().map(|t| order_times(t)).collect();
        assert_eq!(times.len(), 5);
        for pair in times.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "gap or overlap between sends");
        }
    }

    #[tokio::test]
    async fn test_preserve_mode_keeps_embedded_times() {
        let corpus = three_message_corpus();
        let original = order_times(corpus.get(0).unwrap());

        let recorder = Arc::new(Recorder::default());
        let mut config = config(4, 0);
        config.timestamp_mode = TimestampMode::Preserve;
        worker(corpus, &recorder, &config).run().await.unwrap();

        let texts = recorder.texts();
        assert_eq!(order_times(&texts[0]), original);
        assert_eq!(order_times(&texts[3]), original);

        let header = Message::decode(&texts[0]).unwrap();
        assert_ne!(header.first_field("MSH", 7), Some("20120530112345"));
    }

    #[tokio::test]
    async fn test_pacing_spaces_sends() {
        let recorder = Arc::new(Recorder::default());
        worker(three_message_corpus(), &recorder, &config(4, 30))
            .run()
            .await
            .unwrap();

        let instants: Vec<Instant> = recorder.sent.lock().unwrap().iter().map(|(i, _)| *i).collect();
        assert_eq!(instants.len(), 4);
        for pair in instants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(25));
        }
    }

    #[tokio::test]
    async fn test_send_failure_does_not_stop_worker() {
        let recorder = Arc::new(Recorder {
            fail_attempts: HashSet::from([1]),
            ..Default::default()
        });
        let result = worker(three_message_corpus(), &recorder, &config(4, 0))
            .run()
            .await
            .unwrap();

        assert_eq!(result.outcome, WorkerOutcome::Completed);
        assert_eq!(result.attempted, 4);
        assert_eq!(result.sent, 3);
        assert_eq!(result.failed_messages, 1);
        assert_eq!(recorder.texts().len(), 3);
    }

    #[tokio::test]
    async fn test_connect_failure_sends_nothing() {
        let recorder = Arc::new(Recorder {
            refuse_connect: true,
            ..Default::default()
        });
        let result = worker(three_message_corpus(), &recorder, &config(4, 0))
            .run()
            .await
            .unwrap();

        assert_eq!(result.outcome, WorkerOutcome::ConnectFailed);
        assert_eq!(result.failed_connections, 1);
        assert_eq!(result.sent, 0);
        assert!(recorder.texts().is_empty());
    }

    #[tokio::test]
    async fn test_closed_connection_is_reopened() {
        let recorder = Arc::new(Recorder {
            close_after_send: true,
            ..Default::default()
        });
        let result = worker(three_message_corpus(), &recorder, &config(3, 0))
            .run()
            .await
            .unwrap();

        assert_eq!(result.sent, 3);
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_reconnect_costs_only_the_message() {
        let recorder = Arc::new(Recorder {
            close_after_send: true,
            refuse_reconnect: true,
            ..Default::default()
        });
        let result = worker(three_message_corpus(), &recorder, &config(3, 0))
            .run()
            .await
            .unwrap();

        assert_eq!(result.outcome, WorkerOutcome::Completed);
        assert_eq!(result.attempted, 3);
        assert_eq!(result.sent, 1);
        assert_eq!(result.failed_messages, 2);
        assert_eq!(result.failed_connections, 0);
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_header_differs_between_sends() {
        let recorder = Arc::new(Recorder::default());
        let mut config = config(2, 5);
        config.timestamp_mode = TimestampMode::Preserve;
        worker(three_message_corpus(), &recorder, &config).run().await.unwrap();

        let headers: Vec<String> = recorder
            .texts()
            .iter()
            .map(|t| Message::decode(t).unwrap().first_field("MSH", 7).unwrap().to_string())
            .collect();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].len(), "20120530112345.000".len());
        assert_ne!(headers[0], headers[1]);
    }

    #[tokio::test]
    async fn test_interrupted_pause_stops_only_this_worker() {
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let worker = ReplayWorker::new(
            0,
            three_message_corpus(),
            Arc::new(MockTransport(Arc::clone(&recorder))),
            &config(5, 10_000),
            cancel.clone(),
        );

        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.outcome, WorkerOutcome::Interrupted);
        assert_eq!(result.sent, 1);
    }

    #[tokio::test]
    async fn test_corpus_without_reference_time_is_config_error() {
        let corpus = Corpus::from_texts(vec![
            "MSH|^~\\&|A|B|C|D|20120530112345||ORU^R01|1|P|2.6\rOBR|1||X\r".to_string(),
        ])
        .unwrap();
        let recorder = Arc::new(Recorder::default());
        let result = worker(corpus, &recorder, &config(1, 0)).run().await;
        assert!(matches!(result, Err(DorError::Config(_))));
        assert_eq!(recorder.connects.load(Ordering::SeqCst), 0);
    }
}
