use std::sync::Arc;
use std::time::{Duration, TryFromFloatSecsError};

use log::{debug, info, warn};
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::packet::Record;
use super::queue::QueueReceiver;
use super::status::PipelineState;
use super::Settings;

/// Consumer of decoded records.
pub trait RecordSink: Send + Sync {
    fn process(&self, record: &Record);
}

/// Pulls raw lines off the queue, decodes them and hands them to the sink,
/// replaying the recorded inter-record gaps divided by the speed factor.
pub struct PacedProcessor {
    queue: QueueReceiver<String>,
    sink: Arc<dyn RecordSink>,
    state: Arc<PipelineState>,
    cancel: CancellationToken,
}

impl PacedProcessor {
    pub fn new(
        queue: QueueReceiver<String>,
        sink: Arc<dyn RecordSink>,
        state: Arc<PipelineState>,
        cancel: CancellationToken,
    ) -> Self {
        PacedProcessor {
            queue,
            sink,
            state,
            cancel,
        }
    }

    pub async fn start(mut self) {
        let _running = Running::enter(self.state.clone());
        let mut skipped: u64 = 0;

        loop {
            if self.state.limit_reached() {
                debug!("Record limit reached");
                break;
            }
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                line = self.queue.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            let record = match Record::from_line(&line) {
                Ok(record) => record,
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping record: {}", e);
                    continue;
                }
            };

            match self.replay_delay(record.timestamp) {
                Ok(Some(delay)) => {
                    if !self.pace(delay).await {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    skipped += 1;
                    warn!(
                        "Skipping record at {}: gap cannot be replayed ({})",
                        record.timestamp, e
                    );
                    continue;
                }
            }
            self.sink.process(&record);
            self.state.record_processed(record.timestamp);
        }

        info!(
            "Processor stopped after {} records ({} skipped)",
            self.state.processed(),
            skipped
        );
    }

    /// Wall-clock wait before `timestamp` is due. Fails for gaps too large
    /// to sleep on.
    fn replay_delay(&self, timestamp: f64) -> Result<Option<Duration>, TryFromFloatSecsError> {
        let speed = self.state.speed();
        if speed <= 0.0 {
            return Ok(None);
        }
        let gap = (timestamp - self.state.last_time()) / speed;
        if gap > 0.0 {
            Duration::try_from_secs_f64(gap).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Sleeps in bounded slices so a stop is noticed promptly. Returns false
    /// when cancelled.
    async fn pace(&self, delay: Duration) -> bool {
        let mut remaining = delay;
        while !remaining.is_zero() {
            let slice = remaining.min(Settings::PACING_SLICE);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                _ = time::sleep(slice) => {}
            }
            remaining -= slice;
        }
        true
    }
}

/// Keeps the pipeline live while the processor runs, however it exits.
struct Running(Arc<PipelineState>);

impl Running {
    fn enter(state: Arc<PipelineState>) -> Self {
        state.set_running(true);
        Running(state)
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.0.set_running(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::packet::columns::{ETH_SRC, FRAME_LEN, TIME};
    use crate::listener::packet::test_row;
    use crate::listener::queue::ingestion_queue;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(f64, Instant)>>,
    }

    impl RecordSink for Recorder {
        fn process(&self, record: &Record) {
            self.calls
                .lock()
                .unwrap()
                .push((record.timestamp, Instant::now()));
        }
    }

    fn line(t: &str) -> String {
        test_row(&[(TIME, t), (ETH_SRC, "aa:bb"), (FRAME_LEN, "100")])
    }

    async fn replay(
        speed: f64,
        limit: Option<u64>,
        lines: &[String],
    ) -> (Arc<Recorder>, Arc<PipelineState>) {
        let state = Arc::new(PipelineState::new(speed, limit));
        state.seed_clock(1000.0);
        let (tx, rx) = ingestion_queue(None);
        for l in lines {
            tx.push(l.clone());
        }
        drop(tx);
        let recorder = Arc::new(Recorder::default());
        PacedProcessor::new(rx, recorder.clone(), state.clone(), CancellationToken::new())
            .start()
            .await;
        (recorder, state)
    }

    #[tokio::test(start_paused = true)]
    async fn test_replays_gaps_at_real_speed() {
        let (recorder, state) = replay(1.0, None, &[line("1000"), line("1002")]).await;
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].1 - calls[0].1 >= Duration::from_secs(2));
        assert_eq!(state.processed(), 2);
        assert!(!state.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_scales_gap() {
        let (recorder, _) = replay(4.0, None, &[line("1000"), line("1008")]).await;
        let calls = recorder.calls.lock().unwrap();
        let gap = calls[1].1 - calls[0].1;
        assert!(gap >= Duration::from_secs(2));
        assert!(gap < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_zero_does_not_wait() {
        let start = Instant::now();
        let (recorder, _) = replay(0.0, None, &[line("1000"), line("5000")]).await;
        assert_eq!(recorder.calls.lock().unwrap().len(), 2);
        assert!(Instant::now() - start < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_skips_undecodable_rows() {
        let (recorder, state) =
            replay(0.0, None, &[line("1000"), "garbage".to_string(), line("1001")]).await;
        assert_eq!(recorder.calls.lock().unwrap().len(), 2);
        assert_eq!(state.processed(), 2);
    }

    #[tokio::test]
    async fn test_stops_at_limit() {
        let lines: Vec<String> = (0..5).map(|i| line(&format!("{}", 1000 + i))).collect();
        let (recorder, state) = replay(0.0, Some(3), &lines).await;
        assert_eq!(recorder.calls.lock().unwrap().len(), 3);
        assert_eq!(state.processed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreplayable_gap_is_skipped() {
        let (recorder, state) =
            replay(1.0, None, &[line("1000"), line("1e300"), line("1001")]).await;
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, 1001.0);
        assert_eq!(state.processed(), 2);
        assert!(!state.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_speed_gap_is_skipped() {
        let (recorder, state) = replay(1e-300, None, &[line("1000"), line("1001")]).await;
        assert_eq!(recorder.calls.lock().unwrap().len(), 1);
        assert_eq!(state.processed(), 1);
        assert!(!state.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_long_gap() {
        let state = Arc::new(PipelineState::new(1.0, None));
        state.seed_clock(1000.0);
        let (tx, rx) = ingestion_queue(None);
        tx.push(line("1000"));
        tx.push(line("4600"));
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            PacedProcessor::new(rx, recorder.clone(), state.clone(), cancel.clone()).start(),
        );

        time::sleep(Duration::from_secs(10)).await;
        let stopped_at = Instant::now();
        cancel.cancel();
        handle.await.unwrap();

        assert!(Instant::now() - stopped_at <= Settings::PACING_SLICE);
        assert_eq!(recorder.calls.lock().unwrap().len(), 1);
        assert!(!state.is_running());
    }
}
