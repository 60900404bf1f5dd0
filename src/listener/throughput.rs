use std::sync::Arc;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::status::{PipelineState, THROUGHPUT_INACTIVE};
use super::Settings;

/// Publishes records processed per second while the processor runs.
pub struct ThroughputSampler {
    state: Arc<PipelineState>,
    cancel: CancellationToken,
}

impl ThroughputSampler {
    pub fn new(state: Arc<PipelineState>, cancel: CancellationToken) -> Self {
        ThroughputSampler { state, cancel }
    }

    pub async fn start(self) {
        let mut interval = time::interval(Settings::THROUGHPUT_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        let mut previous = self.state.processed();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if !self.state.is_running() {
                break;
            }
            let current = self.state.processed();
            self.state
                .set_throughput(current.saturating_sub(previous) as i64);
            previous = current;
        }
        self.state.set_throughput(THROUGHPUT_INACTIVE);
    }
}
