use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::IngestConfig;

use capture::{Input, Mirror, RecordSource};
use parser::{PacedProcessor, RecordSink};
use queue::{ingestion_queue, QueueStats};
use status::{IngestError, PipelineState, PipelineStatus};
use throughput::ThroughputSampler;

pub struct Settings {}

impl Settings {
    /// Longest single sleep while replaying a gap between records.
    pub const PACING_SLICE: Duration = Duration::from_secs(3);
    pub const THROUGHPUT_INTERVAL: Duration = Duration::from_secs(1);
    /// Time given to in-flight work after a stop, before the mirror closes.
    pub const STOP_GRACE: Duration = Duration::from_millis(100);
    pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);
    pub const LIVENESS_POLL: Duration = Duration::from_millis(250);
}

pub mod capture;
pub mod packet;
pub mod parser;
pub mod queue;
pub mod status;
pub mod throughput;
pub mod tracking;

type Modules = (RecordSource, PacedProcessor, ThroughputSampler);

/// Reader thread, paced processor and throughput sampler wired together.
pub struct Pipeline {
    state: Arc<PipelineState>,
    queue: QueueStats,
    mirror: Mirror,
    cancel: CancellationToken,
    modules: Option<Modules>,
    reader: Option<JoinHandle<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// A mirror directory that cannot be written leaves the pipeline in the
    /// `MirrorOpen` error state; `start` then refuses to run.
    pub fn new(config: &IngestConfig, input: Input, sink: Arc<dyn RecordSink>) -> Self {
        let state = Arc::new(PipelineState::new(config.speed, config.limit));
        let cancel = CancellationToken::new();
        let (tx, rx) = ingestion_queue(config.queue_capacity);
        let queue = rx.stats();

        let mirror = match &config.mirror_dir {
            Some(dir) => match Mirror::open(dir) {
                Ok((path, mirror)) => {
                    info!("Preserving input in {}", path.display());
                    mirror
                }
                Err(e) => {
                    error!("Could not open capture file in {}: {}", dir.display(), e);
                    state.fail(IngestError::MirrorOpen);
                    Mirror::disabled()
                }
            },
            None => Mirror::disabled(),
        };

        let source = RecordSource::new(input, tx, mirror.clone(), state.clone(), cancel.clone());
        let processor = PacedProcessor::new(rx, sink, state.clone(), cancel.clone());
        let sampler = ThroughputSampler::new(state.clone(), cancel.clone());

        Pipeline {
            state,
            queue,
            mirror,
            cancel,
            modules: Some((source, processor, sampler)),
            reader: None,
            handles: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Result<(), IngestError> {
        if let Some(error) = self.state.error() {
            return Err(error);
        }
        let Some((source, processor, sampler)) = self.modules.take() else {
            warn!("Pipeline already started");
            return Ok(());
        };
        info!("Starting ingestion");

        self.state.set_running(true);
        self.reader = Some(source.start());
        self.handles.push(tokio::spawn(processor.start()));
        self.handles.push(tokio::spawn(sampler.start()));
        Ok(())
    }

    pub fn status(&self) -> PipelineStatus {
        self.state.status(self.queue.depth(), self.queue.dropped())
    }

    pub fn is_live(&self) -> bool {
        self.state.is_running()
    }

    /// Runs until the input is exhausted, the limit is reached or a schema
    /// error ends it.
    pub async fn wait(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Pipeline task failed: {}", e);
            }
        }
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                error!("Record source failed: {}", e);
            }
        }
    }

    pub async fn stop(&mut self) {
        info!("Stopping ingestion");
        self.cancel.cancel();
        self.state.close_limit();
        time::sleep(Settings::STOP_GRACE).await;

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Pipeline task failed: {}", e);
            }
        }
        self.state.set_running(false);

        if let Err(e) = self.mirror.close() {
            warn!("Could not flush capture file: {}", e);
            self.state.fail(IngestError::MirrorWrite);
        }
        match self.reader.take() {
            Some(reader) if reader.is_finished() => {
                let _ = reader.await;
            }
            // Blocking reads cannot be interrupted; the thread ends with its input.
            Some(_) => debug!("Record source still waiting on input"),
            None => {}
        }
    }
}
