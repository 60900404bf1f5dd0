use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

/// Why ingestion stopped or never started. The numeric codes are what the
/// frontend shows.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IngestError {
    #[error("not a tab delimited export: wrong number of columns")]
    ColumnCount,
    #[error("first record does not parse: wrong columns order")]
    FirstRecord,
    #[error("unexpected header: first column is not frame.time_epoch")]
    Header,
    #[error("input could not be opened")]
    Input,
    #[error("could not open the capture file")]
    MirrorOpen,
    #[error("could not write to the capture file")]
    MirrorWrite,
}

impl IngestError {
    pub fn code(&self) -> u8 {
        match self {
            IngestError::ColumnCount => 1,
            IngestError::FirstRecord => 2,
            IngestError::Header => 3,
            IngestError::Input => 4,
            IngestError::MirrorOpen => 11,
            IngestError::MirrorWrite => 12,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(IngestError::ColumnCount),
            2 => Some(IngestError::FirstRecord),
            3 => Some(IngestError::Header),
            4 => Some(IngestError::Input),
            11 => Some(IngestError::MirrorOpen),
            12 => Some(IngestError::MirrorWrite),
            _ => None,
        }
    }

    /// Input format problems, as opposed to problems with our own output.
    pub fn is_schema_error(&self) -> bool {
        self.code() < 10
    }
}

/// Throughput reported once the pipeline is no longer running.
pub const THROUGHPUT_INACTIVE: i64 = -1;

const NO_LIMIT: u64 = u64::MAX;

#[derive(Debug, Default)]
struct Clock {
    first: f64,
    last: f64,
    last_wall: Option<Instant>,
}

/// Counters shared by the reader, the processor and the sampler.
#[derive(Debug)]
pub struct PipelineState {
    speed: f64,
    processed: AtomicU64,
    limit: AtomicU64,
    running: AtomicBool,
    reading: AtomicBool,
    error: AtomicU8,
    throughput: AtomicI64,
    clock: Mutex<Clock>,
}

/// What the frontend polls. `time` keeps advancing between records while the
/// pipeline is live, scaled by the replay speed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub time: f64,
    pub since: f64,
    pub last: f64,
    pub processed: u64,
    pub live: bool,
    pub queue_len: usize,
    pub dropped: u64,
    pub throughput: i64,
    pub error: u8,
}

impl PipelineStatus {
    pub fn error(&self) -> Option<IngestError> {
        IngestError::from_code(self.error)
    }
}

impl PipelineState {
    pub fn new(speed: f64, limit: Option<u64>) -> Self {
        PipelineState {
            speed: speed.max(0.0),
            processed: AtomicU64::new(0),
            limit: AtomicU64::new(limit.unwrap_or(NO_LIMIT)),
            running: AtomicBool::new(false),
            reading: AtomicBool::new(false),
            error: AtomicU8::new(0),
            throughput: AtomicI64::new(0),
            clock: Mutex::new(Clock::default()),
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Acquire)
    }

    pub fn limit_reached(&self) -> bool {
        self.processed() >= self.limit()
    }

    /// Nothing more gets read or processed after this.
    pub fn close_limit(&self) {
        self.limit.store(0, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::Acquire)
    }

    pub fn set_reading(&self, reading: bool) {
        self.reading.store(reading, Ordering::Release);
    }

    pub fn error(&self) -> Option<IngestError> {
        IngestError::from_code(self.error.load(Ordering::Acquire))
    }

    /// Keeps the first error reported.
    pub fn fail(&self, error: IngestError) {
        let _ = self
            .error
            .compare_exchange(0, error.code(), Ordering::AcqRel, Ordering::Acquire);
        if error.is_schema_error() {
            self.close_limit();
        }
    }

    pub fn throughput(&self) -> i64 {
        self.throughput.load(Ordering::Acquire)
    }

    pub fn set_throughput(&self, value: i64) {
        self.throughput.store(value, Ordering::Release);
    }

    /// Timestamp of the first record, before anything is processed.
    pub fn seed_clock(&self, timestamp: f64) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.first = timestamp;
        clock.last = timestamp;
    }

    pub fn last_time(&self) -> f64 {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner).last
    }

    pub fn record_processed(&self, timestamp: f64) {
        {
            let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
            clock.last = timestamp;
            clock.last_wall = Some(Instant::now());
        }
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn status(&self, queue_len: usize, dropped: u64) -> PipelineStatus {
        let live = self.is_running();
        let (first, last, last_wall) = {
            let clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
            (clock.first, clock.last, clock.last_wall)
        };
        let mut time = last;
        if live {
            if let Some(wall) = last_wall {
                let elapsed = wall.elapsed().as_secs_f64();
                time += if self.speed > 0.0 {
                    elapsed * self.speed
                } else {
                    elapsed
                };
            }
        }
        PipelineStatus {
            time,
            since: first,
            last,
            processed: self.processed(),
            live,
            queue_len,
            dropped,
            throughput: self.throughput(),
            error: self.error.load(Ordering::Acquire),
        }
    }
}
