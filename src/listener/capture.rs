use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use chrono::Local;
use log::{debug, error, info, warn};
use tokio::task;
use tokio_util::sync::CancellationToken;

use super::packet::columns::{self, COLUMNS_EXPECTED, TIME_HEADER};
use super::packet::{parse_frame_len, parse_timestamp};
use super::queue::{Push, QueueSender};
use super::status::{IngestError, PipelineState};

/// Where the tab separated export comes from.
pub enum Input {
    /// Regular file or named pipe, opened on the reader thread.
    Path(PathBuf),
    Reader(Box<dyn BufRead + Send>),
}

impl Input {
    fn open(self) -> io::Result<Box<dyn BufRead + Send>> {
        match self {
            Input::Path(path) => {
                // Opening a FIFO blocks until the writer side shows up.
                let file = File::open(&path)?;
                info!("Reading records from {}", path.display());
                Ok(Box::new(BufReader::new(file)))
            }
            Input::Reader(reader) => Ok(reader),
        }
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Input::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Input::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Input must be a regular file or a named pipe.
pub fn check_input_path(path: &Path) -> anyhow::Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Cannot access input {}", path.display()))?;
    let file_type = metadata.file_type();
    #[cfg(unix)]
    let is_fifo = {
        use std::os::unix::fs::FileTypeExt;
        file_type.is_fifo()
    };
    #[cfg(not(unix))]
    let is_fifo = false;
    if file_type.is_file() || is_fifo {
        Ok(())
    } else {
        anyhow::bail!("{} is not a file or named pipe", path.display())
    }
}

/// Name of a fresh mirror file, e.g. `traffic-capture-20240102-030405-000006.csv`.
pub fn mirror_file_name() -> String {
    format!(
        "traffic-capture-{}.csv",
        Local::now().format("%Y%m%d-%H%M%S-%6f")
    )
}

/// Copy of every consumed line, header included. Shared so a stop can close
/// it while the reader is still blocked on input.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    file: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl Mirror {
    pub fn disabled() -> Self {
        Mirror::default()
    }

    pub fn open(dir: &Path) -> io::Result<(PathBuf, Self)> {
        let path = dir.join(mirror_file_name());
        let file = File::create(&path)?;
        let mirror = Mirror {
            file: Arc::new(Mutex::new(Some(BufWriter::new(file)))),
        };
        Ok((path, mirror))
    }

    pub fn is_open(&self) -> bool {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = file.as_mut() else {
            return Ok(());
        };
        writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Flushes and drops the file. Later writes are ignored.
    pub fn close(&self) -> io::Result<()> {
        let taken = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// Blocking line reader feeding the ingestion queue.
pub struct RecordSource {
    input: Input,
    queue: QueueSender<String>,
    mirror: Mirror,
    state: Arc<PipelineState>,
    cancel: CancellationToken,
}

impl RecordSource {
    pub fn new(
        input: Input,
        queue: QueueSender<String>,
        mirror: Mirror,
        state: Arc<PipelineState>,
        cancel: CancellationToken,
    ) -> Self {
        RecordSource {
            input,
            queue,
            mirror,
            state,
            cancel,
        }
    }

    /// Reading is blocking, so it gets its own thread. The queue closes when
    /// the returned task ends.
    pub fn start(self) -> task::JoinHandle<()> {
        task::spawn_blocking(move || self.run())
    }

    fn run(mut self) {
        self.state.set_reading(true);
        let input = std::mem::replace(&mut self.input, Input::Reader(Box::new(io::empty())));
        match input.open() {
            Ok(mut reader) => {
                if let Err(e) = self.read_all(&mut reader) {
                    error!("Error reading input: {}", e);
                }
            }
            Err(e) => {
                error!("Could not open input: {}", e);
                self.state.fail(IngestError::Input);
            }
        }
        if let Err(e) = self.mirror.close() {
            warn!("Could not flush capture file: {}", e);
            self.state.fail(IngestError::MirrorWrite);
        }
        self.state.set_reading(false);
        debug!("Record source finished");
    }

    fn read_all(&mut self, reader: &mut dyn BufRead) -> io::Result<()> {
        let header = read_line(reader)?.unwrap_or_default();
        if !header.is_empty() {
            self.mirror(&header);
        }
        let names = columns::split_row(&header);
        if names.len() != COLUMNS_EXPECTED {
            error!(
                "Expected {} columns, got {}",
                COLUMNS_EXPECTED,
                names.len()
            );
            self.state.fail(IngestError::ColumnCount);
            return Ok(());
        }
        if names[columns::TIME] != TIME_HEADER {
            error!("Unexpected first column {:?}", names[columns::TIME]);
            self.state.fail(IngestError::Header);
            return Ok(());
        }

        let mut line = read_line(reader)?.unwrap_or_default();
        match first_timestamp(&line) {
            Some(timestamp) => self.state.seed_clock(timestamp),
            None => {
                error!("First record does not parse: {:?}", line.trim_end());
                self.state.fail(IngestError::FirstRecord);
                return Ok(());
            }
        }

        let mut pushed: u64 = 0;
        loop {
            if self.cancel.is_cancelled() || pushed >= self.state.limit() {
                break;
            }
            self.mirror(&line);
            match self.queue.push(line) {
                Push::Queued => pushed += 1,
                Push::Dropped => {}
                Push::Closed => {
                    debug!("Processor gone, stop reading");
                    break;
                }
            }
            line = match read_line(reader)? {
                Some(line) => line,
                None => break,
            };
        }
        info!("Finished reading, {} records queued", pushed);
        Ok(())
    }

    fn mirror(&self, line: &str) {
        if let Err(e) = self.mirror.write_line(line) {
            error!("Could not write capture file, mirroring stopped: {}", e);
            self.state.fail(IngestError::MirrorWrite);
            let _ = self.mirror.close();
        }
    }
}

/// Lines are decoded lossily, exports may carry raw bytes in the info column.
fn read_line(reader: &mut dyn BufRead) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf)? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

fn first_timestamp(line: &str) -> Option<f64> {
    let row = columns::split_row(line);
    let timestamp = parse_timestamp(row.get(columns::TIME)?).ok()?;
    parse_frame_len(row.get(columns::FRAME_LEN)?).ok()?;
    Some(timestamp)
}
