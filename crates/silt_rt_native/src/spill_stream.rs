use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use silt_core::arrays::batch::Batch;
use silt_core::spill::codec;
use silt_core::spill::metrics::SpillMetrics;
use silt_core::spill::stream::{SpillStream, SpillStreamId};
use silt_error::{Result, ResultExt, SiltError};
use tracing::warn;

/// Magic bytes at the start of every spill file.
const SPILL_FILE_MAGIC: [u8; 4] = *b"SLT1";

/// Frame flag marking the final batch of a run.
const FRAME_FLAG_LAST: u8 = 1;

/// Spill stream backed by a local file.
///
/// File layout: the magic bytes, then one frame per batch as
/// [frame len: u32 le][flags: u8][encoded batch], with frame len counting
/// the flags byte and the payload. A file whose frames end without the
/// last flag set was truncated. The backing file is removed when the
/// stream is dropped or discarded.
#[derive(Debug)]
pub struct FileSpillStream {
    id: SpillStreamId,
    path: PathBuf,
    metrics: Arc<SpillMetrics>,
    read_buffer_size: usize,
    batch_byte_budget: usize,
    budget_warned: bool,
    writer: Option<BufWriter<File>>,
    reader: Option<BufReader<File>>,
    finished: bool,
    read_done: bool,
}

impl FileSpillStream {
    pub fn new(
        id: SpillStreamId,
        path: PathBuf,
        metrics: Arc<SpillMetrics>,
        read_buffer_size: usize,
        batch_byte_budget: usize,
    ) -> Self {
        FileSpillStream {
            id,
            path,
            metrics,
            read_buffer_size,
            batch_byte_budget,
            budget_warned: false,
            writer: None,
            reader: None,
            finished: false,
            read_done: false,
        }
    }

    fn discard_file(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                stream_id = %self.id,
                path = %self.path.display(),
                %err,
                "failed to remove spill file"
            ),
        }
    }
}

impl SpillStream for FileSpillStream {
    fn id(&self) -> SpillStreamId {
        self.id
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn prepare_for_write(&mut self) -> Result<()> {
        if self.writer.is_some() || self.finished {
            return Err(SiltError::new("Spill stream is already in use")
                .with_field("stream_id", self.id));
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context_fn(|| {
                format!("Failed to create spill directory: {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .context_fn(|| format!("Failed to create spill file: {}", self.path.display()))?;

        let mut writer = BufWriter::new(file);
        writer
            .write_all(&SPILL_FILE_MAGIC)
            .context("Failed to write spill file header")?;
        self.writer = Some(writer);
        Ok(())
    }

    fn append_batch(&mut self, batch: &Batch, is_last: bool) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SiltError::new("Spill stream is not prepared for writing"))?;

        let start = Instant::now();
        let mut payload = BytesMut::new();
        codec::encode_batch(batch, &mut payload);

        if payload.len() > self.batch_byte_budget && !self.budget_warned {
            warn!(
                stream_id = %self.id,
                bytes = payload.len(),
                budget = self.batch_byte_budget,
                "spilled batch exceeds byte budget"
            );
            self.budget_warned = true;
        }

        let frame_len = payload.len() + 1;
        writer
            .write_all(&(frame_len as u32).to_le_bytes())
            .context("Failed to write spill frame header")?;
        let flags = if is_last { FRAME_FLAG_LAST } else { 0 };
        writer
            .write_all(&[flags])
            .context("Failed to write spill frame header")?;
        writer
            .write_all(&payload)
            .context("Failed to write spill frame payload")?;

        self.metrics
            .record_batch_write(batch.num_rows(), frame_len + 4, start.elapsed());
        Ok(())
    }

    fn finalize(&mut self, status: &Result<()>) -> Result<()> {
        let writer = self.writer.take();
        match status {
            Ok(()) => {
                let mut writer = writer
                    .ok_or_else(|| SiltError::new("Spill stream finalized without a writer"))?;
                let persist = writer
                    .flush()
                    .context("Failed to flush spill file")
                    .and_then(|_| {
                        writer
                            .get_ref()
                            .sync_all()
                            .context("Failed to sync spill file")
                    });
                match persist {
                    Ok(()) => {
                        self.finished = true;
                        self.metrics.record_run_complete();
                        Ok(())
                    }
                    Err(err) => {
                        self.discard_file();
                        Err(err)
                    }
                }
            }
            Err(_) => {
                drop(writer);
                self.discard_file();
                Ok(())
            }
        }
    }

    fn prepare_for_read(&mut self) -> Result<()> {
        if !self.finished {
            return Err(SiltError::new("Spill stream is not finalized for reading")
                .with_field("stream_id", self.id));
        }
        let file = File::open(&self.path)
            .context_fn(|| format!("Failed to open spill file: {}", self.path.display()))?;
        let mut reader = BufReader::with_capacity(self.read_buffer_size, file);

        let mut magic = [0_u8; 4];
        reader
            .read_exact(&mut magic)
            .context("Failed to read spill file header")?;
        if magic != SPILL_FILE_MAGIC {
            return Err(SiltError::new("Spill file header mismatch")
                .with_field("path", self.path.display()));
        }

        self.reader = Some(reader);
        self.read_done = false;
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<Batch>> {
        if self.read_done {
            return Ok(None);
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| SiltError::new("Spill stream is not prepared for reading"))?;

        // A clean end of stream is only ever signaled by the last frame
        // flag, so EOF while reading a frame means the file was truncated.
        let mut header = [0_u8; 5];
        if let Err(err) = reader.read_exact(&mut header) {
            return Err(SiltError::with_source("Truncated spill file", Box::new(err))
                .with_field("path", self.path.display()));
        }
        let frame_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if frame_len == 0 {
            return Err(
                SiltError::new("Invalid spill frame length").with_field("path", self.path.display())
            );
        }
        let flags = header[4];

        let mut payload = vec![0; frame_len - 1];
        if let Err(err) = reader.read_exact(&mut payload) {
            return Err(SiltError::with_source("Truncated spill file", Box::new(err))
                .with_field("path", self.path.display()));
        }

        let mut buf: &[u8] = &payload;
        let batch = codec::decode_batch(&mut buf)?;
        if !buf.is_empty() {
            return Err(SiltError::new("Trailing bytes in spill frame")
                .with_field("bytes", buf.len())
                .with_field("path", self.path.display()));
        }

        if flags & FRAME_FLAG_LAST != 0 {
            self.read_done = true;
            self.reader = None;
        }
        Ok(Some(batch))
    }
}

impl Drop for FileSpillStream {
    fn drop(&mut self) {
        self.writer = None;
        self.reader = None;
        self.discard_file();
    }
}
