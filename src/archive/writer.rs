//! ZIP encoding into a bounded byte channel
//!
//! `ZipWriter` needs `Write + Seek` because it patches each entry's local
//! header (CRC and sizes) once the entry is complete. [`Spool`] keeps only the
//! bytes that may still be patched: once the next entry has been started,
//! everything before it is final and is handed to the output channel.

use crate::Result;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Chunks of archive bytes as delivered to the HTTP body
pub type ArchiveChunk = io::Result<Vec<u8>>;

#[derive(Debug, Default)]
struct SpoolState {
    /// Absolute offset of `buf[0]`
    base: u64,
    buf: Vec<u8>,
    /// Absolute write position
    pos: u64,
}

/// Seekable in-memory tail of the archive
#[derive(Debug, Clone, Default)]
pub(crate) struct Spool {
    state: Arc<Mutex<SpoolState>>,
}

impl Spool {
    fn lock(&self) -> io::Result<MutexGuard<'_, SpoolState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::other("archive spool lock poisoned"))
    }

    /// Current absolute write position
    pub(crate) fn position(&self) -> io::Result<u64> {
        Ok(self.lock()?.pos)
    }

    /// Remove and return the bytes before absolute offset `upto`
    pub(crate) fn take_until(&self, upto: u64) -> io::Result<Vec<u8>> {
        let mut state = self.lock()?;
        if upto <= state.base {
            return Ok(Vec::new());
        }
        let n = usize::try_from(upto - state.base)
            .map_err(|_| io::Error::other("spool offset overflow"))?
            .min(state.buf.len());
        let taken: Vec<u8> = state.buf.drain(..n).collect();
        state.base += n as u64;
        Ok(taken)
    }

    /// Remove and return everything buffered
    pub(crate) fn take_all(&self) -> io::Result<Vec<u8>> {
        let mut state = self.lock()?;
        let taken = std::mem::take(&mut state.buf);
        state.base += taken.len() as u64;
        Ok(taken)
    }
}

impl Write for Spool {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.lock()?;
        if state.pos < state.base {
            return Err(io::Error::other("write into already delivered archive bytes"));
        }
        let offset = usize::try_from(state.pos - state.base)
            .map_err(|_| io::Error::other("spool offset overflow"))?;
        let end = offset + data.len();
        if end > state.buf.len() {
            state.buf.resize(end, 0);
        }
        state.buf[offset..end].copy_from_slice(data);
        state.pos += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for Spool {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let mut state = self.lock()?;
        let end = state.base + state.buf.len() as u64;
        let next = match target {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => state.pos.checked_add_signed(d),
            SeekFrom::End(d) => end.checked_add_signed(d),
        };
        match next {
            Some(n) if n >= state.base => {
                state.pos = n;
                Ok(n)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before already delivered archive bytes",
            )),
        }
    }
}

/// Result of handing bytes to the output channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Bytes accepted
    Sent,
    /// Receiver dropped; the client is gone
    Closed,
}

/// ZIP modification time from a UTC timestamp (DOS time starts in 1980)
fn zip_time(at: DateTime<Utc>) -> zip::DateTime {
    let year = u16::try_from(at.year()).unwrap_or(1980);
    zip::DateTime::from_date_and_time(
        year,
        at.month() as u8,
        at.day() as u8,
        at.hour() as u8,
        at.minute() as u8,
        at.second() as u8,
    )
    .unwrap_or_default()
}

/// Streams a ZIP archive entry by entry into a channel
pub(crate) struct ZipSink {
    zip: ZipWriter<Spool>,
    spool: Spool,
    tx: mpsc::Sender<ArchiveChunk>,
    level: i32,
    sent: u64,
}

impl ZipSink {
    pub(crate) fn new(tx: mpsc::Sender<ArchiveChunk>, level: i32) -> Self {
        let spool = Spool::default();
        Self {
            zip: ZipWriter::new(spool.clone()),
            spool,
            tx,
            level,
            sent: 0,
        }
    }

    /// Whether the receiving side has gone away
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Add one Deflated entry and deliver whatever became final
    pub(crate) async fn add_entry(
        &mut self,
        name: &str,
        modified: DateTime<Utc>,
        data: &[u8],
    ) -> Result<Delivery> {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.level))
            .last_modified_time(zip_time(modified));

        // Starting an entry completes the previous one; bytes before this
        // point are never patched again
        let settled = self.spool.position()?;
        self.zip.start_file(name, options)?;
        self.zip.write_all(data)?;

        let ready = self.spool.take_until(settled)?;
        self.send(ready).await
    }

    /// Write the central directory and deliver the rest
    pub(crate) async fn finish(mut self) -> Result<(Delivery, u64)> {
        self.zip.finish()?;
        let rest = self.spool.take_all()?;
        let delivery = self.send(rest).await?;
        Ok((delivery, self.sent))
    }

    async fn send(&mut self, bytes: Vec<u8>) -> Result<Delivery> {
        if bytes.is_empty() {
            return Ok(if self.tx.is_closed() {
                Delivery::Closed
            } else {
                Delivery::Sent
            });
        }
        let len = bytes.len() as u64;
        match self.tx.send(Ok(bytes)).await {
            Ok(()) => {
                self.sent += len;
                Ok(Delivery::Sent)
            }
            Err(_) => Ok(Delivery::Closed),
        }
    }
}
