use std::{
    io::{self, IoSlice},
    sync::Arc,
};

use parking_lot::Mutex;

/// Outcome of a transport write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The bytes were accepted synchronously.
    Done,
    /// The write is in flight. The host reports completion through
    /// [`Wrap::on_transport_write_done`](crate::Wrap::on_transport_write_done).
    Pending,
}

/// A duplex byte stream underneath a [`Wrap`](crate::Wrap).
///
/// Reads are pushed into the wrap by the host, so the transport only
/// exposes the write half plus read flow control.
pub trait Transport {
    /// Writes `bufs` in order. An empty slice is a valid write and must still
    /// complete.
    fn write(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<WriteStatus>;

    /// Shuts down the write half.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Resumes read delivery.
    fn read_start(&mut self) {}

    /// Pauses read delivery.
    fn read_stop(&mut self) {}

    /// Whether the transport can still deliver reads.
    fn is_alive(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Inner {
    outbox: Vec<u8>,
    writes: usize,
    shutdown: bool,
    reading: bool,
    pending: bool,
    fail_writes: Option<io::ErrorKind>,
}

/// An in-memory transport.
///
/// Written bytes accumulate in an outbox shared by every clone, so a test can
/// hand one clone to a [`Wrap`](crate::Wrap) and drain the other into the
/// peer.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTransport {
    /// Creates an empty transport that completes writes synchronously.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes return [`WriteStatus::Pending`].
    pub fn set_async(&self, pending: bool) {
        self.inner.lock().pending = pending;
    }

    /// Makes subsequent writes fail with `kind`, or succeed again with `None`.
    pub fn fail_writes(&self, kind: Option<io::ErrorKind>) {
        self.inner.lock().fail_writes = kind;
    }

    /// Takes everything written so far.
    pub fn take_outbox(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().outbox)
    }

    /// Number of bytes waiting in the outbox.
    pub fn outbox_len(&self) -> usize {
        self.inner.lock().outbox.len()
    }

    /// Number of write calls, empty writes included.
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    /// Whether [`Transport::shutdown`] was called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    /// Whether reads are currently started.
    pub fn is_reading(&self) -> bool {
        self.inner.lock().reading
    }
}

impl Transport for MemoryTransport {
    fn write(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<WriteStatus> {
        let mut inner = self.inner.lock();
        if let Some(kind) = inner.fail_writes {
            return Err(io::Error::from(kind));
        }
        if inner.shutdown {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }

        inner.writes += 1;
        for buf in bufs {
            inner.outbox.extend_from_slice(buf);
        }

        Ok(if inner.pending {
            WriteStatus::Pending
        } else {
            WriteStatus::Done
        })
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.inner.lock().shutdown = true;
        Ok(())
    }

    fn read_start(&mut self) {
        self.inner.lock().reading = true;
    }

    fn read_stop(&mut self) {
        self.inner.lock().reading = false;
    }
}
