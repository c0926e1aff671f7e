//! Zero-filling fan-out of the captured stream.
//!
//! The capture pump pushes raw frames into a [`LiveSource`]; every output
//! holds its own [`SourceReader`] with an independent bounded queue. A reader
//! that runs dry, or whose source has been disposed, reads silence instead of
//! stale or uninitialized memory.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Layout of the captured stream. Outputs are opened with exactly this format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per frame (all channels).
    pub block_align: u16,
    /// Backend-specific format blob (the raw WAVEFORMATEX on Windows).
    pub descriptor: Vec<u8>,
}

impl StreamFormat {
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align as usize
    }

    /// Whole frames covering `duration`, expressed in bytes.
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as u128 * duration.as_micros()) / 1_000_000;
        frames as usize * self.block_align as usize
    }
}

/// Bounded FIFO of bytes. Overflow drops the oldest bytes.
#[derive(Debug)]
struct ByteRing {
    buf: VecDeque<u8>,
    capacity: usize,
    align: usize,
}

impl ByteRing {
    fn new(capacity: usize, align: usize) -> Self {
        let align = align.max(1);
        // at least one frame, and a whole number of frames
        let capacity = (capacity.max(align) / align) * align;
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            align,
        }
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };
        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            // drop whole frames so the reader stays aligned
            let drop = overflow.div_ceil(self.align) * self.align;
            self.buf.drain(..drop.min(self.buf.len()));
        }
        self.buf.extend(bytes.iter().copied());
        overflow
    }

    /// Move whole frames into `out`. Returns the number of bytes copied.
    fn read_into(&mut self, out: &mut [u8]) -> usize {
        let n = (out.len().min(self.buf.len()) / self.align) * self.align;
        for (dst, src) in out[..n].iter_mut().zip(self.buf.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn clear(&mut self) {
        self.buf.clear();
    }
}

#[derive(Debug)]
struct ReaderQueue {
    ring: Mutex<ByteRing>,
}

/// The shared source produced by a capture handle.
#[derive(Debug)]
pub struct LiveSource {
    format: StreamFormat,
    max_queued: usize,
    readers: Mutex<Vec<Weak<ReaderQueue>>>,
    disposed: AtomicBool,
}

impl LiveSource {
    /// `max_queued` bounds each reader's backlog, in bytes.
    pub fn new(format: StreamFormat, max_queued: usize) -> Self {
        Self {
            format,
            max_queued,
            readers: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Convenience constructor bounding each reader to `max_latency` of audio.
    pub fn with_max_latency(format: StreamFormat, max_latency: Duration) -> Self {
        let max_queued = format.bytes_for(max_latency);
        Self::new(format, max_queued)
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    /// Attach a new reader. Readers created after disposal only ever see silence.
    pub fn subscribe(self: &Arc<Self>) -> SourceReader {
        let queue = Arc::new(ReaderQueue {
            ring: Mutex::new(ByteRing::new(
                self.max_queued,
                self.format.block_align as usize,
            )),
        });
        if !self.is_disposed() {
            self.readers.lock().push(Arc::downgrade(&queue));
        }
        SourceReader {
            source: Arc::clone(self),
            queue,
        }
    }

    /// Fan captured bytes out to every attached reader. Ignored once disposed.
    pub fn push(&self, bytes: &[u8]) {
        if bytes.is_empty() || self.is_disposed() {
            return;
        }
        let mut readers = self.readers.lock();
        readers.retain(|weak| match weak.upgrade() {
            Some(queue) => {
                let dropped = queue.ring.lock().write(bytes);
                if dropped > 0 {
                    log::trace!("Output queue full, dropped {} bytes", dropped);
                }
                true
            }
            None => false,
        });
    }

    /// Push `frames` frames of silence (capture reported a silent packet).
    pub fn push_silence(&self, frames: usize) {
        let zeros = vec![0u8; frames * self.format.block_align as usize];
        self.push(&zeros);
    }

    /// Detach every reader and drop queued audio. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let readers = std::mem::take(&mut *self.readers.lock());
        for queue in readers.iter().filter_map(Weak::upgrade) {
            queue.ring.lock().clear();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn reader_count(&self) -> usize {
        self.readers
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

/// One output's view of a [`LiveSource`].
#[derive(Debug)]
pub struct SourceReader {
    source: Arc<LiveSource>,
    queue: Arc<ReaderQueue>,
}

impl SourceReader {
    pub fn format(&self) -> &StreamFormat {
        self.source.format()
    }

    /// Fill `out` completely: queued frames first, silence for the rest.
    /// Returns how many bytes came from the capture.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = if self.source.is_disposed() {
            0
        } else {
            self.queue.ring.lock().read_into(out)
        };
        out[n..].fill(0);
        n
    }

    pub fn queued(&self) -> usize {
        self.queue.ring.lock().len()
    }

    pub fn source(&self) -> &Arc<LiveSource> {
        &self.source
    }
}
