//! # Frame Reassembly Buffer
//!
//! Per-socket state that turns a sequence of received datagrams into frames.
//! A datagram may hold part of a frame, exactly one frame or several frames
//! back to back; the buffer accumulates bytes and extracts whatever complete
//! frames are at its head.
//!
//! Damaged data is skipped by scanning for the next frame delimiter, so one
//! bad frame costs only itself.
//!
//! The buffer is owned by a single receive task and is never shared.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::{BufferConfig, MAX_DATAGRAM_SIZE};
use crate::core::codec::{Decoded, FrameCodec};
use crate::core::frame;
use crate::core::payload::Payload;
use crate::error::{ProtocolError, Result};
use crate::protocol::context::Context;
use crate::utils::metrics::Metrics;

/// Next capacity after growing `current` by `rate`, capped at `max`.
fn grow(current: usize, rate: f64, max: usize) -> usize {
    let step = ((current as f64) * rate).ceil() as usize;
    current.saturating_add(step.max(1)).min(max)
}

/// Receive scratch space plus the reassembly accumulator.
pub struct FrameBuffer {
    scratch: Vec<u8>,
    accumulator: BytesMut,
    capacity: usize,
    max_size: usize,
    growth_rate: f64,
    metrics: Option<Arc<Metrics>>,
}

impl FrameBuffer {
    pub fn new(config: &BufferConfig) -> Self {
        let initial = config.initial_size.min(config.max_size);
        Self {
            scratch: vec![0u8; MAX_DATAGRAM_SIZE.min(config.max_size)],
            accumulator: BytesMut::with_capacity(initial),
            capacity: initial,
            max_size: config.max_size,
            growth_rate: config.growth_rate,
            metrics: None,
        }
    }

    /// Count resynchronizations in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Scratch space for the next `recv_from`, large enough for any
    /// datagram unless `max_size` is smaller.
    pub fn recv_buffer_mut(&mut self) -> &mut [u8] {
        &mut self.scratch
    }

    /// Move the first `n` bytes of the scratch space into the accumulator.
    pub fn commit_read(&mut self, n: usize) -> Result<()> {
        let n = n.min(self.scratch.len());
        let needed = self.accumulator.len() + n;
        if needed > self.max_size {
            return self.overflow(needed);
        }
        self.reserve(needed);
        self.accumulator.extend_from_slice(&self.scratch[..n]);
        Ok(())
    }

    /// Append raw bytes to the accumulator.
    ///
    /// If the result would exceed the maximum size, the accumulator is
    /// cleared and [`ProtocolError::BufferOverflow`] is returned.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let needed = self.accumulator.len() + data.len();
        if needed > self.max_size {
            return self.overflow(needed);
        }
        self.reserve(needed);
        self.accumulator.extend_from_slice(data);
        Ok(())
    }

    /// Decode every complete frame at the head of the accumulator.
    ///
    /// Each yielded item is a payload or the error of a rejected frame.
    /// Corrupt data is skipped silently.
    pub fn extract_frames(&mut self, codec: &FrameCodec, context: &Context) -> Vec<Result<Payload>> {
        let mut out = Vec::new();

        while !self.accumulator.is_empty() {
            match codec.decode(context, &self.accumulator) {
                Decoded::Frame { payload, consumed } => {
                    trace!(consumed, type_tag = payload.type_tag(), "Frame extracted");
                    self.accumulator.advance(consumed);
                    out.push(Ok(payload));
                }
                Decoded::Incomplete => break,
                Decoded::Corrupt => self.resynchronize(),
                Decoded::Rejected { consumed, error } => {
                    self.accumulator.advance(consumed);
                    out.push(Err(error));
                }
            }
        }

        out
    }

    /// Drop bytes up to the next delimiter after the head, or everything.
    fn resynchronize(&mut self) {
        if let Some(metrics) = &self.metrics {
            metrics.corrupt_frame();
        }
        match frame::find_delimiter(&self.accumulator, 1) {
            Some(offset) => {
                debug!(skipped = offset, "Resynchronized on next frame delimiter");
                self.accumulator.advance(offset);
            }
            None => {
                debug!(skipped = self.accumulator.len(), "No frame delimiter, discarding buffer");
                self.accumulator.clear();
            }
        }
    }

    fn reserve(&mut self, needed: usize) {
        while self.capacity < needed {
            self.capacity = grow(self.capacity, self.growth_rate, self.max_size);
        }
        if self.accumulator.capacity() < self.capacity {
            let additional = self.capacity - self.accumulator.len();
            self.accumulator.reserve(additional);
        }
    }

    fn overflow(&mut self, needed: usize) -> Result<()> {
        warn!(needed, max = self.max_size, "Frame buffer overflow, discarding buffered bytes");
        self.accumulator.clear();
        if let Some(metrics) = &self.metrics {
            metrics.buffer_overflow();
        }
        Err(ProtocolError::BufferOverflow(needed))
    }

    /// Bytes currently waiting for the rest of a frame.
    pub fn len(&self) -> usize {
        self.accumulator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulator.is_empty()
    }

    /// Logical capacity of the accumulator.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.accumulator.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FRAME_HEADER_SIZE;
    use crate::utils::compression::NoCompression;

    fn small_config() -> BufferConfig {
        BufferConfig {
            initial_size: 32,
            max_size: 4096,
            growth_rate: 0.5,
        }
    }

    #[allow(clippy::unwrap_used)]
    fn frame_of(data: &[u8]) -> Vec<u8> {
        FrameCodec::default()
            .encode_bytes(&Context::detached(None), data)
            .unwrap()
    }

    fn bytes_of(results: Vec<Result<Payload>>) -> Vec<Vec<u8>> {
        results
            .into_iter()
            .filter_map(|r| match r {
                Ok(Payload::Bytes(b)) => Some(b),
                _ => None,
            })
            .collect()
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_every_split_offset_yields_one_frame() {
        let codec = FrameCodec::default();
        let context = Context::detached(None);
        let frame = frame_of(b"fragmented payload");

        for split in 1..frame.len() {
            let mut buffer = FrameBuffer::new(&small_config());
            buffer.append(&frame[..split]).unwrap();
            assert!(buffer.extract_frames(&codec, &context).is_empty());
            buffer.append(&frame[split..]).unwrap();
            let got = bytes_of(buffer.extract_frames(&codec, &context));
            assert_eq!(got, vec![b"fragmented payload".to_vec()], "split at {split}");
            assert!(buffer.is_empty());
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_batched_frames_in_order() {
        let codec = FrameCodec::default();
        let context = Context::detached(None);
        let mut batch = frame_of(b"first");
        batch.extend(frame_of(b"second"));

        let mut buffer = FrameBuffer::new(&small_config());
        buffer.append(&batch).unwrap();
        let got = bytes_of(buffer.extract_frames(&codec, &context));
        assert_eq!(got, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_corrupt_frame_dropped_neighbours_kept() {
        let codec = FrameCodec::default();
        let context = Context::detached(None);
        let metrics = Arc::new(Metrics::new());

        let first = frame_of(b"one");
        let mut second = frame_of(b"two");
        let third = frame_of(b"three");
        second[FRAME_HEADER_SIZE + 1] ^= 0x01;

        let mut batch = first;
        batch.extend(second);
        batch.extend(third);

        let mut buffer = FrameBuffer::new(&small_config()).with_metrics(metrics.clone());
        buffer.append(&batch).unwrap();
        let got = bytes_of(buffer.extract_frames(&codec, &context));
        assert_eq!(got, vec![b"one".to_vec(), b"three".to_vec()]);
        assert_eq!(metrics.snapshot().corrupt_frames, 1);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_garbage_without_delimiter_is_discarded() {
        let codec = FrameCodec::default();
        let context = Context::detached(None);
        let mut buffer = FrameBuffer::new(&small_config());
        buffer.append(&[0xEE; 64]).unwrap();
        assert!(buffer.extract_frames(&codec, &context).is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_leading_garbage_skipped() {
        let codec = FrameCodec::default();
        let context = Context::detached(None);
        let mut data = vec![1, 2, 3, 4, 5];
        data.extend(frame_of(b"after noise"));

        let mut buffer = FrameBuffer::new(&small_config());
        buffer.append(&data).unwrap();
        let got = bytes_of(buffer.extract_frames(&codec, &context));
        assert_eq!(got, vec![b"after noise".to_vec()]);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_rejected_frame_is_consumed_and_reported() {
        let codec = FrameCodec::default();
        let context = Context::detached(None);
        let mut data = frame::assemble(&[9, 9, 9]).unwrap();
        data.extend(frame_of(b"ok"));

        let mut buffer = FrameBuffer::new(&small_config());
        buffer.append(&data).unwrap();
        let results = buffer.extract_frames(&codec, &context);
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert!(matches!(&results[1], Ok(Payload::Bytes(b)) if b == b"ok"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_overflow_resets_accumulator() {
        let mut buffer = FrameBuffer::new(&small_config());
        buffer.append(&[0u8; 4000]).unwrap();
        let result = buffer.append(&[0u8; 200]);
        assert!(matches!(result, Err(ProtocolError::BufferOverflow(4200))));
        assert!(buffer.is_empty());
        buffer.append(&[0u8; 10]).unwrap();
        assert_eq!(buffer.len(), 10);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_capacity_grows_by_rate() {
        let mut buffer = FrameBuffer::new(&small_config());
        assert_eq!(buffer.capacity(), 32);
        buffer.append(&[0u8; 40]).unwrap();
        assert_eq!(buffer.capacity(), 48);
        assert!(buffer.capacity() <= 4096);
    }

    #[test]
    fn test_scratch_holds_any_datagram() {
        let mut buffer = FrameBuffer::new(&BufferConfig::default());
        assert_eq!(buffer.recv_buffer_mut().len(), MAX_DATAGRAM_SIZE);
        assert_eq!(buffer.capacity(), BufferConfig::default().initial_size);

        // never larger than the accumulator could hold
        let mut small = FrameBuffer::new(&small_config());
        assert_eq!(small.recv_buffer_mut().len(), 4096);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_commit_read_larger_than_initial_size() {
        let codec = FrameCodec::default().with_compression(Arc::new(NoCompression));
        let context = Context::detached(None);
        let data = vec![0x5A; 30_000];
        let frame = codec.encode_bytes(&context, &data).unwrap();
        assert!(frame.len() > BufferConfig::default().initial_size);

        let mut buffer = FrameBuffer::new(&BufferConfig::default());
        buffer.recv_buffer_mut()[..frame.len()].copy_from_slice(&frame);
        buffer.commit_read(frame.len()).unwrap();
        let got = bytes_of(buffer.extract_frames(&codec, &context));
        assert_eq!(got, vec![data]);
        assert!(buffer.is_empty());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_commit_read_moves_scratch_bytes() {
        let codec = FrameCodec::default();
        let context = Context::detached(None);
        let frame = frame_of(b"via scratch");

        let mut buffer = FrameBuffer::new(&BufferConfig {
            initial_size: 256,
            max_size: 4096,
            growth_rate: 0.2,
        });
        buffer.recv_buffer_mut()[..frame.len()].copy_from_slice(&frame);
        buffer.commit_read(frame.len()).unwrap();
        let got = bytes_of(buffer.extract_frames(&codec, &context));
        assert_eq!(got, vec![b"via scratch".to_vec()]);
    }
}
