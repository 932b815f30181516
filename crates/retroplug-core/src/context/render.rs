//! Lossy render rings between the real-time thread and its consumers
//!
//! Each slot gets one video ring and one audio ring. The real-time thread is
//! always the producer and never waits on either:
//!
//! - **Video**: a fixed pool of preallocated frame buffers cycled between a
//!   free list and a queue of finished frames. When the queue is full the
//!   oldest frame is recycled, so the newest frame always lands; the reader
//!   skips straight to it.
//! - **Audio**: stereo sample ring. Overflow samples are dropped and counted.
//!
//! Counters live in a shared [`RenderCounters`] so cooperative threads can
//! report what the real-time thread could not log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};

use super::instance::StereoSample;
use crate::types::VIDEO_FRAME_SIZE;

/// Ring and scratch sizing for the render path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Largest host block rendered in one step; bigger blocks are split
    pub max_block_frames: usize,
    /// Video ring depth in whole frames
    pub video_ring_frames: usize,
    /// Audio ring depth in stereo frames
    pub audio_ring_frames: usize,
    /// Scratch reserved per duplicate request for the state snapshot
    pub state_buffer_bytes: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_block_frames: 1024,
            video_ring_frames: 16,
            audio_ring_frames: 8192,
            state_buffer_bytes: 256 * 1024,
        }
    }
}

/// Counters written by the real-time thread
#[derive(Debug, Default)]
pub struct RenderCounters {
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
    frames_skipped: AtomicU64,
    samples_dropped: AtomicU64,
}

impl RenderCounters {
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Frames overwritten by newer ones before the reader got to them
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Frames the reader jumped over to reach the newest one
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    /// Stereo samples discarded because the audio ring was full
    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }
}

/// Create the video ring for one slot
///
/// Allocates `frames + 1` buffers up front: `frames` can sit in the queue
/// while the reader holds one more for copying out.
pub fn video_ring(frames: usize, counters: Arc<RenderCounters>) -> (VideoWriter, VideoReader) {
    let depth = frames.max(1);
    let pool = depth + 1;
    let free = Arc::new(ArrayQueue::new(pool));
    for _ in 0..pool {
        let _ = free.push(vec![0u8; VIDEO_FRAME_SIZE].into_boxed_slice());
    }
    let queued = Arc::new(ArrayQueue::new(depth));
    (
        VideoWriter {
            free: free.clone(),
            queued: queued.clone(),
            counters: counters.clone(),
        },
        VideoReader {
            free,
            queued,
            counters,
        },
    )
}

/// Create the audio ring for one slot
pub fn audio_ring(frames: usize, counters: Arc<RenderCounters>) -> (AudioWriter, AudioReader) {
    let (producer, consumer) = rtrb::RingBuffer::<StereoSample>::new(frames.max(1));
    (
        AudioWriter {
            producer,
            counters: counters.clone(),
        },
        AudioReader { consumer, counters },
    )
}

type FrameBuffer = Box<[u8]>;

/// Real-time side of a video ring
pub struct VideoWriter {
    free: Arc<ArrayQueue<FrameBuffer>>,
    queued: Arc<ArrayQueue<FrameBuffer>>,
    counters: Arc<RenderCounters>,
}

impl VideoWriter {
    /// Publish one frame, recycling the oldest queued frame if the queue is full
    ///
    /// Returns false when an unread frame was overwritten to make room.
    pub fn write_frame(&mut self, frame: &[u8]) -> bool {
        debug_assert_eq!(frame.len(), VIDEO_FRAME_SIZE);
        let mut fresh = true;

        let mut buffer = match self.free.pop() {
            Some(buffer) => buffer,
            None => match self.queued.pop() {
                Some(stale) => {
                    self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    fresh = false;
                    stale
                }
                // The reader is holding every spare buffer; try again next frame
                None => {
                    self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            },
        };
        buffer.copy_from_slice(frame);

        if let Some(stale) = self.queued.force_push(buffer) {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            fresh = false;
            let _ = self.free.push(stale);
        }
        self.counters.frames_written.fetch_add(1, Ordering::Relaxed);
        fresh
    }
}

/// Consumer side of a video ring
pub struct VideoReader {
    free: Arc<ArrayQueue<FrameBuffer>>,
    queued: Arc<ArrayQueue<FrameBuffer>>,
    counters: Arc<RenderCounters>,
}

impl VideoReader {
    /// Whole frames waiting to be read
    pub fn available(&self) -> usize {
        self.queued.len()
    }

    /// Copy the newest queued frame into `out`, discarding older ones
    ///
    /// Returns the number of frames skipped, or `None` if no frame is queued.
    pub fn read_latest(&mut self, out: &mut [u8]) -> Option<usize> {
        let mut newest: Option<FrameBuffer> = None;
        let mut skipped = 0;
        while let Some(buffer) = self.queued.pop() {
            if let Some(older) = newest.replace(buffer) {
                let _ = self.free.push(older);
                skipped += 1;
            }
        }

        let newest = newest?;
        out[..VIDEO_FRAME_SIZE].copy_from_slice(&newest);
        let _ = self.free.push(newest);
        if skipped > 0 {
            self.counters
                .frames_skipped
                .fetch_add(skipped as u64, Ordering::Relaxed);
        }
        Some(skipped)
    }

    pub fn counters(&self) -> &RenderCounters {
        &self.counters
    }
}

/// Real-time side of an audio ring
pub struct AudioWriter {
    producer: rtrb::Producer<StereoSample>,
    counters: Arc<RenderCounters>,
}

impl AudioWriter {
    /// Push as many samples as fit, returning how many were written
    pub fn push_block(&mut self, samples: &[StereoSample]) -> usize {
        let mut written = 0;
        for sample in samples {
            if self.producer.push(*sample).is_err() {
                break;
            }
            written += 1;
        }
        let dropped = samples.len() - written;
        if dropped > 0 {
            self.counters
                .samples_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
        written
    }
}

/// Consumer side of an audio ring
pub struct AudioReader {
    consumer: rtrb::Consumer<StereoSample>,
    counters: Arc<RenderCounters>,
}

impl AudioReader {
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }

    /// Pop samples into `out`, returning how many were read
    pub fn read_into(&mut self, out: &mut [StereoSample]) -> usize {
        let mut read = 0;
        for slot in out.iter_mut() {
            match self.consumer.pop() {
                Ok(sample) => *slot = sample,
                Err(_) => break,
            }
            read += 1;
        }
        read
    }

    pub fn counters(&self) -> &RenderCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8) -> Vec<u8> {
        vec![fill; VIDEO_FRAME_SIZE]
    }

    #[test]
    fn test_reader_skips_to_newest_frame() {
        let counters = Arc::new(RenderCounters::default());
        let (mut writer, mut reader) = video_ring(4, counters.clone());

        for fill in 1..=3 {
            assert!(writer.write_frame(&frame(fill)));
        }
        assert_eq!(reader.available(), 3);

        let mut out = vec![0u8; VIDEO_FRAME_SIZE];
        assert_eq!(reader.read_latest(&mut out), Some(2));
        assert!(out.iter().all(|&b| b == 3));
        assert_eq!(reader.available(), 0);
        assert_eq!(counters.frames_skipped(), 2);
        assert_eq!(reader.read_latest(&mut out), None);
    }

    #[test]
    fn test_full_video_ring_keeps_newest_frame() {
        let counters = Arc::new(RenderCounters::default());
        let (mut writer, mut reader) = video_ring(2, counters.clone());

        assert!(writer.write_frame(&frame(1)));
        assert!(writer.write_frame(&frame(2)));
        for fill in 3..=5 {
            assert!(!writer.write_frame(&frame(fill)));
        }
        assert_eq!(counters.frames_written(), 5);
        assert_eq!(counters.frames_dropped(), 3);
        assert_eq!(reader.available(), 2);

        let mut out = vec![0u8; VIDEO_FRAME_SIZE];
        assert_eq!(reader.read_latest(&mut out), Some(1));
        assert!(out.iter().all(|&b| b == 5));

        // Buffers go back to the pool and keep cycling
        for fill in 6..=20 {
            writer.write_frame(&frame(fill));
            assert_eq!(reader.read_latest(&mut out), Some(0));
            assert!(out.iter().all(|&b| b == fill));
        }
    }

    #[test]
    fn test_audio_overflow_is_counted() {
        let counters = Arc::new(RenderCounters::default());
        let (mut writer, mut reader) = audio_ring(4, counters.clone());

        let block = [StereoSample::new(0.5, -0.5); 6];
        assert_eq!(writer.push_block(&block), 4);
        assert_eq!(counters.samples_dropped(), 2);

        let mut out = [StereoSample::SILENCE; 8];
        assert_eq!(reader.read_into(&mut out), 4);
        assert_eq!(out[3], StereoSample::new(0.5, -0.5));
        assert_eq!(out[4], StereoSample::SILENCE);
    }
}
