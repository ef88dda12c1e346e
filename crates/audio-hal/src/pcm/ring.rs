//! Bounded interleaved `i16` ring shared between a blocking PCM caller and a device callback.
//!
//! Playback: the stream's `write` blocks in [`SampleRing::push_blocking`] while the device
//! callback drains with [`Take::NonBlocking`]. Capture runs the other way round: the
//! callback pushes what fits and the stream's `read` waits with [`Take::BlockingUpTo`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

pub struct SampleRing {
    channels: usize,
    capacity: usize,
    inner: Mutex<RingInner>,
    cv: Condvar,
}

struct RingInner {
    queue: VecDeque<i16>,
    closed: bool,
}

/// How [`SampleRing::take_into`] waits for data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Take {
    /// Block until at least one frame is buffered.
    BlockingUpTo,
    /// Return whatever is buffered right now.
    NonBlocking,
}

impl SampleRing {
    /// `capacity_frames` is rounded up to at least one frame.
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        let channels = channels.max(1);
        let capacity = capacity_frames.max(1) * channels;
        Self {
            channels,
            capacity,
            inner: Mutex::new(RingInner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity / self.channels
    }

    pub fn len_frames(&self) -> usize {
        self.inner.lock().queue.len() / self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Wake all waiters and refuse further data.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.cv.notify_all();
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.inner.lock().queue.clear();
        self.cv.notify_all();
    }

    /// Push whole frames, blocking while the ring is full.
    ///
    /// Returns the number of frames accepted; fewer than requested only if the ring is
    /// closed while waiting.
    pub fn push_blocking(&self, samples: &[i16]) -> usize {
        let samples = &samples[..samples.len() - samples.len() % self.channels];
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.inner.lock();
            while g.queue.len() + self.channels > self.capacity && !g.closed {
                self.cv.wait(&mut g);
            }
            if g.closed {
                break;
            }

            let room = (self.capacity - g.queue.len()) / self.channels * self.channels;
            let end = (offset + room).min(samples.len());
            g.queue.extend(&samples[offset..end]);
            offset = end;

            drop(g);
            self.cv.notify_all();
        }

        offset / self.channels
    }

    /// Push as many whole frames as fit without waiting; returns frames accepted.
    pub fn push_available(&self, samples: &[i16]) -> usize {
        let mut g = self.inner.lock();
        if g.closed {
            return 0;
        }
        let room = (self.capacity - g.queue.len()) / self.channels;
        let frames = room.min(samples.len() / self.channels);
        g.queue.extend(&samples[..frames * self.channels]);
        drop(g);
        if frames > 0 {
            self.cv.notify_all();
        }
        frames
    }

    /// Move up to `out.len()` samples (whole frames) out of the ring.
    ///
    /// Returns `None` once the ring is closed and empty, otherwise the number of frames
    /// copied (0 is possible in non-blocking mode).
    pub fn take_into(&self, out: &mut [i16], mode: Take) -> Option<usize> {
        let mut g = self.inner.lock();

        if mode == Take::BlockingUpTo {
            while g.queue.len() < self.channels && !g.closed {
                self.cv.wait(&mut g);
            }
        }

        let frames = (g.queue.len() / self.channels).min(out.len() / self.channels);
        if frames == 0 && g.closed {
            return None;
        }

        for (slot, sample) in out.iter_mut().zip(g.queue.drain(..frames * self.channels)) {
            *slot = sample;
        }

        drop(g);
        if frames > 0 {
            self.cv.notify_all();
        }
        Some(frames)
    }

    /// Wait until the ring is empty; `false` on timeout.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.inner.lock();
        while !g.queue.is_empty() && !g.closed {
            if self.cv.wait_until(&mut g, deadline).timed_out() {
                return g.queue.is_empty();
            }
        }
        true
    }
}
