//! Frame-aligned rebuffering
//!
//! [`StreamAligner`] turns arbitrarily sized interleaved chunks into blocks of
//! exactly `chunk_frames` whole frames, followed by one shorter final block.
//!
//! ## Guarantees
//! - Samples come out in input order, none skipped inside the stream
//! - Every emitted block length is a multiple of `channels`
//! - With a frame cap, pulling stops as soon as the cap is buffered
//! - `remainder_samples_dropped = samples_read - frames_emitted * channels`

use serde::Serialize;

/// Counters published once the aligner is exhausted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlignStats {
    pub samples_read: usize,
    pub frames_emitted: usize,
    pub remainder_samples_dropped: usize,
}

/// Rebuffers a fallible chunk stream into channel-aligned blocks
#[derive(Debug)]
pub struct StreamAligner<I> {
    inner: I,
    channels: usize,
    chunk_frames: usize,
    max_frames: Option<usize>,
    buffer: Vec<f64>,
    stats: AlignStats,
    exhausted: bool,
    finished: bool,
}

impl<I, E> StreamAligner<I>
where
    I: Iterator<Item = Result<Vec<f64>, E>>,
{
    /// # Panics
    /// If `channels` or `chunk_frames` is zero.
    pub fn new(inner: I, channels: usize, chunk_frames: usize, max_frames: Option<usize>) -> Self {
        assert!(channels > 0, "StreamAligner needs at least one channel");
        assert!(chunk_frames > 0, "StreamAligner needs a non-zero chunk size");
        Self {
            inner,
            channels,
            chunk_frames,
            max_frames,
            buffer: Vec::new(),
            stats: AlignStats::default(),
            exhausted: false,
            finished: false,
        }
    }

    pub fn stats(&self) -> AlignStats {
        self.stats
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn into_inner(self) -> I {
        self.inner
    }

    fn remaining_frames(&self) -> usize {
        self.max_frames
            .map_or(usize::MAX, |cap| cap.saturating_sub(self.stats.frames_emitted))
    }

    fn emit(&mut self, frames: usize) -> Vec<f64> {
        let rest = self.buffer.split_off(frames * self.channels);
        self.stats.frames_emitted += frames;
        std::mem::replace(&mut self.buffer, rest)
    }

    fn finish(&mut self) {
        self.finished = true;
        self.buffer.clear();
        self.stats.remainder_samples_dropped =
            self.stats.samples_read - self.stats.frames_emitted * self.channels;
    }
}

impl<I, E> Iterator for StreamAligner<I>
where
    I: Iterator<Item = Result<Vec<f64>, E>>,
{
    type Item = Result<Vec<f64>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            let remaining = self.remaining_frames();
            if remaining == 0 {
                self.finish();
                return None;
            }

            let available = self.buffer.len() / self.channels;
            let ready = available.min(remaining);
            if ready >= self.chunk_frames {
                return Some(Ok(self.emit(self.chunk_frames)));
            }
            // cap reached: final short block, stop pulling
            if ready == remaining {
                return Some(Ok(self.emit(ready)));
            }
            if self.exhausted {
                if ready > 0 {
                    return Some(Ok(self.emit(ready)));
                }
                self.finish();
                return None;
            }

            match self.inner.next() {
                Some(Ok(chunk)) => {
                    self.stats.samples_read += chunk.len();
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Err(err)) => {
                    self.finished = true;
                    self.buffer.clear();
                    return Some(Err(err));
                }
                None => self.exhausted = true,
            }
        }
    }
}
