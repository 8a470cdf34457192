//! Streaming matrix application (fold-down)
//!
//! [`Fold`] wraps any iterator of fallible interleaved chunks and yields
//! folded chunks of `chunk_frames` target frames (the last one may be short).
//! Chunks need not be frame-aligned; a trailing partial source frame at the
//! end of the stream is dropped and counted.

use crate::error::{DownmixError, DownmixResult};

/// Iterator adapter applying a `target x source` gain matrix
#[derive(Debug)]
pub struct Fold<I> {
    inner: I,
    coeffs: Vec<Vec<f64>>,
    source_channels: usize,
    target_channels: usize,
    chunk_frames: usize,
    /// Source samples not yet forming a whole frame
    carry: Vec<f64>,
    /// Folded samples waiting to be emitted
    pending: Vec<f64>,
    frames_folded: usize,
    dropped_samples: usize,
    finished: bool,
}

impl<I, E> Fold<I>
where
    I: Iterator<Item = Result<Vec<f64>, E>>,
{
    pub fn new(
        inner: I,
        coeffs: Vec<Vec<f64>>,
        source_channels: usize,
        target_channels: usize,
        chunk_frames: usize,
    ) -> DownmixResult<Self> {
        if source_channels == 0 || target_channels == 0 || chunk_frames == 0 {
            return Err(DownmixError::InvalidMatrix(format!(
                "fold needs non-zero channels and chunk size (source {source_channels}, target {target_channels}, chunk {chunk_frames})"
            )));
        }
        if coeffs.len() != target_channels || coeffs.iter().any(|r| r.len() != source_channels) {
            return Err(DownmixError::InvalidMatrix(format!(
                "coefficients are not {target_channels}x{source_channels}"
            )));
        }

        Ok(Self {
            inner,
            coeffs,
            source_channels,
            target_channels,
            chunk_frames,
            carry: Vec::new(),
            pending: Vec::new(),
            frames_folded: 0,
            dropped_samples: 0,
            finished: false,
        })
    }

    /// Source frames folded so far
    pub fn frames_folded(&self) -> usize {
        self.frames_folded
    }

    /// Trailing source samples that never formed a frame (known once exhausted)
    pub fn dropped_samples(&self) -> usize {
        self.dropped_samples
    }

    pub fn get_ref(&self) -> &I {
        &self.inner
    }

    pub fn into_inner(self) -> I {
        self.inner
    }

    fn fold_carry(&mut self) {
        let whole = self.carry.len() - self.carry.len() % self.source_channels;
        if whole == 0 {
            return;
        }

        self.pending
            .reserve(whole / self.source_channels * self.target_channels);
        for frame in self.carry[..whole].chunks_exact(self.source_channels) {
            for row in &self.coeffs {
                let acc: f64 = row.iter().zip(frame.iter()).map(|(g, x)| g * x).sum();
                self.pending.push(acc);
            }
        }
        self.frames_folded += whole / self.source_channels;
        self.carry.drain(..whole);
    }

    fn take_block(&mut self, samples: usize) -> Vec<f64> {
        let rest = self.pending.split_off(samples);
        std::mem::replace(&mut self.pending, rest)
    }
}

impl<I, E> Iterator for Fold<I>
where
    I: Iterator<Item = Result<Vec<f64>, E>>,
{
    type Item = Result<Vec<f64>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.chunk_frames * self.target_channels;
        loop {
            if self.pending.len() >= block {
                return Some(Ok(self.take_block(block)));
            }
            if self.finished {
                if self.pending.is_empty() {
                    return None;
                }
                let len = self.pending.len();
                return Some(Ok(self.take_block(len)));
            }

            match self.inner.next() {
                Some(Ok(chunk)) => {
                    self.carry.extend_from_slice(&chunk);
                    self.fold_carry();
                }
                Some(Err(err)) => {
                    self.finished = true;
                    self.pending.clear();
                    return Some(Err(err));
                }
                None => {
                    self.finished = true;
                    self.dropped_samples = self.carry.len();
                    self.carry.clear();
                }
            }
        }
    }
}

/// Fold `source_chunks` through `coeffs`
pub fn fold<I, E>(
    coeffs: Vec<Vec<f64>>,
    source_chunks: I,
    source_channels: usize,
    target_channels: usize,
    chunk_frames: usize,
) -> DownmixResult<Fold<I::IntoIter>>
where
    I: IntoIterator<Item = Result<Vec<f64>, E>>,
{
    Fold::new(
        source_chunks.into_iter(),
        coeffs,
        source_channels,
        target_channels,
        chunk_frames,
    )
}
