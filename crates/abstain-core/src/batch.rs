// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Pair Batch Builder
// ─────────────────────────────────────────────────────────────────────
//! Lazy, order-preserving batching of (context, claim) pairs.
//!
//! Batches borrow contiguous slices of the request input, so no pair is
//! copied, dropped, duplicated, or reordered. Sequence-length limits
//! are enforced later at the tokenizer boundary by the scorer.

use abstain_types::Pair;

/// A contiguous run of pairs plus its offset in the request input.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    offset: usize,
    pairs: &'a [Pair],
}

impl<'a> Batch<'a> {
    /// Position of the first pair in the request input.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn pairs(&self) -> &'a [Pair] {
        self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Always false for batches yielded by [`PairBatcher`].
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Request-input positions covered by this batch.
    pub fn positions(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.pairs.len()
    }
}

/// Splits a request's pairs into batches of at most `max_batch_size`.
///
/// Iterating yields full-size batches; [`next_bounded`](Self::next_bounded)
/// lets the latency governor ask for a smaller one.
#[derive(Debug, Clone)]
pub struct PairBatcher<'a> {
    pairs: &'a [Pair],
    cursor: usize,
    max_batch_size: usize,
}

impl<'a> PairBatcher<'a> {
    pub fn new(pairs: &'a [Pair], max_batch_size: usize) -> Self {
        Self {
            pairs,
            cursor: 0,
            max_batch_size: max_batch_size.max(1),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Number of pairs not yet handed out.
    pub fn remaining(&self) -> usize {
        self.pairs.len() - self.cursor
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.pairs.len()
    }

    /// Next batch holding at most `min(limit, max_batch_size)` pairs
    /// (and at least one).
    pub fn next_bounded(&mut self, limit: usize) -> Option<Batch<'a>> {
        if self.is_done() {
            return None;
        }
        let size = limit.clamp(1, self.max_batch_size).min(self.remaining());
        let batch = Batch {
            offset: self.cursor,
            pairs: &self.pairs[self.cursor..self.cursor + size],
        };
        self.cursor += size;
        Some(batch)
    }

    /// Everything not yet handed out, as one span that may exceed
    /// `max_batch_size`. Used when the rest of a request falls back
    /// without scoring.
    pub fn drain_rest(&mut self) -> Option<Batch<'a>> {
        if self.is_done() {
            return None;
        }
        let batch = Batch {
            offset: self.cursor,
            pairs: &self.pairs[self.cursor..],
        };
        self.cursor = self.pairs.len();
        Some(batch)
    }
}

impl<'a> Iterator for PairBatcher<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_bounded(self.max_batch_size)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining().div_ceil(self.max_batch_size);
        (n, Some(n))
    }
}
