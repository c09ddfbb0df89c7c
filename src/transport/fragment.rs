//! Datagram fragmentation planning.
//!
//! A payload of `length` bytes that exceeds `max_length` is split into
//! `ceil(length / max_length)` consecutive chunks of equal size `n`, except
//! for a shorter final chunk, where `n = ceil(length / ceil(length / max_length))`.
//!
//! ```text
//! length = 1000, max_length = 400
//! chunks = ceil(1000 / 400) = 3
//! n      = ceil(1000 / 3)   = 334
//! ranges = [0..334, 334..668, 668..1000]
//! ```

use std::ops::Range;

/// Size of each fragment when sending `length` bytes with a limit of `max_length`.
///
/// Returns `length` itself when no split is needed. `max_length` must be positive.
pub fn chunk_size(length: usize, max_length: usize) -> usize {
    debug_assert!(max_length > 0);
    if length <= max_length {
        return length;
    }
    let count = (length + max_length - 1) / max_length;
    (length + count - 1) / count
}

/// Number of datagrams needed for `length` bytes.
pub fn chunk_count(length: usize, max_length: usize) -> usize {
    if length <= max_length {
        1
    } else {
        (length + max_length - 1) / max_length
    }
}

/// Byte ranges of each fragment, in order of increasing offset.
///
/// A payload at or below the limit (including an empty one) yields a single range.
pub fn fragments(length: usize, max_length: usize) -> Fragments {
    Fragments {
        offset: 0,
        length,
        step: chunk_size(length, max_length),
        emitted_empty: false,
    }
}

/// Iterator over fragment ranges; see [`fragments`].
#[derive(Debug, Clone)]
pub struct Fragments {
    offset: usize,
    length: usize,
    step: usize,
    emitted_empty: bool,
}

impl Iterator for Fragments {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.length == 0 {
            // an empty payload is still one (empty) datagram
            if self.emitted_empty {
                return None;
            }
            self.emitted_empty = true;
            return Some(0..0);
        }
        if self.offset >= self.length {
            return None;
        }
        let end = (self.offset + self.step).min(self.length);
        let range = self.offset..end;
        self.offset = end;
        Some(range)
    }
}
