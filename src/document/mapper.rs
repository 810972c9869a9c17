//! Maps flattened-text offsets back onto document leaves.
//!
//! A resolved range names the leaf holding the first character of the
//! span and the leaf holding its last character, each with a local
//! character offset. The end is resolved through the character at
//! `end - 1`, so an end that falls on a leaf boundary (the document end
//! included) closes the earlier leaf instead of opening an empty fragment
//! in the next one.

use std::ops::Range;

use thiserror::Error;

use super::extract::{FlatText, Leaf, LeafIndex};
use super::tree::NodeId;

/// Why a pair of offsets could not be mapped onto the document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("Negative offset: {offset}")]
    NegativeOffset { offset: i64 },

    #[error("Offset {offset} exceeds document length {len}")]
    OutOfBounds { offset: u64, len: usize },

    #[error("Empty or inverted range: {start}..{end}")]
    InvalidRange { start: i64, end: i64 },

    #[error("No leaf contains offset {offset}")]
    LeafNotFound { offset: usize },
}

/// A position inside one leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafPoint {
    /// Position of the leaf in the index
    pub leaf: usize,
    pub node: NodeId,
    /// Character offset inside the leaf
    pub offset: usize,
}

/// The part of one leaf covered by a resolved range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub leaf: usize,
    pub node: NodeId,
    /// Local character range inside the leaf
    pub start: usize,
    pub end: usize,
    /// Whole length of the leaf
    pub leaf_len: usize,
}

impl Fragment {
    pub fn covers_whole_leaf(&self) -> bool {
        self.start == 0 && self.end == self.leaf_len
    }
}

/// A flattened-text range mapped onto document leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: LeafPoint,
    /// Exclusive end; `offset` is in `1..=leaf_len`
    pub end: LeafPoint,
    /// Absolute character range in the flattened text
    pub absolute_start: usize,
    pub absolute_end: usize,
}

impl ResolvedRange {
    pub fn is_single_leaf(&self) -> bool {
        self.start.leaf == self.end.leaf
    }

    pub fn absolute(&self) -> Range<usize> {
        self.absolute_start..self.absolute_end
    }

    /// Per-leaf pieces of the range: head of the first leaf, every enclosed
    /// leaf in full, tail of the last leaf
    pub fn fragments(&self, index: &LeafIndex) -> Vec<Fragment> {
        (self.start.leaf..=self.end.leaf)
            .filter_map(|i| index.get(i).map(|leaf| (i, leaf)))
            .map(|(i, leaf)| Fragment {
                leaf: i,
                node: leaf.node,
                start: if i == self.start.leaf { self.start.offset } else { 0 },
                end: if i == self.end.leaf { self.end.offset } else { leaf.len },
                leaf_len: leaf.len,
            })
            .collect()
    }

    /// Text currently covered, concatenated leaf by leaf
    pub fn covered_text(&self, index: &LeafIndex, flat: &FlatText) -> String {
        let mut out = String::new();
        for fragment in self.fragments(index) {
            let Some(leaf) = index.get(fragment.leaf) else {
                continue;
            };
            if let Some(piece) =
                flat.slice(leaf.start + fragment.start..leaf.start + fragment.end)
            {
                out.push_str(piece);
            }
        }
        out
    }
}

/// Resolve `[start, end)` into leaf references
pub fn resolve(start: i64, end: i64, index: &LeafIndex) -> Result<ResolvedRange, ResolutionError> {
    let total = index.total_len();
    let start_abs = to_offset(start, total)?;
    let end_abs = to_offset(end, total)?;

    if end_abs <= start_abs {
        return Err(ResolutionError::InvalidRange { start, end });
    }

    let (start_leaf, leaf) = locate(index, start_abs)?;
    let start_point = LeafPoint {
        leaf: start_leaf,
        node: leaf.node,
        offset: start_abs - leaf.start,
    };

    let (end_leaf, leaf) = locate(index, end_abs - 1)?;
    let end_point = LeafPoint {
        leaf: end_leaf,
        node: leaf.node,
        offset: end_abs - leaf.start,
    };

    Ok(ResolvedRange {
        start: start_point,
        end: end_point,
        absolute_start: start_abs,
        absolute_end: end_abs,
    })
}

fn to_offset(value: i64, total: usize) -> Result<usize, ResolutionError> {
    let offset =
        u64::try_from(value).map_err(|_| ResolutionError::NegativeOffset { offset: value })?;
    if offset > total as u64 {
        return Err(ResolutionError::OutOfBounds { offset, len: total });
    }
    Ok(offset as usize)
}

/// Leaf whose `[start, end)` contains `offset`
fn locate(index: &LeafIndex, offset: usize) -> Result<(usize, &Leaf), ResolutionError> {
    let leaves = index.leaves();
    // Leaves are sorted by start and contiguous
    let pos = leaves.partition_point(|leaf| leaf.end() <= offset);
    match leaves.get(pos) {
        Some(leaf) if leaf.start <= offset && offset < leaf.end() => Ok((pos, leaf)),
        _ => Err(ResolutionError::LeafNotFound { offset }),
    }
}
