//! Use-point sets
//!
//! A small sorted set of use-point indices. Use points are indices into the
//! per-graph use-point table, so sets stay small and sorted-vector union is
//! cheaper than a dense bitmap for typical functions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsePointSet {
    /// Sorted, deduplicated indices
    bits: Vec<u32>,
}

impl UsePointSet {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a bit. Returns true if it was not set before.
    pub fn insert(&mut self, idx: u32) -> bool {
        match self.bits.binary_search(&idx) {
            Ok(_) => false,
            Err(pos) => {
                self.bits.insert(pos, idx);
                true
            }
        }
    }

    #[inline]
    pub fn contains(&self, idx: u32) -> bool {
        self.bits.binary_search(&idx).is_ok()
    }

    /// Union `other` into `self`. Returns true if `self` changed.
    pub fn union_with(&mut self, other: &UsePointSet) -> bool {
        if other.bits.is_empty() {
            return false;
        }
        if self.bits.is_empty() {
            self.bits = other.bits.clone();
            return true;
        }
        let mut merged = Vec::with_capacity(self.bits.len() + other.bits.len());
        let (mut i, mut j) = (0, 0);
        while i < self.bits.len() && j < other.bits.len() {
            match self.bits[i].cmp(&other.bits[j]) {
                Ordering::Less => {
                    merged.push(self.bits[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    merged.push(other.bits[j]);
                    j += 1;
                }
                Ordering::Equal => {
                    merged.push(self.bits[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&self.bits[i..]);
        merged.extend_from_slice(&other.bits[j..]);
        let changed = merged.len() != self.bits.len();
        self.bits = merged;
        changed
    }

    /// Clear a single bit
    pub fn remove(&mut self, idx: u32) -> bool {
        match self.bits.binary_search(&idx) {
            Ok(pos) => {
                self.bits.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.iter().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.bits.clear();
    }
}
