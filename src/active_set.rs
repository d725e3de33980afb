// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use rayon::prelude::*;

/// Tiles per compaction group.
pub const LOOKUP_GROUP: usize = 256;

/// Compacted list of active tiles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveList {
    /// Active tile indices in increasing order.
    pub indices: Vec<usize>,
    /// Number of active tiles in each group of [`LOOKUP_GROUP`] consecutive tiles.
    pub group_counts: Vec<usize>,
}

impl ActiveList {
    /// Number of active tiles.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True if no tile is active.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Compact per-tile flags into the list of raised indices.
pub fn lookup(flags: &[bool]) -> ActiveList {
    lookup_grouped(flags, LOOKUP_GROUP)
}

/// [`lookup`] with an explicit group size.
///
/// Groups are counted in parallel, the output is split into one disjoint
/// range per group at the prefix sums of the counts, and each group then
/// writes its indices into its own range.
pub fn lookup_grouped(flags: &[bool], group: usize) -> ActiveList {
    let group = group.max(1);
    let group_counts: Vec<usize> = flags
        .par_chunks(group)
        .map(|chunk| chunk.iter().filter(|&&f| f).count())
        .collect();

    let total: usize = group_counts.iter().sum();
    let mut indices = vec![0usize; total];
    let mut slices: Vec<&mut [usize]> = Vec::with_capacity(group_counts.len());
    let mut rest = indices.as_mut_slice();
    for &c in &group_counts {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(c);
        slices.push(head);
        rest = tail;
    }

    slices
        .into_par_iter()
        .zip(flags.par_chunks(group))
        .enumerate()
        .for_each(|(g, (out, chunk))| {
            let start = g * group;
            let hits = chunk
                .iter()
                .enumerate()
                .filter(|(_, f)| **f)
                .map(|(i, _)| start + i);
            for (slot, index) in out.iter_mut().zip(hits) {
                *slot = index;
            }
        });

    ActiveList {
        indices,
        group_counts,
    }
}
