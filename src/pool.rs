// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

/// A communicator-like pool of processes.
///
/// The allocator only reads the pool size. The local rank is used by
/// [`crate::Allocation::local_to`] to answer which subsystems the calling
/// process has to run. Splitting the pool into sub-groups is left to the
/// implementor.
pub trait ProcPool {
    fn size(&self) -> usize;
    fn rank(&self) -> usize;
}

/// A pool with a fixed size, e.g. built from launcher environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedPool {
    pub size: usize,
    pub rank: usize,
}

impl FixedPool {
    pub fn new(size: usize, rank: usize) -> Self {
        Self { size, rank }
    }
}

impl ProcPool for FixedPool {
    fn size(&self) -> usize {
        self.size
    }

    fn rank(&self) -> usize {
        self.rank
    }
}
