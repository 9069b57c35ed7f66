// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::fmt;
use std::ops::Range;

use bitvec::prelude::*;
use serde::Serialize;

use crate::ProcPool;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AllocMode {
    /// At least one proc per subsystem, ranks owned exclusively.
    Exclusive,
    /// More subsystems than procs, subsystems packed onto shared ranks.
    Shared,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Placement {
    Exclusive { ranks: Range<usize> },
    Shared { rank: usize },
}

impl Placement {
    pub fn nr_procs(&self) -> usize {
        match self {
            Placement::Exclusive { ranks } => ranks.len(),
            Placement::Shared { .. } => 1,
        }
    }

    pub fn ranks(&self) -> Range<usize> {
        match self {
            Placement::Exclusive { ranks } => ranks.clone(),
            Placement::Shared { rank } => *rank..*rank + 1,
        }
    }

    pub fn contains(&self, rank: usize) -> bool {
        self.ranks().contains(&rank)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubsystemAlloc {
    pub name: String,
    pub placement: Placement,
}

/// Result of a process allocation. Subsystems keep the order of the specs
/// they were allocated from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Allocation {
    total_procs: usize,
    mode: AllocMode,
    subsystems: Vec<SubsystemAlloc>,
}

impl Allocation {
    pub(crate) fn new(
        total_procs: usize,
        mode: AllocMode,
        subsystems: Vec<SubsystemAlloc>,
    ) -> Self {
        Self {
            total_procs,
            mode,
            subsystems,
        }
    }

    pub fn total_procs(&self) -> usize {
        self.total_procs
    }

    pub fn mode(&self) -> AllocMode {
        self.mode
    }

    pub fn subsystems(&self) -> &[SubsystemAlloc] {
        &self.subsystems
    }

    pub fn get(&self, idx: usize) -> Option<&SubsystemAlloc> {
        self.subsystems.get(idx)
    }

    pub fn find(&self, name: &str) -> Option<(usize, &SubsystemAlloc)> {
        self.subsystems
            .iter()
            .enumerate()
            .find(|(_, sa)| sa.name == name)
    }

    /// Number of procs the subsystem runs on. Panics if `idx` is out of
    /// range.
    pub fn nr_procs(&self, idx: usize) -> usize {
        self.subsystems[idx].placement.nr_procs()
    }

    /// Procs owned by subsystems. In shared mode a rank hosting several
    /// subsystems is counted once.
    pub fn nr_assigned(&self) -> usize {
        self.total_procs - self.idle_mask().count_ones()
    }

    /// Ranks the subsystem runs on as a mask over the whole pool.
    pub fn ranks_mask(&self, idx: usize) -> BitVec {
        let mut mask = bitvec![0; self.total_procs];
        for rank in self.subsystems[idx].placement.ranks() {
            mask.set(rank, true);
        }
        mask
    }

    /// Ranks no subsystem runs on.
    pub fn idle_mask(&self) -> BitVec {
        let mut mask = bitvec![1; self.total_procs];
        for sa in self.subsystems.iter() {
            for rank in sa.placement.ranks() {
                mask.set(rank, false);
            }
        }
        mask
    }

    /// Indices of the subsystems which run on `rank`.
    pub fn local_subsystems(&self, rank: usize) -> Vec<usize> {
        self.subsystems
            .iter()
            .enumerate()
            .filter(|(_, sa)| sa.placement.contains(rank))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Subsystems which run on the pool's local rank.
    pub fn local_to<P: ProcPool>(&self, pool: &P) -> Vec<&SubsystemAlloc> {
        self.local_subsystems(pool.rank())
            .into_iter()
            .map(|idx| &self.subsystems[idx])
            .collect()
    }

    /// Split color of `rank`. Ranks with the same color form one
    /// sub-communicator: the owning subsystem's index in exclusive mode and
    /// the rank itself in shared mode. Idle and out-of-range ranks have no
    /// color.
    pub fn color(&self, rank: usize) -> Option<usize> {
        if rank >= self.total_procs {
            return None;
        }
        match self.mode {
            AllocMode::Exclusive => self.local_subsystems(rank).first().copied(),
            AllocMode::Shared => match self.local_subsystems(rank).is_empty() {
                true => None,
                false => Some(rank),
            },
        }
    }

    pub fn colors(&self) -> Vec<Option<usize>> {
        (0..self.total_procs).map(|rank| self.color(rank)).collect()
    }
}

fn fmt_ranks(ranks: &Range<usize>) -> String {
    match ranks.len() {
        0 => "-".into(),
        1 => format!("{}", ranks.start),
        _ => format!("{}-{}", ranks.start, ranks.end - 1),
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{:?} allocation: nr_procs={} nr_subsystems={}",
            self.mode,
            self.total_procs,
            self.subsystems.len()
        )?;
        for (idx, sa) in self.subsystems.iter().enumerate() {
            writeln!(
                f,
                "  [{:2}] {:<16} procs={:3} ranks={}",
                idx,
                sa.name,
                sa.placement.nr_procs(),
                fmt_ranks(&sa.placement.ranks())
            )?;
        }
        let idle = self.idle_mask();
        if idle.any() {
            let ranks: Vec<String> = idle.iter_ones().map(|rank| rank.to_string()).collect();
            writeln!(f, "  idle ranks: {}", ranks.join(","))?;
        }
        Ok(())
    }
}
