// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::cmp::Reverse;

use log::debug;
use log::trace;
use ordered_float::OrderedFloat;

use crate::config::verify_subsystem_specs;
use crate::largest_remainder;
use crate::AllocMode;
use crate::AllocOpts;
use crate::Allocation;
use crate::ConfigError;
use crate::IdlePolicy;
use crate::Placement;
use crate::ProcPool;
use crate::SubsystemAlloc;
use crate::SubsystemSpec;

/// Entry for water_fill: a subsystem competing for a share of a pool.
#[derive(Clone, Debug)]
pub struct WaterFillEntry {
    pub weight: f64,
    /// Most units the entry can take, None if unbounded.
    pub demand: Option<usize>,
}

/// Distribute `pool` among entries by weight, capped at demand.
///
/// Each entry gets `pool * weight / total_weight`, but if that exceeds its
/// demand, the entry is locked at its demand and the excess is redistributed
/// to remaining entries. Iterates until no new caps. Shares are rounded with
/// largest-remainder so allocations sum to exactly min(pool, sum(demands)).
///
/// Zero-weight entries only receive units once every positive-weight entry
/// is capped. At that point the remaining entries split evenly.
pub fn water_fill(pool: usize, entries: &[WaterFillEntry]) -> Vec<usize> {
    let n = entries.len();
    let mut result = vec![0usize; n];
    let mut locked = vec![false; n];
    let mut remaining_pool = pool;

    loop {
        let competing: Vec<usize> = (0..n).filter(|i| !locked[*i]).collect();
        if competing.is_empty() || remaining_pool == 0 {
            break;
        }

        let mut quotas: Vec<f64> = competing.iter().map(|&i| entries[i].weight).collect();
        // Only zero-weight entries left, split evenly among them.
        if quotas.iter().all(|&w| w <= 0.0) {
            quotas = vec![1.0; competing.len()];
        }
        let shares = largest_remainder(remaining_pool, &quotas);
        trace!(
            "water_fill: pool={} competing={:?} shares={:?}",
            remaining_pool,
            &competing,
            &shares
        );

        let mut newly_capped = false;
        for (pos, &idx) in competing.iter().enumerate() {
            if let Some(demand) = entries[idx].demand {
                if shares[pos] > demand {
                    result[idx] = demand;
                    locked[idx] = true;
                    remaining_pool -= demand;
                    newly_capped = true;
                }
            }
        }

        if !newly_capped {
            for (pos, &idx) in competing.iter().enumerate() {
                result[idx] = shares[pos];
            }
            break;
        }
    }

    result
}

/// Process allocator for one parallel group.
#[derive(Clone, Debug, Default)]
pub struct Allocator {
    opts: AllocOpts,
}

impl Allocator {
    pub fn new(opts: AllocOpts) -> Self {
        Self { opts }
    }

    /// Allocate the procs of `pool` among `specs`.
    pub fn allocate_on<P: ProcPool>(
        &self,
        pool: &P,
        specs: &[SubsystemSpec],
    ) -> Result<Allocation, ConfigError> {
        self.allocate(specs, pool.size())
    }

    /// Allocate `total_procs` ranks among `specs`. Either every constraint
    /// holds and the full plan is returned, or nothing is allocated.
    pub fn allocate(
        &self,
        specs: &[SubsystemSpec],
        total_procs: usize,
    ) -> Result<Allocation, ConfigError> {
        verify_subsystem_specs(specs)?;
        if total_procs == 0 {
            return Err(ConfigError::EmptyPool);
        }

        let alloc = if total_procs >= specs.len() {
            self.alloc_exclusive(specs, total_procs)?
        } else {
            self.alloc_shared(specs, total_procs)?
        };

        for sa in alloc.subsystems() {
            debug!(
                "{}: procs={} ranks={:?}",
                &sa.name,
                sa.placement.nr_procs(),
                sa.placement.ranks()
            );
        }
        Ok(alloc)
    }

    fn alloc_exclusive(
        &self,
        specs: &[SubsystemSpec],
        total_procs: usize,
    ) -> Result<Allocation, ConfigError> {
        let required = specs
            .iter()
            .fold(0usize, |acc, spec| acc.saturating_add(spec.min_procs));
        if required > total_procs {
            return Err(ConfigError::InsufficientProcs {
                required,
                total: total_procs,
            });
        }

        let surplus = total_procs - required;
        let entries: Vec<WaterFillEntry> = specs
            .iter()
            .map(|spec| WaterFillEntry {
                weight: spec.proc_weight,
                demand: spec.headroom(),
            })
            .collect();
        let extra = water_fill(surplus, &entries);

        let assignable = required + extra.iter().sum::<usize>();
        if assignable < total_procs {
            match self.opts.idle {
                IdlePolicy::Reject => {
                    return Err(ConfigError::IdleProcs {
                        assignable,
                        idle: total_procs - assignable,
                        total: total_procs,
                    });
                }
                IdlePolicy::Allow => debug!(
                    "{} of {} procs left idle by max_procs limits",
                    total_procs - assignable,
                    total_procs
                ),
            }
        }

        let mut next_rank = 0;
        let subsystems = specs
            .iter()
            .zip(extra)
            .map(|(spec, extra)| {
                let nr_procs = spec.min_procs + extra;
                let ranks = next_rank..next_rank + nr_procs;
                next_rank += nr_procs;
                SubsystemAlloc {
                    name: spec.name.clone(),
                    placement: Placement::Exclusive { ranks },
                }
            })
            .collect();

        Ok(Allocation::new(
            total_procs,
            AllocMode::Exclusive,
            subsystems,
        ))
    }

    fn alloc_shared(
        &self,
        specs: &[SubsystemSpec],
        total_procs: usize,
    ) -> Result<Allocation, ConfigError> {
        if let Some(spec) = specs.iter().find(|spec| spec.min_procs > 1) {
            return Err(ConfigError::SharedMinProcs {
                name: spec.name.clone(),
                min_procs: spec.min_procs,
                nr_subsystems: specs.len(),
                total: total_procs,
            });
        }

        // Heaviest first. The sort is stable so equal weights keep spec order.
        let mut order: Vec<usize> = (0..specs.len()).collect();
        order.sort_by_key(|&idx| Reverse(OrderedFloat(specs[idx].proc_weight)));

        let mut loads = vec![0usize; total_procs];
        let mut ranks = vec![0usize; specs.len()];
        for idx in order {
            // Least loaded rank, lowest rank on ties.
            let mut rank = 0;
            for cand in 1..total_procs {
                if loads[cand] < loads[rank] {
                    rank = cand;
                }
            }
            loads[rank] += 1;
            ranks[idx] = rank;
            trace!("{} -> rank {} load={}", &specs[idx].name, rank, loads[rank]);
        }

        let subsystems = specs
            .iter()
            .zip(ranks)
            .map(|(spec, rank)| SubsystemAlloc {
                name: spec.name.clone(),
                placement: Placement::Shared { rank },
            })
            .collect();

        Ok(Allocation::new(total_procs, AllocMode::Shared, subsystems))
    }
}

/// Allocate with default options.
pub fn allocate(specs: &[SubsystemSpec], total_procs: usize) -> Result<Allocation, ConfigError> {
    Allocator::default().allocate(specs, total_procs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(weight: f64, demand: Option<usize>) -> WaterFillEntry {
        WaterFillEntry { weight, demand }
    }

    fn counts(alloc: &Allocation) -> Vec<usize> {
        (0..alloc.subsystems().len())
            .map(|idx| alloc.nr_procs(idx))
            .collect()
    }

    // =====================================================================
    // water_fill tests
    // =====================================================================

    #[test]
    fn test_wf_no_contention() {
        // Pool exactly matches total demand. Each gets its full demand.
        let result = water_fill(20, &[entry(1.0, Some(10)), entry(1.0, Some(10))]);
        assert_eq!(result, vec![10, 10]);
    }

    #[test]
    fn test_wf_equal_split() {
        let result = water_fill(10, &[entry(1.0, None), entry(1.0, None)]);
        assert_eq!(result, vec![5, 5]);
    }

    #[test]
    fn test_wf_one_capped() {
        // A(w=1,d=3), B(w=1,d=100). Pool=10.
        // Iter 1: share=5 each. A: 5>3, capped at 3. Pool=7.
        // Iter 2: B gets 7.
        let result = water_fill(10, &[entry(1.0, Some(3)), entry(1.0, Some(100))]);
        assert_eq!(result, vec![3, 7]);
    }

    #[test]
    fn test_wf_all_capped() {
        // Both demands < pool. Each gets exactly its demand, pool not exhausted.
        let result = water_fill(20, &[entry(1.0, Some(3)), entry(1.0, Some(4))]);
        assert_eq!(result, vec![3, 4]);
    }

    #[test]
    fn test_wf_unequal_weights() {
        // 3:1 split -> 15:5.
        let result = water_fill(20, &[entry(3.0, None), entry(1.0, None)]);
        assert_eq!(result, vec![15, 5]);
    }

    #[test]
    fn test_wf_cascading_caps() {
        // A(w=1,d=2), B(w=1,d=3), C(w=1,unbounded). Pool=12.
        // Iter 1: share=4 each. A capped(2), B capped(3). Pool=7.
        // Iter 2: C gets 7.
        let result = water_fill(
            12,
            &[entry(1.0, Some(2)), entry(1.0, Some(3)), entry(1.0, None)],
        );
        assert_eq!(result, vec![2, 3, 7]);
    }

    #[test]
    fn test_wf_zero_demand() {
        let result = water_fill(10, &[entry(1.0, Some(0)), entry(1.0, Some(10))]);
        assert_eq!(result, vec![0, 10]);
    }

    #[test]
    fn test_wf_zero_weight() {
        // Zero weight gets nothing while a weighted entry can absorb the pool.
        let result = water_fill(6, &[entry(0.0, None), entry(2.0, None)]);
        assert_eq!(result, vec![0, 6]);

        // Once weighted entries are capped, zero-weight entries split the rest.
        let result = water_fill(
            7,
            &[entry(0.0, None), entry(2.0, Some(1)), entry(0.0, None)],
        );
        assert_eq!(result, vec![3, 1, 3]);
    }

    #[test]
    fn test_wf_all_zero_weight() {
        let result = water_fill(4, &[entry(0.0, None), entry(0.0, None)]);
        assert_eq!(result, vec![2, 2]);
    }

    #[test]
    fn test_wf_extreme_weights() {
        let result = water_fill(3, &[entry(1e308, None), entry(1.0, None)]);
        assert_eq!(result, vec![3, 0]);

        // The heavy entry caps out, the light one absorbs the rest.
        let result = water_fill(10, &[entry(f64::MAX, Some(4)), entry(1e-300, None)]);
        assert_eq!(result, vec![4, 6]);
    }

    #[test]
    fn test_wf_conservation() {
        // When no entries are capped, allocations must sum exactly to pool.
        let result = water_fill(
            50,
            &[entry(2.0, None), entry(3.0, None), entry(5.0, None)],
        );
        assert_eq!(result.iter().sum::<usize>(), 50);
    }

    #[test]
    fn test_wf_empty() {
        assert!(water_fill(10, &[]).is_empty());
        assert_eq!(water_fill(0, &[entry(1.0, None)]), vec![0]);
    }

    // =====================================================================
    // allocate tests
    // =====================================================================

    #[test]
    fn test_alloc_one_each() {
        let specs = vec![SubsystemSpec::new("a"), SubsystemSpec::new("b")];
        let alloc = allocate(&specs, 2).unwrap();
        assert_eq!(alloc.mode(), AllocMode::Exclusive);
        assert_eq!(counts(&alloc), vec![1, 1]);
        assert_eq!(alloc.get(0).unwrap().placement.ranks(), 0..1);
        assert_eq!(alloc.get(1).unwrap().placement.ranks(), 1..2);
    }

    #[test]
    fn test_alloc_weighted_surplus() {
        // Baseline 1 each, surplus 3 split 3:1 -> 2.25:0.75 -> 2:1.
        let specs = vec![
            SubsystemSpec::new("a").proc_weight(3.0),
            SubsystemSpec::new("b").proc_weight(1.0),
        ];
        let alloc = allocate(&specs, 5).unwrap();
        assert_eq!(counts(&alloc), vec![3, 2]);
    }

    #[test]
    fn test_alloc_min_procs_reserved() {
        // b reserves 4 up front; surplus 2 split evenly.
        let specs = vec![
            SubsystemSpec::new("a"),
            SubsystemSpec::new("b").min_procs(4),
        ];
        let alloc = allocate(&specs, 7).unwrap();
        assert_eq!(counts(&alloc), vec![2, 5]);
    }

    #[test]
    fn test_alloc_max_cap_redistributes() {
        let specs = vec![
            SubsystemSpec::new("a").max_procs(2).proc_weight(10.0),
            SubsystemSpec::new("b"),
        ];
        let alloc = allocate(&specs, 8).unwrap();
        assert_eq!(counts(&alloc), vec![2, 6]);
    }

    #[test]
    fn test_alloc_insufficient() {
        let specs = vec![
            SubsystemSpec::new("a").min_procs(2),
            SubsystemSpec::new("b").min_procs(2),
        ];
        assert_eq!(
            allocate(&specs, 3),
            Err(ConfigError::InsufficientProcs {
                required: 4,
                total: 3,
            })
        );
    }

    #[test]
    fn test_alloc_idle_rejected_by_default() {
        let specs = vec![
            SubsystemSpec::new("a").max_procs(1),
            SubsystemSpec::new("b").max_procs(2),
        ];
        assert_eq!(
            allocate(&specs, 5),
            Err(ConfigError::IdleProcs {
                assignable: 3,
                idle: 2,
                total: 5,
            })
        );
    }

    #[test]
    fn test_alloc_idle_allowed() {
        let specs = vec![
            SubsystemSpec::new("a").max_procs(1),
            SubsystemSpec::new("b").max_procs(2),
        ];
        let alloc = Allocator::new(AllocOpts {
            idle: IdlePolicy::Allow,
        })
        .allocate(&specs, 5)
        .unwrap();
        assert_eq!(counts(&alloc), vec![1, 2]);
        assert_eq!(alloc.nr_assigned(), 3);
        assert_eq!(alloc.idle_mask().iter_ones().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn test_alloc_shared_placement() {
        let specs = vec![
            SubsystemSpec::new("a"),
            SubsystemSpec::new("b"),
            SubsystemSpec::new("c"),
        ];
        let alloc = allocate(&specs, 2).unwrap();
        assert_eq!(alloc.mode(), AllocMode::Shared);
        assert_eq!(alloc.local_subsystems(0), vec![0, 2]);
        assert_eq!(alloc.local_subsystems(1), vec![1]);
    }

    #[test]
    fn test_alloc_shared_heaviest_first() {
        // c is placed first on rank 0, then a on rank 1, then b back on 0.
        let specs = vec![
            SubsystemSpec::new("a").proc_weight(2.0),
            SubsystemSpec::new("b").proc_weight(1.0),
            SubsystemSpec::new("c").proc_weight(5.0),
        ];
        let alloc = allocate(&specs, 2).unwrap();
        assert_eq!(alloc.get(2).unwrap().placement, Placement::Shared { rank: 0 });
        assert_eq!(alloc.get(0).unwrap().placement, Placement::Shared { rank: 1 });
        assert_eq!(alloc.get(1).unwrap().placement, Placement::Shared { rank: 0 });
    }

    #[test]
    fn test_alloc_shared_min_procs() {
        let specs = vec![
            SubsystemSpec::new("a"),
            SubsystemSpec::new("b").min_procs(2),
            SubsystemSpec::new("c"),
        ];
        assert_eq!(
            allocate(&specs, 2),
            Err(ConfigError::SharedMinProcs {
                name: "b".into(),
                min_procs: 2,
                nr_subsystems: 3,
                total: 2,
            })
        );
    }

    #[test]
    fn test_alloc_empty_pool() {
        assert_eq!(
            allocate(&[SubsystemSpec::new("a")], 0),
            Err(ConfigError::EmptyPool)
        );
    }

    #[test]
    fn test_alloc_invalid_range_before_allocation() {
        // Reported even though the pool would be large enough otherwise.
        let specs = vec![SubsystemSpec::new("a").min_procs(4).max_procs(2)];
        assert!(matches!(
            allocate(&specs, 16),
            Err(ConfigError::InvalidRange { .. })
        ));
    }
}
