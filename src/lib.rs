// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! # Process allocation for parallel subsystem groups
//!
//! A parallel group runs its subsystems concurrently on a fixed pool of
//! processes (e.g. the ranks of a communicator). Before the pool can be
//! split, each subsystem has to be told which ranks it runs on. This crate
//! computes that plan.
//!
//! Each subsystem is described by a [`SubsystemSpec`]: a name, a
//! `min_procs`/`max_procs` range and a `proc_weight`. Allocation over a pool
//! of P procs for N subsystems takes one of two paths.
//!
//! ## P >= N: exclusive ranks
//!
//! Every subsystem first gets its `min_procs`. The surplus is then
//! water-filled by weight: each subsystem's share is proportional to its
//! weight, a subsystem whose share would push it past `max_procs` is locked
//! at its cap and the excess flows back to the others. Shares are rounded
//! with the largest-remainder method so they always sum to the surplus.
//! Ranks are handed out as contiguous ranges in spec order.
//!
//! ## P < N: shared ranks
//!
//! Subsystems are visited by descending weight and each is placed on the
//! rank hosting the fewest subsystems so far. Every subsystem runs on
//! exactly one rank, so none may ask for `min_procs` > 1.
//!
//! Any constraint violation is reported as a [`ConfigError`] before anything
//! is allocated. The pool is passed in explicitly, either as a count or as a
//! [`ProcPool`].
use std::cmp::Reverse;

use ordered_float::OrderedFloat;

mod alloc;
mod config;
mod error;
mod plan;
mod pool;

pub use alloc::allocate;
pub use alloc::water_fill;
pub use alloc::Allocator;
pub use alloc::WaterFillEntry;
pub use config::verify_subsystem_specs;
pub use config::AllocOpts;
pub use config::GroupConfig;
pub use config::IdlePolicy;
pub use config::SubsystemSpec;
pub use config::EXAMPLE_CONFIG;
pub use error::ConfigError;
pub use plan::AllocMode;
pub use plan::Allocation;
pub use plan::Placement;
pub use plan::SubsystemAlloc;
pub use pool::FixedPool;
pub use pool::ProcPool;

/// Split `total` into integer shares proportional to `quotas` (Hamilton's
/// method). Each entry gets the floor of its exact share and the units left
/// over go to the largest fractional remainders. Equal remainders are
/// resolved in input order. Shares sum to `total` unless all quotas are 0.
pub fn largest_remainder(total: usize, quotas: &[f64]) -> Vec<usize> {
    let quota_max = quotas.iter().cloned().fold(0.0, f64::max);
    if quota_max <= 0.0 {
        return vec![0; quotas.len()];
    }

    // Scale into [0, 1] so neither the sum nor the products can overflow.
    let scaled: Vec<f64> = quotas.iter().map(|q| q / quota_max).collect();
    let scaled_sum: f64 = scaled.iter().sum();
    let exact: Vec<f64> = scaled
        .iter()
        .map(|q| total as f64 * (q / scaled_sum))
        .collect();
    let mut shares: Vec<usize> = exact
        .iter()
        .map(|e| (e.floor() as usize).min(total))
        .collect();
    let assigned = shares.iter().fold(0usize, |acc, s| acc.saturating_add(*s));
    let left = total.saturating_sub(assigned);

    let mut order: Vec<usize> = (0..quotas.len()).filter(|&i| quotas[i] > 0.0).collect();
    order.sort_by_key(|&i| Reverse(OrderedFloat(exact[i] - shares[i] as f64)));
    for i in order.into_iter().cycle().take(left) {
        shares[i] += 1;
    }

    shares
}
