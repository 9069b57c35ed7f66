// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use thiserror::Error;

/// Invalid subsystem or pool configuration.
///
/// Every variant is detected before any process is handed out, so a failed
/// allocation never leaves a partial plan behind.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("No subsystem spec")]
    NoSubsystems,

    #[error("Process pool is empty")]
    EmptyPool,

    #[error("Subsystem #{idx} has an empty name")]
    EmptyName { idx: usize },

    #[error("Subsystem {name:?} is specified more than once")]
    DuplicateName { name: String },

    #[error("Subsystem {name:?} has min_procs 0, at least 1 is required")]
    ZeroMinProcs { name: String },

    #[error("Subsystem {name:?} has invalid procs range ({min}, {max})")]
    InvalidRange {
        name: String,
        min: usize,
        max: usize,
    },

    #[error("Subsystem {name:?} has invalid proc_weight {weight}")]
    InvalidWeight { name: String, weight: f64 },

    /// Sum of min_procs can't be satisfied by the pool.
    #[error("Subsystems require at least {required} procs but only {total} are available")]
    InsufficientProcs { required: usize, total: usize },

    /// P < N and a subsystem would need a rank of its own.
    #[error(
        "Subsystem {name:?} requires {min_procs} procs but {nr_subsystems} subsystems \
         must share {total} procs"
    )]
    SharedMinProcs {
        name: String,
        min_procs: usize,
        nr_subsystems: usize,
        total: usize,
    },

    /// max_procs caps can't absorb the whole pool.
    #[error(
        "max_procs limits allow only {assignable} of {total} procs to be assigned, \
         {idle} would be left idle"
    )]
    IdleProcs {
        assignable: usize,
        idle: usize,
        total: usize,
    },
}
