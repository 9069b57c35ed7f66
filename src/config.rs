// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::ConfigError;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupConfig {
    pub specs: Vec<SubsystemSpec>,
}

fn default_min_procs() -> usize {
    1
}

fn default_proc_weight() -> f64 {
    1.0
}

/// A subsystem competing for processes inside a parallel group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubsystemSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default = "default_min_procs")]
    pub min_procs: usize,
    /// None means unbounded.
    #[serde(default)]
    pub max_procs: Option<usize>,
    #[serde(default = "default_proc_weight")]
    pub proc_weight: f64,
}

impl SubsystemSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            comment: None,
            min_procs: default_min_procs(),
            max_procs: None,
            proc_weight: default_proc_weight(),
        }
    }

    pub fn min_procs(mut self, min_procs: usize) -> Self {
        self.min_procs = min_procs;
        self
    }

    pub fn max_procs(mut self, max_procs: usize) -> Self {
        self.max_procs = Some(max_procs);
        self
    }

    pub fn proc_weight(mut self, proc_weight: f64) -> Self {
        self.proc_weight = proc_weight;
        self
    }

    /// Parse a JSON array of specs. `f:PATH` and `file:PATH` read the
    /// array from a file instead.
    pub fn parse(input: &str) -> Result<Vec<Self>> {
        let config: GroupConfig = match input.split_once(':') {
            Some(("f", path)) | Some(("file", path)) => {
                let mut f = fs::OpenOptions::new()
                    .read(true)
                    .open(path)
                    .with_context(|| format!("Failed to open {:?}", path))?;
                let mut content = String::new();
                f.read_to_string(&mut content)?;
                serde_json::from_str(&content)?
            }
            _ => serde_json::from_str(input)?,
        };
        Ok(config.specs)
    }

    /// Number of procs this subsystem can take beyond its minimum, None if
    /// unbounded.
    pub(crate) fn headroom(&self) -> Option<usize> {
        self.max_procs
            .map(|max| max.saturating_sub(self.min_procs))
    }
}

/// What to do with procs that no subsystem can take because every
/// subsystem has reached max_procs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Fail the allocation with [`ConfigError::IdleProcs`].
    #[default]
    Reject,
    /// Leave the surplus ranks unassigned.
    Allow,
}

#[derive(Clone, Debug, Default)]
pub struct AllocOpts {
    pub idle: IdlePolicy,
}

/// Check per-subsystem constraints that don't depend on the pool size.
pub fn verify_subsystem_specs(specs: &[SubsystemSpec]) -> Result<(), ConfigError> {
    if specs.is_empty() {
        return Err(ConfigError::NoSubsystems);
    }

    let mut names = BTreeSet::new();
    for (idx, spec) in specs.iter().enumerate() {
        if spec.name.is_empty() {
            return Err(ConfigError::EmptyName { idx });
        }
        if !names.insert(spec.name.as_str()) {
            return Err(ConfigError::DuplicateName {
                name: spec.name.clone(),
            });
        }
        if spec.min_procs == 0 {
            return Err(ConfigError::ZeroMinProcs {
                name: spec.name.clone(),
            });
        }
        if let Some(max) = spec.max_procs {
            if spec.min_procs > max {
                return Err(ConfigError::InvalidRange {
                    name: spec.name.clone(),
                    min: spec.min_procs,
                    max,
                });
            }
        }
        if !spec.proc_weight.is_finite() || spec.proc_weight < 0.0 {
            return Err(ConfigError::InvalidWeight {
                name: spec.name.clone(),
                weight: spec.proc_weight,
            });
        }
    }

    Ok(())
}

lazy_static::lazy_static! {
    pub static ref EXAMPLE_CONFIG: GroupConfig = GroupConfig {
        specs: vec![
            SubsystemSpec {
                name: "aero".into(),
                comment: Some("CFD solve, scales well with more ranks".into()),
                min_procs: 2,
                max_procs: None,
                proc_weight: 4.0,
            },
            SubsystemSpec {
                name: "struct".into(),
                comment: Some("FEA solve, no benefit past 4 ranks".into()),
                min_procs: 1,
                max_procs: Some(4),
                proc_weight: 2.0,
            },
            SubsystemSpec {
                name: "propulsion".into(),
                comment: None,
                min_procs: 1,
                max_procs: Some(1),
                proc_weight: 1.0,
            },
        ],
    };
}
