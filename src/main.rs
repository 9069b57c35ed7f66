// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
use std::fs;
use std::io::Write;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::debug;
use log::info;

use procalloc::AllocOpts;
use procalloc::Allocator;
use procalloc::FixedPool;
use procalloc::GroupConfig;
use procalloc::IdlePolicy;
use procalloc::SubsystemSpec;
use procalloc::EXAMPLE_CONFIG;

/// procalloc: plan process ranks for the subsystems of a parallel group.
///
/// Each subsystem spec is a JSON object:
///
///   {
///     "name": "aero",
///     "comment": "optional",
///     "min_procs": 2,
///     "max_procs": null,
///     "proc_weight": 4.0
///   }
///
/// Only "name" is required. min_procs defaults to 1, max_procs to
/// unbounded and proc_weight to 1.0.
///
/// SPECS are JSON arrays of such objects, given inline or as "f:PATH".
/// Specs from all arguments are concatenated in order.
///
/// With at least as many procs as subsystems, each subsystem gets its
/// min_procs and the surplus is split by proc_weight without exceeding
/// max_procs. Each subsystem owns a contiguous range of ranks.
///
/// With fewer procs than subsystems, subsystems are placed by descending
/// proc_weight onto the least loaded rank. Several subsystems share a rank
/// and min_procs > 1 is rejected.
#[derive(Debug, Parser)]
#[command(verbatim_doc_comment)]
struct Opts {
    /// Number of procs in the pool.
    #[clap(short = 'n', long, env = "PROCALLOC_NPROCS")]
    procs: Option<usize>,

    /// Only show the subsystems which run on this rank.
    #[clap(short = 'r', long)]
    rank: Option<usize>,

    /// Leave procs idle instead of failing when max_procs limits can't
    /// absorb the whole pool.
    #[clap(long)]
    allow_idle: bool,

    /// Print the allocation as JSON.
    #[clap(long)]
    json: bool,

    /// Write example subsystem specs into the file and exit.
    #[clap(short = 'e', long)]
    example: Option<String>,

    /// Allocate over the example subsystem specs.
    #[clap(long)]
    run_example: bool,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subsystem specification. See --help.
    specs: Vec<String>,
}

fn write_example_file(path: &str) -> Result<()> {
    let mut f = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)?;
    Ok(f.write_all(serde_json::to_string_pretty(&*EXAMPLE_CONFIG)?.as_bytes())?)
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    debug!("opts={:?}", &opts);

    if let Some(path) = &opts.example {
        write_example_file(path).context(format!("Failed to write example to {:?}", path))?;
        return Ok(());
    }

    let mut group_config = match opts.run_example {
        true => EXAMPLE_CONFIG.clone(),
        false => GroupConfig { specs: vec![] },
    };

    for (idx, input) in opts.specs.iter().enumerate() {
        group_config.specs.append(
            &mut SubsystemSpec::parse(input)
                .context(format!("Failed to parse specs[{}] ({:?})", idx, input))?,
        );
    }
    debug!("specs={}", serde_json::to_string_pretty(&group_config)?);

    let nr_procs = match opts.procs {
        Some(nr_procs) => nr_procs,
        None => bail!("Pool size is required, use --procs or PROCALLOC_NPROCS"),
    };

    let allocator = Allocator::new(AllocOpts {
        idle: match opts.allow_idle {
            true => IdlePolicy::Allow,
            false => IdlePolicy::Reject,
        },
    });
    let alloc = allocator
        .allocate(&group_config.specs, nr_procs)
        .context("Failed to allocate procs")?;
    info!(
        "Allocated {} of {} procs to {} subsystems ({:?})",
        alloc.nr_assigned(),
        alloc.total_procs(),
        alloc.subsystems().len(),
        alloc.mode()
    );

    if let Some(rank) = opts.rank {
        if rank >= nr_procs {
            bail!("Rank {} is out of range for {} procs", rank, nr_procs);
        }
        let local = alloc.local_to(&FixedPool::new(nr_procs, rank));
        if opts.json {
            println!("{}", serde_json::to_string_pretty(&local)?);
        } else {
            println!("rank {} color={:?}", rank, alloc.color(rank));
            for sa in local {
                println!("  {} ranks={:?}", sa.name, sa.placement.ranks());
            }
        }
        return Ok(());
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&alloc)?);
    } else {
        print!("{}", alloc);
    }

    Ok(())
}
