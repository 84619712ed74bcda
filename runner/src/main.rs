// SPDX-License-Identifier: MPL-2.0

//! asid-runner drives the ASID allocator through a simulated multi-CPU
//! context-switch workload and checks that no translation ever survives the
//! reuse of its tag.
//!
//! The allocator is configured like the kernel configures it, from `asid.*`
//! options on a kernel command line:
//!
//! - `asid.bits=N`: the width of the hardware ASID field;
//! - `asid.num_tags=N`: the number of tags, if not a power of two;
//! - `asid.reserved=N`: the tags kept out of the rotation;
//! - `asid.log_level=LEVEL`: the log level, `warn` by default.

mod kcmdline;
mod logger;
mod workload;

use anyhow::{bail, Context};
use asid_alloc::AsidConfig;
use clap::Parser;

use crate::{
    kcmdline::{KCmdlineArg, ModuleArg},
    workload::WorkloadConfig,
};

/// The CLI of this runner.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    // Positional arguments.
    /// Provide the kernel commandline, which configures the allocator.
    #[arg(default_value = "")]
    kcmdline: String,

    // Optional arguments.
    /// Number of simulated CPUs.
    #[arg(long, default_value_t = 4)]
    cpus: usize,

    /// Number of processes, each with its own memory space.
    #[arg(long, default_value_t = 64)]
    spaces: usize,

    /// Context switches performed by each CPU.
    #[arg(long, default_value_t = 10_000)]
    switches: usize,

    /// TLB entries of each CPU.
    #[arg(long, default_value_t = 64)]
    tlb_entries: usize,

    /// Pages mapped in each memory space.
    #[arg(long, default_value_t = 32)]
    pages: usize,

    /// Probability that a process exits after being scheduled.
    #[arg(long, default_value_t = 0.01)]
    exit_ratio: f64,

    /// Seed of the scheduling decisions.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cmdline = KCmdlineArg::from(args.kcmdline.as_str());

    logger::init(&cmdline)?;
    if !cmdline.other_args().is_empty() {
        log::info!("Ignoring kernel arguments {:?}", cmdline.other_args());
    }
    let asid_config = asid_config(&cmdline)?;
    println!(
        "[asid-runner] {} tags, {} reserved, {} CPUs, {} processes",
        asid_config.num_tags(),
        asid_config.reserved_tags(),
        args.cpus,
        args.spaces
    );

    let workload = WorkloadConfig {
        nr_cpus: args.cpus,
        nr_processes: args.spaces,
        switches_per_cpu: args.switches,
        tlb_entries: args.tlb_entries,
        pages_per_space: args.pages,
        exit_ratio: args.exit_ratio,
        seed: args.seed,
    };
    let report = workload::run(&workload, asid_config)?;
    println!("{}", report);

    if report.stale_hits > 0 {
        bail!("{} stale translations were observed", report.stale_hits);
    }
    Ok(())
}

fn asid_config(cmdline: &KCmdlineArg) -> anyhow::Result<AsidConfig> {
    let mut config = AsidConfig::default();

    for arg in cmdline.get_module_args("asid").into_iter().flatten() {
        match arg {
            ModuleArg::KeyVal(key, value) => config
                .apply_module_arg(key, value)
                .with_context(|| format!("invalid kernel argument asid.{}={}", key, value))?,
            ModuleArg::Arg(option) => bail!("kernel argument asid.{} needs a value", option),
        }
    }

    Ok(config)
}

#[cfg(test)]
mod test {
    use asid_alloc::Error;

    use super::*;

    #[test]
    fn config_from_cmdline() {
        let config = asid_config(&KCmdlineArg::from("")).unwrap();
        assert_eq!(config, AsidConfig::default());

        let cmdline = KCmdlineArg::from("asid.bits=6 asid.reserved=2 asid.log_level=info");
        let config = asid_config(&cmdline).unwrap();
        assert_eq!(config, AsidConfig::new(64, 2).unwrap());
    }

    #[test]
    fn bad_config_is_reported() {
        let err = asid_config(&KCmdlineArg::from("asid.bits=40")).unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::InvalidAsidBits(40))
        );

        assert!(asid_config(&KCmdlineArg::from("asid.reserved")).is_err());
        assert!(asid_config(&KCmdlineArg::from("asid.size=3")).is_err());
    }

    #[test]
    fn cli_defaults() {
        let args = Args::parse_from(["asid-runner", "asid.bits=4"]);
        assert_eq!(args.kcmdline, "asid.bits=4");
        assert_eq!(args.cpus, 4);
        assert_eq!(args.switches, 10_000);

        let args = Args::parse_from(["asid-runner", "--cpus", "2", "--seed", "9"]);
        assert_eq!(args.kcmdline, "");
        assert_eq!(args.cpus, 2);
        assert_eq!(args.seed, 9);
    }
}
