// SPDX-License-Identifier: MPL-2.0

//! A simulated multi-CPU context-switch workload.
//!
//! Every simulated CPU owns a [`SoftTlb`]. A CPU repeatedly switches to a
//! random process, activates its memory space and touches a few of its pages.
//! A TLB hit is checked against the page table, which is a pure function of
//! the space and the page. Any mismatch means that a translation survived the
//! reuse of its tag.

use std::{fmt, sync::Arc};

use anyhow::{anyhow, ensure, Context};
use asid_alloc::{
    AsidAllocator, AsidConfig, AsidStatsSnapshot, MemorySpace, SpaceId, Tag, TranslationCache,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use soft_tlb::{Paddr, SoftTlb, Vaddr, PAGE_SIZE};
use spin::Mutex;

/// Pages touched on every context switch.
const ACCESSES_PER_SWITCH: usize = 4;

/// The largest space whose virtual addresses fit in 32 bits.
pub const MAX_PAGES_PER_SPACE: usize = 1 << 20;

/// The TLBs of all CPUs, flushed together.
///
/// A tag flush is a shootdown: it returns only after every CPU has dropped
/// the entries.
pub struct SmpTlb {
    cpus: Vec<SoftTlb>,
}

impl SmpTlb {
    pub fn new(nr_cpus: usize, entries_per_cpu: usize) -> Self {
        Self {
            cpus: (0..nr_cpus).map(|_| SoftTlb::new(entries_per_cpu)).collect(),
        }
    }

    pub fn cpu(&self, cpu: usize) -> &SoftTlb {
        &self.cpus[cpu]
    }
}

impl TranslationCache for SmpTlb {
    fn flush_tag(&self, tag: Tag) {
        for tlb in &self.cpus {
            tlb.flush_tag(tag);
        }
    }

    fn flush_all(&self) {
        for tlb in &self.cpus {
            tlb.flush_all();
        }
    }
}

/// The shape of a simulation run.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub nr_cpus: usize,
    pub nr_processes: usize,
    pub switches_per_cpu: usize,
    pub tlb_entries: usize,
    pub pages_per_space: usize,
    /// The probability that a process exits and is replaced after running.
    pub exit_ratio: f64,
    pub seed: u64,
}

/// The outcome of a simulation run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub switches: u64,
    pub exits: u64,
    pub tlb_hits: u64,
    pub tlb_misses: u64,
    /// TLB hits that returned another space's translation.
    pub stale_hits: u64,
    pub asid: AsidStatsSnapshot,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "context switches: {}", self.switches)?;
        writeln!(f, "process exits:    {}", self.exits)?;
        writeln!(f, "TLB hits:         {}", self.tlb_hits)?;
        writeln!(f, "TLB misses:       {}", self.tlb_misses)?;
        writeln!(f, "stale TLB hits:   {}", self.stale_hits)?;
        writeln!(f, "tag assignments:  {}", self.asid.assignments)?;
        writeln!(f, "fast path hits:   {}", self.asid.fast_path_hits)?;
        writeln!(f, "tag evictions:    {}", self.asid.evictions)?;
        writeln!(f, "tag releases:     {}", self.asid.releases)?;
        writeln!(f, "tag flushes:      {}", self.asid.tag_flushes)?;
        writeln!(f, "full flushes:     {}", self.asid.full_flushes)?;
        write!(f, "cursor wraps:     {}", self.asid.wraps)
    }
}

/// A process slot. The lock serializes the operations on one memory space,
/// which the allocator leaves to its callers.
struct Process {
    space: Arc<MemorySpace>,
}

/// The page table of every space: the pages of a space occupy the frames
/// right after those of the previous space.
///
/// Returns `None` if the frame lies beyond the physical address space.
fn page_table_walk(space: SpaceId, pages_per_space: usize, vaddr: Vaddr) -> Option<Paddr> {
    let vpn = u64::try_from(vaddr / PAGE_SIZE).ok()?;
    let frame = space
        .get()
        .checked_mul(u64::try_from(pages_per_space).ok()?)?
        .checked_add(vpn)?;
    let paddr = frame
        .checked_mul(PAGE_SIZE as u64)?
        .checked_add((vaddr % PAGE_SIZE) as u64)?;
    Paddr::try_from(paddr).ok()
}

/// Runs the workload and collects the counters.
pub fn run(config: &WorkloadConfig, asid_config: AsidConfig) -> anyhow::Result<Report> {
    ensure!(config.nr_cpus > 0, "at least one CPU is required");
    ensure!(config.nr_processes > 0, "at least one process is required");
    ensure!(config.tlb_entries > 0, "the TLB needs at least one entry");
    ensure!(config.pages_per_space > 0, "a space needs at least one page");
    ensure!(
        config.pages_per_space <= MAX_PAGES_PER_SPACE,
        "a space has at most {} pages",
        MAX_PAGES_PER_SPACE
    );
    ensure!(
        (0.0..=1.0).contains(&config.exit_ratio),
        "the exit ratio must be within [0, 1]"
    );

    let allocator = AsidAllocator::new(asid_config, SmpTlb::new(config.nr_cpus, config.tlb_entries));
    let processes: Vec<Mutex<Process>> = (0..config.nr_processes)
        .map(|_| {
            Mutex::new(Process {
                space: MemorySpace::new(),
            })
        })
        .collect();

    log::info!(
        "Running {} switches on each of {} CPUs over {} processes",
        config.switches_per_cpu,
        config.nr_cpus,
        config.nr_processes
    );

    // Every CPU is joined before the first failure is reported.
    let joined: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..config.nr_cpus)
            .map(|cpu| {
                let allocator = &allocator;
                let processes = &processes;
                scope.spawn(move || run_cpu(cpu, config, allocator, processes))
            })
            .collect();
        handles.into_iter().map(|handle| handle.join()).collect()
    });
    let per_cpu = joined
        .into_iter()
        .enumerate()
        .map(|(cpu, result)| result.map_err(|_| anyhow!("simulated CPU {} panicked", cpu))?)
        .collect::<anyhow::Result<Vec<_>>>()?;

    for process in &processes {
        allocator.release_tag(&process.lock().space);
    }

    let report = per_cpu.iter().fold(
        Report {
            asid: allocator.stats().snapshot(),
            ..Report::default()
        },
        |acc, cpu| Report {
            switches: acc.switches + cpu.switches,
            exits: acc.exits + cpu.exits,
            tlb_hits: acc.tlb_hits + cpu.tlb_hits,
            tlb_misses: acc.tlb_misses + cpu.tlb_misses,
            stale_hits: acc.stale_hits + cpu.stale_hits,
            ..acc
        },
    );
    Ok(report)
}

fn run_cpu(
    cpu: usize,
    config: &WorkloadConfig,
    allocator: &AsidAllocator<SmpTlb>,
    processes: &[Mutex<Process>],
) -> anyhow::Result<Report> {
    let mut rng = SmallRng::seed_from_u64(config.seed.wrapping_add(cpu as u64));
    let tlb = allocator.cache().cpu(cpu);
    let mut report = Report::default();

    for _ in 0..config.switches_per_cpu {
        let mut process = processes[rng.random_range(0..processes.len())].lock();
        let space = &process.space;

        allocator.activate(space, |tag| -> anyhow::Result<()> {
            for _ in 0..ACCESSES_PER_SWITCH {
                let vpn = rng.random_range(0..config.pages_per_space);
                let vaddr = vpn * PAGE_SIZE + rng.random_range(0..PAGE_SIZE);
                let expected = page_table_walk(space.id(), config.pages_per_space, vaddr)
                    .with_context(|| format!("no frame backs {:#x} of space {}", vaddr, space.id()))?;

                match tlb.lookup(tag, vaddr) {
                    Some(paddr) if paddr == expected => report.tlb_hits += 1,
                    Some(paddr) => {
                        log::error!(
                            "CPU {} read {:#x} for {:#x} of space {} under tag {}, expected {:#x}",
                            cpu,
                            paddr,
                            vaddr,
                            space.id(),
                            tag,
                            expected
                        );
                        report.stale_hits += 1;
                    }
                    None => {
                        report.tlb_misses += 1;
                        tlb.insert(tag, vaddr, expected);
                    }
                }
            }
            Ok(())
        })?;
        report.switches += 1;

        if rng.random_bool(config.exit_ratio) {
            allocator.release_tag(&process.space);
            log::debug!("Process with space {} exited on CPU {}", process.space.id(), cpu);
            process.space = MemorySpace::new();
            report.exits += 1;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod test {
    use super::*;

    fn small_workload() -> WorkloadConfig {
        WorkloadConfig {
            nr_cpus: 4,
            nr_processes: 12,
            switches_per_cpu: 500,
            tlb_entries: 16,
            pages_per_space: 8,
            exit_ratio: 0.05,
            seed: 7,
        }
    }

    #[test]
    fn no_stale_translations_under_pressure() {
        let report = run(&small_workload(), AsidConfig::new(4, 1).unwrap()).unwrap();

        assert_eq!(report.switches, 2000);
        assert_eq!(report.stale_hits, 0);
        assert_eq!(report.tlb_hits + report.tlb_misses, 2000 * ACCESSES_PER_SWITCH as u64);
        assert!(report.asid.evictions > 0);
        assert!(report.asid.wraps > 0);
        assert_eq!(report.asid.full_flushes, 1);
        assert_eq!(
            report.asid.tag_flushes,
            report.asid.evictions + report.asid.releases + report.asid.stale_slots
        );
    }

    #[test]
    fn roomy_tag_space_never_evicts() {
        let config = WorkloadConfig {
            exit_ratio: 0.0,
            ..small_workload()
        };
        let report = run(&config, AsidConfig::default()).unwrap();

        assert_eq!(report.stale_hits, 0);
        assert_eq!(report.exits, 0);
        assert_eq!(report.asid.evictions, 0);
        assert!(report.asid.assignments <= 12);
        assert!(report.tlb_hits > 0);
    }

    #[test]
    fn shootdown_reaches_every_cpu() {
        let tlb = SmpTlb::new(3, 4);
        let tag = Tag::new(5);
        for cpu in 0..3 {
            tlb.cpu(cpu).insert(tag, 0x1000, 0x2000);
            tlb.cpu(cpu).insert(Tag::new(6), 0x1000, 0x3000);
        }

        tlb.flush_tag(tag);
        for cpu in 0..3 {
            assert_eq!(tlb.cpu(cpu).lookup(tag, 0x1000), None);
            assert_eq!(tlb.cpu(cpu).lookup(Tag::new(6), 0x1000), Some(0x3000));
        }

        tlb.flush_all();
        assert!((0..3).all(|cpu| tlb.cpu(cpu).is_empty()));
    }

    #[test]
    fn spaces_never_share_frames() {
        // Other tests draw space IDs concurrently, so `b` may not directly follow `a`.
        let [a, b] = [(); 2].map(|_| MemorySpace::new());
        let adjacent = b.id().get() == a.id().get() + 1;

        let mut sizes = vec![1, 8, MAX_PAGES_PER_SPACE];
        if cfg!(target_pointer_width = "64") {
            sizes.push(3 << 20);
        }
        for pages in sizes {
            let last = (pages - 1) * PAGE_SIZE + 0x123;
            let end_of_a = page_table_walk(a.id(), pages, last).unwrap();
            let start_of_b = page_table_walk(b.id(), pages, 0x123).unwrap();
            assert!(end_of_a < start_of_b);
            if adjacent {
                assert_eq!(start_of_b - end_of_a, PAGE_SIZE);
            }
        }
    }

    #[test]
    fn unbacked_addresses_have_no_frame() {
        let [_, space] = [(); 2].map(|_| MemorySpace::new());
        assert!(space.id().get() > 0);

        let huge = usize::MAX / PAGE_SIZE;
        assert_eq!(page_table_walk(space.id(), huge, (huge - 1) * PAGE_SIZE), None);
    }

    #[test]
    fn report_carries_allocator_counters() {
        let config = WorkloadConfig {
            nr_cpus: 2,
            switches_per_cpu: 50,
            ..small_workload()
        };
        let report = run(&config, AsidConfig::new(4, 1).unwrap()).unwrap();

        // Every tag still bound at the end is released.
        assert!(report.asid.releases > 0);
        assert!(report.asid.assignments > 0);
        assert_eq!(report.asid.full_flushes, 1);
        assert_eq!(report.switches, 100);
    }

    #[test]
    fn rejects_bad_workloads() {
        let config = WorkloadConfig {
            nr_cpus: 0,
            ..small_workload()
        };
        assert!(run(&config, AsidConfig::default()).is_err());

        let config = WorkloadConfig {
            exit_ratio: 1.5,
            ..small_workload()
        };
        assert!(run(&config, AsidConfig::default()).is_err());

        let config = WorkloadConfig {
            pages_per_space: MAX_PAGES_PER_SPACE + 1,
            ..small_workload()
        };
        assert!(run(&config, AsidConfig::default()).is_err());
    }
}
