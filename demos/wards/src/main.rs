//! wards — hospital wards on a ring of patches.
//!
//! Every rank runs on its own thread and owns `--wards` patches.  Each ward
//! has a handful of beds (interactants) and one outgoing gate to the next
//! ward on a global ring, so transfers regularly cross rank boundaries.
//! Patients are admitted daily, hold a bed for a random length of stay,
//! then either transfer through the gate or are discharged.  Discharges are
//! reported as domain messages to a registry on ward 0 of rank 0.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, ensure};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, trace};
use tracing_subscriber::EnvFilter;

use ps_core::{Day, GblAddr, InteractantId, KernelConfig, Rank};
use ps_net::{ChannelTransport, Transport};
use ps_sched::{Agent, AgentCtx, TickInfo, Yield};
use ps_sim::{CycleSummary, GroupObserver, PatchGroupBuilder, RunSummary};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug, Clone)]
#[command(name = "wards")]
#[command(about = "Distributed ward-occupancy simulation on the patchsim kernel")]
struct Cli {
    /// Number of ranks (one thread each)
    #[arg(long, default_value = "2")]
    ranks: usize,

    /// Wards per rank
    #[arg(long, default_value = "3")]
    wards: u32,

    /// Beds per ward
    #[arg(long, default_value = "4")]
    beds: u32,

    /// Last simulated day
    #[arg(long, default_value = "60")]
    days: u64,

    /// Master seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Mean admissions per ward per day
    #[arg(long, default_value = "1.5")]
    arrivals: f64,

    /// Probability a leaving patient transfers instead of going home
    #[arg(long, default_value = "0.3")]
    transfer: f64,

    /// Maximum messages per transport chunk
    #[arg(long, default_value = "64")]
    max_chunk: usize,

    /// Print the per-rank reports as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

// ── Agents ────────────────────────────────────────────────────────────────────

/// Every patch's outgoing gate is connected before any bed is added.
const DOOR: InteractantId = InteractantId(0);

/// Sent to the registry when a patient goes home.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Discharge {
    day:       Day,
    wards:     u32,
    days_in:   u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum Step {
    Admit,
    Stay,
    Leave,
    Decide,
    Transfer,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Patient {
    name:      String,
    beds:      u32,
    bed:       Option<InteractantId>,
    step:      Step,
    admitted:  Day,
    wards:     u32,
    transfer:  f64,
    registry:  GblAddr,
}

impl Patient {
    fn run(&mut self, ctx: &mut AgentCtx<'_, WardAgent>) -> Yield {
        match self.step {
            Step::Admit => {
                let beds: Vec<InteractantId> = (1..=self.beds).map(InteractantId).collect();
                // Queue on a random bed when the ward is full.
                let bed = match ctx.first_free(&beds) {
                    Ok(b) => b,
                    Err(_) => match ctx.rng().choose(&beds) {
                        Some(&b) => b,
                        None => return Yield::Done,
                    },
                };
                self.bed = Some(bed);
                self.step = Step::Stay;
                Yield::Lock(bed)
            }
            Step::Stay => {
                self.step = Step::Leave;
                Yield::Sleep(ctx.rng().gen_range(2..=8))
            }
            Step::Leave => {
                self.step = Step::Decide;
                let Some(bed) = self.bed.take() else { return Yield::Done };
                Yield::Unlock(bed)
            }
            Step::Decide => {
                if ctx.rng().gen_bool(self.transfer) {
                    self.step = Step::Transfer;
                    return Yield::Lock(DOOR);
                }
                let now = ctx.now();
                ctx.send(self.registry, Discharge {
                    day:     now,
                    wards:   self.wards,
                    days_in: now.since(self.admitted),
                });
                Yield::Done
            }
            // Resumed in the next ward.
            Step::Transfer => {
                self.step = Step::Admit;
                self.run(ctx)
            }
        }
    }
}

/// Spawns the day's admissions, then sleeps until tomorrow.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Admissions {
    mean:      f64,
    beds:      u32,
    transfer:  f64,
    registry:  GblAddr,
    admitted:  u64,
}

impl Admissions {
    fn run(&mut self, ctx: &mut AgentCtx<'_, WardAgent>) -> Yield {
        let whole = self.mean.floor();
        let n = whole as u64 + u64::from(ctx.rng().gen_bool(self.mean - whole));
        let now = ctx.now();
        for _ in 0..n {
            self.admitted += 1;
            ctx.spawn(
                WardAgent::Patient(Patient {
                    name:     format!("{}#{}", ctx.owner(), self.admitted),
                    beds:     self.beds,
                    bed:      None,
                    step:     Step::Admit,
                    admitted: now,
                    wards:    1,
                    transfer: self.transfer,
                    registry: self.registry,
                }),
                now,
            );
        }
        Yield::Sleep(1)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum WardAgent {
    Admissions(Admissions),
    Patient(Patient),
}

impl Agent for WardAgent {
    type Message = Discharge;

    fn name(&self) -> &str {
        match self {
            WardAgent::Admissions(_) => "admissions",
            WardAgent::Patient(p) => &p.name,
        }
    }

    fn run(&mut self, ctx: &mut AgentCtx<'_, Self>) -> Yield {
        match self {
            WardAgent::Admissions(a) => a.run(ctx),
            WardAgent::Patient(p) => p.run(ctx),
        }
    }

    fn on_rehome(&mut self, _from: GblAddr, _to: GblAddr) {
        if let WardAgent::Patient(p) = self {
            p.wards += 1;
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize)]
struct Registry {
    discharged:  u64,
    total_days:  u64,
    transferred: u64,
    last_day:    Option<Day>,
}

// ── Observer ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Progress {
    frozen_slices: u64,
}

impl GroupObserver for Progress {
    fn on_patch_slice(&mut self, status: &ps_sim::PatchStatus, _end: ps_sim::SliceEnd) {
        if status.frozen {
            self.frozen_slices += 1;
        }
    }

    fn on_cycle_end(&mut self, summary: &CycleSummary) {
        if summary.cycle % 10 == 0 {
            debug!(cycle = summary.cycle, clock = %summary.clock, finished = summary.finished(), "progress");
        }
    }
}

#[derive(Debug, Serialize)]
struct RankReport {
    rank:            u32,
    cycles:          u64,
    patients:        usize,
    departures:      u64,
    arrivals:        u64,
    messages:        u64,
    clamped_batches: u64,
    undelivered:     usize,
    chunks_sent:     u64,
    frozen_slices:   u64,
}

impl RankReport {
    fn new(s: &RunSummary, p: &Progress) -> Self {
        Self {
            rank:            s.rank.0,
            cycles:          s.cycles,
            // The admissions agent of every ward is still scheduled.
            patients:        s.agents().saturating_sub(s.patches.len()),
            departures:      s.stats.departures,
            arrivals:        s.stats.arrivals,
            messages:        s.stats.messages,
            clamped_batches: s.clamped_batches,
            undelivered:     s.undelivered,
            chunks_sent:     s.net.chunks_sent,
            frozen_slices:   p.frozen_slices,
        }
    }
}

// ── Per-rank setup ────────────────────────────────────────────────────────────

fn ring(cli: &Cli) -> Vec<GblAddr> {
    (0..cli.ranks as u32)
        .flat_map(|r| (0..cli.wards).map(move |w| GblAddr::patch(Rank(r), w)))
        .collect()
}

fn run_rank(cli: &Cli, transport: ChannelTransport, registry: Arc<Mutex<Registry>>) -> Result<RankReport> {
    let rank = transport.rank();
    let _span = info_span!("rank", r = rank.0).entered();

    let config = KernelConfig {
        seed:                cli.seed,
        last_day:            Day(cli.days),
        max_items_per_chunk: cli.max_chunk,
        max_cycles:          Some(cli.days * 4 + 100),
        ..KernelConfig::default()
    };
    let mut b = PatchGroupBuilder::new(config, transport);

    let all = ring(cli);
    let home = all[0];
    for w in 0..cli.wards {
        b.add_patch(w, format!("ward {}.{w}", rank.0))?;
    }

    // Same gate order on every rank.
    for (i, &from) in all.iter().enumerate() {
        let to = all[(i + 1) % all.len()];
        let gate = b.connect(from, to)?;
        if let Some(door) = gate.entrance {
            ensure!(door == DOOR, "gate {} got interactant {door}", gate.src);
        }
    }

    for w in 0..cli.wards {
        let ward = GblAddr::patch(rank, w);
        for bed in 0..cli.beds {
            b.add_interactant(ward, format!("bed {bed}"))?;
        }
        b.add_agent(
            ward,
            WardAgent::Admissions(Admissions {
                mean:     cli.arrivals,
                beds:     cli.beds,
                transfer: cli.transfer,
                registry: home,
                admitted: 0,
            }),
            Day::ZERO,
        )?;
        b.add_tick_callback(
            ward,
            Box::new(|t: &TickInfo| trace!(patch = %t.patch, from = %t.before, to = %t.after, "day")),
        )?;
    }

    if home.rank == rank {
        for &src in &all {
            let reg = Arc::clone(&registry);
            b.on_message(src, home, move |_patch, _src, d: Discharge| {
                let mut reg = reg.lock().map_err(|_| ps_core::KernelError::protocol("registry poisoned"))?;
                reg.discharged += 1;
                reg.total_days += d.days_in;
                reg.transferred += u64::from(d.wards > 1);
                reg.last_day = Some(reg.last_day.map_or(d.day, |l| l.max(d.day)));
                Ok(())
            })?;
        }
    }

    let mut group = b.build()?;
    let mut progress = Progress::default();
    let summary = group.run(&mut progress)?;
    Ok(RankReport::new(&summary, &progress))
}

// ── main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    ensure!(cli.ranks >= 1, "need at least one rank");
    ensure!(cli.ranks as u64 * u64::from(cli.wards) >= 2, "the ring needs at least two wards");
    ensure!(cli.beds >= 1, "every ward needs a bed");

    info!(ranks = cli.ranks, wards = cli.wards, beds = cli.beds, days = cli.days, seed = cli.seed, "wards starting");

    let registry = Arc::new(Mutex::new(Registry::default()));
    let t0 = Instant::now();

    let reports: Vec<RankReport> = thread::scope(|s| {
        let handles: Vec<_> = ChannelTransport::mesh(cli.ranks)
            .into_iter()
            .map(|t| {
                let cli = &cli;
                let registry = Arc::clone(&registry);
                s.spawn(move || run_rank(cli, t, registry))
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(r, h)| {
                h.join()
                    .map_err(|_| anyhow!("rank {r} panicked"))?
                    .with_context(|| format!("rank {r} failed"))
            })
            .collect::<Result<_>>()
    })?;

    let elapsed = t0.elapsed();
    let registry = registry.lock().map_err(|_| anyhow!("registry poisoned"))?.clone();

    if cli.json {
        let out = serde_json::json!({ "ranks": reports, "registry": registry });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Simulation complete in {:.3} s", elapsed.as_secs_f64());
    println!();
    println!(
        "{:<6} {:>7} {:>9} {:>8} {:>8} {:>8} {:>8} {:>7}",
        "Rank", "Cycles", "Patients", "Out", "In", "Msgs", "Clamped", "Frozen"
    );
    println!("{}", "-".repeat(68));
    for r in &reports {
        println!(
            "{:<6} {:>7} {:>9} {:>8} {:>8} {:>8} {:>8} {:>7}",
            r.rank, r.cycles, r.patients, r.departures, r.arrivals, r.messages, r.clamped_batches, r.frozen_slices
        );
    }
    println!();
    let mean_stay = if registry.discharged > 0 {
        registry.total_days as f64 / registry.discharged as f64
    } else {
        0.0
    };
    println!(
        "Discharged: {}  (transferred at least once: {})  mean stay: {:.2} days",
        registry.discharged, registry.transferred, mean_stay
    );
    let undelivered: usize = reports.iter().map(|r| r.undelivered).sum();
    if undelivered > 0 {
        println!("Discharges still in flight at shutdown: {undelivered}");
    }

    Ok(())
}
