//! Reference CLI for the budget allocator core.
//!
//! # Usage
//!
//! ```bash
//! allocate --budget 50000 --goal revenue
//! allocate --budget 50000 --goal demos --min google=0.1,meta=0.1 --max tiktok=0.3
//! allocate --budget 50000 --goal cac --assumptions assumptions.json --quiet
//! ```
//!
//! Reads run options from `BUDGET_ALLOCATOR_CONFIG` / `budget_allocator.toml`
//! the same way [`budget_allocator_core::config::load`] does; CLI flags only
//! ever describe the request (budget, goal, constraints), never the
//! optimizer's internal knobs.

use anyhow::{Context, Result};
use budget_allocator_core::config;
use budget_allocator_core::pipeline::{CancellationToken, Collaborators, EventBus, OptimizeRequest, PipelineController};
use budget_allocator_core::types::{Assumptions, Channel, ChannelMap, Goal};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "allocate")]
#[command(about = "Allocate a paid-media budget across google/meta/tiktok/linkedin")]
#[command(version)]
struct CliArgs {
    /// Total budget to allocate, in currency units.
    #[arg(long)]
    budget: f64,

    /// Objective to optimize for.
    #[arg(long, value_enum, default_value = "demos")]
    goal: GoalArg,

    /// Average deal size, used only when `--goal revenue`. Defaults to 1000.
    #[arg(long)]
    avg_deal_size: Option<f64>,

    /// Per-channel minimum share, e.g. `google=0.1,meta=0.2`. Unlisted
    /// channels default to 0.
    #[arg(long, value_delimiter = ',')]
    min: Vec<String>,

    /// Per-channel maximum share, e.g. `tiktok=0.3`. Unlisted channels
    /// default to 1.0.
    #[arg(long, value_delimiter = ',')]
    max: Vec<String>,

    /// Load `Assumptions` from a JSON file instead of `--goal`/`--min`/`--max`.
    /// CLI flags are ignored when this is set.
    #[arg(long, conflicts_with_all = ["goal", "avg_deal_size", "min", "max"])]
    assumptions: Option<PathBuf>,

    /// Path to an `OptimizeOptions` TOML file (overrides the env var / cwd lookup).
    #[arg(long)]
    options: Option<PathBuf>,

    /// Suppress stage-progress lines on stderr; print only the final JSON.
    #[arg(long)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum GoalArg {
    Demos,
    Revenue,
    Cac,
}

impl From<GoalArg> for Goal {
    fn from(g: GoalArg) -> Self {
        match g {
            GoalArg::Demos => Goal::Demos,
            GoalArg::Revenue => Goal::Revenue,
            GoalArg::Cac => Goal::Cac,
        }
    }
}

fn parse_channel_shares(entries: &[String]) -> Result<ChannelMap<f64>> {
    let mut map = ChannelMap::zero();
    for entry in entries {
        let (name, value) = entry
            .split_once('=')
            .with_context(|| format!("expected `channel=share`, got `{entry}`"))?;
        let channel = Channel::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name.trim()))
            .with_context(|| format!("unknown channel `{name}`"))?;
        let share: f64 = value.trim().parse().with_context(|| format!("invalid share `{value}` for {name}"))?;
        map.set(channel, share);
    }
    Ok(map)
}

fn build_assumptions(args: &CliArgs) -> Result<Assumptions> {
    if let Some(path) = &args.assumptions {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let assumptions: Assumptions =
            serde_json::from_str(&raw).with_context(|| format!("parsing {} as Assumptions", path.display()))?;
        return Ok(assumptions);
    }
    let mut max_pct = ChannelMap::filled(1.0);
    // Unlisted channels keep the 1.0 default; only explicitly-named ones are overridden.
    for entry in &args.max {
        if let Some((name, value)) = entry.split_once('=') {
            if let Some(c) = Channel::ALL.into_iter().find(|c| c.as_str().eq_ignore_ascii_case(name.trim())) {
                max_pct.set(c, value.trim().parse().with_context(|| format!("invalid share `{value}`"))?);
            }
        }
    }
    Ok(Assumptions {
        goal: args.goal.into(),
        budget: args.budget,
        avg_deal_size: args.avg_deal_size,
        min_pct: parse_channel_shares(&args.min)?,
        max_pct,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let assumptions = build_assumptions(&args)?;
    assumptions.validate().map_err(anyhow::Error::msg)?;

    let options = config::load(args.options.as_deref())?;
    let request = OptimizeRequest { budget: args.budget, assumptions, options, priors: None };

    let controller = PipelineController::new(Collaborators::default());
    let mut bus = EventBus::new();
    let mut progress = (!args.quiet).then(|| bus.subscribe());
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("received ctrl-c, cancelling run");
        shutdown.cancel();
    });

    let progress_task = progress.take().map(|mut sub| {
        tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                info!(stage = ?event.stage_id, kind = ?event.kind, "{:?}", event.payload);
            }
        })
    });

    let (pipeline, result) = controller.run(request, &bus, cancel).await?;
    drop(bus);
    if let Some(task) = progress_task {
        let _ = task.await;
    }

    match result {
        Some(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        None => {
            eprintln!("optimization did not complete: status={}", pipeline.status);
            for stage in &pipeline.failed_stages {
                eprintln!("  failed stage: {stage}");
            }
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_channel_shares() {
        let shares = parse_channel_shares(&["google=0.2".to_string(), "meta=0.3".to_string()]).unwrap();
        assert_eq!(*shares.get(Channel::Google), 0.2);
        assert_eq!(*shares.get(Channel::Meta), 0.3);
        assert_eq!(*shares.get(Channel::Tiktok), 0.0);
    }

    #[test]
    fn rejects_unknown_channel_name() {
        assert!(parse_channel_shares(&["bing=0.1".to_string()]).is_err());
    }

    #[test]
    fn rejects_malformed_entry() {
        assert!(parse_channel_shares(&["google0.1".to_string()]).is_err());
    }
}
