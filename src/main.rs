use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{warn, Level};

use cirrus::{RunReport, Scenario, ScenarioConfig};

/// Run the bundled broker/datacenter scenario on the dispatch kernel.
#[derive(Parser, Debug)]
#[command(name = "cirrus", version, about)]
struct Args {
    /// TOML scenario file. Defaults are used for anything it leaves out.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the number of VMs the broker creates.
    #[arg(long)]
    vms: Option<usize>,

    /// Override the number of cloudlets the broker submits.
    #[arg(long)]
    cloudlets: Option<usize>,

    /// Repeat the run and compare trace digests.
    #[arg(long, default_value_t = 1)]
    runs: usize,

    /// Log every dispatch.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => match ScenarioConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => ScenarioConfig::default(),
    };
    apply_overrides(&mut config, &args);

    println!("═══════════════════════════════════════════════════════");
    println!("  Cirrus: deterministic cloud simulation kernel");
    println!(
        "  {} datacenter(s), {} VMs, {} cloudlets",
        config.datacenters, config.vms, config.cloudlets
    );
    println!("═══════════════════════════════════════════════════════");
    println!();

    let mut digests = Vec::new();
    for run in 1..=args.runs.max(1) {
        match run_once(&config) {
            Ok(report) => {
                println!("  Run {}:", run);
                for line in report.to_string().lines() {
                    println!("    {}", line);
                }
                println!();
                digests.push(report.trace_digest);
            }
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if digests.len() > 1 {
        if same_trace(&digests) {
            println!("  ✓ All {} runs produced the same trace.", digests.len());
        } else {
            println!("  ✗ Trace digests differ between runs.");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

/// Fold command-line overrides into the loaded scenario.
fn apply_overrides(config: &mut ScenarioConfig, args: &Args) {
    if let Some(vms) = args.vms {
        config.vms = vms;
    }
    if let Some(cloudlets) = args.cloudlets {
        config.cloudlets = cloudlets;
    }
    // Comparing runs needs a digest from each of them.
    if args.runs > 1 && !config.kernel.record_trace {
        warn!("enabling trace recording to compare {} runs", args.runs);
        config.kernel.record_trace = true;
    }
}

/// Whether every run produced a digest and all digests agree.
fn same_trace(digests: &[Option<u64>]) -> bool {
    match digests.first() {
        Some(Some(first)) => digests.iter().all(|d| *d == Some(*first)),
        _ => false,
    }
}

fn run_once(config: &ScenarioConfig) -> cirrus::KernelResult<RunReport> {
    let mut scenario = Scenario::build(config)?;
    let report = scenario.run();
    if let Some(broker) = scenario.broker() {
        println!(
            "  broker: {} VMs placed, {}/{} cloudlets returned",
            broker.placements().len(),
            broker.results().len(),
            broker.submitted()
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus::KernelConfig;

    #[test]
    fn test_repeated_runs_record_traces() {
        let args = Args::parse_from(["cirrus", "--runs", "2", "--vms", "3"]);
        let mut config =
            ScenarioConfig::default().with_kernel(KernelConfig::default().with_trace(false));
        apply_overrides(&mut config, &args);
        assert_eq!(config.vms, 3);
        assert!(config.kernel.record_trace);
    }

    #[test]
    fn test_single_run_keeps_trace_setting() {
        let args = Args::parse_from(["cirrus"]);
        let mut config =
            ScenarioConfig::default().with_kernel(KernelConfig::default().with_trace(false));
        apply_overrides(&mut config, &args);
        assert!(!config.kernel.record_trace);
    }

    #[test]
    fn test_missing_digests_never_match() {
        assert!(same_trace(&[Some(7), Some(7)]));
        assert!(!same_trace(&[Some(7), Some(8)]));
        assert!(!same_trace(&[None, None]));
        assert!(!same_trace(&[Some(7), None]));
    }
}
