//! Gatesim - Digital Logic Simulator
//!
//! Builds one of the bundled demo circuits, drives its input pins and prints
//! the probed pins after every clock tick.
//!
//! # Usage
//!
//! ```bash
//! gatesim list
//! gatesim run counter --ticks 16 --probe count
//! gatesim run adder --set a=5 --set b=9 --probe sum --probe carry
//! gatesim --log gatesim_core=debug run ring --ticks 4
//! ```

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use gatesim_core::{
    demos, error::Result, sim::DEFAULT_OSCILLATION_BOUND, BitWidth, Project, Propagator, SimError, Simulator,
    SimulatorConfig, SimulatorEvent, Value,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Digital logic circuit simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log filter, e.g. "info" or "gatesim_core=debug" (default: $RUST_LOG, else warn)
    #[arg(long, value_name = "FILTER", global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate a demo circuit
    Run(RunArgs),
    /// List the demo circuits
    List,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Demo circuit to simulate
    #[arg(value_name = "DEMO")]
    demo: String,

    /// Number of clock ticks to run
    #[arg(short, long, default_value_t = 8)]
    ticks: u32,

    /// Output pin to print (repeatable; default: every output pin)
    #[arg(short, long, value_name = "LABEL")]
    probe: Vec<String>,

    /// Drive an input pin before running, as LABEL=NUMBER
    #[arg(short, long, value_name = "LABEL=NUMBER")]
    set: Vec<String>,

    /// Steps a settle may take before it counts as oscillating
    #[arg(long, default_value_t = DEFAULT_OSCILLATION_BOUND)]
    oscillation_bound: usize,

    /// Run on the background simulator at this many ticks per second
    /// instead of stepping ticks directly
    #[arg(long, value_name = "HZ")]
    realtime: Option<f64>,
}

fn parse_assignment(text: &str) -> Result<(String, Value)> {
    let invalid = || SimError::invalid_attribute("Pin", "value", format!("expected LABEL=NUMBER, got {:?}", text));
    let (label, number) = text.split_once('=').ok_or_else(invalid)?;
    let number = number.trim();
    let bits = match number.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => number.parse(),
    }
    .map_err(|_| invalid())?;
    let width = BitWidth::new(Value::MAX_WIDTH)?;
    Ok((label.trim().to_string(), Value::known(width, bits)))
}

fn print_probes(prop: &Propagator, probes: &[String]) {
    let structure = prop.root_state().structure().clone();
    let mut line = format!("t={:<4}", prop.clock());
    for label in probes {
        let value = match structure.pin_named(label) {
            Some(pin) => prop.value(pin.location()),
            None => Value::NIL,
        };
        line.push_str(&format!(" {}={}", label, value));
        if let Some(n) = value.to_u64().filter(|_| value.len() > 1) {
            line.push_str(&format!(" ({})", n));
        }
    }
    println!("{}", line);
}

fn run_direct(mut prop: Propagator, args: &RunArgs, probes: &[String]) -> Result<()> {
    let first = prop.propagate()?;
    if first.is_oscillating() {
        warn!("circuit oscillates before the first tick");
    }
    print_probes(&prop, probes);
    for _ in 0..args.ticks {
        let outcome = prop.tick(1)?;
        print_probes(&prop, probes);
        if outcome.is_oscillating() {
            warn!(clock = prop.clock(), "stopping: circuit oscillates");
            break;
        }
    }
    Ok(())
}

fn run_realtime(prop: Propagator, frequency: f64, args: &RunArgs, probes: &[String]) -> Result<()> {
    let config = SimulatorConfig::new()
        .with_tick_frequency(frequency)
        .with_oscillation_bound(args.oscillation_bound);
    let mut sim = Simulator::new(config)?;
    let (tx, rx) = crossbeam::channel::unbounded();
    sim.add_listener(move |event| {
        let _ = tx.send(*event);
    });
    sim.attach(Some(prop));
    sim.set_ticking(true)?;
    sim.set_running(true)?;

    let patience = Duration::from_secs_f64((4.0 / frequency).max(1.0));
    let mut seen = 0;
    while seen < args.ticks {
        match rx.recv_timeout(patience) {
            Ok(SimulatorEvent::TickCompleted) => {
                seen += 1;
                sim.with_propagator(|p| print_probes(p, probes));
            }
            Ok(_) if !sim.is_running() => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    if sim.fault_encountered() {
        warn!("simulation stopped on a component fault");
    }
    sim.shutdown();
    Ok(())
}

fn run(args: &RunArgs) -> Result<()> {
    let config = SimulatorConfig::new().with_oscillation_bound(args.oscillation_bound);
    let project = Project::new(config)?;
    let circuit = demos::build(&project, &args.demo).ok_or_else(|| {
        SimError::config(format!(
            "unknown demo {:?} (choose one of {})",
            args.demo,
            demos::DEMOS.join(", ")
        ))
    })??;

    for issue in project.validate(&circuit) {
        warn!(%issue, "circuit problem");
    }

    let probes: Vec<String> = if args.probe.is_empty() {
        let structure = circuit.snapshot();
        structure
            .components()
            .filter_map(|c| c.kind().as_pin())
            .filter(|p| p.is_output())
            .map(|p| p.label().to_string())
            .collect()
    } else {
        args.probe.clone()
    };

    let mut prop = project.new_propagator(&circuit);
    for assignment in &args.set {
        let (label, value) = parse_assignment(assignment)?;
        prop.poke_pin_named(&label, value)?;
    }
    info!(demo = %args.demo, ticks = args.ticks, "simulating");

    match args.realtime {
        Some(frequency) => run_realtime(prop, frequency, args, &probes),
        None => run_direct(prop, args, &probes),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log {
        Some(directives) => EnvFilter::try_new(directives).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter.unwrap_or_else(|| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Command::Run(args) => run(args),
        Command::List => {
            for name in demos::DEMOS {
                println!("{}", name);
            }
            Ok(())
        }
    }
}
