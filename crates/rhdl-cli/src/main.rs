use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use log::info;
use miette::{bail, IntoDiagnostic, Result};
use rhdl::{flatten, BehavioralIr, GateIr, GateSimulator, IrBundle, VcdWriter};

#[derive(Parser)]
#[command(name = "rhdl", version, about = "RHDL lowering and simulation driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inline a module bundle into a single flat behavioral IR.
    Flatten {
        /// Bundle JSON (`{ "top": ..., "modules": [...] }`).
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Lower behavioral IR (flat module or bundle) to a gate-level netlist.
    Lower {
        input: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print netlist statistics.
    Info { input: PathBuf },
    /// Run a gate-level netlist for a number of clock cycles.
    Run {
        /// Gate IR JSON.
        input: PathBuf,
        #[arg(short, long, default_value_t = 1)]
        ticks: u64,
        /// Input assignments `name=value`, applied before the first tick.
        #[arg(short, long)]
        poke: Vec<String>,
        /// Write a waveform of all ports, one timestep per tick.
        #[arg(long)]
        vcd: Option<PathBuf>,
        #[arg(long, default_value_t = 1)]
        lanes: usize,
    },
}

fn load_behavioral(path: &Path) -> Result<BehavioralIr> {
    let text = fs::read_to_string(path).into_diagnostic()?;
    if let Ok(bundle) = IrBundle::from_json(&text) {
        return flatten(&bundle).into_diagnostic();
    }
    let ir = BehavioralIr::from_json(&text).into_diagnostic()?;
    if ir.is_flat() {
        Ok(ir)
    } else {
        bail!("`{}` has instances but no module bundle; flatten it first", ir.name)
    }
}

fn write_or_print(output: Option<PathBuf>, text: String) -> Result<()> {
    match output {
        Some(path) => fs::write(path, text).into_diagnostic(),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Flatten { input, output } => {
            let flat = load_behavioral(&input)?;
            info!("flattened `{}`", flat.name);
            write_or_print(output, flat.to_json())
        }
        Command::Lower { input, output } => {
            let flat = load_behavioral(&input)?;
            let gate = rhdl::lower(&flat).into_diagnostic()?;
            info!(
                "lowered `{}`: {} nets, {} gates, {} dffs",
                gate.name,
                gate.net_count,
                gate.gate_count(),
                gate.dff_count()
            );
            write_or_print(output, gate.to_json())
        }
        Command::Info { input } => {
            let text = fs::read_to_string(&input).into_diagnostic()?;
            let gate = GateIr::from_json(&text).into_diagnostic()?;
            println!("module:  {}", gate.name);
            println!("nets:    {}", gate.net_count);
            println!("gates:   {}", gate.gate_count());
            println!("dffs:    {}", gate.dff_count());
            println!("inputs:  {}", gate.inputs.iter().map(|g| g.name.as_str()).collect::<Vec<_>>().join(", "));
            println!("outputs: {}", gate.outputs.iter().map(|g| g.name.as_str()).collect::<Vec<_>>().join(", "));
            Ok(())
        }
        Command::Run { input, ticks, poke, vcd, lanes } => {
            let text = fs::read_to_string(&input).into_diagnostic()?;
            let gate = GateIr::from_json(&text).into_diagnostic()?;
            let mut sim = GateSimulator::new(gate, lanes).into_diagnostic()?;

            for assignment in &poke {
                let Some((name, value)) = assignment.split_once('=') else {
                    bail!("poke `{assignment}` is not of the form name=value");
                };
                let value = parse_value(value)?;
                sim.poke(name, value).into_diagnostic()?;
            }

            let mut signals: Vec<(String, usize)> = Vec::new();
            for name in sim.input_names().into_iter().chain(sim.output_names()) {
                let width = sim.peek(&name).map(|bits| bits.len()).unwrap_or(1);
                signals.push((name, width));
            }
            let mut wave = match vcd {
                Some(path) => Some(VcdWriter::new(path, &signals).into_diagnostic()?),
                None => None,
            };

            sim.evaluate();
            for t in 0..ticks {
                sim.tick();
                if let Some(wave) = wave.as_mut() {
                    wave.dump(t, |name| sim.peek_lane(name, 0).unwrap_or(0))
                        .into_diagnostic()?;
                }
            }
            for name in sim.output_names() {
                println!("{name} = {:#x}", sim.peek_lane(&name, 0).into_diagnostic()?);
            }
            Ok(())
        }
    }
}

fn parse_value(text: &str) -> Result<u64> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = text.strip_prefix("0b") {
        u64::from_str_radix(bin, 2)
    } else {
        text.parse()
    };
    parsed.into_diagnostic()
}
