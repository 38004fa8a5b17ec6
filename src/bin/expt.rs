//! Driver binary: import integrals, run the requested sorting, and leave a
//! HEFF file behind.
//!
//! The input file is a small line-oriented script:
//!
//! ```text
//! # paths to the integral files
//! mrconee MRCONEE
//! mdcint  MDCINT
//!
//! memory 1024          # MiB ceiling
//! tile_size 32
//! disk_level 0
//! sector 0 0
//! active_energy -10.0 10.0
//!
//! request hh   hh   00   12
//! request hhpp hhpp 0000 1234
//! ```
//!
//! The sector amplitude equations themselves are clients of the library;
//! this driver covers the import pipeline and the checkpoint surface.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;

use rfscc::arith::Arith;
use rfscc::engine::{Engine, EngineOptions};
use rfscc::heff::write_heff_0h0p;
use rfscc::mrconee::{read_mrconee, MrconeeData};
use rfscc::spinors::SpinorRegistry;
use rfscc::Scalar;

#[derive(Parser, Debug)]
#[command(name = "expt", version, about = "relativistic FS-MRCC tensor engine driver")]
struct Cli {
    /// Do not remove the scratch directory on exit.
    #[arg(short = 'n', long = "no-clean")]
    no_clean: bool,

    /// Scratch directory (default ./scratch).
    #[arg(short = 's', long = "scratch")]
    scratch: Option<PathBuf>,

    /// Input file.
    input: PathBuf,
}

#[derive(Debug, Default)]
struct Input {
    mrconee: Option<PathBuf>,
    mdcint: Option<PathBuf>,
    mdprop: Option<PathBuf>,
    memory_mb: Option<usize>,
    tile_size: Option<usize>,
    disk_level: Option<u8>,
    nthreads: Option<usize>,
    sector: (usize, usize),
    active_energy: Option<(f64, f64)>,
    requests: Vec<(String, String, String, String)>,
}

fn parse_input(path: &PathBuf) -> anyhow::Result<Input> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read input file {path:?}"))?;
    let mut input = Input::default();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let err = || format!("input line {}: cannot parse '{raw}'", lineno + 1);
        match words[0] {
            "mrconee" if words.len() == 2 => input.mrconee = Some(PathBuf::from(words[1])),
            "mdcint" if words.len() == 2 => input.mdcint = Some(PathBuf::from(words[1])),
            "mdprop" if words.len() == 2 => input.mdprop = Some(PathBuf::from(words[1])),
            "memory" if words.len() == 2 => {
                input.memory_mb = Some(words[1].parse().with_context(err)?)
            }
            "tile_size" if words.len() == 2 => {
                input.tile_size = Some(words[1].parse().with_context(err)?)
            }
            "disk_level" if words.len() == 2 => {
                input.disk_level = Some(words[1].parse().with_context(err)?)
            }
            "nthreads" if words.len() == 2 => {
                input.nthreads = Some(words[1].parse().with_context(err)?)
            }
            "sector" if words.len() == 3 => {
                input.sector = (
                    words[1].parse().with_context(err)?,
                    words[2].parse().with_context(err)?,
                )
            }
            "active_energy" if words.len() == 3 => {
                input.active_energy = Some((
                    words[1].parse().with_context(err)?,
                    words[2].parse().with_context(err)?,
                ))
            }
            "request" if words.len() == 5 => input.requests.push((
                words[1].to_string(),
                words[2].to_string(),
                words[3].to_string(),
                words[4].to_string(),
            )),
            _ => bail!("{}", err()),
        }
    }
    Ok(input)
}

fn build_options(input: &Input, scratch: PathBuf) -> EngineOptions {
    let mut opts = EngineOptions {
        scratch_dir: scratch,
        sector: input.sector,
        ..EngineOptions::default()
    };
    if let Some(mb) = input.memory_mb {
        opts.memory_limit = mb * 1024 * 1024;
    }
    if let Some(t) = input.tile_size {
        opts.tile_size = t;
    }
    if let Some(d) = input.disk_level {
        opts.disk_level = d;
    }
    if let Some(n) = input.nthreads {
        opts.nthreads = n;
    }
    opts
}

fn run_engine<T: Scalar>(
    input: &Input,
    data: &MrconeeData,
    opts: EngineOptions,
) -> anyhow::Result<()> {
    let symmetry = data.symmetry_registry()?;
    let mut spinors =
        SpinorRegistry::new(&data.spinor_irreps, &data.spinor_energies, &data.occ_numbers)?;
    if let Some((emin, emax)) = input.active_energy {
        spinors.set_active_energy(emin, emax);
    }
    let mut engine: Engine<T> = Engine::new(symmetry, spinors, opts)?;

    for (name, qparts, valence, order) in &input.requests {
        engine.request_sorting(name, qparts, valence, order)?;
    }
    engine.perform_sorting(data, input.mdcint.as_deref())?;

    if let Some(mdprop) = &input.mdprop {
        let props = rfscc::mdprop::read_mdprop(mdprop)?;
        tracing::info!(count = props.len(), "property matrices imported");
    }

    for (name, ..) in &input.requests {
        engine.summary(name)?;
    }
    engine.report_state();

    write_heff_0h0p("HEFF", T::ARITH, data.scf_energy)?;
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let input = parse_input(&cli.input)?;
    let scratch = cli
        .scratch
        .clone()
        .unwrap_or_else(|| PathBuf::from("scratch"));

    let mrconee_path = input
        .mrconee
        .as_ref()
        .context("input file names no one-electron integral file (mrconee)")?;
    let data = read_mrconee(mrconee_path)?;
    tracing::info!(
        spinors = data.num_spinors,
        irreps = data.num_irreps,
        arith = %data.arith(),
        scf_energy = data.scf_energy,
        "one-electron integrals imported"
    );

    let opts = build_options(&input, scratch.clone());
    match data.arith() {
        Arith::Real => run_engine::<f64>(&input, &data, opts)?,
        Arith::Complex => run_engine::<rfscc::Complex64>(&input, &data, opts)?,
    }

    if !cli.no_clean {
        if let Err(e) = std::fs::remove_dir_all(&scratch) {
            tracing::debug!(error = %e, "scratch directory not removed");
        }
    }
    Ok(())
}
