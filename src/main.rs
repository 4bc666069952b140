extern crate hem_envelope;

use clap::Parser;
use hem_envelope::output::FileOutput;
use hem_envelope::{run_project, DEFAULT_MAX_ITERATIONS};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct EnvelopeArgs {
    /// model description (JSON)
    input_file: String,
    /// per-step boundary conditions (JSON array)
    conditions_file: String,
    /// directory for the results; defaults to the directory of the input file
    #[arg(long, short)]
    output_dir: Option<PathBuf>,
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    max_iterations: u32,
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = EnvelopeArgs::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let input_path = Path::new(&args.input_file);
    let input_stem = input_path
        .file_stem()
        .ok_or_else(|| anyhow::anyhow!("Could not determine input file name"))?
        .to_string_lossy()
        .to_string();
    let output_dir = match args.output_dir {
        Some(dir) => dir,
        None => input_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };
    let file_output = FileOutput::new(output_dir, format!("{input_stem}__{{}}.csv"));

    let results = run_project(
        BufReader::new(File::open(input_path)?),
        BufReader::new(File::open(Path::new(&args.conditions_file))?),
        file_output,
        args.max_iterations,
    )?;

    let unconverged = results.steps.iter().filter(|step| !step.converged).count();
    info!(
        "Ran {} timestep(s) over {} room(s); {unconverged} step(s) hit the iteration cap",
        results.steps.len(),
        results.room_names.len()
    );

    Ok(())
}
