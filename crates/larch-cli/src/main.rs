use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use larch_access::read_access_widener;
use larch_remap::{invert_tiny_v1, read_tiny_v1, Remapper};

#[derive(Parser)]
#[command(name = "larch", version, about = "Mapping and access widener file utilities")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Swap the old and new name columns of a tiny-v1 mapping file
    InvertMap(InvertMapArgs),
    /// Validate a tiny-v1 mapping file and report conflicts
    CheckMap(CheckMapArgs),
    /// Validate an access widener file
    CheckWidener(CheckWidenerArgs),
}

#[derive(Args)]
struct InvertMapArgs {
    /// Mapping file to invert
    input: PathBuf,
    /// Where to write the inverted map
    output: PathBuf,
}

#[derive(Args)]
struct CheckMapArgs {
    /// Mapping file to validate
    input: PathBuf,
    /// Read the file with old and new names swapped
    #[arg(long)]
    reversed: bool,
}

#[derive(Args)]
struct CheckWidenerArgs {
    /// Widener file to validate
    input: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::InvertMap(args) => invert_map(&args),
        Command::CheckMap(args) => check_map(&args),
        Command::CheckWidener(args) => check_widener(&args),
    }
}

fn invert_map(args: &InvertMapArgs) -> Result<i32> {
    let input = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let output = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let mut writer = BufWriter::new(output);
    let records = invert_tiny_v1(BufReader::new(input), &mut writer)
        .with_context(|| format!("failed to invert {}", args.input.display()))?;
    writer.flush()?;
    println!("inverted {records} records into {}", args.output.display());
    Ok(0)
}

fn check_map(args: &CheckMapArgs) -> Result<i32> {
    let input = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let mut remapper = Remapper::new();
    match read_tiny_v1(BufReader::new(input), &mut remapper, args.reversed) {
        Ok(records) => {
            println!(
                "{}: {records} records, {} classes / {} fields / {} methods",
                args.input.display(),
                remapper.pending_classes(),
                remapper.pending_fields(),
                remapper.pending_methods()
            );
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}: {err}", args.input.display());
            Ok(1)
        }
    }
}

fn check_widener(args: &CheckWidenerArgs) -> Result<i32> {
    let input = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    match read_access_widener(BufReader::new(input)) {
        Ok(modifiers) => {
            println!("{}: {} modifiers", args.input.display(), modifiers.len());
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}: {err}", args.input.display());
            Ok(1)
        }
    }
}
