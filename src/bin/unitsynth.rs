//! unitsynth - inspect a voice database and concatenate units from it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use unitsynth::VoiceDatabase;

/// Unit-selection voice database tool.
#[derive(Parser, Debug)]
#[command(name = "unitsynth")]
#[command(about = "Inspect, query and concatenate from a unit-selection voice database")]
#[command(version)]
struct Cli {
    /// Database directory holding config.json, or a HuggingFace repo id with --hub
    #[arg(short, long, global = true, default_value = ".")]
    db: String,

    /// Download the database from the HuggingFace Hub
    #[arg(long, global = true)]
    hub: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print database summary
    Info,
    /// List unit ids matching feature=value conditions
    Query {
        /// Conditions, e.g. phone=a stressed=1
        #[arg(required = true)]
        conditions: Vec<String>,

        /// Deep-sort keys applied before the query (comma-separated)
        #[arg(long, value_delimiter = ',')]
        sort: Vec<String>,
    },
    /// Concatenate unit ids into a WAV file
    Synth {
        /// Unit ids, in order (comma-separated)
        #[arg(value_delimiter = ',', required = true)]
        units: Vec<u32>,

        /// Output WAV path
        #[arg(short = 'o', long, default_value = "output.wav")]
        output: PathBuf,
    },
}

fn open(cli: &Cli) -> Result<VoiceDatabase> {
    if cli.hub {
        unitsynth::download::load_from_hub(&cli.db)
    } else {
        VoiceDatabase::open(&PathBuf::from(&cli.db))
    }
}

fn parse_condition(s: &str) -> Result<(&str, &str)> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name, value)),
        _ => bail!("expected feature=value, got '{}'", s),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut db = open(&cli)?;

    match &cli.command {
        Command::Info => {
            let tl = db.timeline();
            println!("directory:    {}", db.dir().display());
            println!("sample rate:  {} Hz", tl.sample_rate());
            println!("content:      {:?}", tl.content_type());
            println!("datagrams:    {}", tl.num_datagrams());
            println!(
                "duration:     {:.2} s",
                tl.total_samples() as f64 / tl.sample_rate() as f64
            );
            println!("units:        {}", db.catalog().len());
            println!("features:");
            for f in db.index().schema().features() {
                println!("  {:<20} {} values", f.name, f.values.len());
            }
            if let Some(lex) = db.lexicon() {
                println!("lexicon:      {} words", lex.len());
            }
        }
        Command::Query { conditions, sort } => {
            let conditions = conditions
                .iter()
                .map(|c| parse_condition(c))
                .collect::<Result<Vec<_>>>()?;
            if !sort.is_empty() {
                let keys: Vec<&str> = sort.iter().map(String::as_str).collect();
                db.index_mut().deep_sort(&keys)?;
            }
            let ids = db.index().retrieve_where(&conditions)?;
            if ids.is_empty() {
                println!("no matching unit");
            }
            for id in ids {
                let seg = db.catalog().get(id)?;
                println!("{:>8}  offset {:>10}  duration {:>6}", id, seg.timeline_offset, seg.duration);
            }
        }
        Command::Synth { units, output } => {
            db.synthesize_to_file(units, output)
                .with_context(|| format!("Cannot synthesise to {}", output.display()))?;
        }
    }
    Ok(())
}
