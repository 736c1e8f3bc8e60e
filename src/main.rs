use anyhow::{Context, bail};
use autodag::fixture::{self, FixtureSpec, Severity};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "autodag")]
#[command(about = "Field-driven Data Access Group assignment", long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a fixture's save events and print the host calls they caused.
    Replay {
        #[arg(long)]
        fixture: String,

        /// Write the JSON report here instead of stdout.
        #[arg(short = 'o', long)]
        out: Option<String>,
    },
    /// Check a fixture's settings and groups for problems.
    Check {
        #[arg(long)]
        fixture: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.cmd {
        Commands::Replay { fixture: path, out } => {
            let spec = load_fixture(&path)?;
            let validated = spec.validate_and_build()?;

            let report = fixture::replay(&validated);
            let json = serde_json::to_string_pretty(&report)?;

            match out {
                Some(out) => {
                    std::fs::write(&out, json).with_context(|| format!("write report {}", out))?;
                    println!("Wrote {}", out);
                }
                None => println!("{}", json),
            }
        }
        Commands::Check { fixture: path } => {
            let spec = load_fixture(&path)?;
            let validated = spec.validate_and_build()?;

            let instruments: Vec<&str> = spec.instruments.keys().map(String::as_str).collect();
            let problems = fixture::check(&validated.host, &instruments);

            for p in &problems {
                let tag = match p.severity {
                    Severity::Error => "error",
                    Severity::Warning => "warning",
                };
                println!("{}: {}", tag, p.message);
            }

            let errors = problems
                .iter()
                .filter(|p| p.severity == Severity::Error)
                .count();
            if errors > 0 {
                bail!("{} configuration error(s) in {}", errors, path);
            }
            if problems.is_empty() {
                println!("{}: ok", path);
            }
        }
    }

    Ok(())
}

fn load_fixture(path: &str) -> Result<FixtureSpec> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read fixture file {}", path))?;
    serde_json::from_str(&text).with_context(|| format!("parse fixture file {}", path))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "autodag=debug" } else { "autodag=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter)
        .init();
}
