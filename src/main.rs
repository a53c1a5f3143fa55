use clap::Parser;
use prom_label_enforcer::{
    config::Config,
    pipeline::{
        self,
        Render,
    },
    telemetry,
    Error,
};
use std::{
    io::{
        self,
        Write,
    },
    path::PathBuf,
    process::ExitCode,
};

/// Enforce label matchers on PromQL expressions and append labels to Prometheus metrics
#[derive(Debug, Parser)]
#[command(name = "prom_label_enforcer", version, about)]
struct Cli {
    /// TOML file overriding the built-in expressions, metrics and labels
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the node tree of each expression instead of a single line
    #[arg(long)]
    tree: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn run(cli: &Cli) -> Result<(), Error> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let render = match cli.tree {
        true => Render::Tree,
        false => Render::Expr,
    };
    tracing::debug!(%render, labels = config.labels.len(), "Starting");

    let mut out = io::stdout().lock();
    pipeline::run(&config, render, &mut out)?;
    out.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{error}");
            ExitCode::FAILURE
        }
    }
}
