use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "phasefield - Multi-phase-field microstructure evolution on regular grids.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a grain-growth simulation described by a TOML run file.
    Run(RunArgs),
    /// Load a checkpoint and print the volume of every field.
    Inspect(InspectArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the run file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Override the checkpoint directory from the run file.
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Override the number of time steps.
    #[arg(short = 'n', long, value_name = "INT")]
    pub steps: Option<u64>,

    /// Use a fixed time step, replacing any adaptive setting in the run file.
    #[arg(long, value_name = "FLOAT")]
    pub dt: Option<f64>,

    /// Continue from the checkpoint written at this step.
    #[arg(short, long, value_name = "STEP")]
    pub restart: Option<u64>,

    /// Set a specific configuration value, overriding the run file.
    /// Can be used multiple times. Example: -S interface.energy=0.5
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `inspect` subcommand.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Directory holding the checkpoint files.
    #[arg(short, long, required = true, value_name = "DIR")]
    pub dir: PathBuf,

    /// Step the checkpoint was written at.
    #[arg(short, long, required = true, value_name = "STEP")]
    pub step: u64,

    /// Run file the checkpoint was produced with.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_arguments_parse_with_overrides() {
        let cli = Cli::parse_from([
            "phasefield", "-vv", "run", "-c", "run.toml", "--steps", "10", "--dt", "0.5", "-r",
            "4", "-S", "grid.iwidth=5",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("Expected 'run' subcommand");
        };
        assert_eq!(args.config, PathBuf::from("run.toml"));
        assert_eq!(args.steps, Some(10));
        assert_eq!(args.dt, Some(0.5));
        assert_eq!(args.restart, Some(4));
        assert_eq!(args.set_values, vec!["grid.iwidth=5".to_string()]);
    }

    #[test]
    fn inspect_requires_a_step() {
        let result = Cli::try_parse_from(["phasefield", "inspect", "-d", "out", "-c", "run.toml"]);
        assert!(result.is_err());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["phasefield", "-q", "-v", "run", "-c", "run.toml"]);
        assert!(result.is_err());
    }
}
