use std::{path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use emip_diag::{
    config::DiagnosticConfig,
    derive::GridCorrectedVariable,
    loader::{load_cube, save_cube},
    logging::init_logging,
    pipeline,
    stats::{annual_statistics, Statistic},
};
use error_stack::ResultExt;

fn main() -> ExitCode {
    let clargs = Cli::parse();
    match driver(clargs) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("emip-diag did not complete successfully:\n{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn driver(clargs: Cli) -> error_stack::Result<(), CliError> {
    let level = clargs.verbosity.log_level_filter();
    match clargs.command {
        Commands::Run(args) => {
            let config = DiagnosticConfig::from_toml_file(&args.config)
                .change_context(CliError::ReadingConfig)
                .attach_printable_lazy(|| format!("configuration file: {}", args.config.display()))?;
            init_logging(level, config.run_log.as_deref()).change_context(CliError::Logging)?;
            run(config)
        },
        Commands::Describe(args) => {
            init_logging(level, None).change_context(CliError::Logging)?;
            describe(args)
        },
        Commands::Derive(args) => {
            init_logging(level, None).change_context(CliError::Logging)?;
            derive(args)
        },
    }
}

fn run(config: DiagnosticConfig) -> error_stack::Result<(), CliError> {
    let summary = pipeline::run(&config).change_context(CliError::Running)?;
    log::info!(
        "Wrote {} plots of {} series ({} corrected to grid cell area) to {}",
        summary.plots.len() + summary.difference_plots.len(),
        summary.n_series,
        summary.n_corrected,
        config.plot_dir.display()
    );
    Ok(())
}

fn describe(args: DescribeCli) -> error_stack::Result<(), CliError> {
    for file in args.files.iter() {
        let cube = load_cube(file, args.variable.as_deref())
            .change_context(CliError::Loading)?;
        println!("{}:\n{}\n", file.display(), cube.summary());

        if args.annual {
            let annual = annual_statistics(&cube, args.statistic)
                .change_context(CliError::Reducing)
                .attach_printable_lazy(|| format!("file: {}", file.display()))?;
            println!("Annual {}:\n{}\n", args.statistic, annual.summary());
        }
    }
    Ok(())
}

fn derive(args: DeriveCli) -> error_stack::Result<(), CliError> {
    let cube = args.variable.calculate_from_files(&args.mass, args.land_fraction.as_deref())
        .change_context(CliError::Deriving)
        .attach_printable_lazy(|| format!("deriving {}", args.variable))?;
    log::debug!("{}", cube.summary());
    save_cube(&cube, &args.out).change_context(CliError::Writing)?;
    log::info!("Wrote {} to {}", args.variable, args.out.display());
    Ok(())
}

/// Emissions-MIP diagnostics: area and annual averages of model output, and line plots of them.
#[derive(Debug, Parser)]
struct Cli {
    #[clap(flatten)]
    verbosity: Verbosity<InfoLevel>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the diagnostic described by a configuration file.
    Run(RunCli),
    /// Print a summary of one or more cube files.
    Describe(DescribeCli),
    /// Compute a carbon pool per unit grid cell area and save it as a JSON cube.
    Derive(DeriveCli),
}

#[derive(Debug, Args)]
struct RunCli {
    /// Path to the TOML configuration file. See docs/configuration.md for the
    /// available keys.
    #[clap(short, long)]
    config: PathBuf,
}

#[derive(Debug, Args)]
struct DescribeCli {
    /// Cube files (.json, or .nc/.nc4 if built with netCDF support) to summarize.
    #[clap(required = true)]
    files: Vec<PathBuf>,

    /// Name of the variable to read from netCDF files. If not given, the
    /// file's main data variable is used.
    #[clap(long)]
    variable: Option<String>,

    /// Also summarize the cube after collapsing its time axis to calendar years.
    #[clap(long)]
    annual: bool,

    /// Statistic to use with --annual.
    #[clap(long, default_value_t = Statistic::Mean)]
    statistic: Statistic,
}

#[derive(Debug, Args)]
struct DeriveCli {
    /// Variable to compute: cVeg_grid, cSoil_grid or cLitter_grid.
    variable: GridCorrectedVariable,

    /// File containing the carbon pool per unit land area (cVeg, cSoil or cLitter).
    #[clap(long)]
    mass: PathBuf,

    /// File containing the land area fraction (sftlf), in percent. If omitted,
    /// the carbon pool is written unchanged.
    #[clap(long)]
    land_fraction: Option<PathBuf>,

    /// Where to write the result. Must end in .json.
    #[clap(short, long)]
    out: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("An error occurred while reading the configuration")]
    ReadingConfig,
    #[error("An error occurred while setting up logging")]
    Logging,
    #[error("An error occurred while running the diagnostic")]
    Running,
    #[error("An error occurred while loading a cube")]
    Loading,
    #[error("An error occurred while computing annual statistics")]
    Reducing,
    #[error("An error occurred while computing the derived variable")]
    Deriving,
    #[error("An error occurred while writing the derived variable")]
    Writing,
}
