//! `covex` command-line entry point.

use clap::{Args, Parser, Subcommand};
use covex_raster::Crs;
use covex_runner::{
    parse_years, run_extract, run_resolve, ExtractRequest, PointColumns, ResolveRequest,
    Result, DEFAULT_MISSING,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "covex",
    version,
    about = "Extract raster values at point locations from tiled and untiled rasters"
)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads for resolution and tile sampling (default: all cores).
    #[arg(long, global = true, value_name = "N")]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample a catalog raster at every point and write the augmented table.
    Extract {
        #[command(flatten)]
        input: InputArgs,

        /// Comma-separated years to extract, e.g. 2019,2020.
        #[arg(long, value_name = "YEARS")]
        years: Option<String>,

        /// Add the resolved tile reference as a column.
        #[arg(long)]
        keep_tile_ref: bool,

        /// Text written for missing values.
        #[arg(long, default_value = DEFAULT_MISSING)]
        missing: String,
    },

    /// Assign each point to the tile covering it without sampling.
    Resolve {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args)]
struct InputArgs {
    /// YAML raster catalog.
    #[arg(long, value_name = "FILE")]
    catalog: PathBuf,

    /// Name of the raster in the catalog.
    #[arg(long, value_name = "NAME")]
    raster: String,

    /// Points CSV with a header row.
    #[arg(long, value_name = "FILE")]
    points: PathBuf,

    /// Output CSV.
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// CRS of the point coordinates.
    #[arg(long, default_value = "EPSG:4326")]
    crs: String,

    /// Column holding the x (longitude/easting) coordinate.
    #[arg(long, default_value = "x")]
    x_column: String,

    /// Column holding the y (latitude/northing) coordinate.
    #[arg(long, default_value = "y")]
    y_column: String,
}

impl InputArgs {
    fn columns(&self) -> Result<PointColumns> {
        Ok(PointColumns {
            x: self.x_column.clone(),
            y: self.y_column.clone(),
            crs: self.crs.parse::<Crs>()?,
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut pool = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = cli.threads {
        pool = pool.num_threads(threads);
    }
    let pool = pool.build()?;

    match cli.command {
        Commands::Extract {
            input,
            years,
            keep_tile_ref,
            missing,
        } => {
            let request = ExtractRequest {
                columns: input.columns()?,
                catalog: input.catalog,
                raster: input.raster,
                points: input.points,
                output: input.output,
                years: years.as_deref().map(parse_years).transpose()?.unwrap_or_default(),
                keep_tile_ref,
                missing,
            };
            let summaries = pool.install(|| run_extract(&request))?;
            for (column, summary) in &summaries {
                println!("{column}: {summary}");
            }
            println!("Wrote {}", request.output.display());
        }
        Commands::Resolve { input } => {
            let request = ResolveRequest {
                columns: input.columns()?,
                catalog: input.catalog,
                raster: input.raster,
                points: input.points,
                output: input.output,
            };
            let report = pool.install(|| run_resolve(&request))?;
            println!(
                "{} of {} points resolved to a tile; wrote {}",
                report.resolved,
                report.total,
                request.output.display()
            );
        }
    }
    Ok(())
}
