//! Command-line parsing for the tax-function estimator.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! estimation code. Flags map 1:1 onto `EstimateConfig` fields in `app`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::ConvergencePolicy;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "txfunc", version, about = "Age/year tax-rate function estimator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Estimate ETR and MTRx surfaces per age and year, then aggregate to age buckets.
    Estimate(EstimateArgs),
    /// Evaluate a saved tax-function file at one income pair.
    Eval(EvalArgs),
    /// Write synthetic raw microdata files that `estimate` can read.
    Simulate(SimulateArgs),
}

/// Where the microdata comes from.
#[derive(Debug, Args, Clone)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// Directory containing one `{year}_tau_n.csv` file per year.
    #[arg(long, env = "TXFUNC_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Use generated microdata instead of files.
    #[arg(long)]
    pub synthetic: bool,
}

/// Options for `txfunc estimate`.
#[derive(Debug, Parser, Clone)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Youngest modeled age.
    #[arg(long, default_value_t = 21)]
    pub min_age: u32,

    /// Oldest modeled age.
    #[arg(long, default_value_t = 100)]
    pub max_age: u32,

    #[arg(long, default_value_t = 2015)]
    pub start_year: i32,

    #[arg(long, default_value_t = 2024)]
    pub end_year: i32,

    /// Number of age buckets in the saved output (at most the number of ages).
    #[arg(short = 's', long, default_value_t = 80)]
    pub buckets: usize,

    /// Minimum rows per (age, year) before a direct fit is attempted.
    #[arg(long, default_value_t = 600, env = "TXFUNC_MIN_OBS")]
    pub min_obs: usize,

    /// Drop rows with an effective tax rate below this.
    #[arg(long, default_value_t = -0.15, allow_negative_numbers = true)]
    pub rate_min: f64,

    /// Drop rows with an effective tax rate above this.
    #[arg(long, default_value_t = 0.5)]
    pub rate_max: f64,

    /// Drop rows with adjusted total income below this.
    #[arg(long, default_value_t = 5.0)]
    pub income_floor: f64,

    /// Fit only on rows whose labor and capital income both exceed this.
    #[arg(long, default_value_t = 5.0)]
    pub positive_income_floor: f64,

    /// Income cutoff used to seed the rate-bound parameters.
    #[arg(long, default_value_t = 3000.0)]
    pub bound_cutoff: f64,

    /// Lower bound on the positive parameters.
    #[arg(long, default_value_t = 1e-12)]
    pub param_floor: f64,

    /// Optimizer tolerance (gradient and cost change).
    #[arg(long, default_value_t = 1e-15)]
    pub tol: f64,

    #[arg(long, default_value_t = 15_000)]
    pub max_iters: u64,

    /// L-BFGS history length.
    #[arg(long, default_value_t = 7)]
    pub lbfgs_mem: usize,

    /// What to do when a fit stops without converging.
    #[arg(long, value_enum, default_value_t = ConvergencePolicy::Accept)]
    pub convergence: ConvergencePolicy,

    /// Divide each bucket aggregate by its total weight.
    #[arg(long)]
    pub normalize_buckets: bool,

    /// Estimate years one at a time.
    #[arg(long)]
    pub serial: bool,

    /// Write the estimated tax functions to JSON.
    #[arg(long, value_name = "JSON")]
    pub out: Option<PathBuf>,

    /// Export every (age, year) cell with its provenance to CSV.
    #[arg(long = "export-cells", value_name = "CSV")]
    pub export_cells: Option<PathBuf>,

    /// Seed for `--synthetic` microdata.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Synthetic rows per age and year.
    #[arg(long, default_value_t = 800)]
    pub obs_per_age: usize,
}

/// Options for `txfunc eval`.
#[derive(Debug, Parser)]
pub struct EvalArgs {
    /// Tax-function JSON produced by `txfunc estimate --out`.
    #[arg(long, value_name = "JSON")]
    pub file: PathBuf,

    /// Age bucket index (0-based).
    #[arg(long)]
    pub bucket: usize,

    #[arg(long)]
    pub year: i32,

    /// Labor income.
    #[arg(long)]
    pub labor: f64,

    /// Capital income.
    #[arg(long)]
    pub capital: f64,
}

/// Options for `txfunc simulate`.
#[derive(Debug, Parser)]
pub struct SimulateArgs {
    /// Output directory (created if missing).
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,

    #[arg(long, default_value_t = 21)]
    pub min_age: u32,

    #[arg(long, default_value_t = 100)]
    pub max_age: u32,

    #[arg(long, default_value_t = 2015)]
    pub start_year: i32,

    #[arg(long, default_value_t = 2024)]
    pub end_year: i32,

    /// Rows per age and year.
    #[arg(long, default_value_t = 800)]
    pub obs_per_age: usize,

    /// Ages generated with too few rows to fit (repeatable).
    #[arg(long = "sparse-age")]
    pub sparse_ages: Vec<u32>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}
