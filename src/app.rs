//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments (`.env` is loaded by `main`)
//! - runs the estimation pipeline on file or synthetic microdata
//! - prints the run summary
//! - writes the tax-function JSON and optional cell export

use clap::Parser;
use log::info;

use crate::cli::{Command, EstimateArgs, EvalArgs, SimulateArgs};
use crate::data::{SampleConfig, SyntheticSource, write_sample_files};
use crate::domain::{EstimateConfig, Target};
use crate::error::AppError;
use crate::io::ingest::{CsvMicrodataSource, MicrodataSource};

pub mod pipeline;

/// Entry point for the `txfunc` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Estimate(args) => handle_estimate(args),
        Command::Eval(args) => handle_eval(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn handle_estimate(args: EstimateArgs) -> Result<(), AppError> {
    let config = estimate_config_from_args(&args);
    config.validate()?;

    let source: Box<dyn MicrodataSource> = match &args.source.data_dir {
        Some(dir) => Box::new(CsvMicrodataSource::new(dir)),
        None => Box::new(SyntheticSource::new(SampleConfig {
            min_age: config.min_age,
            max_age: config.max_age,
            obs_per_age: args.obs_per_age,
            seed: args.seed,
            ..SampleConfig::default()
        })),
    };

    let run = pipeline::run_estimation(&config, source.as_ref())?;
    println!("{}", crate::report::format_run_summary(&run, &config));

    if let Some(path) = &config.output {
        crate::io::taxfunc::write_taxfunc_json(path, &run.taxfunc)?;
        info!("wrote {}", path.display());
    }
    if let Some(path) = &config.export_cells {
        crate::io::export::write_cells_csv(path, &run.etr_cells, &run.mtrx_cells, config.min_age, config.start_year)?;
        info!("wrote {}", path.display());
    }

    Ok(())
}

fn handle_eval(args: EvalArgs) -> Result<(), AppError> {
    let file = crate::io::taxfunc::read_taxfunc_json(&args.file)?;
    if !(args.labor > 0.0 && args.capital > 0.0) {
        return Err(AppError::new(2, "Labor and capital income must both be > 0."));
    }
    let lookup = |target: Target| {
        file.params(target, args.bucket, args.year).ok_or_else(|| {
            AppError::new(
                3,
                format!(
                    "No {} parameters for bucket {} in year {}.",
                    target.display_name(),
                    args.bucket,
                    args.year
                ),
            )
        })
    };
    let etr = lookup(Target::Etr)?;
    let mtrx = lookup(Target::Mtrx)?;

    let report = crate::report::EvalReport::compute(args.labor, args.capital, &etr, &mtrx);
    print!(
        "{}",
        crate::report::format_eval(&report, args.bucket, args.year, args.labor, args.capital)
    );
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    if args.end_year < args.start_year {
        return Err(AppError::new(2, "Invalid year range for simulation."));
    }
    let config = SampleConfig {
        min_age: args.min_age,
        max_age: args.max_age,
        obs_per_age: args.obs_per_age,
        sparse_ages: args.sparse_ages.clone(),
        seed: args.seed,
        ..SampleConfig::default()
    };
    let written = write_sample_files(&args.out_dir, &config, args.start_year..=args.end_year)?;
    println!("Wrote {written} microdata files to {}", args.out_dir.display());
    Ok(())
}

pub fn estimate_config_from_args(args: &EstimateArgs) -> EstimateConfig {
    EstimateConfig {
        min_age: args.min_age,
        max_age: args.max_age,
        start_year: args.start_year,
        end_year: args.end_year,
        buckets: args.buckets,
        min_obs: args.min_obs,
        rate_min: args.rate_min,
        rate_max: args.rate_max,
        income_floor: args.income_floor,
        positive_income_floor: args.positive_income_floor,
        bound_income_cutoff: args.bound_cutoff,
        param_floor: args.param_floor,
        tolerance: args.tol,
        max_iters: args.max_iters,
        lbfgs_mem: args.lbfgs_mem,
        convergence: args.convergence,
        normalize_buckets: args.normalize_buckets,
        parallel: !args.serial,
        output: args.out.clone(),
        export_cells: args.export_cells.clone(),
    }
}
