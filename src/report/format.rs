//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the estimation code stays clean and testable
//! - output changes are localized

use std::time::Duration;

use crate::app::pipeline::RunOutput;
use crate::domain::{EstimateConfig, ParameterVector, YearSummary};

/// Elapsed wall-clock time: seconds below a minute, minutes + seconds above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.3} sec")
    } else {
        let minutes = (secs / 60.0).floor();
        format!("{minutes:.0} min, {:.3} sec", secs - minutes * 60.0)
    }
}

/// Format the full run summary (configuration + per-year table + totals).
pub fn format_run_summary(run: &RunOutput, config: &EstimateConfig) -> String {
    let mut out = String::new();

    out.push_str("=== txfunc - tax function estimation ===\n");
    out.push_str(&format!(
        "Ages: [{}, {}] | Years: [{}, {}] | Buckets: {}\n",
        config.min_age, config.max_age, config.start_year, config.end_year, config.buckets
    ));
    out.push_str(&format!(
        "Min obs/cell: {} | ETR filter: [{}, {}] | Income floor: {}\n",
        config.min_obs, config.rate_min, config.rate_max, config.income_floor
    ));

    out.push('\n');
    out.push_str(&format_year_table(&run.summaries));

    let missing_buckets = run.etr_buckets.iter().filter(|b| b.is_none()).count();
    let not_converged: usize = run.summaries.iter().map(|s| s.not_converged).sum();
    out.push('\n');
    if missing_buckets > 0 {
        out.push_str(&format!(
            "Warning: {missing_buckets} bucket/year aggregates touch a missing age.\n"
        ));
    }
    if not_converged > 0 {
        out.push_str(&format!("Fits stopped without converging: {not_converged}\n"));
    }
    out.push_str(&format!("Elapsed: {}\n", format_elapsed(run.elapsed)));

    out
}

fn format_year_table(rows: &[YearSummary]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<6} {:>9} {:>9} {:>12} {:>14} {:>9} {:>5} {:>5} {:>5} {:>5}\n",
        "year", "rows", "filtered", "avg_income", "population", "ages", "est", "int", "ext", "miss"
    ));
    out.push_str(&format!(
        "{:-<6} {:-<9} {:-<9} {:-<12} {:-<14} {:-<9} {:-<5} {:-<5} {:-<5} {:-<5}\n",
        "", "", "", "", "", "", "", "", "", ""
    ));
    for s in rows {
        let ages = s
            .age_range
            .map(|(lo, hi)| format!("{lo}-{hi}"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<6} {:>9} {:>9} {:>12.2} {:>14.1} {:>9} {:>5} {:>5} {:>5} {:>5}\n",
            s.year,
            s.n_raw,
            s.n_filtered,
            s.avg_income,
            s.total_population,
            ages,
            s.estimated,
            s.interpolated,
            s.extrapolated,
            s.missing
        ));
    }
    out
}

/// Rates at one income pair, as printed by `txfunc eval`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    pub etr: f64,
    pub mtrx: f64,
    pub implied_mtrx: f64,
    pub dmtrx: f64,
    pub dmtry: f64,
}

impl EvalReport {
    pub fn compute(labor: f64, capital: f64, etr: &ParameterVector, mtrx: &ParameterVector) -> Self {
        Self {
            etr: crate::models::rate(labor, capital, etr),
            mtrx: crate::models::rate(labor, capital, mtrx),
            implied_mtrx: crate::models::implied_mtrx(labor, capital, etr),
            dmtrx: crate::models::dmtrx(labor, capital, etr),
            dmtry: crate::models::dmtry(labor, capital, etr),
        }
    }
}

pub fn format_eval(report: &EvalReport, bucket: usize, year: i32, labor: f64, capital: f64) -> String {
    let mut out = String::new();
    out.push_str(&format!("bucket={bucket} year={year} labor={labor:.2} capital={capital:.2}\n"));
    out.push_str(&format!("ETR           {:>12.6}\n", report.etr));
    out.push_str(&format!("MTRx (fit)    {:>12.6}\n", report.mtrx));
    out.push_str(&format!("MTRx (implied){:>12.6}\n", report.implied_mtrx));
    out.push_str(&format!("d MTRx / dx   {:>12.6e}\n", report.dmtrx));
    out.push_str(&format!("d MTRx / dy   {:>12.6e}\n", report.dmtry));
    out
}
