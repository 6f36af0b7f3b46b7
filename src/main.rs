use std::process::ExitCode;

fn main() -> ExitCode {
    // Load .env first so RUST_LOG and TXFUNC_* from it apply.
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match taxfunc::app::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}
