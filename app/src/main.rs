use std::process::ExitCode;

use redlilium_app::{App, AppArgs};

fn main() -> ExitCode {
    let (args, ignored) =
        AppArgs::try_parse_lenient(std::env::args_os()).unwrap_or_else(|e| e.exit());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();
    for flag in ignored {
        log::warn!("Unknown flag '{flag}' ignored; using the default backend selection");
    }

    match App::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
