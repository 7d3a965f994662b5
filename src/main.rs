use colored::Colorize;
use std::process::ExitCode;

fn main() -> ExitCode {
    match autoarchive::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = if err.is_fatal_setup() { 2 } else { 1 };
            let err = anyhow::Error::new(err).context("autoarchive failed");
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::from(code)
        }
    }
}
