use anyhow::{Context, Result};
use clap::Parser;

use diffcov::cli::Options;
use diffcov::diag::Diag;
use diffcov::engine::Engine;

fn main() -> Result<()> {
    env_logger::init();
    let options = Options::parse();
    let policy = options.to_policy()?;

    let diag = Diag::new(policy.max_message_count, policy.stop_on_error);
    diag.ignore(&policy.ignore_errors);

    let mut sink = options.style.sink(&policy);
    let engine = Engine::new(&policy, &diag);
    let outcome = match engine.run(sink.as_mut()) {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("diffcov: fatal: {err}");
            std::process::exit(2);
        }
    };

    match &options.output {
        Some(path) => std::fs::write(path, &outcome.report)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", outcome.report),
    }

    std::process::exit(outcome.exit_code);
}
