use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use symbolic_train::logging::{install_panic_hook, setup_logging};
use symbolic_train::train::{self, TrainArgs};

fn main() -> Result<()> {
    let args = TrainArgs::parse();

    // 1. Logging (console, training log, console mirror)
    let output_dir = Path::new(&args.output_dir);
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output dir {}", output_dir.display()))?;
    let mut session = setup_logging(output_dir)?;

    // 2. Panic hook
    install_panic_hook();

    tracing::info!("🚀 Symbolic training started.");

    // The session owns the log handles, so they are flushed on every exit path.
    let result = train::run(&args, &mut session);
    if let Err(e) = &result {
        tracing::error!("❌ Training failed: {:#}", e);
        let _ = writeln!(session.tee, "Training failed: {e:#}");
    }
    session.tee.flush()?;
    result.map(|_| ())
}
