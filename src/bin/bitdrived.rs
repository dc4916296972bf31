use anyhow::{Context, Result};
use clap::Parser;

use bitdrive::cli::{log_level, DaemonOpts};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    env_logger::Builder::new()
        .filter_level(log_level(opts.verbose))
        .parse_default_env()
        .init();

    let config = opts.resolve()?.validate()?;

    println!("Starting BitDrive server:");
    println!("  Root: {}", config.root.display());
    println!("  Bind: {}", config.bind);
    println!("  Sessions: {}", config.max_sessions);

    // No authentication or encryption: warn when exposed on every interface
    if config.bind.starts_with("0.0.0.0") || config.bind.starts_with("[::]") {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the storage directory to all network interfaces");
        eprintln!("   Only use on trusted networks (LAN)");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(bitdrive::serve(config))
}
