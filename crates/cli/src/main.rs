use anyhow::Result;
use clap::Parser;

use consign_cli::Cli;
use consign_infra::AppConfig;
use consign_observability::LogFormat;

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.log_format.as_deref() {
        Some(format) => consign_observability::tracing::init(LogFormat::parse(format)),
        None => consign_observability::init(),
    }

    let config = AppConfig::from_env();
    let output = consign_cli::run(cli.command, &config)?;
    println!("{output}");
    Ok(())
}
