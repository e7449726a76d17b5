use clap::Parser;
use color_eyre::eyre::Result;

use optimistic::{
    app::App,
    infrastructure::{cli::Cli, config::Config},
    utils::{initialize_logging, initialize_panic_handler},
};

async fn tokio_main() -> Result<()> {
    let args = <Cli as Parser>::parse();

    initialize_logging(args.verbose)?;

    initialize_panic_handler()?;

    let mut config = Config::new()?;
    if let Some(latency_ms) = args.latency_ms {
        config.api.latency_ms = latency_ms;
    }

    App::new(config).run(args.command).await
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = tokio_main().await {
        eprintln!("{} error: Something went wrong", env!("CARGO_PKG_NAME"));
        Err(e)
    } else {
        Ok(())
    }
}
