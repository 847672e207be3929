use clap::Parser;
use clipbridge_lib::bootstrap;
use clipbridge_lib::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(err) = bootstrap::init_tracing_subscriber() {
        eprintln!("Failed to initialize tracing: {err:#}");
    }

    cli.run().await
}
