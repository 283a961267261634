use clap::Parser;
use texupload::cli::{self, Args};
use texupload::upload::BatchState;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let report = cli::run(Args::parse()).await?;
    println!("{}", cli::summarize(&report));
    if report.state != BatchState::Completed {
        std::process::exit(1);
    }
    Ok(())
}
