use clap::Parser;
use ragloop::cli::{Cli, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    run(Cli::parse()).await
}
