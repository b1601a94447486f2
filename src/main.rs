use clap::Parser;
use ult_runner_lib::config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ult_runner_lib::run(Cli::parse()).await
}
