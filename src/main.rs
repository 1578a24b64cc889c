use anyhow::Result;
use clap::Parser;
use vecbench::Opts;
use vecbench::cli::SubCommandExtend;
use vecbench::config::SubCommand;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Run(config) => config.run(&opts).await,
        SubCommand::Load(config) => config.run(&opts).await,
        SubCommand::Query(config) => config.run(&opts).await,
        SubCommand::Health(config) => config.run(&opts).await,
        SubCommand::Wipe(config) => config.run(&opts).await,
    }
}
