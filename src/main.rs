use log::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = hlsget::cli::parse_args();

    if let Err(e) = hlsget::run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}
