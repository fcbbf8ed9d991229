//! Bike demand MLOps entry point

use clap::Parser;
use bikeshare_mlops::cli::{cmd_pipeline, cmd_promote, cmd_serve, cmd_validate, cmd_verify_audit, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bikeshare_mlops=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Pipeline { data } => cmd_pipeline(data.as_deref()).await?,
        Commands::Promote { model, stage } => cmd_promote(&model, &stage)?,
        Commands::Validate { path } => cmd_validate(&path)?,
        Commands::Serve { port, host } => cmd_serve(host, port).await?,
        Commands::VerifyAudit { path } => cmd_verify_audit(path)?,
    }

    Ok(())
}
