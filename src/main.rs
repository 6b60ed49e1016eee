// src/main.rs — shotsmith entry point

use clap::Parser;

use shotsmith::cli::run::RunArgs;
use shotsmith::cli::{audit, providers, route, run, Cli, Commands, Services};
use shotsmith::infra::config::Config;
use shotsmith::infra::logger;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Respects RUST_LOG / SHOTSMITH_LOG before falling back to --log-level
    logger::init_logging(&cli.log_level);

    if let Err(e) = dispatch(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config = match cli.config.as_deref() {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let services = Services::build(config)?;

    match cli.command {
        Commands::Run {
            briefs,
            provider,
            budget,
            max_iterations,
            out,
            json,
            quiet,
            verbose,
        } => {
            run::run_shots(
                services,
                RunArgs {
                    briefs,
                    provider,
                    budget,
                    max_iterations,
                    out,
                    json,
                    quiet,
                    verbose,
                },
            )
            .await
        }
        Commands::Route { brief, all } => route::show_route(&services, &brief, all),
        Commands::Audit { image, brief } => audit::run_audit(&services, &image, &brief).await,
        Commands::Providers => {
            providers::list_providers(&services);
            Ok(())
        }
    }
}
