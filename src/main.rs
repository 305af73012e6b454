use anyhow::Context;
use clap::Parser;
use credential_rotator::cli::{Cli, Commands, ConfigAction, OutputFormat};
use credential_rotator::clients::{ConnectClient, OktaClient};
use credential_rotator::config::{validate_config_object, Config};
use credential_rotator::engine::{CancelSignal, Orchestrator, RunSettings};
use credential_rotator::logging;
use std::sync::Arc;
use tracing::{info, warn};

fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    validate_config_object(config)?;
    let idp = OktaClient::new(&config.identity_provider, &config.http)
        .context("Failed to build identity provider client")?;
    let store = ConnectClient::new(&config.secret_store, &config.http)
        .context("Failed to build secret store client")?;
    Ok(Orchestrator::new(
        Arc::new(idp),
        Arc::new(store),
        RunSettings::from_config(config),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let log = logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(opts) => {
            let mut config = Config::load(opts.config.as_deref())?;
            if let Some(concurrency) = opts.concurrency {
                config.rotation.concurrency = concurrency;
            }
            if let Some(deadline) = opts.deadline_secs {
                config.rotation.deadline_secs = Some(deadline);
            }
            log.apply(&config.logging);
            info!("Starting rotation for group {}", config.identity_provider.group_id);

            let orchestrator = build_orchestrator(&config)?;
            let cancel = CancelSignal::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted; finishing identities already mid-rotation");
                    ctrl_c.cancel();
                }
            });

            let report = orchestrator.run(&cancel).await.context("Rotation run aborted")?;
            match opts.format {
                OutputFormat::Text => print!("{}", report.render_text()),
                OutputFormat::Json => print!("{}", report.render_json_lines()?),
            }
        }
        Commands::Plan(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            log.apply(&config.logging);

            let orchestrator = build_orchestrator(&config)?;
            let planned = orchestrator.plan().await.context("Planning aborted")?;
            for entry in &planned {
                match opts.format {
                    OutputFormat::Text => println!(
                        "{}\t{}\t{:?}{}",
                        entry.identity.id,
                        entry.identity.email,
                        entry.action,
                        entry
                            .item_id
                            .as_deref()
                            .map(|id| format!("\t{id}"))
                            .unwrap_or_default()
                    ),
                    OutputFormat::Json => println!("{}", serde_json::to_string(entry)?),
                }
            }
        }
        Commands::Config(opts) => {
            if let ConfigAction::Init = opts.action {
                let path = opts.config.as_deref().unwrap_or("credential-rotator.json");
                Config::write_default(path)?;
                println!("Configuration file created at {path}");
                return Ok(());
            }

            let config = Config::load(opts.config.as_deref())?;
            log.apply(&config.logging);
            match opts.action {
                ConfigAction::Show => {
                    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
                }
                ConfigAction::Validate => {
                    validate_config_object(&config)?;
                    info!("Configuration is valid");
                }
                ConfigAction::Init => unreachable!("handled above"),
            }
        }
        Commands::Version => {
            println!("credential-rotator {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
