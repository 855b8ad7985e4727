//! stakekit is a CLI tool that provisions the ledger/rewards contract
//! pair onto a remote network and registers both with the verification
//! service.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;

use cli::{Cli, Command};
use stakekit_provision::{
    ArtifactVariant, EtherscanRegistrar, Manifest, Outcome, Pipeline, Profiles, RpcClient,
    Summary, render,
};

/// Logical artifact names, matching the compiled contract artifacts.
const PRIMARY_CONTRACT: &str = "Ledger";
const SECONDARY_CONTRACT: &str = "Rewards";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Render {
            template,
            output,
            mock,
        } => {
            let variant = if mock {
                ArtifactVariant::Mock
            } else {
                ArtifactVariant::Production
            };
            render(&template, &output, variant)
                .with_context(|| format!("failed to render {}", template.display()))?;
            println!("System file updated ({variant}): {}", output.display());
        }

        Command::Deploy {
            network,
            config,
            resume,
        } => {
            let profiles = Profiles::load_from_file(&config)?;
            let profile = profiles.select(&network)?;

            let manifest_path = profile.manifest_path(&network);
            let manifest = Manifest::open(&manifest_path)?;
            if !manifest.is_empty() && !resume {
                anyhow::bail!(
                    "manifest {} holds records from a previous run; pass --resume to continue it \
                     or remove the file to start fresh",
                    manifest_path.display()
                );
            }

            let client = RpcClient::new(profile)?;
            let sender = client.sender();
            let admin = profile.admin(sender)?;
            let operator = profile.operator(sender)?;

            tracing::info!(
                network = %network,
                sender = %sender,
                admin = %admin,
                operator = %operator,
                "Starting deployment run"
            );

            let registrar = EtherscanRegistrar::new(
                &profile.verifier,
                profile.chain_id,
                &profile.artifacts_dir,
            )?;
            let pipeline = Pipeline::new(
                client,
                registrar,
                PRIMARY_CONTRACT,
                SECONDARY_CONTRACT,
                admin,
                operator,
                profile.call_gas_limit,
            )
            .with_manifest(manifest);

            let outcome = pipeline.run().await?;

            print_summary(outcome.summary(), &profile.verifier.browser_url);
            if let Outcome::PartialSuccess(_) = outcome {
                tracing::warn!(
                    "Deployment and linking succeeded but at least one verification failed; \
                     re-run verification manually"
                );
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &Summary, browser_url: &str) {
    println!("{PRIMARY_CONTRACT} contract deployed to: {}", summary.primary);
    println!("Proxy contract deployed to: {}", summary.proxy);
    println!(
        "Implementation contract deployed to: {}",
        summary.implementation
    );
    println!(
        "{PRIMARY_CONTRACT}'s rewards address set to: {}",
        summary.proxy
    );

    let mut table = Table::new();
    table.set_header(["Contract", "Address", "Verification"]);
    table.add_row([
        PRIMARY_CONTRACT.to_string(),
        summary.primary.to_string(),
        summary
            .verification
            .first()
            .map(|(_, s)| s.to_string())
            .unwrap_or_default(),
    ]);
    table.add_row([
        SECONDARY_CONTRACT.to_string(),
        summary.proxy.to_string(),
        summary
            .verification
            .get(1)
            .map(|(_, s)| s.to_string())
            .unwrap_or_default(),
    ]);
    println!("{table}");
    println!("Explorer: {browser_url}");
}
