use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stakekit_provision::PROFILES_FILENAME;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "stakekit")]
#[command(
    author,
    version,
    about = "Provision the ledger/rewards contract pair onto a network"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "STAKEKIT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Render the system contract source from its template.
    Render {
        /// Path to the artifact template.
        #[arg(
            short,
            long,
            env = "STAKEKIT_TEMPLATE",
            default_value = "templates/System.sol.hbs"
        )]
        template: PathBuf,

        /// Where the rendered source is written (overwritten unconditionally).
        #[arg(
            short,
            long,
            env = "STAKEKIT_OUTPUT",
            default_value = "contracts/System.sol"
        )]
        output: PathBuf,

        /// Render the mock variant instead of the production one.
        #[arg(long, env = "STAKEKIT_MOCK")]
        mock: bool,
    },

    /// Deploy, link and verify the contract pair against a network profile.
    Deploy {
        /// Name of the network profile to deploy against.
        #[arg(short, long, env = "STAKEKIT_NETWORK")]
        network: String,

        /// Path to the network profiles file.
        #[arg(short, long, env = "STAKEKIT_CONFIG", default_value = PROFILES_FILENAME)]
        config: PathBuf,

        /// Resume a crashed run: skip steps whose outputs are already in
        /// the manifest instead of redeploying.
        #[arg(long, env = "STAKEKIT_RESUME")]
        resume: bool,
    },
}
