//! stakekit-provision - Provisioning library for the ledger/rewards
//! contract pair.
//!
//! This crate renders the system-contract artifact from its template,
//! deploys the ledger and the proxied rewards contract onto a configured
//! network, links them, and registers both with the source-verification
//! service.

pub mod abi;
mod client;
mod config;
mod error;
mod manifest;
mod pipeline;
mod plan;
pub mod rpc;
mod template;
mod verify;

pub use client::{ContractClient, PendingTx, Receipt, RpcClient, derive_address};
pub use config::{NetworkProfile, PROFILES_FILENAME, Profiles, VerifierConfig};
pub use error::{ProvisionError, RenderError};
pub use manifest::{Manifest, StageRecord};
pub use pipeline::{Outcome, Pipeline, PipelineFailure, Stage, Summary, VerifyStatus};
pub use plan::{DeploymentPlan, DeploymentStep, StepKind};
pub use template::{ArtifactVariant, render, render_string};
pub use verify::{EtherscanRegistrar, Registrar, SourceBundle, VerifyOutcome};
