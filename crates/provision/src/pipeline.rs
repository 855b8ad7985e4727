//! Deployment orchestrator.
//!
//! Sequences the two-contract provisioning run: deploy the ledger, deploy
//! the rewards contract behind a proxy, link the ledger to the proxy,
//! confirm the link by reading it back, then register both contracts with
//! the verification service. Steps execute strictly sequentially; each
//! consumes addresses produced by the one before it.

use std::fmt;
use std::time::Duration;

use alloy_core::primitives::Address;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};

use crate::abi;
use crate::client::{ContractClient, PendingTx, Receipt};
use crate::error::ProvisionError;
use crate::manifest::{Manifest, StageRecord};
use crate::plan::DeploymentPlan;
use crate::verify::{Registrar, VerifyOutcome};

/// Canonical signature of the ledger's linking method.
const LINK_SIGNATURE: &str = "setRewards(address)";
/// Canonical signature of the stored-link getter.
const LINK_GETTER: &str = "rewards()";

/// Pipeline states, in execution order. A failure is reported as the
/// stage that was being established when it happened.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Init,
    PrimaryDeployed,
    SecondaryDeployed,
    Linking,
    Linked,
    Verifying,
    Done,
}

/// Per-contract verification result in the final summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyStatus {
    Verified,
    AlreadyVerified,
    Failed(String),
}

impl VerifyStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, VerifyStatus::Failed(_))
    }
}

impl fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyStatus::Verified => write!(f, "verified"),
            VerifyStatus::AlreadyVerified => write!(f, "already verified"),
            VerifyStatus::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct Summary {
    pub primary: Address,
    pub proxy: Address,
    pub implementation: Address,
    /// Contract name paired with its verification status, in submission order.
    pub verification: Vec<(String, VerifyStatus)>,
}

/// Terminal result of a run that got through deployment and linking.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Every step succeeded, verifications included.
    Complete(Summary),
    /// Deployment and linking succeeded but at least one verification
    /// failed; the contracts are live and usable.
    PartialSuccess(Summary),
}

impl Outcome {
    pub fn summary(&self) -> &Summary {
        match self {
            Outcome::Complete(s) | Outcome::PartialSuccess(s) => s,
        }
    }
}

/// A failed run: the stage that was being established, the cause, and
/// every address produced before the failure so the operator can resume
/// manually.
#[derive(Debug)]
pub struct PipelineFailure {
    pub stage: Stage,
    pub source: ProvisionError,
    pub produced: Vec<(String, Address)>,
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deployment failed at stage {}: {}", self.stage, self.source)?;
        if !self.produced.is_empty() {
            write!(f, "; produced so far:")?;
            for (name, address) in &self.produced {
                write!(f, " {name}={address}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// The deployment orchestrator. Generic over the contract client and the
/// registrar so runs are testable against in-memory fakes.
pub struct Pipeline<C, R> {
    client: C,
    registrar: R,
    primary_name: String,
    secondary_name: String,
    admin: Address,
    operator: Address,
    call_gas_limit: u64,
    retry: ExponentialBuilder,
    manifest: Option<Manifest>,
}

impl<C: ContractClient, R: Registrar> Pipeline<C, R> {
    pub fn new(
        client: C,
        registrar: R,
        primary_name: &str,
        secondary_name: &str,
        admin: Address,
        operator: Address,
        call_gas_limit: u64,
    ) -> Self {
        Self {
            client,
            registrar,
            primary_name: primary_name.to_string(),
            secondary_name: secondary_name.to_string(),
            admin,
            operator,
            call_gas_limit,
            retry: ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(500))
                .with_max_times(3),
            manifest: None,
        }
    }

    /// Record successful steps into (and skip steps already recorded in)
    /// the given manifest.
    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Override the transient-error retry policy.
    pub fn with_retry(mut self, retry: ExponentialBuilder) -> Self {
        self.retry = retry;
        self
    }

    fn recorded(&self, stage: Stage, name: &str) -> Option<Address> {
        self.manifest
            .as_ref()
            .and_then(|m| m.address_for(stage, name))
    }

    fn record(
        &mut self,
        stage: Stage,
        name: &str,
        address: Address,
        tx_hash: Option<String>,
    ) -> Result<(), ProvisionError> {
        if let Some(manifest) = self.manifest.as_mut() {
            manifest.record(StageRecord::new(stage, name, address, tx_hash))?;
        }
        Ok(())
    }

    /// Submit a deployment with retries on transient submission failures.
    /// A submission that reached the chain is never re-sent: only errors
    /// classified transient (the request never went through) re-enter.
    async fn submit_deploy(&self, name: &str, ctor_args: &[u8]) -> Result<PendingTx, ProvisionError> {
        (|| self.client.deploy_contract(name, ctor_args))
            .retry(self.retry.clone())
            .when(ProvisionError::is_transient)
            .notify(|err, delay| {
                tracing::warn!(contract = name, error = %err, retry_in = ?delay, "Deploy submission failed, backing off");
            })
            .await
    }

    async fn wait(&self, tx: &PendingTx) -> Result<Receipt, ProvisionError> {
        self.client.wait_for_confirmation(tx).await
    }

    /// Execute the full run. Returns an [`Outcome`] once deployment and
    /// linking are confirmed; any earlier failure carries the addresses
    /// already produced.
    pub async fn run(mut self) -> Result<Outcome, PipelineFailure> {
        let mut produced: Vec<(String, Address)> = Vec::new();

        let plan = DeploymentPlan::standard(&self.primary_name, &self.secondary_name);
        if let Err(source) = plan.validate() {
            return Err(PipelineFailure {
                stage: Stage::Init,
                source,
                produced,
            });
        }
        for step in plan.steps() {
            tracing::debug!(kind = %step.kind, name = %step.name, "Planned step");
        }

        // Init -> PrimaryDeployed. No constructor arguments, nothing to
        // clean up if this fails.
        let primary = match self.deploy_primary(&mut produced).await {
            Ok(address) => address,
            Err(source) => {
                return Err(PipelineFailure {
                    stage: Stage::PrimaryDeployed,
                    source,
                    produced,
                });
            }
        };
        tracing::info!(address = %primary, contract = %self.primary_name, "Primary contract deployed");

        // PrimaryDeployed -> SecondaryDeployed. A failure here leaves the
        // primary orphaned; the failure report carries its address so a
        // resumed run can skip redeployment.
        let (proxy, implementation) = match self.deploy_secondary(primary, &mut produced).await {
            Ok(pair) => pair,
            Err(source) => {
                return Err(PipelineFailure {
                    stage: Stage::SecondaryDeployed,
                    source,
                    produced,
                });
            }
        };
        tracing::info!(
            proxy = %proxy,
            implementation = %implementation,
            contract = %self.secondary_name,
            "Secondary contract deployed behind proxy"
        );

        // SecondaryDeployed -> Linking -> Linked. Both deployments are
        // confirmed at this point, never earlier.
        if let Err((stage, source)) = self.link(primary, proxy).await {
            return Err(PipelineFailure {
                stage,
                source,
                produced,
            });
        }
        tracing::info!(primary = %primary, rewards = %proxy, "Link confirmed by read-back");

        // Linked -> Verifying -> Done. A primary verification failure
        // does not block the secondary attempt.
        let verification = self.verify_all(primary, proxy).await;

        let summary = Summary {
            primary,
            proxy,
            implementation,
            verification,
        };

        if summary.verification.iter().all(|(_, s)| s.is_success()) {
            if let Err(source) = self.record(Stage::Done, "run", primary, None) {
                return Err(PipelineFailure {
                    stage: Stage::Done,
                    source,
                    produced,
                });
            }
            Ok(Outcome::Complete(summary))
        } else {
            Ok(Outcome::PartialSuccess(summary))
        }
    }

    async fn deploy_primary(
        &mut self,
        produced: &mut Vec<(String, Address)>,
    ) -> Result<Address, ProvisionError> {
        let name = self.primary_name.clone();
        let address = match self.recorded(Stage::PrimaryDeployed, &name) {
            Some(address) => {
                tracing::info!(address = %address, contract = %name, "Primary already recorded, skipping deployment");
                address
            }
            None => {
                let pending = self.submit_deploy(&name, &[]).await?;
                let receipt = self.wait(&pending).await?;
                let address = receipt.contract_address.ok_or_else(|| {
                    ProvisionError::ChainRejection {
                        operation: format!("deploy {name}"),
                        reason: "receipt carried no contract address".to_string(),
                    }
                })?;
                self.record(
                    Stage::PrimaryDeployed,
                    &name,
                    address,
                    Some(receipt.transaction_hash),
                )?;
                address
            }
        };
        produced.push((name, address));
        Ok(address)
    }

    async fn deploy_secondary(
        &mut self,
        primary: Address,
        produced: &mut Vec<(String, Address)>,
    ) -> Result<(Address, Address), ProvisionError> {
        let name = self.secondary_name.clone();
        let impl_name = format!("{name}Implementation");

        // The implementation is confirmed and recorded before the proxy
        // submission enters the retry loop, so a retried proxy creation
        // can never mint a second implementation.
        let implementation = match self.recorded(Stage::SecondaryDeployed, &impl_name) {
            Some(address) => {
                tracing::info!(implementation = %address, contract = %name, "Implementation already recorded, skipping deployment");
                address
            }
            None => {
                let pending = self.submit_deploy(&name, &[]).await?;
                let receipt = self.wait(&pending).await?;
                let address = receipt.contract_address.ok_or_else(|| {
                    ProvisionError::ChainRejection {
                        operation: format!("deploy {name} implementation"),
                        reason: "receipt carried no contract address".to_string(),
                    }
                })?;
                self.record(
                    Stage::SecondaryDeployed,
                    &impl_name,
                    address,
                    Some(receipt.transaction_hash),
                )?;
                tracing::info!(implementation = %address, contract = %name, "Implementation confirmed");
                address
            }
        };
        produced.push((impl_name, implementation));

        let proxy = match self.recorded(Stage::SecondaryDeployed, &name) {
            Some(address) => {
                tracing::info!(proxy = %address, contract = %name, "Proxy already recorded, skipping deployment");
                address
            }
            None => {
                let init_data = abi::encode_initializer(primary, self.admin, self.operator);
                let pending = (|| self.client.deploy_proxy(&name, implementation, &init_data))
                    .retry(self.retry.clone())
                    .when(ProvisionError::is_transient)
                    .notify(|err, delay| {
                        tracing::warn!(contract = %name, error = %err, retry_in = ?delay, "Proxy deploy submission failed, backing off");
                    })
                    .await?;

                let receipt = self.wait(&pending).await?;
                let proxy = receipt.contract_address.ok_or_else(|| {
                    ProvisionError::ChainRejection {
                        operation: format!("deploy {name} proxy"),
                        reason: "receipt carried no contract address".to_string(),
                    }
                })?;
                self.record(
                    Stage::SecondaryDeployed,
                    &name,
                    proxy,
                    Some(receipt.transaction_hash),
                )?;
                proxy
            }
        };
        produced.push((name, proxy));
        Ok((proxy, implementation))
    }

    async fn link(
        &mut self,
        primary: Address,
        proxy: Address,
    ) -> Result<(), (Stage, ProvisionError)> {
        if self.recorded(Stage::Linked, &self.primary_name) == Some(proxy) {
            tracing::info!("Link already recorded, skipping");
            return Ok(());
        }

        let data = abi::encode_call_address(LINK_SIGNATURE, proxy);
        let pending = (|| self.client.call(primary, &data, self.call_gas_limit))
            .retry(self.retry.clone())
            .when(ProvisionError::is_transient)
            .notify(|err, delay| {
                tracing::warn!(error = %err, retry_in = ?delay, "Link submission failed, backing off");
            })
            .await
            .map_err(|e| (Stage::Linking, e))?;

        self.wait(&pending)
            .await
            .map_err(|e| (Stage::Linking, e))?;

        // Confirmation is not enough: read the stored pointer back. A
        // mismatch after a confirmed transaction means the remote state
        // diverged from expectation and must not be accepted.
        let stored = self
            .client
            .read(primary, &abi::encode_getter(LINK_GETTER))
            .await
            .map_err(|e| (Stage::Linked, e))?;

        let stored = abi::decode_address_word(&stored).ok_or_else(|| {
            (
                Stage::Linked,
                ProvisionError::Consistency {
                    expected: format!("{proxy}"),
                    actual: "unreadable link value".to_string(),
                },
            )
        })?;

        if stored != proxy {
            return Err((
                Stage::Linked,
                ProvisionError::Consistency {
                    expected: format!("{proxy}"),
                    actual: format!("{stored}"),
                },
            ));
        }

        self.record(Stage::Linked, &self.primary_name.clone(), proxy, Some(pending.0))
            .map_err(|e| (Stage::Linked, e))?;
        Ok(())
    }

    async fn verify_all(
        &mut self,
        primary: Address,
        proxy: Address,
    ) -> Vec<(String, VerifyStatus)> {
        let targets = [
            (self.primary_name.clone(), primary),
            (self.secondary_name.clone(), proxy),
        ];

        let mut results = Vec::with_capacity(targets.len());
        for (name, address) in targets {
            // Both contracts are deployed without constructor arguments
            // visible to the verifier (the proxy's are initializer calldata).
            let status = match self.registrar.verify(&name, address, &[]).await {
                Ok(VerifyOutcome::Verified) => VerifyStatus::Verified,
                Ok(VerifyOutcome::AlreadyVerified) => VerifyStatus::AlreadyVerified,
                Err(e) => {
                    tracing::warn!(contract = %name, address = %address, error = %e, "Verification failed");
                    VerifyStatus::Failed(e.to_string())
                }
            };
            tracing::info!(contract = %name, address = %address, status = %status, "Verification result");
            results.push((name, status));
        }
        results
    }
}
