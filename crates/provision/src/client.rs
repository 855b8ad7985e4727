//! Remote contract client: deploy, call, wait and read against a
//! JSON-RPC execution endpoint.
//!
//! The trait is the seam the orchestrator is tested through; the
//! production implementation submits `eth_sendTransaction` from the
//! address derived from the profile credential and polls for receipts.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use alloy_core::primitives::{Address, keccak256};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Deserialize;
use serde_json::json;

use crate::abi;
use crate::config::NetworkProfile;
use crate::error::ProvisionError;
use crate::rpc;

/// A submitted but not yet confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx(pub String);

/// The relevant slice of an `eth_getTransactionReceipt` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    /// `0x1` on success, `0x0` on revert. Absent on pre-Byzantium chains.
    #[serde(default)]
    pub status: Option<String>,
    /// Populated for contract-creation transactions.
    #[serde(default)]
    pub contract_address: Option<Address>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_deref() != Some("0x0")
    }

    /// A confirmed creation receipt, for tests and fakes.
    pub fn confirmed(tx_hash: &str, contract_address: Option<Address>) -> Self {
        Self {
            transaction_hash: tx_hash.to_string(),
            status: Some("0x1".to_string()),
            contract_address,
        }
    }
}

/// Capability set over the remote execution environment.
///
/// Mutating operations submit and return a pending handle; none of them
/// is idempotent, so callers must never blindly re-invoke a submission
/// that may have reached the chain.
#[allow(async_fn_in_trait)]
pub trait ContractClient {
    /// Submit a contract-creation transaction for the named artifact.
    async fn deploy_contract(
        &self,
        name: &str,
        ctor_args: &[u8],
    ) -> Result<PendingTx, ProvisionError>;

    /// Submit the creation of an ERC-1967 proxy pointing at an
    /// already-confirmed `implementation`, passing `init_data` as the
    /// initializer calldata. Submission only: the caller confirms the
    /// implementation beforehand and the proxy afterwards, so a retried
    /// proxy submission never touches the implementation again.
    async fn deploy_proxy(
        &self,
        name: &str,
        implementation: Address,
        init_data: &[u8],
    ) -> Result<PendingTx, ProvisionError>;

    /// Submit a method call with an explicit gas ceiling. Exceeding the
    /// ceiling is terminal for the call, not retried.
    async fn call(
        &self,
        address: Address,
        data: &[u8],
        gas_limit: u64,
    ) -> Result<PendingTx, ProvisionError>;

    /// Suspend until the network reports inclusion, or time out.
    async fn wait_for_confirmation(&self, tx: &PendingTx) -> Result<Receipt, ProvisionError>;

    /// Read-only `eth_call`.
    async fn read(&self, address: Address, data: &[u8]) -> Result<Vec<u8>, ProvisionError>;
}

/// Derive the EVM address controlled by a hex-encoded private key.
pub fn derive_address(private_key: &str) -> Result<Address, ProvisionError> {
    let raw = hex::decode(private_key.trim_start_matches("0x"))
        .map_err(|e| ProvisionError::Configuration(format!("private key is not hex: {e}")))?;
    let signing_key = SigningKey::from_slice(&raw)
        .map_err(|e| ProvisionError::Configuration(format!("invalid private key: {e}")))?;
    let public_key = signing_key.verifying_key().to_encoded_point(false);
    // Address = last 20 bytes of keccak(uncompressed pubkey minus the 0x04 tag).
    let digest = keccak256(&public_key.as_bytes()[1..]);
    Ok(Address::from_slice(&digest[12..]))
}

/// Hardhat-style compiled artifact; only the creation bytecode matters here.
#[derive(Debug, Deserialize)]
struct Artifact {
    bytecode: String,
}

/// Production client over a single configured JSON-RPC endpoint.
pub struct RpcClient {
    http: reqwest::Client,
    rpc_url: String,
    sender: Address,
    artifacts_dir: PathBuf,
    deploy_gas_limit: u64,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl RpcClient {
    pub fn new(profile: &NetworkProfile) -> Result<Self, ProvisionError> {
        let sender = derive_address(&profile.private_key)?;
        let http = rpc::create_client(Duration::from_secs(profile.rpc_timeout_secs))?;
        tracing::info!(sender = %sender, rpc_url = %profile.rpc_url, "Remote client ready");
        Ok(Self {
            http,
            rpc_url: profile.rpc_url.clone(),
            sender,
            artifacts_dir: profile.artifacts_dir.clone(),
            deploy_gas_limit: profile.deploy_gas_limit,
            confirmation_timeout: Duration::from_secs(profile.confirmation_timeout_secs),
            poll_interval: Duration::from_secs(2),
        })
    }

    /// The address the credential controls; transactions are sent from it.
    pub fn sender(&self) -> Address {
        self.sender
    }

    fn creation_bytecode(&self, name: &str) -> Result<Vec<u8>, ProvisionError> {
        let path = self.artifacts_dir.join(format!("{name}.json"));
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ProvisionError::Configuration(format!(
                "missing artifact for {name} at {}: {e}",
                path.display()
            ))
        })?;
        let artifact: Artifact = serde_json::from_str(&content).map_err(|e| {
            ProvisionError::Configuration(format!("malformed artifact for {name}: {e}"))
        })?;
        hex::decode(artifact.bytecode.trim_start_matches("0x")).map_err(|e| {
            ProvisionError::Configuration(format!("artifact bytecode for {name} is not hex: {e}"))
        })
    }

    async fn send_transaction(
        &self,
        to: Option<Address>,
        data: &[u8],
        gas_limit: u64,
    ) -> Result<PendingTx, ProvisionError> {
        let mut tx = json!({
            "from": hex_address(self.sender),
            "gas": format!("0x{gas_limit:x}"),
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(to) = to {
            tx["to"] = json!(hex_address(to));
        }

        let tx_hash: String = rpc::json_rpc_call(
            &self.http,
            &self.rpc_url,
            "eth_sendTransaction",
            vec![tx],
        )
        .await?;

        tracing::debug!(tx_hash = %tx_hash, to = ?to, "Transaction submitted");
        Ok(PendingTx(tx_hash))
    }
}

fn hex_address(address: Address) -> String {
    format!("0x{}", hex::encode(address.as_slice()))
}

impl ContractClient for RpcClient {
    async fn deploy_contract(
        &self,
        name: &str,
        ctor_args: &[u8],
    ) -> Result<PendingTx, ProvisionError> {
        let mut data = self.creation_bytecode(name)?;
        data.extend_from_slice(ctor_args);
        tracing::info!(contract = name, "Submitting contract creation");
        self.send_transaction(None, &data, self.deploy_gas_limit).await
    }

    async fn deploy_proxy(
        &self,
        name: &str,
        implementation: Address,
        init_data: &[u8],
    ) -> Result<PendingTx, ProvisionError> {
        let ctor = abi::encode_proxy_ctor(implementation, init_data);
        tracing::info!(contract = name, implementation = %implementation, "Submitting proxy creation");
        self.deploy_contract("ERC1967Proxy", &ctor).await
    }

    async fn call(
        &self,
        address: Address,
        data: &[u8],
        gas_limit: u64,
    ) -> Result<PendingTx, ProvisionError> {
        self.send_transaction(Some(address), data, gas_limit).await
    }

    async fn wait_for_confirmation(&self, tx: &PendingTx) -> Result<Receipt, ProvisionError> {
        let start = Instant::now();
        loop {
            if start.elapsed() > self.confirmation_timeout {
                return Err(ProvisionError::ConfirmationTimeout(tx.0.clone()));
            }

            let receipt: Option<Receipt> = match rpc::json_rpc_call(
                &self.http,
                &self.rpc_url,
                "eth_getTransactionReceipt",
                vec![json!(tx.0)],
            )
            .await
            {
                Ok(receipt) => receipt,
                // Polling is read-only, so riding out transient faults here
                // is safe; anything else propagates.
                Err(e) if e.is_transient() => {
                    tracing::trace!(tx = %tx.0, error = %e, "Receipt poll failed, retrying...");
                    None
                }
                Err(e) => return Err(e),
            };

            if let Some(receipt) = receipt {
                if !receipt.succeeded() {
                    return Err(ProvisionError::ChainRejection {
                        operation: format!("transaction {}", tx.0),
                        reason: "reverted (status 0x0)".to_string(),
                    });
                }
                tracing::debug!(tx = %tx.0, "Transaction confirmed");
                return Ok(receipt);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn read(&self, address: Address, data: &[u8]) -> Result<Vec<u8>, ProvisionError> {
        let result: String = rpc::json_rpc_call(
            &self.http,
            &self.rpc_url,
            "eth_call",
            vec![
                json!({
                    "to": hex_address(address),
                    "data": format!("0x{}", hex::encode(data)),
                }),
                json!("latest"),
            ],
        )
        .await?;

        hex::decode(result.trim_start_matches("0x")).map_err(|e| {
            ProvisionError::Transient(format!("eth_call returned non-hex payload: {e}"))
        })
    }
}
