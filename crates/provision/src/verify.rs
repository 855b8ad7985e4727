//! Verification registrar: submits deployed contracts to an
//! etherscan-compatible source-verification service.
//!
//! The service itself is not idempotent, but "already verified" responses
//! are folded into success so the call is idempotent from the caller's
//! viewpoint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy_core::primitives::Address;
use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;

use crate::config::VerifierConfig;
use crate::error::ProvisionError;
use crate::rpc;

/// Success outcomes of a verification submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum VerifyOutcome {
    Verified,
    AlreadyVerified,
}

/// The seam the orchestrator submits verifications through. `name` is
/// the logical artifact name the submission's source payload is looked
/// up under.
#[allow(async_fn_in_trait)]
pub trait Registrar {
    async fn verify(
        &self,
        name: &str,
        address: Address,
        ctor_args: &[u8],
    ) -> Result<VerifyOutcome, ProvisionError>;
}

/// Source payload carried alongside the creation bytecode in a compiled
/// artifact: everything the verification service needs to rebuild and
/// compare the contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBundle {
    pub contract_name: String,
    /// Flattened Solidity source, exactly as compiled.
    pub source_code: String,
    /// Full solc version string, e.g. `v0.8.4+commit.c7e474f2`.
    pub compiler_version: String,
    #[serde(default)]
    pub optimization_used: bool,
    #[serde(default = "default_runs")]
    pub runs: u32,
}

fn default_runs() -> u32 {
    200
}

impl SourceBundle {
    /// Load the bundle for a named artifact from the artifacts directory.
    pub fn load(artifacts_dir: &Path, name: &str) -> Result<Self, ProvisionError> {
        let path = artifacts_dir.join(format!("{name}.json"));
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ProvisionError::Configuration(format!(
                "missing artifact for {name} at {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ProvisionError::Configuration(format!(
                "artifact for {name} carries no verifiable source payload: {e}"
            ))
        })
    }
}

/// Response envelope of the etherscan-style contract API.
#[derive(Debug, Deserialize)]
struct VerifierResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: String,
}

/// Classify a service response into an outcome or an error.
///
/// Prior verification is success. Rate limiting is retriable; a
/// constructor-argument mismatch is fatal because resubmitting the same
/// encoding can never succeed.
fn classify_response(
    address: Address,
    response: &VerifierResponse,
) -> Result<VerifyOutcome, ProvisionError> {
    if response.status == "1" {
        return Ok(VerifyOutcome::Verified);
    }

    let detail = if response.result.is_empty() {
        &response.message
    } else {
        &response.result
    };
    let lowered = detail.to_lowercase();

    if lowered.contains("already verified") {
        return Ok(VerifyOutcome::AlreadyVerified);
    }

    let retriable = lowered.contains("rate limit") || lowered.contains("try again");
    Err(ProvisionError::Verification {
        address: format!("{address}"),
        reason: detail.clone(),
        retriable,
    })
}

/// The `verifysourcecode` form body for one submission.
fn verification_form(
    api_key: &str,
    chain_id: u64,
    bundle: &SourceBundle,
    address: Address,
    ctor_args: &[u8],
) -> Vec<(&'static str, String)> {
    vec![
        ("apikey", api_key.to_string()),
        ("module", "contract".to_string()),
        ("action", "verifysourcecode".to_string()),
        ("chainid", chain_id.to_string()),
        ("contractaddress", format!("{address}")),
        ("codeformat", "solidity-single-file".to_string()),
        ("contractname", bundle.contract_name.clone()),
        ("sourceCode", bundle.source_code.clone()),
        ("compilerversion", bundle.compiler_version.clone()),
        (
            "optimizationUsed",
            if bundle.optimization_used { "1" } else { "0" }.to_string(),
        ),
        ("runs", bundle.runs.to_string()),
        // The etherscan API really does spell it this way.
        ("constructorArguements", hex::encode(ctor_args)),
    ]
}

/// Production registrar over the configured verification service.
pub struct EtherscanRegistrar {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    chain_id: u64,
    artifacts_dir: PathBuf,
    retry: ExponentialBuilder,
}

impl EtherscanRegistrar {
    pub fn new(
        config: &VerifierConfig,
        chain_id: u64,
        artifacts_dir: &Path,
    ) -> Result<Self, ProvisionError> {
        Ok(Self {
            http: rpc::create_client(Duration::from_secs(30))?,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            chain_id,
            artifacts_dir: artifacts_dir.to_path_buf(),
            retry: ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(2))
                .with_max_times(3),
        })
    }

    async fn submit(
        &self,
        bundle: &SourceBundle,
        address: Address,
        ctor_args: &[u8],
    ) -> Result<VerifyOutcome, ProvisionError> {
        let form = verification_form(&self.api_key, self.chain_id, bundle, address, ctor_args);
        let response = self
            .http
            .post(&self.api_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ProvisionError::Transient(format!("verification service: {e}")))?;

        let body: VerifierResponse = response.json().await.map_err(|e| {
            ProvisionError::Transient(format!("malformed verification response: {e}"))
        })?;

        classify_response(address, &body)
    }
}

impl Registrar for EtherscanRegistrar {
    async fn verify(
        &self,
        name: &str,
        address: Address,
        ctor_args: &[u8],
    ) -> Result<VerifyOutcome, ProvisionError> {
        // Loading is local and never retried; only submissions are.
        let bundle = SourceBundle::load(&self.artifacts_dir, name)?;

        let outcome = (|| self.submit(&bundle, address, ctor_args))
            .retry(self.retry.clone())
            .when(ProvisionError::is_transient)
            .notify(|err, delay| {
                tracing::warn!(
                    address = %address,
                    error = %err,
                    retry_in = ?delay,
                    "Verification attempt failed, backing off"
                );
            })
            .await?;

        tracing::info!(contract = name, address = %address, outcome = %outcome, "Verification succeeded");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn response(status: &str, result: &str) -> VerifierResponse {
        VerifierResponse {
            status: status.to_string(),
            message: String::new(),
            result: result.to_string(),
        }
    }

    fn addr() -> Address {
        Address::repeat_byte(0xaa)
    }

    #[test]
    fn test_success_is_verified() {
        let outcome = classify_response(addr(), &response("1", "OK")).unwrap();
        assert_eq!(outcome, VerifyOutcome::Verified);
    }

    #[test]
    fn test_already_verified_is_success_not_error() {
        let outcome = classify_response(
            addr(),
            &response("0", "Contract source code already verified"),
        )
        .unwrap();
        assert_eq!(outcome, VerifyOutcome::AlreadyVerified);
    }

    #[test]
    fn test_rate_limit_is_retriable() {
        let err = classify_response(
            addr(),
            &response("0", "Max rate limit reached, please try again later"),
        )
        .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_argument_mismatch_is_fatal() {
        let err = classify_response(
            addr(),
            &response("0", "Invalid constructor arguments provided"),
        )
        .unwrap_err();
        assert!(!err.is_transient());
    }

    fn bundle() -> SourceBundle {
        SourceBundle {
            contract_name: "Ledger".to_string(),
            source_code: "contract Ledger {}".to_string(),
            compiler_version: "v0.8.4+commit.c7e474f2".to_string(),
            optimization_used: true,
            runs: 500,
        }
    }

    #[test]
    fn test_form_carries_source_payload() {
        let form = verification_form("k", 1111, &bundle(), addr(), &[0xde, 0xad]);
        let field = |key: &str| {
            form.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
                .unwrap_or_else(|| panic!("missing form field {key}"))
        };

        assert_eq!(field("action"), "verifysourcecode");
        assert_eq!(field("contractname"), "Ledger");
        assert_eq!(field("sourceCode"), "contract Ledger {}");
        assert_eq!(field("compilerversion"), "v0.8.4+commit.c7e474f2");
        assert_eq!(field("optimizationUsed"), "1");
        assert_eq!(field("runs"), "500");
        assert_eq!(field("constructorArguements"), "dead");
    }

    #[test]
    fn test_bundle_loads_from_artifact() {
        let dir = TempDir::new("verify").unwrap();
        std::fs::write(
            dir.path().join("Ledger.json"),
            r#"{
                "bytecode": "0x6001",
                "contractName": "Ledger",
                "sourceCode": "contract Ledger {}",
                "compilerVersion": "v0.8.4+commit.c7e474f2"
            }"#,
        )
        .unwrap();

        let bundle = SourceBundle::load(dir.path(), "Ledger").unwrap();
        assert_eq!(bundle.contract_name, "Ledger");
        assert_eq!(bundle.source_code, "contract Ledger {}");
        assert!(!bundle.optimization_used);
        assert_eq!(bundle.runs, 200);
    }

    #[test]
    fn test_sourceless_artifact_is_fatal_configuration_error() {
        let dir = TempDir::new("verify").unwrap();
        std::fs::write(dir.path().join("Ledger.json"), r#"{"bytecode": "0x6001"}"#).unwrap();

        let err = SourceBundle::load(dir.path(), "Ledger").unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));
        assert!(!err.is_transient());
    }
}
