//! Network profile configuration.
//!
//! Everything a run needs is threaded in from here at construction time;
//! no component reads ambient environment in deep call paths. Profiles
//! live in a TOML file keyed by network name:
//!
//! ```toml
//! [networks.coredev]
//! rpc_url = "https://rpc.dev.example.network"
//! chain_id = 1111
//! private_key = "0x..."
//!
//! [networks.coredev.verifier]
//! api_url = "http://verifier.example.network/api"
//! browser_url = "https://scan.example.network"
//! api_key = "..."
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ProvisionError;

/// The default name for the network profiles file.
pub const PROFILES_FILENAME: &str = "Networks.toml";

fn default_deploy_gas_limit() -> u64 {
    6_000_000
}

/// The observed fixed ceiling for the linking call. A fixed ceiling is
/// kept deliberately instead of gas estimation.
fn default_call_gas_limit() -> u64 {
    4_000_000
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_rpc_timeout_secs() -> u64 {
    10
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

/// Target network for the source-verification service: a chain identifier
/// plus an API/browser URL pair, keyed by an API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierConfig {
    pub api_url: String,
    pub browser_url: String,
    pub api_key: String,
}

/// A named network profile: endpoint, credential and gas settings for one
/// deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,
    /// Chain identifier, forwarded to the verification service.
    pub chain_id: u64,
    /// Hex-encoded private key. The credential is the one shared resource
    /// of a run; two runs must not use it concurrently.
    pub private_key: String,

    /// Administrative owner passed to the rewards initializer. Defaults to
    /// the address derived from the credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_address: Option<String>,
    /// Operational owner passed to the rewards initializer. Defaults to
    /// the address derived from the credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_address: Option<String>,

    /// Gas ceiling for contract-creation transactions.
    #[serde(default = "default_deploy_gas_limit")]
    pub deploy_gas_limit: u64,
    /// Gas ceiling for the linking call.
    #[serde(default = "default_call_gas_limit")]
    pub call_gas_limit: u64,
    /// How long to wait for a submitted transaction to confirm.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    /// Per-request HTTP timeout.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    /// Directory holding compiled contract artifacts (`<Name>.json`:
    /// creation bytecode plus the verification source payload).
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Where the append-only run manifest is written. Defaults to
    /// `<network>-deploy.jsonl` in the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,

    pub verifier: VerifierConfig,
}

impl NetworkProfile {
    /// Validate the parts of the profile that would otherwise fail deep
    /// inside a run: URL shape and the credential.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        Url::parse(&self.rpc_url)
            .map_err(|e| ProvisionError::Configuration(format!("invalid rpc_url: {e}")))?;
        Url::parse(&self.verifier.api_url)
            .map_err(|e| ProvisionError::Configuration(format!("invalid verifier api_url: {e}")))?;
        crate::client::derive_address(&self.private_key)?;
        if let Some(admin) = &self.admin_address {
            parse_address("admin_address", admin)?;
        }
        if let Some(operator) = &self.operator_address {
            parse_address("operator_address", operator)?;
        }
        Ok(())
    }

    /// Resolve the administrative owner address.
    pub fn admin(&self, fallback: Address) -> Result<Address, ProvisionError> {
        match &self.admin_address {
            Some(raw) => parse_address("admin_address", raw),
            None => Ok(fallback),
        }
    }

    /// Resolve the operational owner address.
    pub fn operator(&self, fallback: Address) -> Result<Address, ProvisionError> {
        match &self.operator_address {
            Some(raw) => parse_address("operator_address", raw),
            None => Ok(fallback),
        }
    }

    /// The manifest path for this profile under the given network name.
    pub fn manifest_path(&self, network: &str) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{network}-deploy.jsonl")))
    }
}

fn parse_address(field: &str, raw: &str) -> Result<Address, ProvisionError> {
    raw.parse::<Address>()
        .map_err(|e| ProvisionError::Configuration(format!("invalid {field} '{raw}': {e}")))
}

/// The full profiles file: a map of network name to profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profiles {
    pub networks: HashMap<String, NetworkProfile>,
}

impl Profiles {
    /// Load profiles from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ProvisionError> {
        let config_path = if path.is_dir() {
            path.join(PROFILES_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            ProvisionError::Configuration(format!(
                "failed to read profiles from {}: {e}",
                config_path.display()
            ))
        })?;
        let profiles: Self = toml::from_str(&content)
            .map_err(|e| ProvisionError::Configuration(format!("failed to parse profiles: {e}")))?;
        tracing::info!(path = %config_path.display(), "Network profiles loaded");
        Ok(profiles)
    }

    /// Select a profile by network name and validate it.
    pub fn select(&self, network: &str) -> Result<&NetworkProfile, ProvisionError> {
        let profile = self.networks.get(network).ok_or_else(|| {
            let mut known: Vec<&str> = self.networks.keys().map(String::as_str).collect();
            known.sort_unstable();
            ProvisionError::Configuration(format!(
                "unknown network '{network}' (known: {})",
                known.join(", ")
            ))
        })?;
        profile.validate()?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Throwaway key from a local dev chain.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn sample_toml() -> String {
        format!(
            r#"
            [networks.coredev]
            rpc_url = "https://rpc.dev.example.network"
            chain_id = 1111
            private_key = "{DEV_KEY}"

            [networks.coredev.verifier]
            api_url = "http://verifier.example.network/api"
            browser_url = "https://scan.example.network"
            api_key = "k"
            "#
        )
    }

    #[test]
    fn test_parse_profile_with_defaults() {
        let profiles: Profiles = toml::from_str(&sample_toml()).unwrap();
        let profile = profiles.select("coredev").unwrap();
        assert_eq!(profile.chain_id, 1111);
        assert_eq!(profile.deploy_gas_limit, 6_000_000);
        assert_eq!(profile.call_gas_limit, 4_000_000);
        assert_eq!(profile.confirmation_timeout_secs, 120);
        assert_eq!(profile.artifacts_dir, PathBuf::from("artifacts"));
        assert_eq!(
            profile.manifest_path("coredev"),
            PathBuf::from("coredev-deploy.jsonl")
        );
    }

    #[test]
    fn test_unknown_network_is_configuration_error() {
        let profiles: Profiles = toml::from_str(&sample_toml()).unwrap();
        let err = profiles.select("mainnet").unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration(_)));
        assert!(err.to_string().contains("coredev"));
    }

    #[test]
    fn test_bad_credential_rejected_at_load() {
        let toml_str = sample_toml().replace(DEV_KEY, "0xnothex");
        let profiles: Profiles = toml::from_str(&toml_str).unwrap();
        assert!(profiles.select("coredev").is_err());
    }

    #[test]
    fn test_owner_overrides() {
        let profiles: Profiles = toml::from_str(&sample_toml()).unwrap();
        let mut profile = profiles.networks["coredev"].clone();
        profile.admin_address = Some("0x00000000000000000000000000000000000000aa".into());

        let fallback = Address::repeat_byte(0x01);
        let expected: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        assert_eq!(profile.admin(fallback).unwrap(), expected);
        assert_eq!(profile.operator(fallback).unwrap(), fallback);
    }
}
