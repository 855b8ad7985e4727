//! Orchestrator integration tests against in-memory fakes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_core::primitives::Address;
use backon::ExponentialBuilder;
use stakekit_provision::{
    ContractClient, Manifest, Outcome, PendingTx, Pipeline, ProvisionError, Receipt, Registrar,
    Stage, StageRecord, VerifyOutcome, VerifyStatus, abi,
};

const PRIMARY_TX: &str = "0xtx-primary";
const PROXY_TX: &str = "0xtx-proxy";
const IMPL_TX: &str = "0xtx-impl";
const LINK_TX: &str = "0xtx-link";

fn primary_addr() -> Address {
    Address::repeat_byte(0xaa)
}

fn proxy_addr() -> Address {
    Address::repeat_byte(0xbb)
}

fn impl_addr() -> Address {
    Address::repeat_byte(0xcc)
}

#[derive(Default)]
struct MockState {
    ops: Mutex<Vec<String>>,
    /// How many times deploy_proxy should fail transiently before succeeding.
    proxy_transient_failures: AtomicUsize,
    /// Address returned by the post-link read; defaults to the proxy.
    link_read_override: Mutex<Option<Address>>,
}

/// In-memory contract client recording the order of remote operations.
/// Clones share state so tests keep a handle into the op log.
#[derive(Default, Clone)]
struct MockClient(Arc<MockState>);

impl MockClient {
    fn with_proxy_transient_failures(count: usize) -> Self {
        let client = Self::default();
        client.0.proxy_transient_failures.store(count, Ordering::SeqCst);
        client
    }

    fn with_link_read_override(address: Address) -> Self {
        let client = Self::default();
        *client.0.link_read_override.lock().unwrap() = Some(address);
        client
    }

    fn ops(&self) -> Vec<String> {
        self.0.ops.lock().unwrap().clone()
    }

    fn push(&self, op: impl Into<String>) {
        self.0.ops.lock().unwrap().push(op.into());
    }
}

impl ContractClient for MockClient {
    async fn deploy_contract(
        &self,
        name: &str,
        _ctor_args: &[u8],
    ) -> Result<PendingTx, ProvisionError> {
        self.push(format!("deploy {name}"));
        let tx = match name {
            "Rewards" => IMPL_TX,
            _ => PRIMARY_TX,
        };
        Ok(PendingTx(tx.to_string()))
    }

    async fn deploy_proxy(
        &self,
        name: &str,
        implementation: Address,
        init_data: &[u8],
    ) -> Result<PendingTx, ProvisionError> {
        if self.0.proxy_transient_failures.load(Ordering::SeqCst) > 0 {
            self.0.proxy_transient_failures.fetch_sub(1, Ordering::SeqCst);
            self.push(format!("deploy-proxy {name} (transient failure)"));
            return Err(ProvisionError::Transient("connection reset".into()));
        }
        assert_eq!(implementation, impl_addr());
        // The initializer must reference the already-deployed primary.
        assert_eq!(
            abi::decode_address_word(&init_data[4..36]),
            Some(primary_addr())
        );
        self.push(format!("deploy-proxy {name}"));
        Ok(PendingTx(PROXY_TX.to_string()))
    }

    async fn call(
        &self,
        address: Address,
        data: &[u8],
        _gas_limit: u64,
    ) -> Result<PendingTx, ProvisionError> {
        assert_eq!(address, primary_addr(), "link call must target the primary");
        assert_eq!(
            abi::decode_address_word(&data[4..]),
            Some(proxy_addr()),
            "link call must carry the proxy address"
        );
        self.push("call setRewards");
        Ok(PendingTx(LINK_TX.to_string()))
    }

    async fn wait_for_confirmation(&self, tx: &PendingTx) -> Result<Receipt, ProvisionError> {
        self.push(format!("confirm {}", tx.0));
        let contract_address = match tx.0.as_str() {
            PRIMARY_TX => Some(primary_addr()),
            IMPL_TX => Some(impl_addr()),
            PROXY_TX => Some(proxy_addr()),
            _ => None,
        };
        Ok(Receipt::confirmed(&tx.0, contract_address))
    }

    async fn read(&self, _address: Address, _data: &[u8]) -> Result<Vec<u8>, ProvisionError> {
        self.push("read rewards");
        let stored = (*self.0.link_read_override.lock().unwrap()).unwrap_or_else(proxy_addr);
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(stored.as_slice());
        Ok(word.to_vec())
    }
}

#[derive(Default)]
struct RegistrarState {
    submissions: Mutex<Vec<Address>>,
    already_verified: bool,
    fail_primary: bool,
}

/// Registrar recording submissions; clones share state.
#[derive(Default, Clone)]
struct MockRegistrar(Arc<RegistrarState>);

impl MockRegistrar {
    fn already_verified() -> Self {
        Self(Arc::new(RegistrarState {
            already_verified: true,
            ..Default::default()
        }))
    }

    fn failing_primary() -> Self {
        Self(Arc::new(RegistrarState {
            fail_primary: true,
            ..Default::default()
        }))
    }

    fn submissions(&self) -> Vec<Address> {
        self.0.submissions.lock().unwrap().clone()
    }
}

impl Registrar for MockRegistrar {
    async fn verify(
        &self,
        _name: &str,
        address: Address,
        _ctor_args: &[u8],
    ) -> Result<VerifyOutcome, ProvisionError> {
        self.0.submissions.lock().unwrap().push(address);
        if self.0.fail_primary && address == primary_addr() {
            return Err(ProvisionError::Verification {
                address: format!("{address}"),
                reason: "service exploded".into(),
                retriable: false,
            });
        }
        if self.0.already_verified {
            Ok(VerifyOutcome::AlreadyVerified)
        } else {
            Ok(VerifyOutcome::Verified)
        }
    }
}

fn pipeline(client: MockClient, registrar: MockRegistrar) -> Pipeline<MockClient, MockRegistrar> {
    Pipeline::new(
        client,
        registrar,
        "Ledger",
        "Rewards",
        Address::repeat_byte(0x01),
        Address::repeat_byte(0x02),
        4_000_000,
    )
    .with_retry(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_times(3),
    )
}

#[tokio::test]
async fn test_happy_path_reaches_done() {
    let outcome = pipeline(MockClient::default(), MockRegistrar::default())
        .run()
        .await
        .unwrap();

    let Outcome::Complete(summary) = outcome else {
        panic!("expected Complete, got {outcome:?}");
    };
    assert_eq!(summary.primary, primary_addr());
    assert_eq!(summary.proxy, proxy_addr());
    assert_eq!(summary.implementation, impl_addr());
    assert_eq!(summary.verification.len(), 2);
    assert!(summary.verification.iter().all(|(_, s)| s.is_success()));
}

#[tokio::test]
async fn test_link_only_after_both_deployments_confirmed() {
    let client = MockClient::default();
    let outcome = pipeline(client.clone(), MockRegistrar::default())
        .run()
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Complete(_)));

    let ops = client.ops();
    let position = |op: &str| {
        ops.iter()
            .position(|o| o == op)
            .unwrap_or_else(|| panic!("op '{op}' not recorded in {ops:?}"))
    };

    let link = position("call setRewards");
    assert!(position(&format!("confirm {PRIMARY_TX}")) < link);
    assert!(position(&format!("confirm {PROXY_TX}")) < link);
    // The link itself is confirmed and then read back.
    assert!(link < position(&format!("confirm {LINK_TX}")));
    assert!(position(&format!("confirm {LINK_TX}")) < position("read rewards"));
}

#[tokio::test]
async fn test_exactly_two_verifications_for_primary_and_proxy() {
    let registrar = MockRegistrar::default();
    let outcome = pipeline(MockClient::default(), registrar.clone())
        .run()
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Complete(_)));
    assert_eq!(registrar.submissions(), vec![primary_addr(), proxy_addr()]);
}

#[tokio::test]
async fn test_consistency_mismatch_stops_before_verification() {
    let client = MockClient::with_link_read_override(Address::repeat_byte(0xee));
    let registrar = MockRegistrar::default();
    let failure = pipeline(client, registrar.clone()).run().await.unwrap_err();

    assert_eq!(failure.stage, Stage::Linked);
    assert!(matches!(failure.source, ProvisionError::Consistency { .. }));
    // No false positive reaches verification.
    assert!(registrar.submissions().is_empty());
    // Both deployed addresses are in the report for manual recovery.
    let produced: Vec<_> = failure.produced.iter().map(|(n, _)| n.as_str()).collect();
    assert!(produced.contains(&"Ledger"));
    assert!(produced.contains(&"Rewards"));
}

#[tokio::test]
async fn test_transient_secondary_failures_within_budget_still_complete() {
    let client = MockClient::with_proxy_transient_failures(2);
    let outcome = pipeline(client, MockRegistrar::default())
        .run()
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Complete(_)));
}

#[tokio::test]
async fn test_transient_secondary_failures_beyond_budget_fail_with_primary_address() {
    let client = MockClient::with_proxy_transient_failures(10);
    let failure = pipeline(client, MockRegistrar::default())
        .run()
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::SecondaryDeployed);
    assert!(failure.source.is_transient());
    assert_eq!(
        failure.produced,
        vec![
            ("Ledger".to_string(), primary_addr()),
            ("RewardsImplementation".to_string(), impl_addr()),
        ]
    );
    // The operator-facing report names the orphaned contracts.
    assert!(failure.to_string().contains(&format!("{}", primary_addr())));
    assert!(failure.to_string().contains(&format!("{}", impl_addr())));
}

#[tokio::test]
async fn test_proxy_retry_never_redeploys_the_implementation() {
    let client = MockClient::with_proxy_transient_failures(2);
    let outcome = pipeline(client.clone(), MockRegistrar::default())
        .run()
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Complete(_)));

    let ops = client.ops();
    // One implementation creation, regardless of proxy submission retries.
    assert_eq!(
        ops.iter().filter(|op| *op == "deploy Rewards").count(),
        1,
        "ops: {ops:?}"
    );
    // Two transient proxy attempts plus the one that went through.
    assert_eq!(
        ops.iter().filter(|op| op.starts_with("deploy-proxy")).count(),
        3,
        "ops: {ops:?}"
    );
}

#[tokio::test]
async fn test_resume_skips_recorded_primary_deployment() {
    let dir = tempdir::TempDir::new("resume").unwrap();
    let path = dir.path().join("run.jsonl");

    {
        let mut manifest = Manifest::open(&path).unwrap();
        manifest
            .record(StageRecord::new(
                Stage::PrimaryDeployed,
                "Ledger",
                primary_addr(),
                Some(PRIMARY_TX.to_string()),
            ))
            .unwrap();
    }

    let client = MockClient::default();
    let manifest = Manifest::open(&path).unwrap();
    let outcome = pipeline(client.clone(), MockRegistrar::default())
        .with_manifest(manifest)
        .run()
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::Complete(_)));
    // No second creation for the primary: resume must not mint duplicates.
    let ops = client.ops();
    assert!(!ops.contains(&"deploy Ledger".to_string()), "ops: {ops:?}");
    assert!(ops.contains(&"deploy-proxy Rewards".to_string()));
}

#[tokio::test]
async fn test_already_verified_counts_as_success() {
    let outcome = pipeline(MockClient::default(), MockRegistrar::already_verified())
        .run()
        .await
        .unwrap();

    let Outcome::Complete(summary) = outcome else {
        panic!("already-verified must not demote the outcome");
    };
    assert!(
        summary
            .verification
            .iter()
            .all(|(_, s)| *s == VerifyStatus::AlreadyVerified)
    );
}

#[tokio::test]
async fn test_primary_verification_failure_is_partial_success() {
    let registrar = MockRegistrar::failing_primary();
    let outcome = pipeline(MockClient::default(), registrar.clone())
        .run()
        .await
        .unwrap();

    let Outcome::PartialSuccess(summary) = outcome else {
        panic!("expected PartialSuccess");
    };
    // The secondary was still attempted and succeeded.
    assert_eq!(registrar.submissions(), vec![primary_addr(), proxy_addr()]);
    assert!(matches!(summary.verification[0].1, VerifyStatus::Failed(_)));
    assert_eq!(summary.verification[1].1, VerifyStatus::Verified);
}
