//! Append-only run manifest.
//!
//! One JSON line per successful step: `{ stage, name, address, tx_hash,
//! recorded_at }`. The file is exclusive-locked for the lifetime of a run
//! so two processes cannot drive the same credential at once, and a
//! resumed run can skip steps whose outputs are already recorded instead
//! of minting duplicate contracts.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use alloy_core::primitives::Address;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;
use crate::pipeline::Stage;

/// One recorded pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    /// Logical name of the produced artifact (contract or link).
    pub name: String,
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl StageRecord {
    pub fn new(stage: Stage, name: &str, address: Address, tx_hash: Option<String>) -> Self {
        Self {
            stage,
            name: name.to_string(),
            address,
            tx_hash,
            recorded_at: Utc::now(),
        }
    }
}

/// The open, locked manifest for one run.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    file: File,
    records: Vec<StageRecord>,
}

impl Manifest {
    /// Open (creating if needed) and exclusive-lock the manifest,
    /// loading any records from a previous run.
    pub fn open(path: &Path) -> Result<Self, ProvisionError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(|e| {
                ProvisionError::Configuration(format!(
                    "failed to open manifest {}: {e}",
                    path.display()
                ))
            })?;

        file.try_lock_exclusive().map_err(|_| {
            ProvisionError::Configuration(format!(
                "manifest {} is locked by another run; the credential must not be used concurrently",
                path.display()
            ))
        })?;

        let mut records = Vec::new();
        for line in BufReader::new(&file).lines() {
            let line = line.map_err(|e| {
                ProvisionError::Configuration(format!(
                    "failed to read manifest {}: {e}",
                    path.display()
                ))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let record: StageRecord = serde_json::from_str(&line).map_err(|e| {
                ProvisionError::Configuration(format!(
                    "corrupt manifest line in {}: {e}",
                    path.display()
                ))
            })?;
            records.push(record);
        }

        if !records.is_empty() {
            tracing::info!(
                path = %path.display(),
                records = records.len(),
                "Loaded manifest from a previous run"
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            records,
        })
    }

    /// Append a record and flush it to disk before returning.
    pub fn record(&mut self, record: StageRecord) -> Result<(), ProvisionError> {
        let line = serde_json::to_string(&record).map_err(|e| {
            ProvisionError::Configuration(format!("failed to serialize manifest record: {e}"))
        })?;
        writeln!(self.file, "{line}").map_err(|e| {
            ProvisionError::Configuration(format!(
                "failed to append to manifest {}: {e}",
                self.path.display()
            ))
        })?;
        self.file.flush().map_err(|e| {
            ProvisionError::Configuration(format!(
                "failed to flush manifest {}: {e}",
                self.path.display()
            ))
        })?;
        self.records.push(record);
        Ok(())
    }

    /// The recorded address for a stage/name pair, if a previous run
    /// already produced it.
    pub fn address_for(&self, stage: Stage, name: &str) -> Option<Address> {
        self.records
            .iter()
            .find(|r| r.stage == stage && r.name == name)
            .map(|r| r.address)
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new("manifest").unwrap();
        let path = dir.path().join("run.jsonl");

        {
            let mut manifest = Manifest::open(&path).unwrap();
            assert!(manifest.is_empty());
            manifest
                .record(StageRecord::new(
                    Stage::PrimaryDeployed,
                    "Ledger",
                    addr(0xaa),
                    Some("0xt1".into()),
                ))
                .unwrap();
            manifest
                .record(StageRecord::new(
                    Stage::SecondaryDeployed,
                    "Rewards",
                    addr(0xbb),
                    Some("0xt2".into()),
                ))
                .unwrap();
        }

        let manifest = Manifest::open(&path).unwrap();
        assert_eq!(manifest.records().len(), 2);
        assert_eq!(
            manifest.address_for(Stage::PrimaryDeployed, "Ledger"),
            Some(addr(0xaa))
        );
        assert_eq!(
            manifest.address_for(Stage::SecondaryDeployed, "Rewards"),
            Some(addr(0xbb))
        );
        assert_eq!(manifest.address_for(Stage::Linked, "Ledger"), None);
    }

    #[test]
    fn test_corrupt_manifest_rejected() {
        let dir = TempDir::new("manifest").unwrap();
        let path = dir.path().join("run.jsonl");
        std::fs::write(&path, "not json\n").unwrap();

        let err = Manifest::open(&path).unwrap_err();
        assert!(err.to_string().contains("corrupt manifest"));
    }

    #[test]
    fn test_second_open_is_refused_while_locked() {
        let dir = TempDir::new("manifest").unwrap();
        let path = dir.path().join("run.jsonl");

        let _held = Manifest::open(&path).unwrap();
        let err = Manifest::open(&path).unwrap_err();
        assert!(err.to_string().contains("locked by another run"));
    }
}
