use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use alloy::primitives::{hex, Address};
use alloy::signers::local::{MnemonicBuilder, PrivateKeySigner};
use alloy_signer_local::coins_bip39::English;
use eyre::{ensure, Context};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use simple_tqdm::ParTqdm;
use thousands::Separable;
use tracing::info;

use crate::config::Config;

/// On-disk key file entry. Files map a stable integer id to one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    pub address: Address,
    pub private_key: String,
}

impl From<&PrivateKeySigner> for KeyEntry {
    fn from(signer: &PrivateKeySigner) -> Self {
        Self { address: signer.address(), private_key: hex::encode_prefixed(signer.to_bytes()) }
    }
}

pub fn read_key_file(path: &Path) -> eyre::Result<Vec<PrivateKeySigner>> {
    let json = fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let entries: BTreeMap<u32, KeyEntry> =
        serde_json::from_str(&json).wrap_err_with(|| format!("malformed key file {}", path.display()))?;

    entries
        .into_iter()
        .enumerate()
        .map(|(position, (id, entry))| {
            ensure!(position as u32 == id, "key file {} has a gap at id {position}", path.display());
            let signer: PrivateKeySigner =
                entry.private_key.parse().wrap_err_with(|| format!("invalid private key for id {id}"))?;
            ensure!(
                signer.address() == entry.address,
                "key file {} lists {} for id {id} but the key belongs to {}",
                path.display(),
                entry.address,
                signer.address()
            );
            Ok(signer)
        })
        .collect()
}

pub fn write_key_file(path: &Path, signers: &[PrivateKeySigner]) -> eyre::Result<()> {
    let entries: BTreeMap<u32, KeyEntry> =
        signers.iter().enumerate().map(|(id, signer)| (id as u32, KeyEntry::from(signer))).collect();
    let json = serde_json::to_string_pretty(&entries)?;
    fs::write(path, json).wrap_err_with(|| format!("failed to write {}", path.display()))
}

/// Derive one signer per index in parallel, with a progress bar on stderr.
pub fn derive_signers(mnemonic: &str, indices: std::ops::Range<u32>) -> eyre::Result<Vec<PrivateKeySigner>> {
    indices
        .into_par_iter()
        .tqdm()
        .map(|i| {
            MnemonicBuilder::<English>::default()
                .phrase(mnemonic)
                .index(i)
                .and_then(|builder| builder.build())
                .map_err(|e| eyre::eyre!("failed to derive account {i}: {e}"))
        })
        .collect()
}

/// Disjoint sender and receiver pools. Sender `k` always pays receiver `k`.
#[derive(Debug, Clone)]
pub struct AccountPool {
    senders: Vec<PrivateKeySigner>,
    receivers: Vec<PrivateKeySigner>,
}

impl AccountPool {
    pub fn new(senders: Vec<PrivateKeySigner>, receivers: Vec<PrivateKeySigner>) -> eyre::Result<Self> {
        ensure!(!senders.is_empty(), "account pool needs at least one sender");
        ensure!(
            senders.len() == receivers.len(),
            "{} senders but {} receivers, the pools must be the same size",
            senders.len(),
            receivers.len()
        );
        Ok(Self { senders, receivers })
    }

    pub fn generate(count: usize) -> eyre::Result<Self> {
        let senders = (0..count).map(|_| PrivateKeySigner::random()).collect();
        let receivers = (0..count).map(|_| PrivateKeySigner::random()).collect();
        Self::new(senders, receivers)
    }

    /// Senders take indices `0..count`, receivers `count..2 * count`.
    pub fn from_mnemonic(mnemonic: &str, count: usize) -> eyre::Result<Self> {
        let count = u32::try_from(count).wrap_err("too many accounts")?;
        let senders = derive_signers(mnemonic, 0..count)?;
        let receivers = derive_signers(mnemonic, count..count * 2)?;
        Self::new(senders, receivers)
    }

    pub fn load(senders_path: &Path, receivers_path: &Path) -> eyre::Result<Self> {
        Self::new(read_key_file(senders_path)?, read_key_file(receivers_path)?)
    }

    pub fn save(&self, senders_path: &Path, receivers_path: &Path) -> eyre::Result<()> {
        write_key_file(senders_path, &self.senders)?;
        write_key_file(receivers_path, &self.receivers)
    }

    /// Reuse existing key files when both are present, otherwise create and persist fresh pairs.
    pub fn load_or_generate(config: &Config) -> eyre::Result<Self> {
        if let Some(mnemonic) = &config.accounts.mnemonic {
            info!(count = config.accounts.count, "deriving accounts from mnemonic");
            return Self::from_mnemonic(mnemonic, config.accounts.count);
        }

        let (senders_path, receivers_path) = (config.senders_path(), config.receivers_path());
        if senders_path.exists() && receivers_path.exists() {
            let pool = Self::load(&senders_path, &receivers_path)?;
            info!(count = pool.len(), "read sender and receiver accounts from key files");
            return Ok(pool);
        }

        info!(
            "creating {} senders and {} receivers",
            config.accounts.count.separate_with_commas(),
            config.accounts.count.separate_with_commas()
        );
        let pool = Self::generate(config.accounts.count)?;
        pool.save(&senders_path, &receivers_path)?;
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub fn sender(&self, id: usize) -> &PrivateKeySigner {
        &self.senders[id]
    }

    pub fn receiver(&self, id: usize) -> &PrivateKeySigner {
        &self.receivers[id]
    }

    pub fn senders(&self) -> &[PrivateKeySigner] {
        &self.senders
    }

    pub fn receivers(&self) -> &[PrivateKeySigner] {
        &self.receivers
    }

    pub fn receiver_addresses(&self) -> Vec<Address> {
        self.receivers.iter().map(PrivateKeySigner::address).collect()
    }
}
