use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::{Address, Bytes};
use eyre::{Context, OptionExt};
use serde::{Deserialize, Serialize};

use crate::txpool::Variant;
use crate::utils::merge_toml_values;

/// Built-in defaults. A user supplied file is merged over these key by key.
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub accounts: AccountsConfig,
    pub token: TokenConfig,
    pub gas: GasConfig,
    pub txpool: TxPoolConfig,
    pub run: RunConfig,
    pub server: ServerConfig,

    #[serde(default)]
    pub payloads: Vec<PayloadConfig>,
}

impl Config {
    /// Parse a config from TOML text, filling anything missing from the defaults.
    pub fn from_toml_str(overlay: &str) -> eyre::Result<Self> {
        let base: toml::Value = toml::from_str(DEFAULT_CONFIG).wrap_err("invalid built-in default config")?;
        let overlay: toml::Value = toml::from_str(overlay).wrap_err("invalid config TOML")?;
        let merged = merge_toml_values(base, overlay);
        let config: Config = merged.try_into().wrap_err("config does not match the expected schema")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> eyre::Result<Self> {
        let config_str =
            std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&config_str)
    }

    /// Load from `path` if given, otherwise fall back to the defaults alone.
    pub fn load(path: Option<&Path>) -> eyre::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::from_toml_str(""),
        }
    }

    pub fn validate(&self) -> eyre::Result<()> {
        eyre::ensure!(self.accounts.count > 0, "accounts.count must be at least 1");
        eyre::ensure!(self.txpool.max_length >= -1, "txpool.max_length must be -1 (derive) or a non-negative ceiling");
        eyre::ensure!(self.txpool.multiplier > 0, "txpool.multiplier must be at least 1");
        eyre::ensure!(self.run.log_every > 0, "run.log_every must be at least 1");
        Ok(())
    }

    pub fn senders_path(&self) -> PathBuf {
        self.accounts.root_dir.join(&self.accounts.senders_file)
    }

    pub fn receivers_path(&self) -> PathBuf {
        self.accounts.root_dir.join(&self.accounts.receivers_file)
    }

    /// The configured ceiling, or `None` when it still has to be derived.
    pub fn fixed_pool_ceiling(&self) -> Option<u64> {
        u64::try_from(self.txpool.max_length).ok()
    }

    pub fn deployer_key(&self) -> eyre::Result<&str> {
        self.accounts.deployer_private_key.as_deref().ok_or_eyre("accounts.deployer_private_key is not set")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub endpoint: String,
    pub variant: Variant,

    /// Fetched with `eth_chainId` when unset.
    pub chain_id: Option<u64>,
    /// Fetched with `eth_gasPrice` when unset.
    pub gas_price: Option<u128>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    pub count: usize,
    pub root_dir: PathBuf,
    pub senders_file: String,
    pub receivers_file: String,

    /// Derive senders and receivers from this phrase instead of key files.
    pub mnemonic: Option<String>,

    pub deployer_private_key: Option<String>,
    pub fund_senders: bool,
    pub fund_amount: u128,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMethod {
    MintTo,
    Transfer,
    #[default]
    TransferLoop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub address: Option<Address>,
    pub method: TokenMethod,
    pub amount: u64,
    pub transfer_multiplier: u64,
    pub amount_to_mint: u64,
    /// Check receiver token balances after a token run. Off skips the check.
    pub assert_balance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    pub gas_limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxPoolConfig {
    /// `-1` derives the ceiling from the block gas limit at startup.
    pub max_length: i64,
    pub multiplier: u64,
    pub check_delay_ms: u64,
    pub checker_interval_ms: u64,
}

impl TxPoolConfig {
    pub fn check_delay(&self) -> Duration {
        Duration::from_millis(self.check_delay_ms)
    }

    pub fn checker_interval(&self) -> Duration {
        Duration::from_millis(self.checker_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub transactions: u64,
    pub delay_ms: u64,
    pub estimate_only: bool,
    pub log_every: u64,
    /// Consecutive failures tolerated on one slot before giving up. `0` retries forever.
    pub max_retries: u32,
    pub receipt_poll_ms: u64,
    pub native_value: u128,
}

impl RunConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn receipt_poll(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// An explicit transaction skeleton sent as-is by every sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadConfig {
    pub to: Address,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub value: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.node.variant, Variant::Substrate);
        assert_eq!(config.accounts.count, 100);
        assert_eq!(config.gas.gas_limit, 200_000);
        assert_eq!(config.txpool.max_length, -1);
        assert_eq!(config.txpool.multiplier, 2);
        assert_eq!(config.txpool.check_delay(), Duration::from_millis(250));
        assert_eq!(config.run.transactions, 10_000);
        assert_eq!(config.token.method, TokenMethod::TransferLoop);
        assert!(config.fixed_pool_ceiling().is_none());
        assert!(config.payloads.is_empty());
    }

    #[test]
    fn user_file_overrides_nested_keys_only() {
        let config = Config::from_toml_str(
            r#"
            [node]
            endpoint = "http://10.0.0.1:8545"
            variant = "geth"

            [txpool]
            max_length = 4000
            "#,
        )
        .unwrap();

        assert_eq!(config.node.endpoint, "http://10.0.0.1:8545");
        assert_eq!(config.node.variant, Variant::Geth);
        assert_eq!(config.fixed_pool_ceiling(), Some(4000));
        // Untouched siblings keep their defaults.
        assert_eq!(config.txpool.multiplier, 2);
        assert_eq!(config.txpool.check_delay_ms, 250);
    }

    #[test]
    fn payload_templates_parse() {
        let config = Config::from_toml_str(
            r#"
            [[payloads]]
            to = "0x00000000000000000000000000000000000000aa"
            data = "0xdeadbeef"
            "#,
        )
        .unwrap();

        assert_eq!(config.payloads.len(), 1);
        assert_eq!(config.payloads[0].data.as_ref(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(config.payloads[0].value, 0);
    }

    #[test]
    fn rejects_bad_ceiling() {
        let err = Config::from_toml_str("[txpool]\nmax_length = -7\n").unwrap_err();
        assert!(err.to_string().contains("max_length"));
    }

    #[test]
    fn rejects_unknown_variant() {
        assert!(Config::from_toml_str("[node]\nvariant = \"besu\"\n").is_err());
    }
}
