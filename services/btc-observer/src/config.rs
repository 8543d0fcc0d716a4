//! Configuration loading: recognized options from the spec's "Configuration"
//! section, loaded from a TOML file with environment-variable overrides for
//! the node credentials, mirroring how `template-manager`'s
//! `TemplateManagerConfig` loads `manager.toml`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
struct RootWrapper {
    observer: ObserverTable,
}

#[derive(Debug, Deserialize, Clone)]
struct ObserverTable {
    bitcoin_peer_uri: String,
    bitcoin_rpc_username: Option<String>,
    bitcoin_rpc_password: Option<String>,
    bitcoin_wallet_or_import_string: String,
    bitcoin_data_directory: Option<String>,
    sidetree_transaction_prefix: String,
    genesis_block_number: u32,

    #[serde(default = "default_poll_period")]
    transaction_poll_period_in_seconds: u64,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_in_milliseconds: u64,
    #[serde(default = "default_max_retries")]
    request_max_retries: u32,

    #[serde(default)]
    sidetree_transaction_fee_markup_percentage: u64,
    #[serde(default = "default_fee_per_kb")]
    default_transaction_fee_in_satoshis_per_kb: u64,

    bitcoin_fee_spending_cutoff: u64,
    bitcoin_fee_spending_cutoff_period_in_blocks: u32,
    #[serde(default = "default_low_balance_notice_days")]
    low_balance_notice_in_days: u32,

    #[serde(default)]
    value_time_lock_amount_in_bitcoins: f64,
    #[serde(default)]
    value_time_lock_transaction_fees_amount_in_bitcoins: f64,
    #[serde(default = "default_lock_poll_period")]
    value_time_lock_poll_period_in_seconds: u64,
    #[serde(default)]
    value_time_lock_update_enabled: bool,

    #[serde(default = "default_http_listen_addr")]
    http_listen_addr: String,

    #[serde(default = "default_group_size")]
    group_size_in_blocks: u32,
    #[serde(default = "default_window_size")]
    window_size_in_groups: u32,
    #[serde(default = "default_sample_size")]
    sample_size_per_group: usize,
    #[serde(default = "default_quantile")]
    quantile: f64,
    #[serde(default = "default_historical_offset")]
    historical_offset_in_blocks: u32,
    #[serde(default = "default_max_input_count")]
    max_input_count_for_sampled_transaction: u32,

    #[serde(default = "default_bitcoin_network")]
    bitcoin_network: String,
}

fn default_poll_period() -> u64 {
    60
}
fn default_request_timeout_ms() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    3
}
fn default_fee_per_kb() -> u64 {
    1_000
}
fn default_low_balance_notice_days() -> u32 {
    28
}
fn default_lock_poll_period() -> u64 {
    600
}
fn default_http_listen_addr() -> String {
    "127.0.0.1:3009".to_string()
}
fn default_group_size() -> u32 {
    100
}
fn default_window_size() -> u32 {
    10
}
fn default_sample_size() -> usize {
    100
}
fn default_quantile() -> f64 {
    0.1
}
fn default_historical_offset() -> u32 {
    50
}
fn default_max_input_count() -> u32 {
    8
}
fn default_bitcoin_network() -> String {
    "bitcoin".to_string()
}

/// Immutable configuration record, passed by reference, per the "class with
/// mutable public fields becomes an immutable config record" design note.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub bitcoin_peer_uri: String,
    pub bitcoin_rpc_username: String,
    pub bitcoin_rpc_password: String,
    pub bitcoin_wallet_or_import_string: String,
    pub bitcoin_data_directory: Option<String>,
    pub sidetree_transaction_prefix: String,
    pub genesis_block_number: u32,

    pub transaction_poll_period_in_seconds: u64,
    pub request_timeout_in_milliseconds: u64,
    pub request_max_retries: u32,

    pub sidetree_transaction_fee_markup_percentage: u64,
    pub default_transaction_fee_in_satoshis_per_kb: u64,

    pub bitcoin_fee_spending_cutoff: u64,
    pub bitcoin_fee_spending_cutoff_period_in_blocks: u32,
    pub low_balance_notice_in_days: u32,

    pub value_time_lock_amount_in_bitcoins: f64,
    pub value_time_lock_transaction_fees_amount_in_bitcoins: f64,
    pub value_time_lock_poll_period_in_seconds: u64,
    pub value_time_lock_update_enabled: bool,

    pub http_listen_addr: String,

    pub group_size_in_blocks: u32,
    pub window_size_in_groups: u32,
    pub sample_size_per_group: usize,
    pub quantile: f64,
    pub historical_offset_in_blocks: u32,
    pub max_input_count_for_sampled_transaction: u32,

    /// Network writer addresses are derived for (§4.2 writer resolution).
    /// Only affects how a previous output's `script_pubkey` is rendered as
    /// an opaque string; it has no bearing on which RPC node is used.
    pub bitcoin_network: bitcoin::Network,
}

impl ObserverConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = std::fs::read_to_string(path_ref)
            .with_context(|| format!("failed to read observer config file {}", path_ref.display()))?;

        let table: ObserverTable = match toml::from_str::<RootWrapper>(&contents) {
            Ok(w) => w.observer,
            Err(_) => {
                let v: toml::Value = toml::from_str(&contents).context("parse TOML as value")?;
                let obs_v = v
                    .get("observer")
                    .cloned()
                    .context("missing [observer] table at top level")?;
                obs_v.try_into().context("deserialize [observer] table")?
            }
        };

        let rpc_username = table
            .bitcoin_rpc_username
            .or_else(|| std::env::var("BITCOIN_RPC_USERNAME").ok())
            .context("bitcoin_rpc_username not set in config or BITCOIN_RPC_USERNAME env var")?;
        let rpc_password = table
            .bitcoin_rpc_password
            .or_else(|| std::env::var("BITCOIN_RPC_PASSWORD").ok())
            .context("bitcoin_rpc_password not set in config or BITCOIN_RPC_PASSWORD env var")?;

        let bitcoin_network = match table.bitcoin_network.as_str() {
            "bitcoin" | "mainnet" => bitcoin::Network::Bitcoin,
            "testnet" => bitcoin::Network::Testnet,
            "signet" => bitcoin::Network::Signet,
            "regtest" => bitcoin::Network::Regtest,
            other => bail!("unrecognized bitcoin_network {other:?}"),
        };

        let cfg = ObserverConfig {
            bitcoin_peer_uri: table.bitcoin_peer_uri,
            bitcoin_rpc_username: rpc_username,
            bitcoin_rpc_password: rpc_password,
            bitcoin_wallet_or_import_string: table.bitcoin_wallet_or_import_string,
            bitcoin_data_directory: table.bitcoin_data_directory,
            sidetree_transaction_prefix: table.sidetree_transaction_prefix,
            genesis_block_number: table.genesis_block_number,
            transaction_poll_period_in_seconds: table.transaction_poll_period_in_seconds,
            request_timeout_in_milliseconds: table.request_timeout_in_milliseconds,
            request_max_retries: table.request_max_retries,
            sidetree_transaction_fee_markup_percentage: table.sidetree_transaction_fee_markup_percentage,
            default_transaction_fee_in_satoshis_per_kb: table.default_transaction_fee_in_satoshis_per_kb,
            bitcoin_fee_spending_cutoff: table.bitcoin_fee_spending_cutoff,
            bitcoin_fee_spending_cutoff_period_in_blocks: table.bitcoin_fee_spending_cutoff_period_in_blocks,
            low_balance_notice_in_days: table.low_balance_notice_in_days,
            value_time_lock_amount_in_bitcoins: table.value_time_lock_amount_in_bitcoins,
            value_time_lock_transaction_fees_amount_in_bitcoins: table
                .value_time_lock_transaction_fees_amount_in_bitcoins,
            value_time_lock_poll_period_in_seconds: table.value_time_lock_poll_period_in_seconds,
            value_time_lock_update_enabled: table.value_time_lock_update_enabled,
            http_listen_addr: table.http_listen_addr,
            group_size_in_blocks: table.group_size_in_blocks,
            window_size_in_groups: table.window_size_in_groups,
            sample_size_per_group: table.sample_size_per_group,
            quantile: table.quantile,
            historical_offset_in_blocks: table.historical_offset_in_blocks,
            max_input_count_for_sampled_transaction: table.max_input_count_for_sampled_transaction,
            bitcoin_network,
        };

        cfg.validate()
            .with_context(|| format!("invalid observer config in {}", path_ref.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sidetree_transaction_prefix.is_empty() {
            bail!("sidetree_transaction_prefix must not be empty");
        }
        if self.request_max_retries == 0 {
            bail!("request_max_retries must be >= 1");
        }
        if self.group_size_in_blocks == 0 {
            bail!("group_size_in_blocks must be >= 1");
        }
        if self.window_size_in_groups == 0 {
            bail!("window_size_in_groups must be >= 1");
        }
        if !(0.0..1.0).contains(&self.quantile) {
            bail!("quantile must be in [0, 1)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config() {
        let dir = tempdir();
        let path = dir.join("observer.toml");
        std::fs::write(
            &path,
            r#"
            [observer]
            bitcoin_peer_uri = "http://127.0.0.1:18443"
            bitcoin_rpc_username = "user"
            bitcoin_rpc_password = "pass"
            bitcoin_wallet_or_import_string = "cUxxx"
            sidetree_transaction_prefix = "sidetree:"
            genesis_block_number = 1500000
            bitcoin_fee_spending_cutoff = 1000000
            bitcoin_fee_spending_cutoff_period_in_blocks = 100
            "#,
        )
        .unwrap();

        let cfg = ObserverConfig::from_path(&path).unwrap();
        assert_eq!(cfg.genesis_block_number, 1_500_000);
        assert_eq!(cfg.transaction_poll_period_in_seconds, 60);
        std::fs::remove_dir_all(dir).ok();
    }

    fn tempdir() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("btc-observer-test-{}", std::process::id()));
        std::fs::create_dir_all(&p).unwrap();
        p
    }
}
