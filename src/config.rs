// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Configuration model and loading.
//!
//! The relay is configured from a directory of TOML/JSON files merged
//! together, plus environment overrides with the `BRIDGE` prefix. Keys are
//! kebab-case. Secrets support `0x…` literals and `$ENV_VAR` indirection.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ChainId, ResourceId, TransferKind};

const fn default_start_block() -> u64 {
    1
}

const fn default_block_confirmations() -> u64 {
    10
}

const fn enable_events_watcher_default() -> bool {
    true
}

const fn max_blocks_per_step_default() -> u64 {
    100
}

const fn polling_interval_default() -> u64 {
    6_000
}

const fn router_queue_capacity_default() -> usize {
    50
}

const fn max_attempts_default() -> u32 {
    5
}

const fn confirmation_timeout_default() -> u64 {
    60_000
}

const fn receipt_poll_interval_default() -> u64 {
    1_000
}

const fn gas_bump_percent_default() -> u64 {
    10
}

/// RelayerConfig is the configuration for the whole relay process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    /// EVM based networks and their configuration.
    ///
    /// a map between chain name and its configuration.
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
    /// How many messages each destination queue buffers before the router
    /// pushes back on source listeners.
    #[serde(default = "router_queue_capacity_default")]
    pub router_queue_capacity: usize,
}

/// ChainConfig is the configuration of one relayed chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChainConfig {
    /// if it is enabled for this relayer or not.
    #[serde(default)]
    pub enabled: bool,
    /// The bridge-level chain id, as the bridge contracts know it.
    pub chain_id: ChainId,
    /// The EVM network id, used for transaction signing.
    pub network_id: u64,
    /// Http(s) Endpoint for RPC requests.
    #[serde(skip_serializing)]
    pub http_endpoint: url::Url,
    /// Block Explorer for this chain.
    ///
    /// Optional, and only used for printing clickable links
    /// for transactions in the logs.
    #[serde(skip_serializing)]
    pub explorer: Option<url::Url>,
    /// The Private Key of this relayer account on this network.
    ///
    /// 1. if it starts with '0x' it is a raw (32 bytes) hex encoded
    ///    private key.
    /// 2. if it starts with '$' it is an environment variable holding a
    ///    hex-encoded private key.
    #[serde(skip_serializing)]
    pub private_key: PrivateKey,
    /// The bridge contract address on this chain.
    pub bridge: Address,
    /// The first block the listener scans when no checkpoint exists.
    #[serde(default = "default_start_block")]
    pub start_block: u64,
    /// Ignore the stored checkpoint and rescan from `start-block`.
    #[serde(default)]
    pub fresh_start: bool,
    /// Blocks that must follow a block before its deposits are relayed.
    #[serde(default = "default_block_confirmations")]
    pub block_confirmations: u64,
    /// The resources this chain's bridge serves.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Controls the deposit listener.
    #[serde(default)]
    pub events_watcher: EventsWatcherConfig,
    /// Controls proposal submission on this chain.
    #[serde(default)]
    pub proposals: ProposalConfig,
}

/// A resource served by a chain's bridge: its 32-byte id and the transfer
/// semantics its payloads carry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResourceConfig {
    /// The 32-byte resource id.
    pub resource_id: ResourceId,
    /// How payloads for this resource are encoded.
    pub kind: TransferKind,
}

/// EventsWatcherConfig is the configuration for the deposit listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventsWatcherConfig {
    /// if it is enabled for this chain or not.
    #[serde(default = "enable_events_watcher_default")]
    pub enabled: bool,
    /// Polling interval in milliseconds.
    #[serde(default = "polling_interval_default")]
    pub polling_interval: u64,
    /// The maximum number of blocks to scan in one request.
    #[serde(default = "max_blocks_per_step_default")]
    pub max_blocks_per_step: u64,
}

impl Default for EventsWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: enable_events_watcher_default(),
            polling_interval: polling_interval_default(),
            max_blocks_per_step: max_blocks_per_step_default(),
        }
    }
}

/// ProposalConfig is the writer's submission and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProposalConfig {
    /// Submissions per proposal before it is abandoned.
    #[serde(default = "max_attempts_default")]
    pub max_attempts: u32,
    /// How long to wait for a receipt before resubmitting, in milliseconds.
    #[serde(default = "confirmation_timeout_default")]
    pub confirmation_timeout: u64,
    /// Receipt polling cadence in milliseconds.
    #[serde(default = "receipt_poll_interval_default")]
    pub receipt_poll_interval: u64,
    /// Gas price bump applied on each resubmission, in percent.
    #[serde(default = "gas_bump_percent_default")]
    pub gas_bump_percent: u64,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            max_attempts: max_attempts_default(),
            confirmation_timeout: confirmation_timeout_default(),
            receipt_poll_interval: receipt_poll_interval_default(),
            gas_bump_percent: gas_bump_percent_default(),
        }
    }
}

/// A relayer account private key, kept out of serialized output.
#[derive(Clone)]
pub struct PrivateKey(pub H256);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").finish()
    }
}

impl std::ops::Deref for PrivateKey {
    type Target = H256;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Serialize for PrivateKey {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("<redacted>")
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVisitor;
        impl<'de> serde::de::Visitor<'de> for PrivateKeyVisitor {
            type Value = H256;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "hex string or an env var containing a hex string in it",
                )
            }

            fn visit_str<E>(
                self,
                value: &str,
            ) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if value.starts_with("0x") {
                    // hex value
                    H256::from_str(value).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{}\n got {} but expected a 66 chars string \
                             (including the 0x prefix)",
                            e, value
                        ))
                    })
                } else if value.starts_with('$') {
                    // env
                    let var = value.strip_prefix('$').unwrap_or(value);
                    tracing::trace!("Reading {} from env", var);
                    let val = std::env::var(var).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "error while loading this env {}: {}",
                            var, e,
                        ))
                    })?;
                    H256::from_str(&val).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "{}\n got {} but expected a 66 chars string \
                             (including the 0x prefix) but found {} chars",
                            e,
                            val,
                            val.len()
                        ))
                    })
                } else {
                    Err(serde::de::Error::custom(
                        "expected a 0x-prefixed hex key or a $ENV_VAR \
                         reference",
                    ))
                }
            }
        }

        let secret = deserializer.deserialize_str(PrivateKeyVisitor)?;
        Ok(Self(secret))
    }
}

/// Loads and merges every TOML/JSON config file under `path`, applies
/// environment overrides, then validates the result.
pub fn load<P: AsRef<Path>>(path: P) -> Result<RelayerConfig> {
    let mut cfg = config::Config::new();
    // A pattern that covers all toml or json files in the config directory
    // and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", path.as_ref().display());
    let json_pattern = format!("{}/**/*.json", path.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let config_files = glob::glob(&toml_pattern)?
        .flatten()
        .chain(glob::glob(&json_pattern)?.flatten());

    for config_file in config_files {
        tracing::trace!("Loading config file: {}", config_file.display());
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        let file = config::File::from(config_file).format(format);
        if let Err(e) = cfg.merge(file) {
            tracing::warn!("Error while loading config file: {} skipping!", e);
            continue;
        }
    }

    // also merge in the environment (with a prefix of BRIDGE).
    cfg.merge(config::Environment::with_prefix("BRIDGE").separator("_"))?;
    // and finally deserialize the config and post-process it
    let config: std::result::Result<
        RelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(Error::ParseConfig(e))
        }
    }
}

// The postloading_process exists to validate configuration and standardize
// the format of the configuration.
fn postloading_process(mut config: RelayerConfig) -> Result<RelayerConfig> {
    tracing::trace!("Checking configuration sanity ...");
    // make all chain names lower case
    // 1. drain everything, and take enabled chains.
    let old_chains = config
        .chains
        .drain()
        .filter(|(_, chain)| chain.enabled)
        .collect::<HashMap<_, _>>();
    // 2. insert them again, as lowercased.
    for (k, v) in old_chains {
        config.chains.insert(k.to_lowercase(), v);
    }
    // routing must be unambiguous: one chain per bridge chain id.
    let mut seen = HashMap::new();
    for (chain_name, chain_config) in &config.chains {
        if let Some(other) =
            seen.insert(chain_config.chain_id, chain_name.clone())
        {
            tracing::error!(
                "chains {} and {} share bridge chain id {}",
                other,
                chain_name,
                chain_config.chain_id,
            );
            return Err(Error::DuplicateRoute {
                chain_id: chain_config.chain_id,
            });
        }
        if chain_config.resources.is_empty() {
            tracing::warn!(
                "chain {} has no resources configured; its listener will \
                 skip every deposit",
                chain_name,
            );
        }
    }
    Ok(config)
}
