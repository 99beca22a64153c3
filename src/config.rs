//! Process-wide parameters, loaded once and passed by reference to every component.
use std::collections::{HashMap, HashSet};

use curve25519_dalek::ristretto::RistrettoPoint;
use rand_distr::Gamma;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::coin::{token_base, TokenId};
use crate::constants::MAX_RANGE_PROOF_PARTIES;
use crate::errors::ConfigError;

/// Shape and scale, in seconds, of the spend-age distribution decoys are drawn from.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GammaParams {
    pub shape: f64,
    pub scale: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoyConfig {
    pub native: GammaParams,
    pub token: GammaParams,
    pub block_time_secs: u64,
    /// Draws per decoy before giving up.
    pub max_draws: usize,
}

impl Default for DecoyConfig {
    fn default() -> Self {
        DecoyConfig {
            native: GammaParams {
                shape: 1.9,
                scale: 43_200.0,
            },
            token: GammaParams {
                shape: 1.5,
                scale: 86_400.0,
            },
            block_time_secs: 40,
            max_draws: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    /// Coins of the token may only be sent to the burning address.
    BurnOnly,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPolicy {
    pub token_id: TokenId,
    pub rule: PolicyRule,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    ByIndex,
    ByHeight,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Zero disables enhanced indexing.
    pub num_workers: usize,
    pub batch_size: usize,
    /// Minimum age of a shard's oldest queued key before a partial batch is dispatched.
    pub batch_wait_ms: u64,
    pub idle_sleep_ms: u64,
    pub queue_capacity_per_worker: usize,
    pub scan_mode: ScanMode,
    pub index_window: u64,
    pub height_window: u64,
    /// Hex-encoded 32-byte tokens accepted by `submit_ota_key`.
    pub access_tokens: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            num_workers: 0,
            batch_size: 10,
            batch_wait_ms: 30_000,
            idle_sleep_ms: 500,
            queue_capacity_per_worker: 10,
            scan_mode: ScanMode::ByIndex,
            index_window: 1_000,
            height_window: 100,
            access_tokens: vec![],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub ring_size: usize,
    pub num_shards: u8,
    pub max_tx_size_kb: u64,
    pub max_info_size: usize,
    pub max_inputs: usize,
    pub max_outputs: usize,
    pub max_ota_tries: usize,
    pub lock_time_tolerance_secs: i64,
    pub decoy: DecoyConfig,
    pub token_policies: Vec<TokenPolicy>,
    pub indexer: IndexerConfig,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        PrivacyConfig {
            ring_size: 8,
            num_shards: 8,
            max_tx_size_kb: 500,
            max_info_size: 512,
            max_inputs: 32,
            max_outputs: 32,
            max_ota_tries: 50,
            lock_time_tolerance_secs: 3_600,
            decoy: DecoyConfig::default(),
            token_policies: vec![],
            indexer: IndexerConfig::default(),
        }
    }
}

impl PrivacyConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: PrivacyConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.ring_size == 0 || self.ring_size > u8::MAX as usize {
            return invalid("ring_size must be within 1..=255");
        }
        if self.num_shards == 0 {
            return invalid("num_shards must be positive");
        }
        if self.max_inputs == 0 || self.max_inputs > u8::MAX as usize - 2 {
            return invalid("max_inputs must be within 1..=253");
        }
        if self.max_outputs == 0 || self.max_outputs > MAX_RANGE_PROOF_PARTIES {
            return invalid("max_outputs must be within 1..=32");
        }
        if self.max_ota_tries == 0 {
            return invalid("max_ota_tries must be positive");
        }
        if self.decoy.block_time_secs == 0 || self.decoy.max_draws == 0 {
            return invalid("decoy block_time_secs and max_draws must be positive");
        }
        let indexer = &self.indexer;
        if indexer.batch_size == 0 || indexer.index_window == 0 || indexer.height_window == 0 {
            return invalid("indexer batch_size and scan windows must be positive");
        }
        for token in &indexer.access_tokens {
            parse_access_token(token)?;
        }
        Ok(())
    }
}

pub(crate) fn parse_access_token(token: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(token)
        .map_err(|e| ConfigError::Invalid(format!("access token is not hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| ConfigError::Invalid("access token must be 32 bytes".to_string()))
}

fn gamma(params: &GammaParams) -> Result<Gamma<f64>, ConfigError> {
    Gamma::new(params.shape, params.scale)
        .map_err(|e| ConfigError::Invalid(format!("gamma parameters: {}", e)))
}

/// Validated configuration plus everything derived from it once at start-up.
#[derive(Clone, Debug)]
pub struct PrivacyContext {
    config: PrivacyConfig,
    native_gamma: Gamma<f64>,
    token_gamma: Gamma<f64>,
    policies: HashMap<TokenId, PolicyRule>,
    restricted_bases: Vec<(TokenId, RistrettoPoint)>,
    access_tokens: HashSet<[u8; 32]>,
}

impl PrivacyContext {
    pub fn new(config: PrivacyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let policies: HashMap<TokenId, PolicyRule> = config
            .token_policies
            .iter()
            .map(|p| (p.token_id, p.rule))
            .collect();
        let restricted_bases = policies
            .iter()
            .filter(|(_, rule)| **rule == PolicyRule::BurnOnly)
            .map(|(token_id, _)| (*token_id, token_base(token_id)))
            .collect();
        let access_tokens = config
            .indexer
            .access_tokens
            .iter()
            .map(|t| parse_access_token(t))
            .collect::<Result<_, _>>()?;
        info!(
            ring_size = config.ring_size,
            num_shards = config.num_shards,
            policies = policies.len(),
            "privacy context ready"
        );
        Ok(PrivacyContext {
            native_gamma: gamma(&config.decoy.native)?,
            token_gamma: gamma(&config.decoy.token)?,
            config,
            policies,
            restricted_bases,
            access_tokens,
        })
    }

    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    pub fn policy(&self, token_id: &TokenId) -> Option<PolicyRule> {
        self.policies.get(token_id).copied()
    }

    /// Which burn-only token, if any, `tag` is the bare base of.
    pub fn restricted_token_of(&self, tag: &RistrettoPoint) -> Option<TokenId> {
        self.restricted_bases
            .iter()
            .find(|(_, base)| base == tag)
            .map(|(token_id, _)| *token_id)
    }

    pub(crate) fn decoy_distribution(&self, token_id: &TokenId) -> &Gamma<f64> {
        if token_id.is_native() {
            &self.native_gamma
        } else {
            &self.token_gamma
        }
    }

    pub fn is_access_token_valid(&self, token: &[u8; 32]) -> bool {
        self.access_tokens.contains(token)
    }
}
