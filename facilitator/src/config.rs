//! Configuration of the facilitator server.
//!
//! Read from a JSON file whose path comes from `--config` or `$CONFIG`. String values may
//! reference environment variables (see [`x402_types::config`]); `.env` is loaded before
//! the file is parsed.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;
use x402_chain_eip155::chain as eip155;
use x402_chain_eip155::chain::{Eip155ChainConfig, Eip155ChainConfigInner, Eip155SignersConfig};
use x402_types::chain::ChainId;
use x402_types::scheme::SchemeConfig;

/// CLI arguments for the x402 facilitator server.
#[derive(Parser, Debug)]
#[command(name = "x402-facilitator")]
#[command(about = "x402 Facilitator HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// `host` and `port` fall back to `$HOST` and `$PORT`, then to `0.0.0.0:8080`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    /// Signing keys for every chain that does not list its own.
    #[serde(default)]
    signers: Option<Eip155SignersConfig>,
    /// Network used by chain calls that do not name one.
    #[serde(default)]
    default_network: Option<ChainId>,
    #[serde(default)]
    chains: ChainsConfig,
    #[serde(default)]
    schemes: Vec<SchemeConfig>,
    #[serde(default)]
    verification: VerificationConfig,
    #[serde(default = "config_defaults::default_settle_timeout_secs")]
    settle_timeout_secs: u64,
}

/// Replay protection windows.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationConfig {
    /// How long a successful verification stays usable for settlement.
    #[serde(default = "config_defaults::default_freshness_secs")]
    pub freshness_secs: u64,
    /// How often stale verification records are swept.
    #[serde(default = "config_defaults::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            freshness_secs: config_defaults::default_freshness_secs(),
            sweep_interval_secs: config_defaults::default_sweep_interval_secs(),
        }
    }
}

impl VerificationConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// The `chains` map, keyed by CAIP-2 chain identifier.
///
/// Only `eip155` chains are served; any other namespace is rejected.
#[derive(Debug, Clone, Default)]
pub struct ChainsConfig(pub Vec<Eip155ChainConfig>);

impl Deref for ChainsConfig {
    type Target = Vec<Eip155ChainConfig>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ChainsConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{MapAccess, Visitor};
        use std::fmt;

        struct ChainsVisitor;

        impl<'de> Visitor<'de> for ChainsVisitor {
            type Value = ChainsConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of chain identifiers to chain configurations")
            }

            fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut chains = Vec::with_capacity(access.size_hint().unwrap_or(0));

                while let Some(chain_id) = access.next_key::<ChainId>()? {
                    let namespace = chain_id.namespace();
                    if namespace != eip155::EIP155_NAMESPACE {
                        return Err(serde::de::Error::custom(format!(
                            "Unexpected namespace: {}",
                            namespace
                        )));
                    }
                    let inner: Eip155ChainConfigInner = access.next_value()?;
                    chains.push(Eip155ChainConfig {
                        chain_reference: chain_id
                            .try_into()
                            .map_err(|e| serde::de::Error::custom(format!("{}", e)))?,
                        inner,
                    });
                }

                Ok(ChainsConfig(chains))
            }
        }

        deserializer.deserialize_map(ChainsVisitor)
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

    /// Returns the default port value with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }

    pub fn default_settle_timeout_secs() -> u64 {
        120
    }

    pub fn default_freshness_secs() -> u64 {
        300
    }

    pub fn default_sweep_interval_secs() -> u64 {
        60
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("No signers configured for {0}: set `signers` at the top level or on the chain")]
    MissingSigners(ChainId),
    #[error("No signers configured")]
    NoSigners,
    #[error("Default network {0} is not configured under `chains`")]
    UnknownDefaultNetwork(ChainId),
    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),
}

impl Config {
    /// Get the port value.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the host value.
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Get the schemes configuration list.
    ///
    /// Each entry specifies a scheme and the chains it applies to.
    pub fn schemes(&self) -> &[SchemeConfig] {
        &self.schemes
    }

    /// Configured chains, each with its signers resolved.
    pub fn chains(&self) -> &ChainsConfig {
        &self.chains
    }

    pub fn default_network(&self) -> Option<&ChainId> {
        self.default_network.as_ref()
    }

    pub fn verification(&self) -> VerificationConfig {
        self.verification
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by:
    /// 1. `--config <path>` CLI argument
    /// 2. `$CONFIG`
    /// 3. `./config.json`
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        Self::from_json(&content)
    }

    /// Parses and checks a configuration document.
    ///
    /// Every chain ends up with signers: its own or the top-level ones. A chain left
    /// without any, or a file with no signers at all, is an error. So is a zero timeout,
    /// freshness window or sweep interval.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_json::from_str(content)?;
        for (name, secs) in [
            ("settleTimeoutSecs", config.settle_timeout_secs),
            ("verification.freshnessSecs", config.verification.freshness_secs),
            ("verification.sweepIntervalSecs", config.verification.sweep_interval_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        let defaults = config.signers.take().filter(|signers| !signers.is_empty());
        let mut resolved = Vec::with_capacity(config.chains.len());
        for chain in config.chains.0.drain(..) {
            let chain = match &defaults {
                Some(signers) => chain.with_default_signers(signers),
                None => chain,
            };
            if chain.signers().is_none_or(|signers| signers.is_empty()) {
                return Err(ConfigError::MissingSigners(chain.chain_id()));
            }
            resolved.push(chain);
        }
        if defaults.is_none() && resolved.is_empty() {
            return Err(ConfigError::NoSigners);
        }
        if let Some(network) = &config.default_network
            && !resolved.iter().any(|chain| chain.chain_id() == *network)
        {
            return Err(ConfigError::UnknownDefaultNetwork(network.clone()));
        }
        config.chains = ChainsConfig(resolved);
        config.signers = defaults;
        Ok(config)
    }
}
