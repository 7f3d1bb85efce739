//! Configuration types shared by chain crates and the facilitator binary.
//!
//! # Environment Variable Resolution
//!
//! String-valued settings may be written either as literals or as references to
//! environment variables:
//!
//! ```json
//! {
//!   "http": "https://sepolia.base.org",   // Literal value
//!   "signer": "$EVM_PRIVATE_KEY",          // Simple env var
//!   "rpc": "${BASE_SEPOLIA_RPC_URL}"       // Braced env var
//! }
//! ```
//!
//! [`LiteralOrEnv`] treats an unset variable as a configuration error. [`OptionalEnv`]
//! treats it as an absent value, which lets a chain be listed in the config file and
//! only come alive once its RPC URL is provided.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use url::Url;

/// RPC provider configuration for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcConfig {
    /// HTTP URL for the RPC endpoint. Absent if it references an unset env var.
    pub http: OptionalEnv<Url>,
    /// Rate limit for requests per second (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

impl RpcConfig {
    pub fn url(&self) -> Option<&Url> {
        self.http.as_ref()
    }
}

/// Returns the variable name if the string matches `$VAR` or `${VAR}` syntax.
fn env_var_name(s: &str) -> Option<&str> {
    if let Some(braced) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        return (!braced.is_empty()).then_some(braced);
    }
    let name = s.strip_prefix('$')?;
    let is_name = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    is_name.then_some(name)
}

fn parse_value<T, E>(value: &str) -> Result<T, E>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    E: serde::de::Error,
{
    value
        .parse::<T>()
        .map_err(|e| E::custom(format!("Failed to parse value: {e}")))
}

/// A transparent wrapper that resolves environment variables during deserialization.
///
/// - Literal: `"http://localhost:8083"`
/// - Simple env var: `"$TREASURY_URL"`
/// - Braced env var: `"${TREASURY_URL}"`
///
/// Deserialization fails if the referenced variable is not set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = match env_var_name(&s) {
            Some(var_name) => std::env::var(var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{var_name}' not found (referenced as '{s}')"
                ))
            })?,
            None => s,
        };
        parse_value::<T, D::Error>(&value).map(LiteralOrEnv)
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// Like [`LiteralOrEnv`], but an unset environment variable yields `None`.
///
/// An empty variable is treated the same as an unset one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalEnv<T>(Option<T>);

impl<T> OptionalEnv<T> {
    pub fn some(value: T) -> Self {
        Self(Some(value))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}

impl<T> Deref for OptionalEnv<T> {
    type Target = Option<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for OptionalEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = match env_var_name(&s) {
            Some(var_name) => match std::env::var(var_name) {
                Ok(value) if !value.is_empty() => value,
                _ => return Ok(OptionalEnv(None)),
            },
            None => s,
        };
        parse_value::<T, D::Error>(&value).map(|v| OptionalEnv(Some(v)))
    }
}

impl<T: Serialize> Serialize for OptionalEnv<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}
