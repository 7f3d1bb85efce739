//! CAIP-2 chain identifiers.
//!
//! A [CAIP-2](https://standards.chainagnostic.org/CAIPs/caip-2) chain ID has the form
//! `namespace:reference`, e.g. `eip155:84532`. The facilitator treats it as an opaque
//! routing key: every verify and settle call is dispatched by it.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A CAIP-2 blockchain identifier, serialized as `"namespace:reference"`.
///
/// ```
/// use x402_types::chain::ChainId;
///
/// let chain: ChainId = "eip155:84532".parse().unwrap();
/// assert_eq!(chain.namespace(), "eip155");
/// assert_eq!(chain.reference(), "84532");
/// assert!("eip155".parse::<ChainId>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId {
    pub namespace: String,
    pub reference: String,
}

impl ChainId {
    pub fn new<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.reference)
    }
}

/// Returned when a string is not of the form `namespace:reference`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid chain id format {0}")]
pub struct ChainIdFormatError(String);

impl FromStr for ChainId {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, reference)) if !namespace.is_empty() && !reference.is_empty() => {
                Ok(ChainId::new(namespace, reference))
            }
            _ => Err(ChainIdFormatError(s.into())),
        }
    }
}

impl Serialize for ChainId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainId::from_str(&s).map_err(de::Error::custom)
    }
}

/// A pattern over chain IDs, used by configuration to bind a scheme to several networks.
///
/// - `eip155:*` matches every chain in the namespace
/// - `eip155:84532` matches exactly one chain
/// - `eip155:{8453,84532}` matches any chain in the set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainIdPattern {
    Wildcard {
        namespace: String,
    },
    Exact {
        namespace: String,
        reference: String,
    },
    Set {
        namespace: String,
        references: BTreeSet<String>,
    },
}

impl ChainIdPattern {
    pub fn wildcard<S: Into<String>>(namespace: S) -> Self {
        Self::Wildcard {
            namespace: namespace.into(),
        }
    }

    pub fn exact<N: Into<String>, R: Into<String>>(namespace: N, reference: R) -> Self {
        Self::Exact {
            namespace: namespace.into(),
            reference: reference.into(),
        }
    }

    pub fn set<N: Into<String>, I, R>(namespace: N, references: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self::Set {
            namespace: namespace.into(),
            references: references.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, chain_id: &ChainId) -> bool {
        match self {
            ChainIdPattern::Wildcard { namespace } => chain_id.namespace == *namespace,
            ChainIdPattern::Exact {
                namespace,
                reference,
            } => chain_id.namespace == *namespace && chain_id.reference == *reference,
            ChainIdPattern::Set {
                namespace,
                references,
            } => chain_id.namespace == *namespace && references.contains(&chain_id.reference),
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            ChainIdPattern::Wildcard { namespace }
            | ChainIdPattern::Exact { namespace, .. }
            | ChainIdPattern::Set { namespace, .. } => namespace,
        }
    }
}

impl fmt::Display for ChainIdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainIdPattern::Wildcard { namespace } => write!(f, "{namespace}:*"),
            ChainIdPattern::Exact {
                namespace,
                reference,
            } => write!(f, "{namespace}:{reference}"),
            ChainIdPattern::Set {
                namespace,
                references,
            } => {
                let refs = references.iter().map(String::as_str).collect::<Vec<_>>();
                write!(f, "{namespace}:{{{}}}", refs.join(","))
            }
        }
    }
}

impl FromStr for ChainIdPattern {
    type Err = ChainIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ChainIdFormatError(s.into());
        let (namespace, rest) = s.split_once(':').ok_or_else(invalid)?;
        if namespace.is_empty() || rest.is_empty() {
            return Err(invalid());
        }
        if rest == "*" {
            return Ok(ChainIdPattern::wildcard(namespace));
        }
        if let Some(inner) = rest.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            let references = inner.split(',').map(str::trim).collect::<Vec<_>>();
            if references.iter().any(|r| r.is_empty()) {
                return Err(invalid());
            }
            return Ok(ChainIdPattern::set(namespace, references));
        }
        Ok(ChainIdPattern::exact(namespace, rest))
    }
}

impl Serialize for ChainIdPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChainIdPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChainIdPattern::from_str(&s).map_err(de::Error::custom)
    }
}

impl From<ChainId> for ChainIdPattern {
    fn from(chain_id: ChainId) -> Self {
        ChainIdPattern::exact(chain_id.namespace, chain_id.reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_serde() {
        let chain_id = ChainId::new("eip155", "84532");
        let serialized = serde_json::to_string(&chain_id).unwrap();
        assert_eq!(serialized, "\"eip155:84532\"");
        let deserialized: ChainId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, chain_id);
    }

    #[test]
    fn test_chain_id_rejects_missing_parts() {
        assert!("eip155".parse::<ChainId>().is_err());
        assert!(":84532".parse::<ChainId>().is_err());
        assert!("eip155:".parse::<ChainId>().is_err());
        assert!(serde_json::from_str::<ChainId>("\"invalid\"").is_err());
    }

    #[test]
    fn test_chain_id_keeps_colons_in_reference() {
        let chain_id: ChainId = "custom:a:b".parse().unwrap();
        assert_eq!(chain_id.namespace(), "custom");
        assert_eq!(chain_id.reference(), "a:b");
    }

    #[test]
    fn test_pattern_parse_and_match() {
        let wildcard: ChainIdPattern = "eip155:*".parse().unwrap();
        assert!(wildcard.matches(&ChainId::new("eip155", "1")));
        assert!(!wildcard.matches(&ChainId::new("solana", "1")));

        let exact: ChainIdPattern = "eip155:84532".parse().unwrap();
        assert!(exact.matches(&ChainId::new("eip155", "84532")));
        assert!(!exact.matches(&ChainId::new("eip155", "8453")));

        let set: ChainIdPattern = "eip155:{8453, 84532}".parse().unwrap();
        assert!(set.matches(&ChainId::new("eip155", "8453")));
        assert!(set.matches(&ChainId::new("eip155", "84532")));
        assert!(!set.matches(&ChainId::new("eip155", "1")));
        assert_eq!(set.to_string(), "eip155:{8453,84532}");
    }

    #[test]
    fn test_pattern_rejects_malformed() {
        assert!("eip155".parse::<ChainIdPattern>().is_err());
        assert!("eip155:{}".parse::<ChainIdPattern>().is_err());
        assert!("eip155:{1,,2}".parse::<ChainIdPattern>().is_err());
        assert!(":*".parse::<ChainIdPattern>().is_err());
    }
}
