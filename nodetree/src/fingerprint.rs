use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::param::ResolvedParams;

const DOMAIN_TAG: &[u8] = b"nodetree/fingerprint/v1\0";

/// Content address of a node result.
///
/// Derived from the node type, its resolved parameters, the ignored flag and
/// the fingerprints of its inputs in slot order. Node names and graph
/// position do not participate, so identical subgraphs share results across
/// graphs and runs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid fingerprint \"{0}\"")]
pub struct ParseFingerprintError(String);

impl Fingerprint {
    pub fn compute(
        type_name: &str,
        params: &ResolvedParams,
        ignored: bool,
        inputs: &[Fingerprint],
    ) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_TAG);
        write_str(&mut hasher, type_name);

        // ResolvedParams iterates in key order
        hasher.update(&(params.iter().count() as u64).to_le_bytes());
        for (key, value) in params.iter() {
            write_str(&mut hasher, key);
            let canonical = serde_json::to_string(value).unwrap_or_default();
            write_str(&mut hasher, &canonical);
        }

        hasher.update(&[ignored as u8]);

        hasher.update(&(inputs.len() as u64).to_le_bytes());
        for input in inputs {
            hasher.update(&input.0);
        }

        Fingerprint(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

// length-prefixed so adjacent fields can never alias
fn write_str(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        blake3::Hash::from_hex(s)
            .map(|hash| Fingerprint(*hash.as_bytes()))
            .map_err(|_| ParseFingerprintError(s.to_string()))
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{ParamDef, ParamDomain, Params};

    fn resolved(pairs: &[(&str, i64)]) -> ResolvedParams {
        let params: Params = pairs.iter().map(|(key, value)| (*key, *value)).collect();
        params.resolve(&[ParamDef::new("num", 0, ParamDomain::Number)])
    }

    #[test]
    fn param_order_does_not_matter() {
        let params_a: Params = [("a", 1), ("b", 2)].into_iter().collect();
        let params_b: Params = [("b", 2), ("a", 1)].into_iter().collect();

        let a = Fingerprint::compute("Test::Number", &params_a.resolve(&[]), false, &[]);
        let b = Fingerprint::compute("Test::Number", &params_b.resolve(&[]), false, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn every_component_participates() {
        let base = Fingerprint::compute("Test::Number", &resolved(&[("num", 2)]), false, &[]);

        assert_ne!(
            base,
            Fingerprint::compute("Test::Text", &resolved(&[("num", 2)]), false, &[])
        );
        assert_ne!(
            base,
            Fingerprint::compute("Test::Number", &resolved(&[("num", 3)]), false, &[])
        );
        assert_ne!(
            base,
            Fingerprint::compute("Test::Number", &resolved(&[("num", 2)]), true, &[])
        );
        assert_ne!(
            base,
            Fingerprint::compute("Test::Number", &resolved(&[("num", 2)]), false, &[base])
        );
    }

    #[test]
    fn input_order_matters() {
        let a = Fingerprint::compute("Test::Number", &resolved(&[]), false, &[]);
        let b = Fingerprint::compute("Test::Number", &resolved(&[("num", 1)]), false, &[]);

        let ab = Fingerprint::compute("Test::Arithmetic", &resolved(&[]), false, &[a, b]);
        let ba = Fingerprint::compute("Test::Arithmetic", &resolved(&[]), false, &[b, a]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn hex_round_trip() -> anyhow::Result<()> {
        let fingerprint = Fingerprint::compute("Test::Number", &resolved(&[]), false, &[]);
        let hex = fingerprint.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex.parse::<Fingerprint>()?, fingerprint);

        let json = serde_json::to_string(&fingerprint)?;
        assert_eq!(json, format!("\"{}\"", hex));

        assert!("not-a-fingerprint".parse::<Fingerprint>().is_err());

        Ok(())
    }
}
