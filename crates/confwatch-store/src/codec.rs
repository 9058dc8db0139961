//! Snapshot encodings.
//!
//! A closed enum with one encode/decode pair per format; new encodings are
//! added here, not by branching at call sites.

use serde::{de::DeserializeOwned, Serialize};

/// Errors from encoding or decoding a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("MessagePack encode: {0}")]
    BinaryEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode: {0}")]
    BinaryDecode(#[from] rmp_serde::decode::Error),
}

/// Supported snapshot encodings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Human-readable JSON.
    #[default]
    Json,
    /// Human-readable YAML.
    Yaml,
    /// MessagePack object graph.
    Binary,
}

impl Encoding {
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Binary => "bin",
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Json => Ok(serde_json::to_vec_pretty(value)?),
            Self::Yaml => Ok(serde_yaml::to_string(value)?.into_bytes()),
            Self::Binary => Ok(rmp_serde::to_vec_named(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            Self::Json => Ok(serde_json::from_slice(bytes)?),
            Self::Yaml => Ok(serde_yaml::from_slice(bytes)?),
            Self::Binary => Ok(rmp_serde::from_slice(bytes)?),
        }
    }
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "binary" | "bin" | "msgpack" => Ok(Self::Binary),
            other => Err(format!(
                "unknown encoding {other}; choose: json, yaml, binary"
            )),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Binary => "binary",
        })
    }
}
