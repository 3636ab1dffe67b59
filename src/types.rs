//! Core registry vocabulary: ids, versions, schema formats, references and
//! compatibility modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Global schema id, unique across all subjects.
pub type SchemaId = u32;

/// Per-subject version number, starting at 1.
pub type Version = u32;

/// Selects a version of a subject: a concrete number or the latest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionSpec {
    Latest,
    Number(Version),
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Latest => write!(f, "latest"),
            VersionSpec::Number(v) => write!(f, "{}", v),
        }
    }
}

impl From<Version> for VersionSpec {
    fn from(version: Version) -> Self {
        VersionSpec::Number(version)
    }
}

impl FromStr for VersionSpec {
    type Err = String;

    /// Accepts `latest`, `-1` (alias for latest) or a positive integer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "latest" | "-1" => Ok(VersionSpec::Latest),
            other => match other.parse::<Version>() {
                Ok(v) if v > 0 => Ok(VersionSpec::Number(v)),
                _ => Err(format!("invalid version: {}", s)),
            },
        }
    }
}

/// Format tag of a registered schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaType {
    #[default]
    Avro,
    Json,
    Protobuf,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Avro => "AVRO",
            SchemaType::Json => "JSON",
            SchemaType::Protobuf => "PROTOBUF",
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVRO" => Ok(SchemaType::Avro),
            "JSON" => Ok(SchemaType::Json),
            "PROTOBUF" => Ok(SchemaType::Protobuf),
            _ => Err(format!("unknown schema type: {}", s)),
        }
    }
}

/// A dependency of a schema on a version registered under another subject.
///
/// `name` is how the referencing schema refers to the dependency: the full
/// type name for Avro, the `$ref` target for JSON Schema and the import path
/// for Protobuf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaReference {
    pub name: String,
    pub subject: String,
    pub version: Version,
}

impl SchemaReference {
    pub fn new(name: impl Into<String>, subject: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            version,
        }
    }
}

/// Policy governing which changes are allowed between schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    None,
    #[default]
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
}

impl CompatibilityMode {
    pub const ALL: [CompatibilityMode; 7] = [
        CompatibilityMode::None,
        CompatibilityMode::Backward,
        CompatibilityMode::BackwardTransitive,
        CompatibilityMode::Forward,
        CompatibilityMode::ForwardTransitive,
        CompatibilityMode::Full,
        CompatibilityMode::FullTransitive,
    ];

    /// Whether every previous version is checked, not only the latest.
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::BackwardTransitive
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::FullTransitive
        )
    }

    /// The candidate must read data written with previous versions.
    pub fn checks_backward(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::Backward
                | CompatibilityMode::BackwardTransitive
                | CompatibilityMode::Full
                | CompatibilityMode::FullTransitive
        )
    }

    /// Previous versions must read data written with the candidate.
    pub fn checks_forward(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::Forward
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::Full
                | CompatibilityMode::FullTransitive
        )
    }

    /// Swaps the reading direction (BACKWARD <-> FORWARD), keeping
    /// transitivity. NONE and the FULL modes map onto themselves.
    pub fn inverse(&self) -> CompatibilityMode {
        match self {
            CompatibilityMode::Backward => CompatibilityMode::Forward,
            CompatibilityMode::Forward => CompatibilityMode::Backward,
            CompatibilityMode::BackwardTransitive => CompatibilityMode::ForwardTransitive,
            CompatibilityMode::ForwardTransitive => CompatibilityMode::BackwardTransitive,
            other => *other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityMode::None => "NONE",
            CompatibilityMode::Backward => "BACKWARD",
            CompatibilityMode::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityMode::Forward => "FORWARD",
            CompatibilityMode::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityMode::Full => "FULL",
            CompatibilityMode::FullTransitive => "FULL_TRANSITIVE",
        }
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        CompatibilityMode::ALL
            .iter()
            .find(|mode| mode.as_str() == upper)
            .copied()
            .ok_or_else(|| format!("unknown compatibility mode: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_spec_parsing() {
        assert_eq!("latest".parse::<VersionSpec>().unwrap(), VersionSpec::Latest);
        assert_eq!("-1".parse::<VersionSpec>().unwrap(), VersionSpec::Latest);
        assert_eq!("3".parse::<VersionSpec>().unwrap(), VersionSpec::Number(3));
        assert!("0".parse::<VersionSpec>().is_err());
        assert!("abc".parse::<VersionSpec>().is_err());
    }

    #[test]
    fn schema_type_serde_uses_upper_case() {
        let json = serde_json::to_string(&SchemaType::Protobuf).unwrap();
        assert_eq!(json, "\"PROTOBUF\"");
        let parsed: SchemaType = serde_json::from_str("\"JSON\"").unwrap();
        assert_eq!(parsed, SchemaType::Json);
        assert_eq!("avro".parse::<SchemaType>().unwrap(), SchemaType::Avro);
    }

    #[test]
    fn compatibility_mode_round_trips_through_text() {
        for mode in CompatibilityMode::ALL {
            assert_eq!(mode.as_str().parse::<CompatibilityMode>().unwrap(), mode);
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
        }
        assert!("SIDEWAYS".parse::<CompatibilityMode>().is_err());
    }

    #[test]
    fn compatibility_mode_directions() {
        assert!(CompatibilityMode::Full.checks_backward());
        assert!(CompatibilityMode::Full.checks_forward());
        assert!(!CompatibilityMode::None.checks_backward());
        assert!(!CompatibilityMode::Forward.checks_backward());
        assert!(CompatibilityMode::FullTransitive.is_transitive());
        assert!(!CompatibilityMode::Full.is_transitive());
        assert_eq!(
            CompatibilityMode::BackwardTransitive.inverse(),
            CompatibilityMode::ForwardTransitive
        );
        assert_eq!(CompatibilityMode::Full.inverse(), CompatibilityMode::Full);
    }
}
