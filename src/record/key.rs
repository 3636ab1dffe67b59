use serde::{Deserialize, Serialize};

use super::RecordError;
use crate::types::Version;

/// What a record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    Schema,
    Config,
    DeleteSubject,
    Noop,
}

/// JSON record key. Field order is fixed so equal keys encode to equal
/// bytes, which is what compaction compares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub keytype: KeyType,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default)]
    pub magic: u8,
}

impl RecordKey {
    pub fn schema(subject: &str, version: Version) -> Self {
        Self {
            keytype: KeyType::Schema,
            subject: Some(subject.to_string()),
            version: Some(version),
            magic: 1,
        }
    }

    /// Config key; `None` is the global scope.
    pub fn config(subject: Option<&str>) -> Self {
        Self {
            keytype: KeyType::Config,
            subject: subject.map(str::to_string),
            version: None,
            magic: 0,
        }
    }

    pub fn delete_subject(subject: &str) -> Self {
        Self {
            keytype: KeyType::DeleteSubject,
            subject: Some(subject.to_string()),
            version: None,
            magic: 0,
        }
    }

    pub fn noop() -> Self {
        Self {
            keytype: KeyType::Noop,
            subject: None,
            version: None,
            magic: 0,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        serde_json::to_vec(self).map_err(|e| RecordError::Unencodable(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        serde_json::from_slice(bytes).map_err(|e| RecordError::InvalidKey(e.to_string()))
    }

    pub(crate) fn require_subject(&self) -> Result<String, RecordError> {
        match &self.subject {
            Some(subject) if !subject.is_empty() => Ok(subject.clone()),
            _ => Err(RecordError::InvalidKey(format!(
                "{:?} key without subject",
                self.keytype
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_encode_identically() {
        let a = RecordKey::schema("s", 1).encode().unwrap();
        let b = RecordKey::decode(br#"{"magic":1,"version":1,"subject":"s","keytype":"SCHEMA"}"#)
            .unwrap()
            .encode()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn config_keys_are_scoped() {
        let global = RecordKey::config(None).encode().unwrap();
        let subject = RecordKey::config(Some("s")).encode().unwrap();
        assert_ne!(global, subject);
    }
}
