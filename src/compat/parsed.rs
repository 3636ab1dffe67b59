use thiserror::Error;

use super::avro::AvroSchema;
use super::json_schema::JsonSchema;
use super::protobuf::ProtoFile;
use crate::types::SchemaType;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaParseError {
    #[error("schema is not valid JSON: {0}")]
    Json(String),

    #[error("invalid Avro schema: {0}")]
    Avro(String),

    #[error("invalid JSON schema: {0}")]
    JsonSchema(String),

    #[error("invalid Protobuf schema: {0}")]
    Protobuf(String),
}

/// A referenced schema, already parsed with its own references resolved.
#[derive(Debug, Clone)]
pub struct ResolvedReference {
    /// Name the referencing schema uses for the dependency.
    pub name: String,
    pub schema: ParsedSchema,
}

impl ResolvedReference {
    pub fn new(name: impl Into<String>, schema: ParsedSchema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// Structural form of a schema, per format.
#[derive(Debug, Clone)]
pub enum SchemaBody {
    Avro(AvroSchema),
    Json(JsonSchema),
    Protobuf(ProtoFile),
}

/// A schema text parsed into a form the comparators can walk.
#[derive(Debug, Clone)]
pub struct ParsedSchema {
    schema_type: SchemaType,
    canonical: String,
    body: SchemaBody,
}

impl ParsedSchema {
    pub fn parse(
        schema_type: SchemaType,
        text: &str,
        references: &[ResolvedReference],
    ) -> Result<Self, SchemaParseError> {
        let body = match schema_type {
            SchemaType::Avro => SchemaBody::Avro(AvroSchema::parse(text, references)?),
            SchemaType::Json => SchemaBody::Json(JsonSchema::parse(text, references)?),
            SchemaType::Protobuf => SchemaBody::Protobuf(ProtoFile::parse(text, references)?),
        };
        Ok(Self {
            schema_type,
            canonical: canonical_form(schema_type, text)?,
            body,
        })
    }

    pub fn schema_type(&self) -> SchemaType {
        self.schema_type
    }

    /// Normalized text; equal for schemas that differ only in formatting.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn body(&self) -> &SchemaBody {
        &self.body
    }
}

/// Normalized text of a schema, used to detect re-registration of an
/// identical body.
///
/// JSON based formats are re-serialized with sorted keys and no
/// insignificant whitespace. Protobuf text has comments stripped and
/// whitespace collapsed.
pub fn canonical_form(schema_type: SchemaType, text: &str) -> Result<String, SchemaParseError> {
    match schema_type {
        SchemaType::Avro | SchemaType::Json => {
            let value: serde_json::Value =
                serde_json::from_str(text).map_err(|e| SchemaParseError::Json(e.to_string()))?;
            Ok(value.to_string())
        }
        SchemaType::Protobuf => Ok(super::protobuf::normalize(text)),
    }
}
