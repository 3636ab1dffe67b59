//! Compatibility checking - decides whether a schema may follow another.
//!
//! One entry point, three structurally different schema languages. Every
//! format implements the same capability through `SchemaComparator`: can a
//! reader using schema A correctly read data written with schema B. The
//! modes are then expressed purely in terms of that capability:
//!
//! | mode                  | reader    | writer    | versions checked |
//! |-----------------------|-----------|-----------|------------------|
//! | `BACKWARD`            | candidate | existing  | latest           |
//! | `FORWARD`             | existing  | candidate | latest           |
//! | `FULL`                | both ways |           | latest           |
//! | `*_TRANSITIVE`        | as above  |           | all              |
//! | `NONE`                | -         | -         | none             |
//!
//! Checking never stops at the first problem; every violated rule is
//! reported.
//!
//! ## Example
//!
//! ```
//! use schema_log::compat::{CompatibilityChecker, ParsedSchema};
//! use schema_log::{CompatibilityMode, SchemaType};
//!
//! let v1 = ParsedSchema::parse(SchemaType::Avro,
//!     r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"}]}"#, &[]).unwrap();
//! let v2 = ParsedSchema::parse(SchemaType::Avro,
//!     r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"long"}]}"#, &[]).unwrap();
//!
//! let result = CompatibilityChecker::check(CompatibilityMode::Backward, &v2, &[v1]);
//! assert!(result.is_compatible());
//! ```

mod avro;
mod json_schema;
mod parsed;
mod protobuf;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use avro::{AvroComparator, AvroSchema};
pub use json_schema::{JsonSchema, JsonSchemaComparator};
pub use parsed::{canonical_form, ParsedSchema, ResolvedReference, SchemaBody, SchemaParseError};
pub use protobuf::{ProtoFile, ProtobufComparator};

use crate::types::{CompatibilityMode, SchemaType};

/// Category of a violated evolution rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncompatibilityKind {
    /// The reader and writer use different schema formats.
    SchemaTypeChanged,
    /// A value of the writer's type cannot be read as the reader's type.
    TypeMismatch,
    /// Named types (records, enums, fixed, messages) do not match.
    NameMismatch,
    /// The reader expects a field the writer never wrote and has no default.
    FieldAddedWithoutDefault,
    /// The writer wrote a field the reader dropped and it had no default.
    FieldRemovedWithoutDefault,
    EnumSymbolRemoved,
    /// A writer union branch has no counterpart in the reader.
    UnionBranchMissing,
    FixedSizeMismatch,
    /// The reader requires a property the writer leaves optional.
    RequiredPropertyAdded,
    /// The writer may produce a property a closed reader model rejects.
    PropertyRemovedFromClosedModel,
    /// A validation constraint became stricter.
    ConstraintNarrowed,
    /// Field cardinality changed (repeated vs. singular, required).
    LabelChanged,
    /// Existing fields were moved into a oneof.
    OneofChanged,
    /// A field took a tag or name the writer had reserved.
    ReservedFieldReused,
}

/// One violated rule, located by a path inside the schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Incompatibility {
    pub kind: IncompatibilityKind,
    pub path: String,
    pub message: String,
}

impl Incompatibility {
    pub fn new(kind: IncompatibilityKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (at {})", self.message, self.path)
        }
    }
}

/// Verdict of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompatibilityResult {
    Compatible,
    Incompatible(Vec<Incompatibility>),
}

impl CompatibilityResult {
    pub fn is_compatible(&self) -> bool {
        matches!(self, CompatibilityResult::Compatible)
    }

    pub fn reasons(&self) -> &[Incompatibility] {
        match self {
            CompatibilityResult::Compatible => &[],
            CompatibilityResult::Incompatible(reasons) => reasons,
        }
    }

    fn from_reasons(reasons: Vec<Incompatibility>) -> Self {
        if reasons.is_empty() {
            CompatibilityResult::Compatible
        } else {
            CompatibilityResult::Incompatible(reasons)
        }
    }
}

/// Format-specific structural comparison.
///
/// Implementations hold no state; one static instance per format is
/// selected by the schema's format tag.
pub trait SchemaComparator: Send + Sync {
    /// The format this comparator understands.
    fn schema_type(&self) -> SchemaType;

    /// Every reason a reader using `reader` cannot read data written with
    /// `writer`. Empty means compatible.
    fn can_read(&self, reader: &ParsedSchema, writer: &ParsedSchema) -> Vec<Incompatibility>;
}

static AVRO: AvroComparator = AvroComparator;
static JSON: JsonSchemaComparator = JsonSchemaComparator;
static PROTOBUF: ProtobufComparator = ProtobufComparator;

/// The comparator for a schema format.
pub fn comparator_for(schema_type: SchemaType) -> &'static dyn SchemaComparator {
    match schema_type {
        SchemaType::Avro => &AVRO,
        SchemaType::Json => &JSON,
        SchemaType::Protobuf => &PROTOBUF,
    }
}

/// Pure, deterministic compatibility checks.
pub struct CompatibilityChecker;

impl CompatibilityChecker {
    /// Check `candidate` against `existing` versions (oldest first) under `mode`.
    pub fn check(
        mode: CompatibilityMode,
        candidate: &ParsedSchema,
        existing: &[ParsedSchema],
    ) -> CompatibilityResult {
        if mode == CompatibilityMode::None || existing.is_empty() {
            return CompatibilityResult::Compatible;
        }

        let in_scope: &[ParsedSchema] = if mode.is_transitive() {
            existing
        } else {
            &existing[existing.len() - 1..]
        };

        let mut reasons: Vec<Incompatibility> = Vec::new();
        // newest first, so the most relevant diagnosis leads
        for previous in in_scope.iter().rev() {
            if mode.checks_backward() {
                extend_unique(&mut reasons, Self::can_read(candidate, previous));
            }
            if mode.checks_forward() {
                extend_unique(&mut reasons, Self::can_read(previous, candidate));
            }
        }
        CompatibilityResult::from_reasons(reasons)
    }

    /// Whether a reader using `reader` can read data written with `writer`.
    pub fn can_read(reader: &ParsedSchema, writer: &ParsedSchema) -> Vec<Incompatibility> {
        if reader.schema_type() != writer.schema_type() {
            return vec![Incompatibility::new(
                IncompatibilityKind::SchemaTypeChanged,
                "",
                format!(
                    "schema type changed from {} to {}",
                    writer.schema_type(),
                    reader.schema_type()
                ),
            )];
        }
        comparator_for(reader.schema_type()).can_read(reader, writer)
    }
}

fn extend_unique(into: &mut Vec<Incompatibility>, more: Vec<Incompatibility>) {
    for reason in more {
        if !into.contains(&reason) {
            into.push(reason);
        }
    }
}

/// Joins a parent path with a child segment.
pub(crate) fn child_path(parent: &str, segment: &str) -> String {
    format!("{}/{}", parent, segment)
}
