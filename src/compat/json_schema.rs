//! JSON Schema model and reader/writer rules.
//!
//! A reader schema can read a writer's data when every document valid under
//! the writer is also valid under the reader. The comparison is structural
//! and conservative: keywords it does not understand are ignored.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde_json::{Map, Value};

use super::parsed::{ResolvedReference, SchemaBody, SchemaParseError};
use super::{child_path, Incompatibility, IncompatibilityKind, ParsedSchema, SchemaComparator};
use crate::types::SchemaType;

const TYPES: [&str; 7] = ["null", "boolean", "object", "array", "number", "string", "integer"];

const UPPER_BOUNDS: [&str; 4] = ["maxLength", "maxItems", "maxProperties", "maximum"];
const LOWER_BOUNDS: [&str; 4] = ["minLength", "minItems", "minProperties", "minimum"];

/// Accepts every document.
static ANY: Value = Value::Bool(true);

/// A parsed JSON schema with its external `$ref` targets.
#[derive(Debug, Clone)]
pub struct JsonSchema {
    pub root: Value,
    /// Referenced documents by the name used in `$ref`.
    pub external: BTreeMap<String, Value>,
}

impl JsonSchema {
    pub fn parse(text: &str, references: &[ResolvedReference]) -> Result<Self, SchemaParseError> {
        let root: Value =
            serde_json::from_str(text).map_err(|e| SchemaParseError::Json(e.to_string()))?;
        if !root.is_object() && !root.is_boolean() {
            return Err(invalid("a schema must be an object or a boolean"));
        }

        let mut external = BTreeMap::new();
        for reference in references {
            let SchemaBody::Json(dep) = reference.schema.body() else {
                return Err(invalid(format!(
                    "reference {} is not a JSON schema",
                    reference.name
                )));
            };
            external.extend(dep.external.iter().map(|(k, v)| (k.clone(), v.clone())));
            external.insert(reference.name.clone(), dep.root.clone());
        }

        let schema = Self { root, external };
        schema.validate(&schema.root)?;
        Ok(schema)
    }

    fn validate(&self, value: &Value) -> Result<(), SchemaParseError> {
        match value {
            Value::Object(obj) => {
                if let Some(t) = obj.get("type") {
                    let names: Vec<&Value> = match t {
                        Value::Array(items) => items.iter().collect(),
                        single => vec![single],
                    };
                    for name in names {
                        match name.as_str() {
                            Some(n) if TYPES.contains(&n) => {}
                            _ => return Err(invalid(format!("unknown type {}", name))),
                        }
                    }
                }
                if let Some(target) = obj.get("$ref") {
                    let target = target
                        .as_str()
                        .ok_or_else(|| invalid("$ref must be a string"))?;
                    if self.lookup(target).is_none() {
                        return Err(invalid(format!("unresolved $ref {}", target)));
                    }
                }
                for (key, child) in obj {
                    // enum/const/default hold data, not schemas
                    if matches!(key.as_str(), "enum" | "const" | "default" | "examples") {
                        continue;
                    }
                    self.validate(child)?;
                }
                Ok(())
            }
            Value::Array(items) => items.iter().try_for_each(|item| self.validate(item)),
            _ => Ok(()),
        }
    }

    fn lookup(&self, target: &str) -> Option<&Value> {
        let (base, fragment) = target.split_once('#').unwrap_or((target, ""));
        let document = if base.is_empty() {
            &self.root
        } else {
            self.external.get(base)?
        };
        if fragment.is_empty() {
            Some(document)
        } else {
            document.pointer(fragment)
        }
    }

    /// Follows `$ref` chains. Returns the target and the last reference taken.
    fn deref<'s>(&'s self, mut value: &'s Value) -> (&'s Value, Option<&'s str>) {
        let mut taken = None;
        for _ in 0..32 {
            let Some(target) = value.get("$ref").and_then(Value::as_str) else {
                break;
            };
            match self.lookup(target) {
                Some(next) => {
                    taken = Some(target);
                    value = next;
                }
                None => return (&ANY, taken),
            }
        }
        (value, taken)
    }
}

fn invalid(msg: impl Into<String>) -> SchemaParseError {
    SchemaParseError::JsonSchema(msg.into())
}

fn type_set(schema: &Value) -> Option<BTreeSet<String>> {
    match schema.get("type") {
        Some(Value::String(t)) => Some(BTreeSet::from([t.clone()])),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
        ),
        _ if is_object_schema(schema) => Some(BTreeSet::from(["object".to_string()])),
        _ if schema.get("items").is_some() => Some(BTreeSet::from(["array".to_string()])),
        _ => None,
    }
}

fn is_object_schema(schema: &Value) -> bool {
    schema.get("properties").is_some()
        || schema.get("required").is_some()
        || schema.get("additionalProperties").is_some()
}

fn accepts_type(reader: &BTreeSet<String>, writer_type: &str) -> bool {
    reader.contains(writer_type) || (writer_type == "integer" && reader.contains("number"))
}

/// `anyOf` or `oneOf` branches, whichever the schema uses.
fn alternatives(schema: &Value) -> Option<(&'static str, &Vec<Value>)> {
    ["anyOf", "oneOf"]
        .into_iter()
        .find_map(|key| schema.get(key).and_then(Value::as_array).map(|b| (key, b)))
}

fn properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

fn required(schema: &Value) -> BTreeSet<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn is_closed(schema: &Value) -> bool {
    schema.get("additionalProperties") == Some(&Value::Bool(false))
}

pub struct JsonSchemaComparator;

impl SchemaComparator for JsonSchemaComparator {
    fn schema_type(&self) -> SchemaType {
        SchemaType::Json
    }

    fn can_read(&self, reader: &ParsedSchema, writer: &ParsedSchema) -> Vec<Incompatibility> {
        let (SchemaBody::Json(r), SchemaBody::Json(w)) = (reader.body(), writer.body()) else {
            return Vec::new();
        };
        let mut walk = Walk {
            reader: r,
            writer: w,
            visited: HashSet::new(),
            found: Vec::new(),
        };
        walk.compare(&r.root, &w.root, "");
        walk.found
    }
}

struct Walk<'a> {
    reader: &'a JsonSchema,
    writer: &'a JsonSchema,
    visited: HashSet<(String, String)>,
    found: Vec<Incompatibility>,
}

impl<'a> Walk<'a> {
    fn push(&mut self, kind: IncompatibilityKind, path: &str, message: String) {
        self.found.push(Incompatibility::new(kind, path, message));
    }

    fn compare(&mut self, r: &'a Value, w: &'a Value, path: &str) {
        let (reader, writer) = (self.reader, self.writer);
        let (r, r_ref) = reader.deref(r);
        let (w, w_ref) = writer.deref(w);
        if r_ref.is_some() || w_ref.is_some() {
            let key = (
                r_ref.unwrap_or_default().to_string(),
                w_ref.unwrap_or_default().to_string(),
            );
            if !self.visited.insert(key) {
                return;
            }
        }

        match (r, w) {
            (Value::Bool(true), _) => return,
            (Value::Bool(false), Value::Bool(false)) => return,
            (Value::Bool(false), _) => {
                self.push(
                    IncompatibilityKind::TypeMismatch,
                    path,
                    "reader rejects every value".into(),
                );
                return;
            }
            (_, Value::Bool(false)) => return,
            _ => {}
        }

        // a writer alternative may have produced any document: each must be readable
        if let Some((key, branches)) = alternatives(w) {
            let combinator_path = child_path(path, key);
            for (i, branch) in branches.iter().enumerate() {
                self.compare(r, branch, &child_path(&combinator_path, &i.to_string()));
            }
            return;
        }

        // writer documents satisfy every conjunct, so one readable conjunct suffices
        if let Some(branches) = w.get("allOf").and_then(Value::as_array) {
            let base_constrains = w.as_object().map_or(false, |obj| obj.len() > 1);
            let readable = branches.iter().any(|branch| self.matches(r, branch, path))
                || (base_constrains && self.trial(|walk| walk.compare_base(r, w, path)));
            if !readable {
                match branches.first() {
                    Some(first) if !base_constrains => {
                        self.compare(r, first, &child_path(&child_path(path, "allOf"), "0"))
                    }
                    _ => self.compare_base(r, w, path),
                }
            }
            return;
        }

        // oneOf readers are checked like anyOf: branch overlap is not detected
        if let Some((key, branches)) = alternatives(r) {
            if !branches.iter().any(|branch| self.matches(branch, w, path)) {
                match branches.as_slice() {
                    [only] => self.compare(only, w, &child_path(&child_path(path, key), "0")),
                    _ => self.push(
                        IncompatibilityKind::UnionBranchMissing,
                        path,
                        format!("no {} branch of the reader accepts the writer", key),
                    ),
                }
            }
        }

        if let Some(branches) = r.get("allOf").and_then(Value::as_array) {
            let combinator_path = child_path(path, "allOf");
            for (i, branch) in branches.iter().enumerate() {
                self.compare(branch, w, &child_path(&combinator_path, &i.to_string()));
            }
        }

        self.compare_base(r, w, path);
    }

    /// Whether `r` reads `w`, leaving no trace in `found` or `visited`.
    fn matches(&mut self, r: &'a Value, w: &'a Value, path: &str) -> bool {
        self.trial(|walk| walk.compare(r, w, path))
    }

    fn trial(&mut self, run: impl FnOnce(&mut Self)) -> bool {
        let mark = self.found.len();
        let visited = self.visited.clone();
        run(self);
        let ok = self.found.len() == mark;
        self.found.truncate(mark);
        self.visited = visited;
        ok
    }

    /// Keyword checks other than the combinators.
    fn compare_base(&mut self, r: &'a Value, w: &'a Value, path: &str) {
        self.compare_types(r, w, path);
        self.compare_enum(r, w, path);
        self.compare_bounds(r, w, path);

        let r_types = type_set(r);
        let w_types = type_set(w);
        let has = |types: &Option<BTreeSet<String>>, t: &str| {
            types.as_ref().map(|set| set.contains(t)).unwrap_or(true)
        };

        if is_object_schema(r) && has(&w_types, "object") {
            self.compare_objects(r, w, path);
        }
        if has(&r_types, "array") && has(&w_types, "array") {
            if let Some(r_items) = r.get("items") {
                let w_items = w.get("items").unwrap_or(&ANY);
                self.compare(r_items, w_items, &child_path(path, "items"));
            }
        }
    }

    fn compare_types(&mut self, r: &Value, w: &Value, path: &str) {
        let Some(r_types) = type_set(r) else {
            return;
        };
        match type_set(w) {
            None => self.push(
                IncompatibilityKind::TypeMismatch,
                path,
                format!(
                    "writer accepts any type, reader only {}",
                    r_types.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            ),
            Some(w_types) => {
                for t in w_types.iter().filter(|t| !accepts_type(&r_types, t)) {
                    self.push(
                        IncompatibilityKind::TypeMismatch,
                        path,
                        format!("type {} is no longer accepted", t),
                    );
                }
            }
        }
    }

    fn compare_enum(&mut self, r: &Value, w: &Value, path: &str) {
        let Some(r_values) = r.get("enum").and_then(Value::as_array) else {
            return;
        };
        match w.get("enum").and_then(Value::as_array) {
            Some(w_values) => {
                for value in w_values.iter().filter(|v| !r_values.contains(v)) {
                    self.push(
                        IncompatibilityKind::EnumSymbolRemoved,
                        path,
                        format!("enum value {} was removed", value),
                    );
                }
            }
            None => self.push(
                IncompatibilityKind::TypeMismatch,
                path,
                "reader restricts values to an enum".into(),
            ),
        }
    }

    fn compare_bounds(&mut self, r: &Value, w: &Value, path: &str) {
        for key in UPPER_BOUNDS {
            if let Some(limit) = r.get(key).and_then(Value::as_f64) {
                match w.get(key).and_then(Value::as_f64) {
                    Some(wl) if wl <= limit => {}
                    _ => self.push(
                        IncompatibilityKind::ConstraintNarrowed,
                        path,
                        format!("{} narrowed to {}", key, limit),
                    ),
                }
            }
        }
        for key in LOWER_BOUNDS {
            if let Some(limit) = r.get(key).and_then(Value::as_f64) {
                match w.get(key).and_then(Value::as_f64) {
                    Some(wl) if wl >= limit => {}
                    _ => self.push(
                        IncompatibilityKind::ConstraintNarrowed,
                        path,
                        format!("{} narrowed to {}", key, limit),
                    ),
                }
            }
        }
    }

    fn compare_objects(&mut self, r: &'a Value, w: &'a Value, path: &str) {
        let r_props = properties(r);
        let w_props = properties(w);
        let r_declares = |name: &str| r_props.map_or(false, |props| props.contains_key(name));
        let r_required = required(r);
        let w_required = required(w);
        let props_path = child_path(path, "properties");

        for (name, r_schema) in r_props.into_iter().flatten() {
            let p = child_path(&props_path, name);
            let has_default = r_schema.get("default").is_some();
            match w_props.and_then(|props| props.get(name)) {
                Some(w_schema) => {
                    self.compare(r_schema, w_schema, &p);
                    if r_required.contains(name.as_str())
                        && !w_required.contains(name.as_str())
                        && !has_default
                    {
                        self.push(
                            IncompatibilityKind::RequiredPropertyAdded,
                            &p,
                            format!("property '{}' became required", name),
                        );
                    }
                }
                None if r_required.contains(name.as_str()) && !has_default => self.push(
                    IncompatibilityKind::FieldAddedWithoutDefault,
                    &p,
                    format!("required property '{}' added without default", name),
                ),
                None => {}
            }
        }

        for name in &r_required {
            if !r_declares(*name) && !w_required.contains(name) {
                self.push(
                    IncompatibilityKind::RequiredPropertyAdded,
                    &child_path(&props_path, name),
                    format!("property '{}' became required", name),
                );
            }
        }

        let reader_closed = is_closed(r);
        for (name, w_schema) in w_props.into_iter().flatten() {
            if r_declares(name.as_str()) {
                continue;
            }
            let p = child_path(&props_path, name);
            if reader_closed {
                self.push(
                    IncompatibilityKind::PropertyRemovedFromClosedModel,
                    &p,
                    format!("property '{}' removed from a closed content model", name),
                );
            } else if let Some(additional) = r.get("additionalProperties").filter(|a| a.is_object()) {
                self.compare(additional, w_schema, &p);
            }
        }

        if reader_closed && !is_closed(w) {
            self.push(
                IncompatibilityKind::ConstraintNarrowed,
                path,
                "additional properties are no longer allowed".into(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::CompatibilityChecker;

    fn parse(text: &str) -> ParsedSchema {
        ParsedSchema::parse(SchemaType::Json, text, &[]).unwrap()
    }

    fn kinds(reader: &str, writer: &str) -> Vec<IncompatibilityKind> {
        CompatibilityChecker::can_read(&parse(reader), &parse(writer))
            .into_iter()
            .map(|i| i.kind)
            .collect()
    }

    #[test]
    fn integer_widens_to_number() {
        let int = r#"{"type":"integer"}"#;
        let num = r#"{"type":"number"}"#;
        assert!(kinds(num, int).is_empty());
        assert_eq!(kinds(int, num), vec![IncompatibilityKind::TypeMismatch]);
    }

    #[test]
    fn optional_property_may_be_added() {
        let v1 = r#"{"type":"object","properties":{"id":{"type":"integer"}},"required":["id"]}"#;
        let v2 = r#"{"type":"object","properties":{"id":{"type":"integer"},"note":{"type":"string"}},"required":["id"]}"#;
        assert!(kinds(v2, v1).is_empty());
        assert!(kinds(v1, v2).is_empty());
    }

    #[test]
    fn required_property_without_default_is_reported() {
        let v1 = r#"{"type":"object","properties":{"id":{"type":"integer"}}}"#;
        let v2 = r#"{"type":"object","properties":{"id":{"type":"integer"},"name":{"type":"string"}},"required":["name"]}"#;
        let v2_default = r#"{"type":"object","properties":{"id":{"type":"integer"},"name":{"type":"string","default":""}},"required":["name"]}"#;
        assert_eq!(kinds(v2, v1), vec![IncompatibilityKind::FieldAddedWithoutDefault]);
        assert!(kinds(v2_default, v1).is_empty());
    }

    #[test]
    fn making_a_property_required_is_reported() {
        let optional = r#"{"type":"object","properties":{"id":{"type":"integer"}}}"#;
        let required = r#"{"type":"object","properties":{"id":{"type":"integer"}},"required":["id"]}"#;
        assert_eq!(kinds(required, optional), vec![IncompatibilityKind::RequiredPropertyAdded]);
        assert!(kinds(optional, required).is_empty());
    }

    #[test]
    fn closed_content_model() {
        let wide = r#"{"type":"object","properties":{"id":{"type":"integer"},"x":{"type":"string"}},"additionalProperties":false}"#;
        let narrow = r#"{"type":"object","properties":{"id":{"type":"integer"}},"additionalProperties":false}"#;
        assert_eq!(
            kinds(narrow, wide),
            vec![IncompatibilityKind::PropertyRemovedFromClosedModel]
        );
        assert!(kinds(wide, narrow).is_empty());
    }

    #[test]
    fn any_of_branches_must_all_stay_readable() {
        let narrow = r#"{"type":"object","properties":{"a":{"anyOf":[{"type":"string"}]}}}"#;
        let wide = r#"{"type":"object","properties":{"a":{"anyOf":[{"type":"string"},{"type":"integer"}]}}}"#;
        assert_eq!(kinds(narrow, wide), vec![IncompatibilityKind::TypeMismatch]);
        assert!(kinds(wide, narrow).is_empty());

        let choice = r#"{"anyOf":[{"type":"string"},{"type":"boolean"}]}"#;
        assert_eq!(
            kinds(choice, r#"{"type":"integer"}"#),
            vec![IncompatibilityKind::UnionBranchMissing]
        );
    }

    #[test]
    fn one_of_writer_branches_are_checked_individually() {
        let writer = r#"{"oneOf":[{"type":"string"},{"type":"integer"}]}"#;
        assert!(kinds(r#"{"type":["string","integer"]}"#, writer).is_empty());
        assert_eq!(
            kinds(r#"{"type":"string"}"#, writer),
            vec![IncompatibilityKind::TypeMismatch]
        );
    }

    #[test]
    fn all_of_is_a_conjunction() {
        let writer = r#"{"type":"object","properties":{"id":{"type":"integer"}},"required":["id"]}"#;
        let reader = r#"{"allOf":[
            {"type":"object","properties":{"id":{"type":"integer"}},"required":["id"]},
            {"properties":{"name":{"type":"string"}},"required":["name"]}]}"#;
        // every reader conjunct applies
        assert_eq!(kinds(reader, writer), vec![IncompatibilityKind::FieldAddedWithoutDefault]);

        // one readable writer conjunct is enough
        let constrained = r#"{"allOf":[{"type":"string"},{"maxLength":5}]}"#;
        assert!(kinds(r#"{"type":"string"}"#, constrained).is_empty());
        assert_eq!(
            kinds(r#"{"type":"integer"}"#, constrained),
            vec![IncompatibilityKind::TypeMismatch]
        );
    }

    #[test]
    fn enum_values_and_bounds() {
        assert_eq!(
            kinds(r#"{"enum":["a","b"]}"#, r#"{"enum":["a","b","c"]}"#),
            vec![IncompatibilityKind::EnumSymbolRemoved]
        );
        assert!(kinds(r#"{"enum":["a","b","c"]}"#, r#"{"enum":["a"]}"#).is_empty());
        assert_eq!(
            kinds(
                r#"{"type":"string","maxLength":5}"#,
                r#"{"type":"string","maxLength":10}"#
            ),
            vec![IncompatibilityKind::ConstraintNarrowed]
        );
        assert!(kinds(
            r#"{"type":"string","maxLength":10}"#,
            r#"{"type":"string","maxLength":5}"#
        )
        .is_empty());
    }

    #[test]
    fn array_items_are_compared() {
        let found = CompatibilityChecker::can_read(
            &parse(r#"{"type":"array","items":{"type":"integer"}}"#),
            &parse(r#"{"type":"array","items":{"type":"string"}}"#),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "/items");
    }

    #[test]
    fn local_and_external_refs() {
        let recursive = r##"{"$ref":"#/definitions/node","definitions":{"node":{
            "type":"object","properties":{"next":{"$ref":"#/definitions/node"}}}}}"##;
        assert!(kinds(recursive, recursive).is_empty());

        let customer = parse(r#"{"type":"object","properties":{"id":{"type":"integer"}}}"#);
        let order = ParsedSchema::parse(
            SchemaType::Json,
            r#"{"type":"object","properties":{"customer":{"$ref":"customer.json"}}}"#,
            &[ResolvedReference::new("customer.json", customer)],
        );
        assert!(order.is_ok());

        assert!(matches!(
            ParsedSchema::parse(SchemaType::Json, r#"{"$ref":"missing.json"}"#, &[]),
            Err(SchemaParseError::JsonSchema(_))
        ));
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(ParsedSchema::parse(SchemaType::Json, r#"{"type":"decimal"}"#, &[]).is_err());
        assert!(ParsedSchema::parse(SchemaType::Json, "42", &[]).is_err());
    }
}
