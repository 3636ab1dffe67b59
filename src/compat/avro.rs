//! Avro schema model and reader/writer resolution rules.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use super::parsed::{ResolvedReference, SchemaBody, SchemaParseError};
use super::{child_path, Incompatibility, IncompatibilityKind, ParsedSchema, SchemaComparator};
use crate::types::SchemaType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
}

impl Primitive {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "null" => Primitive::Null,
            "boolean" => Primitive::Boolean,
            "int" => Primitive::Int,
            "long" => Primitive::Long,
            "float" => Primitive::Float,
            "double" => Primitive::Double,
            "bytes" => Primitive::Bytes,
            "string" => Primitive::String,
            _ => return None,
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Primitive::Null => "null",
            Primitive::Boolean => "boolean",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Bytes => "bytes",
            Primitive::String => "string",
        }
    }

    /// Whether a reader of type `self` accepts a value written as `writer`.
    fn reads(&self, writer: Primitive) -> bool {
        use Primitive::*;
        *self == writer
            || matches!(
                (writer, *self),
                (Int, Long)
                    | (Int, Float)
                    | (Int, Double)
                    | (Long, Float)
                    | (Long, Double)
                    | (Float, Double)
                    | (String, Bytes)
                    | (Bytes, String)
            )
    }
}

#[derive(Debug, Clone)]
pub struct RecordType {
    pub name: String,
    pub aliases: Vec<String>,
    pub fields: Vec<AvroField>,
}

#[derive(Debug, Clone)]
pub struct AvroField {
    pub name: String,
    pub aliases: Vec<String>,
    pub schema: AvroType,
    pub default: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub aliases: Vec<String>,
    pub symbols: Vec<String>,
    pub default: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FixedType {
    pub name: String,
    pub aliases: Vec<String>,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub enum AvroType {
    Primitive(Primitive),
    Record(RecordType),
    Enum(EnumType),
    Fixed(FixedType),
    Array(Box<AvroType>),
    Map(Box<AvroType>),
    Union(Vec<AvroType>),
    /// Use of a named type defined elsewhere, by full name.
    Ref(String),
}

impl AvroType {
    fn describe(&self) -> String {
        match self {
            AvroType::Primitive(p) => p.name().to_string(),
            AvroType::Record(r) => format!("record {}", r.name),
            AvroType::Enum(e) => format!("enum {}", e.name),
            AvroType::Fixed(f) => format!("fixed {}", f.name),
            AvroType::Array(_) => "array".to_string(),
            AvroType::Map(_) => "map".to_string(),
            AvroType::Union(_) => "union".to_string(),
            AvroType::Ref(name) => name.clone(),
        }
    }
}

/// A parsed Avro schema with its table of named types.
#[derive(Debug, Clone)]
pub struct AvroSchema {
    pub root: AvroType,
    /// Named types by full name, including those pulled in by references.
    pub names: BTreeMap<String, AvroType>,
}

impl AvroSchema {
    pub fn parse(text: &str, references: &[ResolvedReference]) -> Result<Self, SchemaParseError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SchemaParseError::Json(e.to_string()))?;

        let mut names = BTreeMap::new();
        for reference in references {
            match reference.schema.body() {
                SchemaBody::Avro(dep) => {
                    names.extend(dep.names.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                _ => {
                    return Err(SchemaParseError::Avro(format!(
                        "reference {} is not an Avro schema",
                        reference.name
                    )))
                }
            }
        }

        let root = parse_type(&value, "", &mut names)?;
        Ok(Self { root, names })
    }

    fn resolve<'a>(&'a self, ty: &'a AvroType) -> &'a AvroType {
        match ty {
            AvroType::Ref(name) => self.names.get(name).unwrap_or(ty),
            other => other,
        }
    }
}

fn full_name(name: &str, namespace: &str) -> String {
    if name.contains('.') || namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace, name)
    }
}

fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn namespace_of(full: &str) -> &str {
    full.rsplit_once('.').map(|(ns, _)| ns).unwrap_or("")
}

fn string_list(obj: &serde_json::Map<String, Value>, key: &str, namespace: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| full_name(s, namespace))
                .collect()
        })
        .unwrap_or_default()
}

fn invalid(msg: impl Into<String>) -> SchemaParseError {
    SchemaParseError::Avro(msg.into())
}

fn parse_type(
    value: &Value,
    namespace: &str,
    names: &mut BTreeMap<String, AvroType>,
) -> Result<AvroType, SchemaParseError> {
    match value {
        Value::String(name) => {
            if let Some(p) = Primitive::from_name(name) {
                return Ok(AvroType::Primitive(p));
            }
            let qualified = full_name(name, namespace);
            if names.contains_key(&qualified) {
                Ok(AvroType::Ref(qualified))
            } else if names.contains_key(name.as_str()) {
                Ok(AvroType::Ref(name.clone()))
            } else {
                Err(invalid(format!("unknown type: {}", name)))
            }
        }
        Value::Array(branches) => {
            let parsed = branches
                .iter()
                .map(|b| parse_type(b, namespace, names))
                .collect::<Result<Vec<_>, _>>()?;
            if parsed.iter().any(|b| matches!(b, AvroType::Union(_))) {
                return Err(invalid("unions may not immediately contain other unions"));
            }
            Ok(AvroType::Union(parsed))
        }
        Value::Object(obj) => {
            let type_value = obj
                .get("type")
                .ok_or_else(|| invalid("schema object has no \"type\""))?;
            let type_name = match type_value {
                Value::String(s) => s.as_str(),
                // {"type": {...}} or {"type": [...]} wraps another schema
                nested => return parse_type(nested, namespace, names),
            };
            match type_name {
                "record" | "error" => parse_named(obj, namespace, names, NamedKind::Record),
                "enum" => parse_named(obj, namespace, names, NamedKind::Enum),
                "fixed" => parse_named(obj, namespace, names, NamedKind::Fixed),
                "array" => {
                    let items = obj.get("items").ok_or_else(|| invalid("array without items"))?;
                    Ok(AvroType::Array(Box::new(parse_type(items, namespace, names)?)))
                }
                "map" => {
                    let values = obj.get("values").ok_or_else(|| invalid("map without values"))?;
                    Ok(AvroType::Map(Box::new(parse_type(values, namespace, names)?)))
                }
                // logical types and extra attributes ride on their base type
                other => parse_type(&Value::String(other.to_string()), namespace, names),
            }
        }
        other => Err(invalid(format!("unexpected schema element: {}", other))),
    }
}

enum NamedKind {
    Record,
    Enum,
    Fixed,
}

fn parse_named(
    obj: &serde_json::Map<String, Value>,
    enclosing: &str,
    names: &mut BTreeMap<String, AvroType>,
    kind: NamedKind,
) -> Result<AvroType, SchemaParseError> {
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("named type without a name"))?;
    let namespace = obj
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or(enclosing);
    let fullname = full_name(name, namespace);
    let namespace = namespace_of(&fullname).to_string();
    let aliases = string_list(obj, "aliases", &namespace);

    if names.contains_key(&fullname) {
        return Err(invalid(format!("duplicate named type: {}", fullname)));
    }

    let ty = match kind {
        NamedKind::Record => {
            // registered before the fields so recursive uses resolve
            names.insert(fullname.clone(), AvroType::Ref(fullname.clone()));
            let raw_fields = obj
                .get("fields")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid(format!("record {} has no fields array", fullname)))?;
            let mut fields = Vec::with_capacity(raw_fields.len());
            let mut seen = HashSet::new();
            for raw in raw_fields {
                let field_name = raw
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid(format!("field without a name in {}", fullname)))?;
                if !seen.insert(field_name.to_string()) {
                    return Err(invalid(format!("duplicate field {} in {}", field_name, fullname)));
                }
                let field_type = raw
                    .get("type")
                    .ok_or_else(|| invalid(format!("field {} has no type", field_name)))?;
                let aliases = raw
                    .get("aliases")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_str).map(String::from).collect())
                    .unwrap_or_default();
                fields.push(AvroField {
                    name: field_name.to_string(),
                    aliases,
                    schema: parse_type(field_type, &namespace, names)?,
                    default: raw.get("default").cloned(),
                });
            }
            AvroType::Record(RecordType {
                name: fullname.clone(),
                aliases,
                fields,
            })
        }
        NamedKind::Enum => {
            let symbols: Vec<String> = obj
                .get("symbols")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid(format!("enum {} has no symbols", fullname)))?
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
            let default = obj.get("default").and_then(Value::as_str).map(String::from);
            if let Some(d) = &default {
                if !symbols.contains(d) {
                    return Err(invalid(format!("enum {} default {} is not a symbol", fullname, d)));
                }
            }
            AvroType::Enum(EnumType {
                name: fullname.clone(),
                aliases,
                symbols,
                default,
            })
        }
        NamedKind::Fixed => {
            let size = obj
                .get("size")
                .and_then(Value::as_u64)
                .ok_or_else(|| invalid(format!("fixed {} has no size", fullname)))?;
            AvroType::Fixed(FixedType {
                name: fullname.clone(),
                aliases,
                size,
            })
        }
    };

    names.insert(fullname, ty.clone());
    Ok(ty)
}

/// Avro schema resolution, as a reader resolves data from a writer.
pub struct AvroComparator;

impl SchemaComparator for AvroComparator {
    fn schema_type(&self) -> SchemaType {
        SchemaType::Avro
    }

    fn can_read(&self, reader: &ParsedSchema, writer: &ParsedSchema) -> Vec<Incompatibility> {
        let (SchemaBody::Avro(r), SchemaBody::Avro(w)) = (reader.body(), writer.body()) else {
            return Vec::new();
        };
        let mut walk = Resolution {
            reader: r,
            writer: w,
            visited: HashSet::new(),
            found: Vec::new(),
        };
        walk.compare(&r.root, &w.root, "");
        walk.found
    }
}

struct Resolution<'a> {
    reader: &'a AvroSchema,
    writer: &'a AvroSchema,
    visited: HashSet<(String, String)>,
    found: Vec<Incompatibility>,
}

impl<'a> Resolution<'a> {
    fn push(&mut self, kind: IncompatibilityKind, path: &str, message: String) {
        self.found.push(Incompatibility::new(kind, path, message));
    }

    /// Whether `r` reads `w` without recording anything.
    ///
    /// Leaves `found` and `visited` as they were, so a failed trial can be
    /// repeated as a reporting walk.
    fn matches(&mut self, r: &'a AvroType, w: &'a AvroType, path: &str) -> bool {
        let mark = self.found.len();
        let visited = self.visited.clone();
        self.compare(r, w, path);
        let ok = self.found.len() == mark;
        self.found.truncate(mark);
        self.visited = visited;
        ok
    }

    fn compare(&mut self, r: &'a AvroType, w: &'a AvroType, path: &str) {
        let reader = self.reader;
        let r = reader.resolve(r);
        let w = self.writer.resolve(w);

        // every branch the writer may have used must be readable
        if let AvroType::Union(w_branches) = w {
            for (i, branch) in w_branches.iter().enumerate() {
                let branch_path = match r {
                    AvroType::Union(_) => child_path(path, &i.to_string()),
                    _ => path.to_string(),
                };
                if !self.matches(r, branch, &branch_path) {
                    self.compare(r, branch, &branch_path);
                }
            }
            return;
        }

        if let AvroType::Union(r_branches) = r {
            if r_branches.iter().any(|branch| self.matches(branch, w, path)) {
                return;
            }
            // report why the closest branch fails rather than only that none fits
            match r_branches
                .iter()
                .find(|branch| same_kind(reader.resolve(branch), w))
            {
                Some(branch) => self.compare(branch, w, path),
                None => self.push(
                    IncompatibilityKind::UnionBranchMissing,
                    path,
                    format!("reader union has no branch for writer type {}", w.describe()),
                ),
            }
            return;
        }

        match (r, w) {
            (AvroType::Primitive(rp), AvroType::Primitive(wp)) => {
                if !rp.reads(*wp) {
                    self.type_mismatch(path, r, w);
                }
            }
            (AvroType::Record(rr), AvroType::Record(wr)) => self.compare_records(rr, wr, path),
            (AvroType::Enum(re), AvroType::Enum(we)) => {
                if !names_match(&re.name, &re.aliases, &we.name) {
                    self.name_mismatch(path, &re.name, &we.name);
                    return;
                }
                if re.default.is_some() {
                    return;
                }
                for symbol in &we.symbols {
                    if !re.symbols.contains(symbol) {
                        self.push(
                            IncompatibilityKind::EnumSymbolRemoved,
                            path,
                            format!("enum {} lacks writer symbol {} and has no default", re.name, symbol),
                        );
                    }
                }
            }
            (AvroType::Fixed(rf), AvroType::Fixed(wf)) => {
                if !names_match(&rf.name, &rf.aliases, &wf.name) {
                    self.name_mismatch(path, &rf.name, &wf.name);
                } else if rf.size != wf.size {
                    self.push(
                        IncompatibilityKind::FixedSizeMismatch,
                        path,
                        format!("fixed {} size changed from {} to {}", rf.name, wf.size, rf.size),
                    );
                }
            }
            (AvroType::Array(ri), AvroType::Array(wi)) => {
                self.compare(ri, wi, &child_path(path, "items"));
            }
            (AvroType::Map(rv), AvroType::Map(wv)) => {
                self.compare(rv, wv, &child_path(path, "values"));
            }
            _ => self.type_mismatch(path, r, w),
        }
    }

    fn compare_records(&mut self, r: &'a RecordType, w: &'a RecordType, path: &str) {
        if !names_match(&r.name, &r.aliases, &w.name) {
            self.name_mismatch(path, &r.name, &w.name);
            return;
        }
        if !self.visited.insert((r.name.clone(), w.name.clone())) {
            return;
        }

        let mut matched_writer_fields = HashSet::new();
        for rf in &r.fields {
            let field_path = child_path(&child_path(path, "fields"), &rf.name);
            match find_field(rf, &w.fields) {
                Some(wf) => {
                    matched_writer_fields.insert(wf.name.as_str());
                    self.compare(&rf.schema, &wf.schema, &field_path);
                }
                None if rf.default.is_none() => self.push(
                    IncompatibilityKind::FieldAddedWithoutDefault,
                    &field_path,
                    format!("field '{}' added without default", rf.name),
                ),
                None => {}
            }
        }

        for wf in &w.fields {
            if matched_writer_fields.contains(wf.name.as_str()) || wf.default.is_some() {
                continue;
            }
            self.push(
                IncompatibilityKind::FieldRemovedWithoutDefault,
                &child_path(&child_path(path, "fields"), &wf.name),
                format!("field '{}' removed without default", wf.name),
            );
        }
    }

    fn type_mismatch(&mut self, path: &str, r: &AvroType, w: &AvroType) {
        self.push(
            IncompatibilityKind::TypeMismatch,
            path,
            format!("{} cannot be read as {}", w.describe(), r.describe()),
        );
    }

    fn name_mismatch(&mut self, path: &str, reader: &str, writer: &str) {
        self.push(
            IncompatibilityKind::NameMismatch,
            path,
            format!("writer type {} does not match reader type {}", writer, reader),
        );
    }
}

/// Same named type or same container, so resolution failures are field-level.
fn same_kind(r: &AvroType, w: &AvroType) -> bool {
    match (r, w) {
        (AvroType::Record(a), AvroType::Record(b)) => names_match(&a.name, &a.aliases, &b.name),
        (AvroType::Enum(a), AvroType::Enum(b)) => names_match(&a.name, &a.aliases, &b.name),
        (AvroType::Fixed(a), AvroType::Fixed(b)) => names_match(&a.name, &a.aliases, &b.name),
        (AvroType::Array(_), AvroType::Array(_)) | (AvroType::Map(_), AvroType::Map(_)) => true,
        _ => false,
    }
}

fn names_match(reader: &str, reader_aliases: &[String], writer: &str) -> bool {
    reader == writer
        || short_name(reader) == short_name(writer)
        || reader_aliases.iter().any(|a| a == writer || short_name(a) == short_name(writer))
}

/// Writer field for a reader field, by name or by an alias on either side.
fn find_field<'a>(reader: &AvroField, writer_fields: &'a [AvroField]) -> Option<&'a AvroField> {
    writer_fields
        .iter()
        .find(|wf| wf.name == reader.name)
        .or_else(|| {
            writer_fields.iter().find(|wf| {
                reader.aliases.contains(&wf.name) || wf.aliases.contains(&reader.name)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::CompatibilityChecker;

    fn parse(text: &str) -> ParsedSchema {
        ParsedSchema::parse(SchemaType::Avro, text, &[]).unwrap()
    }

    fn kinds(reader: &str, writer: &str) -> Vec<IncompatibilityKind> {
        CompatibilityChecker::can_read(&parse(reader), &parse(writer))
            .into_iter()
            .map(|i| i.kind)
            .collect()
    }

    const V1: &str = r#"{"type":"record","name":"Order","fields":[
        {"name":"id","type":"int"},{"name":"name","type":"string"}]}"#;
    const V2: &str = r#"{"type":"record","name":"Order","fields":[
        {"name":"id","type":"int"},{"name":"name","type":"string"},
        {"name":"note","type":"string","default":""}]}"#;
    const V3: &str = r#"{"type":"record","name":"Order","fields":[
        {"name":"id","type":"int"}]}"#;

    #[test]
    fn adding_a_field_with_default_is_readable() {
        assert!(kinds(V2, V1).is_empty());
    }

    #[test]
    fn dropping_a_field_without_default_is_reported() {
        let found = CompatibilityChecker::can_read(&parse(V3), &parse(V2));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, IncompatibilityKind::FieldRemovedWithoutDefault);
        assert_eq!(found[0].path, "/fields/name");
    }

    #[test]
    fn new_field_without_default_is_reported() {
        assert_eq!(
            kinds(V1, V3),
            vec![IncompatibilityKind::FieldAddedWithoutDefault]
        );
    }

    #[test]
    fn numeric_promotions_are_one_way() {
        assert!(kinds(r#""long""#, r#""int""#).is_empty());
        assert!(kinds(r#""double""#, r#""float""#).is_empty());
        assert!(kinds(r#""bytes""#, r#""string""#).is_empty());
        assert_eq!(kinds(r#""int""#, r#""long""#), vec![IncompatibilityKind::TypeMismatch]);
        assert_eq!(kinds(r#""boolean""#, r#""int""#), vec![IncompatibilityKind::TypeMismatch]);
    }

    #[test]
    fn unions() {
        // writer branch must be readable by some reader branch
        assert!(kinds(r#"["null","string"]"#, r#""string""#).is_empty());
        assert!(kinds(r#"["null","long"]"#, r#"["null","int"]"#).is_empty());
        assert_eq!(
            kinds(r#"["null","string"]"#, r#"["null","string","int"]"#),
            vec![IncompatibilityKind::UnionBranchMissing]
        );
        // a non-union reader must accept every writer branch
        assert_eq!(
            kinds(r#""string""#, r#"["null","string"]"#),
            vec![IncompatibilityKind::TypeMismatch]
        );
    }

    #[test]
    fn records_inside_writer_unions_are_checked() {
        let reader = r#"{"type":"record","name":"O","fields":[{"name":"f","type":
            {"type":"record","name":"R","fields":[{"name":"x","type":"string"}]}}]}"#;
        let writer = r#"{"type":"record","name":"O","fields":[{"name":"f","type":
            [{"type":"record","name":"R","fields":[{"name":"x","type":"int"}]}]}]}"#;
        let found = CompatibilityChecker::can_read(&parse(reader), &parse(writer));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, IncompatibilityKind::TypeMismatch);
        assert_eq!(found[0].path, "/fields/f/fields/x");
    }

    #[test]
    fn nullable_record_evolution_reports_field_reasons() {
        let writer = r#"{"type":"record","name":"O","fields":[{"name":"f","type":["null",
            {"type":"record","name":"R","fields":[{"name":"x","type":"int"}]}]}]}"#;
        let strict = r#"{"type":"record","name":"O","fields":[{"name":"f","type":["null",
            {"type":"record","name":"R","fields":[{"name":"x","type":"int"},
            {"name":"y","type":"string"}]}]}]}"#;
        let lenient = r#"{"type":"record","name":"O","fields":[{"name":"f","type":["null",
            {"type":"record","name":"R","fields":[{"name":"x","type":"int"},
            {"name":"y","type":"string","default":""}]}]}]}"#;

        assert!(kinds(lenient, writer).is_empty());
        let found = CompatibilityChecker::can_read(&parse(strict), &parse(writer));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, IncompatibilityKind::FieldAddedWithoutDefault);
        assert!(found[0].path.ends_with("/fields/y"));

        // a plain record writer against the nullable reader
        let plain = r#"{"type":"record","name":"O","fields":[{"name":"f","type":
            {"type":"record","name":"R","fields":[{"name":"x","type":"int"}]}}]}"#;
        assert_eq!(
            kinds(strict, plain),
            vec![IncompatibilityKind::FieldAddedWithoutDefault]
        );
    }

    #[test]
    fn enum_symbols() {
        let abc = r#"{"type":"enum","name":"E","symbols":["A","B","C"]}"#;
        let ab = r#"{"type":"enum","name":"E","symbols":["A","B"]}"#;
        let ab_default = r#"{"type":"enum","name":"E","symbols":["A","B"],"default":"A"}"#;
        assert!(kinds(abc, ab).is_empty());
        assert_eq!(kinds(ab, abc), vec![IncompatibilityKind::EnumSymbolRemoved]);
        assert!(kinds(ab_default, abc).is_empty());
    }

    #[test]
    fn fixed_size_and_names() {
        let f4 = r#"{"type":"fixed","name":"F","size":4}"#;
        let f8 = r#"{"type":"fixed","name":"F","size":8}"#;
        let g4 = r#"{"type":"fixed","name":"G","size":4}"#;
        assert_eq!(kinds(f4, f8), vec![IncompatibilityKind::FixedSizeMismatch]);
        assert_eq!(kinds(f4, g4), vec![IncompatibilityKind::NameMismatch]);
    }

    #[test]
    fn field_rename_through_alias() {
        let old = r#"{"type":"record","name":"U","fields":[{"name":"name","type":"string"}]}"#;
        let new = r#"{"type":"record","name":"U","fields":[
            {"name":"full_name","type":"string","aliases":["name"]}]}"#;
        // both reading directions resolve the renamed field
        assert!(kinds(new, old).is_empty());
        assert!(kinds(old, new).is_empty());
    }

    #[test]
    fn record_rename_through_alias() {
        let old = r#"{"type":"record","name":"a.Old","fields":[]}"#;
        let new = r#"{"type":"record","name":"a.New","aliases":["Old"],"fields":[]}"#;
        assert!(kinds(new, old).is_empty());
        assert_eq!(kinds(old, new), vec![IncompatibilityKind::NameMismatch]);
    }

    #[test]
    fn recursive_records_terminate() {
        let list = r#"{"type":"record","name":"Node","fields":[
            {"name":"value","type":"int"},
            {"name":"next","type":["null","Node"]}]}"#;
        assert!(kinds(list, list).is_empty());
    }

    #[test]
    fn nested_collections() {
        let a = r#"{"type":"map","values":{"type":"array","items":"int"}}"#;
        let b = r#"{"type":"map","values":{"type":"array","items":"long"}}"#;
        assert!(kinds(b, a).is_empty());
        let found = CompatibilityChecker::can_read(&parse(a), &parse(b));
        assert_eq!(found[0].path, "/values/items");
    }

    #[test]
    fn references_supply_named_types() {
        let customer = parse(
            r#"{"type":"record","name":"Customer","namespace":"shop","fields":[{"name":"id","type":"int"}]}"#,
        );
        let order = ParsedSchema::parse(
            SchemaType::Avro,
            r#"{"type":"record","name":"Order","namespace":"shop","fields":[{"name":"customer","type":"Customer"}]}"#,
            &[ResolvedReference::new("shop.Customer", customer)],
        );
        assert!(order.is_ok());

        let unresolved = ParsedSchema::parse(
            SchemaType::Avro,
            r#"{"type":"record","name":"Order","fields":[{"name":"customer","type":"Customer"}]}"#,
            &[],
        );
        assert!(matches!(unresolved, Err(SchemaParseError::Avro(_))));
    }

    #[test]
    fn malformed_schemas_are_rejected() {
        for text in [
            r#"{"type":"record","name":"A"}"#,
            r#"{"type":"enum","name":"E","symbols":["A"],"default":"Z"}"#,
            r#"{"type":"unknown_type"}"#,
            r#"[["int"]]"#,
            r#"{"type":"record","name":"A","fields":[{"name":"x","type":"int"},{"name":"x","type":"int"}]}"#,
        ] {
            assert!(
                ParsedSchema::parse(SchemaType::Avro, text, &[]).is_err(),
                "accepted {}",
                text
            );
        }
    }
}
