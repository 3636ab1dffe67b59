//! Protobuf schema model and wire-compatibility rules.
//!
//! Fields are matched by tag number, never by name, so renaming a field is
//! always safe. Types are compatible when they share a wire encoding.

use std::collections::{BTreeMap, HashSet};

use super::parsed::{ResolvedReference, SchemaBody, SchemaParseError};
use super::{child_path, Incompatibility, IncompatibilityKind, ParsedSchema, SchemaComparator};
use crate::types::SchemaType;

const SCALARS: [&str; 15] = [
    "double", "float", "int32", "int64", "uint32", "uint64", "sint32", "sint64", "fixed32",
    "fixed64", "sfixed32", "sfixed64", "bool", "string", "bytes",
];

/// Imports that are always available without a reference.
const WELL_KNOWN_PREFIX: &str = "google/protobuf/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Proto2,
    Proto3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    /// proto3 field without a label.
    Singular,
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Scalar(String),
    /// Message or enum, by full name once resolved.
    Named(String),
    Map(Box<FieldType>, Box<FieldType>),
}

impl FieldType {
    fn of(name: &str) -> Self {
        if SCALARS.contains(&name) {
            FieldType::Scalar(name.to_string())
        } else {
            FieldType::Named(name.to_string())
        }
    }

    fn describe(&self) -> String {
        match self {
            FieldType::Scalar(name) | FieldType::Named(name) => name.clone(),
            FieldType::Map(k, v) => format!("map<{}, {}>", k.describe(), v.describe()),
        }
    }

    fn resolve(&mut self, scope: &str, known: &HashSet<String>) {
        match self {
            FieldType::Named(name) => *name = resolve_name(name, scope, known),
            FieldType::Map(k, v) => {
                k.resolve(scope, known);
                v.resolve(scope, known);
            }
            FieldType::Scalar(_) => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProtoField {
    pub name: String,
    pub number: i64,
    pub label: Label,
    pub kind: FieldType,
    pub oneof: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub name: String,
    pub fields: Vec<ProtoField>,
    /// Inclusive tag ranges from `reserved` statements.
    pub reserved_numbers: Vec<(i64, i64)>,
    pub reserved_names: Vec<String>,
}

impl Message {
    fn reserves(&self, field: &ProtoField) -> bool {
        self.reserved_names.contains(&field.name)
            || self
                .reserved_numbers
                .iter()
                .any(|(low, high)| (*low..=*high).contains(&field.number))
    }

    fn has_oneof(&self, oneof: &str) -> bool {
        self.fields.iter().any(|f| f.oneof.as_deref() == Some(oneof))
    }
}

#[derive(Debug, Clone)]
pub struct ProtoEnum {
    pub name: String,
    pub values: Vec<(String, i64)>,
}

/// A parsed `.proto` file. Types from referenced files are merged in so
/// field types resolve across imports.
#[derive(Debug, Clone)]
pub struct ProtoFile {
    pub syntax: Syntax,
    pub package: String,
    pub imports: Vec<String>,
    pub messages: BTreeMap<String, Message>,
    pub enums: BTreeMap<String, ProtoEnum>,
    /// First top-level message of this file; the one compared.
    pub root: Option<String>,
}

enum Definition<'f> {
    Message(&'f Message),
    Enum(&'f ProtoEnum),
}

impl ProtoFile {
    pub fn parse(text: &str, references: &[ResolvedReference]) -> Result<Self, SchemaParseError> {
        let mut p = Parser::new(tokenize(text));
        let mut file = ProtoFile {
            syntax: Syntax::Proto2,
            package: String::new(),
            imports: Vec::new(),
            messages: BTreeMap::new(),
            enums: BTreeMap::new(),
            root: None,
        };

        while let Some(token) = p.peek().cloned() {
            let keyword = match token {
                Token::Sym(';') => {
                    p.advance();
                    continue;
                }
                Token::Word(w) => w,
                other => return Err(invalid(format!("unexpected {}", other))),
            };
            match keyword.as_str() {
                "syntax" | "edition" => {
                    p.advance();
                    p.sym('=')?;
                    let value = p.string("syntax")?;
                    file.syntax = if value == "proto3" {
                        Syntax::Proto3
                    } else {
                        Syntax::Proto2
                    };
                    p.sym(';')?;
                }
                "package" => {
                    p.advance();
                    file.package = p.word("package name")?;
                    p.sym(';')?;
                }
                "import" => {
                    p.advance();
                    if matches!(p.peek_word(), Some("public") | Some("weak")) {
                        p.advance();
                    }
                    let path = p.string("import path")?;
                    file.imports.push(path);
                    p.sym(';')?;
                }
                "option" => p.skip_statement()?,
                "message" => {
                    p.advance();
                    let package = file.package.clone();
                    let full = parse_message(&mut p, &mut file, &package)?;
                    file.root.get_or_insert(full);
                }
                "enum" => {
                    p.advance();
                    let package = file.package.clone();
                    parse_enum(&mut p, &mut file, &package)?;
                }
                "service" | "extend" => p.skip_block()?,
                other => return Err(invalid(format!("unexpected token {}", other))),
            }
        }

        for import in &file.imports {
            if !import.starts_with(WELL_KNOWN_PREFIX) && !references.iter().any(|r| &r.name == import) {
                return Err(invalid(format!("import {} is not resolved by a reference", import)));
            }
        }
        for reference in references {
            let SchemaBody::Protobuf(dep) = reference.schema.body() else {
                return Err(invalid(format!(
                    "reference {} is not a Protobuf schema",
                    reference.name
                )));
            };
            for (name, message) in &dep.messages {
                file.messages.entry(name.clone()).or_insert_with(|| message.clone());
            }
            for (name, en) in &dep.enums {
                file.enums.entry(name.clone()).or_insert_with(|| en.clone());
            }
        }

        file.resolve_types();
        Ok(file)
    }

    fn resolve_types(&mut self) {
        let known: HashSet<String> = self
            .messages
            .keys()
            .chain(self.enums.keys())
            .cloned()
            .collect();
        for message in self.messages.values_mut() {
            let scope = message.name.clone();
            for field in &mut message.fields {
                field.kind.resolve(&scope, &known);
            }
        }
    }

    fn root_message(&self) -> Option<&Message> {
        self.root.as_ref().and_then(|name| self.messages.get(name))
    }

    fn lookup(&self, name: &str) -> Option<Definition<'_>> {
        if let Some(message) = self.messages.get(name) {
            return Some(Definition::Message(message));
        }
        self.enums.get(name).map(Definition::Enum)
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn parent_scope(scope: &str) -> &str {
    scope.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("")
}

fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Protobuf scoping: innermost enclosing scope first, then outwards.
fn resolve_name(name: &str, scope: &str, known: &HashSet<String>) -> String {
    if let Some(absolute) = name.strip_prefix('.') {
        return absolute.to_string();
    }
    let mut scope = scope;
    loop {
        let candidate = qualify(scope, name);
        if known.contains(&candidate) {
            return candidate;
        }
        if scope.is_empty() {
            return name.to_string();
        }
        scope = parent_scope(scope);
    }
}

fn invalid(msg: impl Into<String>) -> SchemaParseError {
    SchemaParseError::Protobuf(msg.into())
}

fn parse_message(p: &mut Parser, file: &mut ProtoFile, scope: &str) -> Result<String, SchemaParseError> {
    let name = p.word("message name")?;
    let full = qualify(scope, &name);
    p.sym('{')?;

    let mut fields = Vec::new();
    let mut reserved_numbers = Vec::new();
    let mut reserved_names = Vec::new();
    loop {
        if p.is_sym('}') {
            p.advance();
            break;
        }
        if p.is_sym(';') {
            p.advance();
            continue;
        }
        let keyword = match p.peek_word() {
            Some(w) => w.to_string(),
            None => return Err(p.unexpected("message element")),
        };
        match keyword.as_str() {
            "message" => {
                p.advance();
                parse_message(p, file, &full)?;
            }
            "enum" => {
                p.advance();
                parse_enum(p, file, &full)?;
            }
            "reserved" => {
                p.advance();
                parse_reserved(p, &mut reserved_numbers, &mut reserved_names)?;
            }
            "option" | "extensions" => p.skip_statement()?,
            "extend" => p.skip_block()?,
            "oneof" => {
                p.advance();
                let oneof = p.word("oneof name")?;
                p.sym('{')?;
                loop {
                    if p.is_sym('}') {
                        p.advance();
                        break;
                    }
                    if p.is_sym(';') {
                        p.advance();
                        continue;
                    }
                    if p.peek_word() == Some("option") {
                        p.skip_statement()?;
                        continue;
                    }
                    fields.push(parse_field(p, file.syntax, Some(oneof.clone()))?);
                }
            }
            _ => fields.push(parse_field(p, file.syntax, None)?),
        }
    }

    let mut numbers = HashSet::new();
    let mut names = HashSet::new();
    for field in &fields {
        if field.number <= 0 {
            return Err(invalid(format!("field {} in {} has invalid tag {}", field.name, full, field.number)));
        }
        if !numbers.insert(field.number) {
            return Err(invalid(format!("tag {} is used twice in {}", field.number, full)));
        }
        if !names.insert(field.name.as_str()) {
            return Err(invalid(format!("field {} is declared twice in {}", field.name, full)));
        }
        let reused_number = reserved_numbers
            .iter()
            .any(|(low, high)| (*low..=*high).contains(&field.number));
        if reused_number || reserved_names.contains(&field.name) {
            return Err(invalid(format!("field {} in {} uses a reserved name or tag", field.name, full)));
        }
    }

    file.messages.insert(
        full.clone(),
        Message {
            name: full.clone(),
            fields,
            reserved_numbers,
            reserved_names,
        },
    );
    Ok(full)
}

/// `reserved 2, 9 to 11, 40 to max;` or `reserved "a", "b";`
fn parse_reserved(
    p: &mut Parser,
    numbers: &mut Vec<(i64, i64)>,
    names: &mut Vec<String>,
) -> Result<(), SchemaParseError> {
    loop {
        match p.peek() {
            Some(Token::Str(_)) => names.push(p.string("reserved name")?),
            Some(Token::Word(_)) => {
                let low = p.number("reserved tag")?;
                let high = if p.peek_word() == Some("to") {
                    p.advance();
                    if p.peek_word() == Some("max") {
                        p.advance();
                        i64::from(MAX_TAG)
                    } else {
                        p.number("reserved range end")?
                    }
                } else {
                    low
                };
                if high < low {
                    return Err(invalid(format!("reserved range {} to {} is empty", low, high)));
                }
                numbers.push((low, high));
            }
            _ => return Err(p.unexpected("reserved tag or name")),
        }
        if p.is_sym(',') {
            p.advance();
            continue;
        }
        return p.sym(';');
    }
}

fn parse_field(p: &mut Parser, syntax: Syntax, oneof: Option<String>) -> Result<ProtoField, SchemaParseError> {
    let mut label = match (syntax, &oneof) {
        (_, Some(_)) | (Syntax::Proto2, None) => Label::Optional,
        (Syntax::Proto3, None) => Label::Singular,
    };
    match p.peek_word() {
        Some("optional") => {
            label = Label::Optional;
            p.advance();
        }
        Some("required") => {
            label = Label::Required;
            p.advance();
        }
        Some("repeated") => {
            label = Label::Repeated;
            p.advance();
        }
        _ => {}
    }

    let kind = if p.peek_word() == Some("map") && p.peek_at(1) == Some(&Token::Sym('<')) {
        p.advance();
        p.sym('<')?;
        let key = p.word("map key type")?;
        p.sym(',')?;
        let value = p.word("map value type")?;
        p.sym('>')?;
        FieldType::Map(Box::new(FieldType::of(&key)), Box::new(FieldType::of(&value)))
    } else {
        let type_name = p.word("field type")?;
        if type_name == "group" {
            return Err(invalid("groups are not supported"));
        }
        FieldType::of(&type_name)
    };

    let name = p.word("field name")?;
    p.sym('=')?;
    let number = p.number("field number")?;
    p.skip_options()?;
    p.sym(';')?;

    Ok(ProtoField {
        name,
        number,
        label,
        kind,
        oneof,
    })
}

fn parse_enum(p: &mut Parser, file: &mut ProtoFile, scope: &str) -> Result<(), SchemaParseError> {
    let name = p.word("enum name")?;
    let full = qualify(scope, &name);
    p.sym('{')?;
    let mut values = Vec::new();
    loop {
        if p.is_sym('}') {
            p.advance();
            break;
        }
        if p.is_sym(';') {
            p.advance();
            continue;
        }
        if matches!(p.peek_word(), Some("option") | Some("reserved")) {
            p.skip_statement()?;
            continue;
        }
        let value_name = p.word("enum value")?;
        p.sym('=')?;
        let number = p.number("enum number")?;
        p.skip_options()?;
        p.sym(';')?;
        values.push((value_name, number));
    }
    file.enums.insert(full.clone(), ProtoEnum { name: full, values });
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Str(String),
    Sym(char),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Sym(c) => write!(f, "{}", c),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
        } else if c == '"' || c == '\'' {
            i += 1;
            let mut literal = String::new();
            while i < chars.len() && chars[i] != c {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    literal.push(chars[i]);
                    i += 1;
                }
                literal.push(chars[i]);
                i += 1;
            }
            i += 1;
            tokens.push(Token::Str(literal));
        } else if is_word_char(c)
            || (c == '-' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit()))
        {
            let start = i;
            i += 1;
            while i < chars.len() && is_word_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Word(chars[start..i].iter().collect()));
        } else {
            tokens.push(Token::Sym(c));
            i += 1;
        }
    }
    tokens
}

/// Token stream rendered with single spaces, comments dropped.
pub(crate) fn normalize(text: &str) -> String {
    tokenize(text)
        .iter()
        .map(Token::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek() {
            Some(Token::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    fn is_sym(&self, c: char) -> bool {
        self.peek() == Some(&Token::Sym(c))
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> SchemaParseError {
        match self.peek() {
            Some(token) => invalid(format!("expected {}, found {}", expected, token)),
            None => invalid(format!("expected {}, found end of input", expected)),
        }
    }

    fn word(&mut self, expected: &str) -> Result<String, SchemaParseError> {
        if let Some(Token::Word(w)) = self.peek() {
            let w = w.clone();
            self.pos += 1;
            return Ok(w);
        }
        Err(self.unexpected(expected))
    }

    fn string(&mut self, expected: &str) -> Result<String, SchemaParseError> {
        if let Some(Token::Str(s)) = self.peek() {
            let s = s.clone();
            self.pos += 1;
            return Ok(s);
        }
        Err(self.unexpected(expected))
    }

    fn sym(&mut self, c: char) -> Result<(), SchemaParseError> {
        if self.is_sym(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", c)))
        }
    }

    fn number(&mut self, expected: &str) -> Result<i64, SchemaParseError> {
        let text = self.word(expected)?;
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => i64::from_str_radix(hex, 16),
            None => text.parse::<i64>(),
        };
        parsed.map_err(|_| invalid(format!("expected {}, found {}", expected, text)))
    }

    /// Skips to the end of a `;` terminated statement, across `{}` values.
    fn skip_statement(&mut self) -> Result<(), SchemaParseError> {
        let mut depth = 0i32;
        loop {
            match self.advance() {
                None => return Err(invalid("unterminated statement")),
                Some(Token::Sym('{')) => depth += 1,
                Some(Token::Sym('}')) => depth -= 1,
                Some(Token::Sym(';')) if depth <= 0 => return Ok(()),
                _ => {}
            }
        }
    }

    /// Skips a header and its balanced `{ ... }` body.
    fn skip_block(&mut self) -> Result<(), SchemaParseError> {
        loop {
            match self.advance() {
                None => return Err(invalid("unterminated block")),
                Some(Token::Sym('{')) => break,
                _ => {}
            }
        }
        let mut depth = 1;
        while depth > 0 {
            match self.advance() {
                None => return Err(invalid("unterminated block")),
                Some(Token::Sym('{')) => depth += 1,
                Some(Token::Sym('}')) => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// Skips `[ ... ]` field options, if present.
    fn skip_options(&mut self) -> Result<(), SchemaParseError> {
        if !self.is_sym('[') {
            return Ok(());
        }
        let mut depth = 0;
        loop {
            match self.advance() {
                None => return Err(invalid("unterminated field options")),
                Some(Token::Sym('[')) => depth += 1,
                Some(Token::Sym(']')) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }
}

/// Largest field number the wire format allows.
const MAX_TAG: i32 = 536_870_911;

/// Scalars sharing a wire encoding can be read as one another.
fn wire_group(scalar: &str) -> &'static str {
    match scalar {
        "int32" | "uint32" | "int64" | "uint64" | "bool" => "varint",
        "sint32" | "sint64" => "zigzag",
        "fixed32" | "sfixed32" => "fixed32",
        "fixed64" | "sfixed64" => "fixed64",
        "string" | "bytes" => "length-delimited",
        "float" => "float",
        "double" => "double",
        _ => "unknown",
    }
}

pub struct ProtobufComparator;

impl SchemaComparator for ProtobufComparator {
    fn schema_type(&self) -> SchemaType {
        SchemaType::Protobuf
    }

    fn can_read(&self, reader: &ParsedSchema, writer: &ParsedSchema) -> Vec<Incompatibility> {
        let (SchemaBody::Protobuf(r), SchemaBody::Protobuf(w)) = (reader.body(), writer.body()) else {
            return Vec::new();
        };
        let mut walk = Walk {
            reader: r,
            writer: w,
            visited: HashSet::new(),
            found: Vec::new(),
        };
        match (r.root_message(), w.root_message()) {
            (Some(rm), Some(wm)) => walk.compare_messages(rm, wm, ""),
            (None, Some(wm)) => walk.push(
                IncompatibilityKind::TypeMismatch,
                "",
                format!("reader defines no message to read {}", wm.name),
            ),
            (Some(rm), None) => walk.push(
                IncompatibilityKind::TypeMismatch,
                "",
                format!("writer defines no message for {}", rm.name),
            ),
            (None, None) => {}
        }
        walk.found
    }
}

struct Walk<'a> {
    reader: &'a ProtoFile,
    writer: &'a ProtoFile,
    visited: HashSet<(String, String)>,
    found: Vec<Incompatibility>,
}

impl<'a> Walk<'a> {
    fn push(&mut self, kind: IncompatibilityKind, path: &str, message: String) {
        self.found.push(Incompatibility::new(kind, path, message));
    }

    fn compare_messages(&mut self, r: &'a Message, w: &'a Message, path: &str) {
        if !self.visited.insert((r.name.clone(), w.name.clone())) {
            return;
        }
        let fields_path = child_path(path, "fields");

        for wf in &w.fields {
            match r.fields.iter().find(|f| f.number == wf.number) {
                Some(rf) => self.compare_fields(rf, wf, &child_path(&fields_path, &rf.name)),
                None if wf.label == Label::Required => self.push(
                    IncompatibilityKind::FieldRemovedWithoutDefault,
                    &child_path(&fields_path, &wf.name),
                    format!("required field '{}' (tag {}) removed", wf.name, wf.number),
                ),
                None => {}
            }
        }

        self.compare_oneofs(r, w, &fields_path);

        for rf in &r.fields {
            if w.reserves(rf) {
                self.push(
                    IncompatibilityKind::ReservedFieldReused,
                    &child_path(&fields_path, &rf.name),
                    format!("field '{}' (tag {}) reuses a reserved name or tag", rf.name, rf.number),
                );
            }
            if rf.label == Label::Required && !w.fields.iter().any(|f| f.number == rf.number) {
                self.push(
                    IncompatibilityKind::FieldAddedWithoutDefault,
                    &child_path(&fields_path, &rf.name),
                    format!("required field '{}' (tag {}) added", rf.name, rf.number),
                );
            }
        }
    }

    /// Plain writer fields may not join a oneof the writer already had, and
    /// at most one may move into a new oneof.
    fn compare_oneofs(&mut self, r: &Message, w: &Message, fields_path: &str) {
        let mut moved: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for rf in &r.fields {
            let Some(oneof) = rf.oneof.as_deref() else {
                continue;
            };
            let Some(wf) = w.fields.iter().find(|f| f.number == rf.number) else {
                continue;
            };
            if wf.oneof.is_some() {
                continue;
            }
            if w.has_oneof(oneof) {
                self.push(
                    IncompatibilityKind::OneofChanged,
                    &child_path(fields_path, &rf.name),
                    format!("field '{}' moved into existing oneof {}", rf.name, oneof),
                );
            } else {
                moved.entry(oneof).or_default().push(rf.name.as_str());
            }
        }
        for (oneof, names) in moved.into_iter().filter(|(_, names)| names.len() > 1) {
            self.push(
                IncompatibilityKind::OneofChanged,
                &child_path(fields_path, oneof),
                format!("fields {} moved into new oneof {}", names.join(", "), oneof),
            );
        }
    }

    fn compare_fields(&mut self, rf: &'a ProtoField, wf: &'a ProtoField, path: &str) {
        if (rf.label == Label::Repeated) != (wf.label == Label::Repeated) {
            self.push(
                IncompatibilityKind::LabelChanged,
                path,
                format!("field '{}' changed between repeated and singular", rf.name),
            );
            return;
        }
        if rf.label == Label::Required && wf.label != Label::Required {
            self.push(
                IncompatibilityKind::LabelChanged,
                path,
                format!("field '{}' became required", rf.name),
            );
        }
        self.compare_types(&rf.kind, &wf.kind, path);
    }

    fn compare_types(&mut self, r: &'a FieldType, w: &'a FieldType, path: &str) {
        let (reader, writer) = (self.reader, self.writer);
        match (r, w) {
            (FieldType::Scalar(a), FieldType::Scalar(b)) => {
                if wire_group(a) != wire_group(b) {
                    self.type_mismatch(path, r, w);
                }
            }
            (FieldType::Map(rk, rv), FieldType::Map(wk, wv)) => {
                self.compare_types(rk, wk, &child_path(path, "key"));
                self.compare_types(rv, wv, &child_path(path, "value"));
            }
            (FieldType::Named(a), FieldType::Named(b)) => match (reader.lookup(a), writer.lookup(b)) {
                (Some(Definition::Message(rm)), Some(Definition::Message(wm))) => {
                    self.compare_messages(rm, wm, path)
                }
                (Some(Definition::Enum(re)), Some(Definition::Enum(we))) => {
                    self.compare_enums(re, we, path)
                }
                // types from imports outside the registry match by name
                (None, None) if short_name(a) == short_name(b) => {}
                _ => self.type_mismatch(path, r, w),
            },
            (FieldType::Named(a), FieldType::Scalar(s)) => {
                if !(matches!(reader.lookup(a), Some(Definition::Enum(_))) && wire_group(s) == "varint") {
                    self.type_mismatch(path, r, w);
                }
            }
            (FieldType::Scalar(s), FieldType::Named(b)) => {
                if !(matches!(writer.lookup(b), Some(Definition::Enum(_))) && wire_group(s) == "varint") {
                    self.type_mismatch(path, r, w);
                }
            }
            _ => self.type_mismatch(path, r, w),
        }
    }

    fn compare_enums(&mut self, r: &ProtoEnum, w: &ProtoEnum, path: &str) {
        // proto3 enums are open: unknown numbers are preserved
        if self.reader.syntax == Syntax::Proto3 {
            return;
        }
        for (name, number) in &w.values {
            if !r.values.iter().any(|(_, n)| n == number) {
                self.push(
                    IncompatibilityKind::EnumSymbolRemoved,
                    path,
                    format!("enum {} lacks value {} = {}", r.name, name, number),
                );
            }
        }
    }

    fn type_mismatch(&mut self, path: &str, r: &FieldType, w: &FieldType) {
        self.push(
            IncompatibilityKind::TypeMismatch,
            path,
            format!("{} cannot be read as {}", w.describe(), r.describe()),
        );
    }
}
