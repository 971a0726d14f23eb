//! Purpose: Typed schema model and the header-line codec that persists it.
//! Exports: `FeatureType`, `Attribute`, `ValueKind`, `Crs`, `decode_header`, `encode_header`,
//!          `read_schema`, `parse_header_line`.
//! Role: Defines on-disk column order and value kinds for every record in a store file.
//! Invariants: Attribute names are unique; order is stable and equals column order.
//! Invariants: At most one attribute is the default geometry (the first geometry column).
use std::collections::HashSet;
use std::fmt;
use std::io::{BufRead, Cursor};

use crate::core::error::{Error, ErrorKind};
use crate::core::tokenize::{Field, LineTokenizer, escape_field};

const KNOWN_AUTHORITIES: &[&str] = &["EPSG", "CRS", "OGC", "ESRI", "IGNF", "IAU"];

/// Coordinate reference system identifier such as `EPSG:4326`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Crs {
    authority: String,
    code: String,
}

impl Crs {
    pub fn epsg(code: u32) -> Self {
        Self {
            authority: "EPSG".to_string(),
            code: code.to_string(),
        }
    }

    /// Resolves `AUTHORITY:CODE` or `urn:ogc:def:crs:AUTHORITY:[version]:CODE`.
    /// Returns `None` for unknown authorities or malformed codes.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let is_urn = text
            .get(..4)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("urn:"));
        let (authority, code) = if is_urn {
            let parts: Vec<&str> = text.split(':').collect();
            if parts.len() < 6
                || !parts[1].eq_ignore_ascii_case("ogc")
                || !parts[2].eq_ignore_ascii_case("def")
                || !parts[3].eq_ignore_ascii_case("crs")
            {
                return None;
            }
            (parts[4], parts[parts.len() - 1])
        } else {
            text.split_once(':')?
        };

        let authority = authority.trim().to_ascii_uppercase();
        let code = code.trim();
        if !KNOWN_AUTHORITIES.contains(&authority.as_str()) || code.is_empty() {
            return None;
        }
        let valid_code = if authority == "EPSG" {
            code.chars().all(|c| c.is_ascii_digit())
        } else {
            code.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        };
        if !valid_code {
            return None;
        }
        Some(Self {
            authority,
            code: code.to_string(),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn identifier(&self) -> String {
        format!("{}:{}", self.authority, self.code)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.authority, self.code)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValueKind {
    Integer,
    Float,
    Double,
    String,
    Date,
    Boolean,
    Geometry(Crs),
}

impl ValueKind {
    /// Token written between the parentheses of a header column.
    pub fn type_token(&self) -> String {
        match self {
            ValueKind::Integer => "Integer".to_string(),
            ValueKind::Float => "Float".to_string(),
            ValueKind::Double => "Double".to_string(),
            ValueKind::String => "String".to_string(),
            ValueKind::Date => "Date".to_string(),
            ValueKind::Boolean => "boolean".to_string(),
            ValueKind::Geometry(crs) => crs.identifier(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Integer => "Integer",
            ValueKind::Float => "Float",
            ValueKind::Double => "Double",
            ValueKind::String => "String",
            ValueKind::Date => "Date",
            ValueKind::Boolean => "Boolean",
            ValueKind::Geometry(_) => "Geometry",
        }
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self, ValueKind::Geometry(_))
    }

    fn from_alias(token: &str) -> Option<Self> {
        let token = token.trim();
        [
            ("Integer", ValueKind::Integer),
            ("Float", ValueKind::Float),
            ("Double", ValueKind::Double),
            ("String", ValueKind::String),
            ("Date", ValueKind::Date),
            ("boolean", ValueKind::Boolean),
        ]
        .into_iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(token))
        .map(|(_, kind)| kind)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Geometry(crs) => write!(f, "Geometry({crs})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub kind: ValueKind,
}

impl Attribute {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered schema of a store. The identifier attribute is implicit and carried by
/// each feature's id rather than by a column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeatureType {
    name: String,
    attributes: Vec<Attribute>,
    default_geometry: Option<usize>,
}

impl FeatureType {
    pub const IDENTIFIER: &'static str = "@id";

    pub fn new(name: impl Into<String>, attributes: Vec<Attribute>) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        for attribute in &attributes {
            if attribute.name.is_empty() {
                return Err(Error::new(ErrorKind::Usage).with_message("attribute name is empty"));
            }
            if attribute.name == Self::IDENTIFIER {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("attribute name is reserved for the identifier")
                    .with_attribute(&attribute.name));
            }
            if !seen.insert(attribute.name.as_str()) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("duplicate attribute name")
                    .with_attribute(&attribute.name));
            }
        }
        let default_geometry = attributes.iter().position(|a| a.kind.is_geometry());
        Ok(Self {
            name: name.into(),
            attributes,
            default_geometry,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.index_of(name).map(|index| &self.attributes[index])
    }

    pub fn default_geometry_index(&self) -> Option<usize> {
        self.default_geometry
    }

    pub fn default_geometry(&self) -> Option<&Attribute> {
        self.default_geometry.map(|index| &self.attributes[index])
    }

    /// Same columns in the same order; the type name is not compared.
    pub fn same_columns(&self, other: &FeatureType) -> bool {
        self.attributes == other.attributes
    }
}

/// Builds a schema from the tokens of a header line.
pub fn decode_header(name: &str, fields: &[Field]) -> Result<FeatureType, Error> {
    let mut unnamed = 0usize;
    let mut attributes = Vec::with_capacity(fields.len());
    for field in fields {
        let (raw_name, type_token) = split_column(&field.text);
        let column = if raw_name.is_empty() {
            let generated = format!("unnamed{unnamed}");
            unnamed += 1;
            generated
        } else {
            raw_name.to_string()
        };
        attributes.push(Attribute::new(column, resolve_kind(type_token)));
    }

    FeatureType::new(name, attributes).map_err(|err| {
        let mut mapped = Error::new(ErrorKind::Corrupt).with_message("invalid header");
        if let Some(attribute) = err.attribute() {
            mapped = mapped.with_attribute(attribute);
        }
        mapped.with_source(err)
    })
}

fn split_column(text: &str) -> (&str, Option<&str>) {
    let text = text.trim();
    match text.strip_suffix(')') {
        Some(stripped) => match stripped.rfind('(') {
            Some(open) => (stripped[..open].trim(), Some(&stripped[open + 1..])),
            None => (text, None),
        },
        None => (text, None),
    }
}

fn resolve_kind(type_token: Option<&str>) -> ValueKind {
    let Some(token) = type_token else {
        return ValueKind::String;
    };
    if let Some(kind) = ValueKind::from_alias(token) {
        return kind;
    }
    if !token.contains(':') {
        return ValueKind::String;
    }
    Crs::parse(token)
        .map(ValueKind::Geometry)
        .unwrap_or(ValueKind::String)
}

/// Reads the first usable record as the header. `Ok(None)` means the store is uninitialized.
pub fn read_schema<R: BufRead>(
    tokenizer: &mut LineTokenizer<R>,
    name: &str,
) -> Result<Option<FeatureType>, Error> {
    let Some(fields) = tokenizer.next_record().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read header")
            .with_source(err)
    })?
    else {
        return Ok(None);
    };
    decode_header(name, &fields)
        .map(Some)
        .map_err(|err| err.with_line(tokenizer.line()))
}

/// Parses a header supplied as text, e.g. `name(String);geom(EPSG:4326)`.
pub fn parse_header_line(name: &str, text: &str, separator: char) -> Result<FeatureType, Error> {
    let mut tokenizer = LineTokenizer::new(Cursor::new(text), separator);
    // Caller-supplied text, so malformed headers are usage errors rather than corruption.
    let parsed = read_schema(&mut tokenizer, name).map_err(|err| {
        let message = err.message().unwrap_or("invalid header").to_string();
        Error::new(ErrorKind::Usage).with_message(message)
    })?;
    parsed.ok_or_else(|| Error::new(ErrorKind::Usage).with_message("header is empty"))
}

/// Header line (without line terminator) for `feature_type`.
pub fn encode_header(feature_type: &FeatureType, separator: char) -> String {
    let mut out = String::new();
    for (index, attribute) in feature_type.attributes().iter().enumerate() {
        if index > 0 {
            out.push(separator);
        }
        let column = format!("{}({})", attribute.name, attribute.kind.type_token());
        out.push_str(&escape_field(&column, separator));
    }
    out
}
