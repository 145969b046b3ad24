//! NERDm record model: schema identifiers, component kinds, default
//! per-path records, and the overlay merge.

use serde_json::{json, Map, Value};
use thiserror::Error;

pub const NERDM_SCHEMA_BASE: &str = "https://data.nist.gov/od/dm/nerdm-schema/";
pub const NERDM_SCHEMA_ID: &str = "https://data.nist.gov/od/dm/nerdm-schema/v0.2#";
pub const NERDMPUB_SCHEMA_ID: &str = "https://data.nist.gov/od/dm/nerdm-schema/pub/v0.2#";
pub const NERDPUB_DEF: &str = "https://data.nist.gov/od/dm/nerdm-schema/pub/v0.2#/definitions/";

pub const DATAFILE_TYPE: &str = "nrdp:DataFile";
pub const CHECKSUMFILE_TYPE: &str = "nrdp:ChecksumFile";
pub const SUBCOLL_TYPE: &str = "nrdp:Subcollection";
pub const ACCESSPAGE_TYPE: &str = "nrdp:AccessPage";
pub const DOWNLOADABLE_TYPE: &str = "nrdp:DownloadableFile";
pub const DISTRIBUTION_TYPE: &str = "dcat:Distribution";
pub const RESOURCE_TYPE: &str = "nrdp:PublicDataResource";

/// Prefix of every component `@id`.
pub const COMPONENT_ID_PREFIX: &str = "cmps/";

#[derive(Debug, Error)]
pub enum NerdError {
    #[error("type error in {context}: expected {expected}, found {found}")]
    Type {
        expected: String,
        found: String,
        context: String,
    },
    #[error("schema error: {0}")]
    Schema(String),
}

impl NerdError {
    pub fn type_error(expected: &str, found: &Value, context: &str) -> Self {
        NerdError::Type {
            expected: expected.to_owned(),
            found: describe_value(found),
            context: context.to_owned(),
        }
    }
}

fn describe_value(v: &Value) -> String {
    match v {
        Value::Null => "null".to_owned(),
        Value::Bool(_) => "boolean".to_owned(),
        Value::Number(_) => "number".to_owned(),
        Value::String(s) => format!("string '{s}'"),
        Value::Array(_) => "list".to_owned(),
        Value::Object(_) => "object".to_owned(),
    }
}

/// Kind of a record component, decided once from its `@type` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    DataFile,
    ChecksumFile,
    Subcollection,
    Other,
}

impl ComponentKind {
    /// Classify a component from its `@type` markers. A checksum file
    /// wins over a plain data file, and a sub-collection over both.
    pub fn from_types<'a, I>(types: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut kind = ComponentKind::Other;
        for t in types {
            match t {
                SUBCOLL_TYPE => return ComponentKind::Subcollection,
                CHECKSUMFILE_TYPE => kind = ComponentKind::ChecksumFile,
                DATAFILE_TYPE if kind == ComponentKind::Other => kind = ComponentKind::DataFile,
                _ => {}
            }
        }
        kind
    }

    /// Classify a component object. A missing `@type` is `Other`; a
    /// non-list `@type` is a type error.
    pub fn of(component: &Value) -> Result<Self, NerdError> {
        match component.get("@type") {
            None => Ok(ComponentKind::Other),
            Some(Value::Array(types)) => {
                Ok(Self::from_types(types.iter().filter_map(Value::as_str)))
            }
            Some(other) => Err(NerdError::type_error("list", other, "@type")),
        }
    }

    /// True for components that carry a payload file.
    pub fn is_file(self) -> bool {
        matches!(self, ComponentKind::DataFile | ComponentKind::ChecksumFile)
    }

    /// Kinds that are split out of the resource record into per-path files.
    pub fn is_split(self) -> bool {
        self != ComponentKind::Other
    }
}

pub fn component_id(path: &str) -> String {
    format!("{COMPONENT_ID_PREFIX}{path}")
}

/// Default metadata for a data file at `path`.
pub fn init_file_metadata(path: &str) -> Value {
    json!({
        "@id": component_id(path),
        "@type": [DATAFILE_TYPE],
        "filepath": path,
        "_extensionSchemas": [format!("{NERDPUB_DEF}DataFile")],
    })
}

/// Default metadata for a sub-collection at `path`.
pub fn init_coll_metadata(path: &str) -> Value {
    json!({
        "@id": component_id(path),
        "@type": [SUBCOLL_TYPE],
        "filepath": path,
        "_extensionSchemas": [format!("{NERDPUB_DEF}Subcollection")],
    })
}

/// Default whole-resource record for an object that has no prior history.
pub fn init_resource_record(id: &str, version: &str) -> Value {
    json!({
        "_schema": NERDM_SCHEMA_ID,
        "_extensionSchemas": [format!("{NERDPUB_DEF}PublicDataResource")],
        "@id": id,
        "@type": [RESOURCE_TYPE],
        "version": version,
        "components": [],
    })
}

/// Borrow the `@type` list of a record, or fail if it is present but not a list.
pub fn type_list<'a>(md: &'a Value, context: &str) -> Result<Option<&'a Vec<Value>>, NerdError> {
    match md.get("@type") {
        None => Ok(None),
        Some(Value::Array(types)) => Ok(Some(types)),
        Some(other) => Err(NerdError::type_error("list", other, context)),
    }
}

/// Append `marker` to the record's `@type` list if it is not already there.
pub fn ensure_type_marker(md: &mut Map<String, Value>, marker: &str) -> Result<(), NerdError> {
    let types = md
        .entry("@type")
        .or_insert_with(|| Value::Array(Vec::new()));
    match types {
        Value::Array(list) => {
            if !list.iter().any(|t| t.as_str() == Some(marker)) {
                list.push(Value::String(marker.to_owned()));
            }
            Ok(())
        }
        other => Err(NerdError::type_error("list", other, "@type")),
    }
}

/// Deep-merge `overlay` into `base`: objects merge key by key, any other
/// overlay value replaces the base value.
pub fn merge_into(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(k) {
                    Some(existing) if existing.is_object() && v.is_object() => {
                        merge_into(existing, v);
                    }
                    _ => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (b, o) => *b = o.clone(),
    }
}

/// The effective view of a record: the annotation overlay applied on top of
/// the base metadata. Neither input is mutated.
pub fn effective_view(base: &Value, annot: Option<&Value>) -> Value {
    let mut out = base.clone();
    if let Some(a) = annot {
        merge_into(&mut out, a);
    }
    out
}

/// Check that a resource record declares the expected schema.
pub fn check_schema(record: &Value) -> Result<(), NerdError> {
    match record.get("_schema").and_then(Value::as_str) {
        Some(s) if s == NERDM_SCHEMA_ID => Ok(()),
        Some(s) => Err(NerdError::Schema(format!(
            "record declares schema '{s}', expected '{NERDM_SCHEMA_ID}'"
        ))),
        None => Err(NerdError::Schema("record has no _schema".to_owned())),
    }
}
