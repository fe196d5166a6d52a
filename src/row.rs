//! Row codec (spec §4.1) and the schema types it binds.
//!
//! A row is always written against the *latest* schema version for its
//! tag/edge (invariant 2) but must remain readable under whichever
//! version it was written with (invariant 1): the encoded row embeds
//! its schema version id, and `RowReader` picks the matching version
//! out of the ordered schema list, never assuming it's the last one.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::value::{FieldType, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ftype: FieldType,
    pub nullable: bool,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TtlSpec {
    pub field: String,
    pub duration_secs: u64,
}

/// One version of a tag's or edge type's schema. Field layout is
/// append-only across versions (invariant 2): later versions may add
/// fields, or mark earlier ones dropped/renamed, but this crate treats
/// each version's field list as authoritative for rows written at
/// that version.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaVersion {
    pub version: u32,
    pub fields: Vec<Field>,
    pub ttl: Option<TtlSpec>,
}

impl SchemaVersion {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Schema list ordered by version, newest last (spec §3 "Tag").
pub type SchemaList = Vec<SchemaVersion>;

pub fn latest(schemas: &SchemaList) -> Option<&SchemaVersion> {
    schemas.last()
}

fn encode_value(v: &Value, out: &mut Vec<u8>) {
    match v {
        Value::Null => out.push(0),
        Value::Bool(b) => {
            out.push(1);
            out.push(if *b { 1 } else { 0 });
        }
        Value::Int(i) => {
            out.push(2);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Value::Float(f) => {
            out.push(3);
            out.extend_from_slice(&f.to_be_bytes());
        }
        Value::String(s) => {
            out.push(4);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::List(_) => unreachable!("row fields are scalar"),
    }
}

fn decode_value(buf: &[u8], off: &mut usize) -> Result<Value> {
    let tag = *buf
        .get(*off)
        .ok_or_else(|| Error::InvalidData("truncated row".into()))?;
    *off += 1;
    Ok(match tag {
        0 => Value::Null,
        1 => {
            let b = buf[*off];
            *off += 1;
            Value::Bool(b != 0)
        }
        2 => {
            let mut a = [0u8; 8];
            a.copy_from_slice(&buf[*off..*off + 8]);
            *off += 8;
            Value::Int(i64::from_be_bytes(a))
        }
        3 => {
            let mut a = [0u8; 8];
            a.copy_from_slice(&buf[*off..*off + 8]);
            *off += 8;
            Value::Float(f64::from_be_bytes(a))
        }
        4 => {
            let mut a = [0u8; 4];
            a.copy_from_slice(&buf[*off..*off + 4]);
            *off += 4;
            let len = u32::from_be_bytes(a) as usize;
            let s = String::from_utf8_lossy(&buf[*off..*off + len]).into_owned();
            *off += len;
            Value::String(s)
        }
        other => return Err(Error::InvalidData(format!("unknown value tag {}", other))),
    })
}

/// Reads typed properties out of row bytes, bound to the schema
/// version the bytes were written with (spec §4.1 row-codec contract).
pub struct RowReader<'a> {
    version: &'a SchemaVersion,
    latest: &'a SchemaVersion,
    values: HashMap<String, Value>,
}

impl<'a> RowReader<'a> {
    /// Selects the schema version matching the row's embedded version
    /// id; `Error::InvalidData` if none decodes it (invariant 1).
    pub fn bind(schemas: &'a SchemaList, bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::InvalidData("row too short".into()));
        }
        let mut ver_bytes = [0u8; 4];
        ver_bytes.copy_from_slice(&bytes[0..4]);
        let version_id = u32::from_be_bytes(ver_bytes);
        let version = schemas
            .iter()
            .find(|s| s.version == version_id)
            .ok_or_else(|| Error::InvalidData(format!("no schema version {} decodes this row", version_id)))?;
        let latest_version = latest(schemas).ok_or_else(|| Error::InvalidData("empty schema list".into()))?;

        let mut off = 4;
        let mut values = HashMap::new();
        for field in &version.fields {
            let v = decode_value(bytes, &mut off)?;
            values.insert(field.name.clone(), v);
        }
        Ok(RowReader { version, latest: latest_version, values })
    }

    pub fn version(&self) -> u32 {
        self.version.version
    }

    /// Reads a field by name. Fields beyond the row's own version
    /// fall back to the latest schema's default/null (spec §4.1).
    pub fn get(&self, name: &str) -> Result<Value> {
        if let Some(v) = self.values.get(name) {
            return Ok(v.clone());
        }
        let field = self
            .latest
            .field(name)
            .ok_or_else(|| Error::TagPropNotFound(name.to_string()))?;
        Ok(field.default.clone().unwrap_or(Value::Null))
    }

    /// Evaluates TTL against `now`: `true` if the row is expired and
    /// must be filtered from any read (spec §8 TTL property).
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        let ttl = match &self.latest.ttl {
            Some(t) => t,
            None => return false,
        };
        match self.get(&ttl.field) {
            Ok(Value::Int(written_at)) if written_at >= 0 => {
                (written_at as u64) + ttl.duration_secs <= now_secs
            }
            _ => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        self.is_expired_at(now)
    }
}

/// Builds a new row against the *latest* schema version (invariant 2).
#[derive(Default)]
pub struct RowWriter {
    assigned: HashMap<String, Value>,
}

impl RowWriter {
    pub fn new() -> Self {
        RowWriter { assigned: HashMap::new() }
    }

    pub fn set(&mut self, name: &str, v: Value) {
        self.assigned.insert(name.to_string(), v);
    }

    pub fn get_working(&self, name: &str) -> Option<&Value> {
        self.assigned.get(name)
    }

    /// Serializes against `schema`'s latest version, validating each
    /// field's declared type and resolving defaults/null for anything
    /// left unassigned. `E_INVALID_FIELD_VALUE` on type mismatch,
    /// `FIXED_STRING` overflow, or a missing required field.
    pub fn encode(&self, schema: &SchemaVersion) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&schema.version.to_be_bytes());
        for field in &schema.fields {
            let v = match self.assigned.get(&field.name) {
                Some(v) => v.clone(),
                None => match &field.default {
                    Some(d) => d.clone(),
                    None if field.nullable => Value::Null,
                    None => {
                        return Err(Error::InvalidFieldValue(format!(
                            "field {:?} is required, non-nullable, and has no default",
                            field.name
                        )))
                    }
                },
            };
            field.ftype.validate(&v)?;
            if !field.nullable && v.is_null() {
                return Err(Error::InvalidFieldValue(format!("field {:?} may not be null", field.name)));
            }
            encode_value(&v, &mut out);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_v0() -> SchemaVersion {
        SchemaVersion {
            version: 0,
            fields: vec![Field { name: "a".into(), ftype: FieldType::Int, nullable: true, default: None }],
            ttl: None,
        }
    }

    fn schema_v1() -> SchemaVersion {
        SchemaVersion {
            version: 1,
            fields: vec![
                Field { name: "a".into(), ftype: FieldType::Int, nullable: true, default: None },
                Field { name: "b".into(), ftype: FieldType::String, nullable: true, default: Some(Value::String("?".into())) },
            ],
            ttl: None,
        }
    }

    #[test]
    fn round_trip_latest_schema() {
        let schemas = vec![schema_v0(), schema_v1()];
        let mut w = RowWriter::new();
        w.set("a", Value::Int(7));
        w.set("b", Value::String("hi".into()));
        let bytes = w.encode(schema_v1_ref(&schemas)).unwrap();
        let r = RowReader::bind(&schemas, &bytes).unwrap();
        assert_eq!(r.get("a").unwrap(), Value::Int(7));
        assert_eq!(r.get("b").unwrap(), Value::String("hi".into()));
    }

    fn schema_v1_ref(schemas: &SchemaList) -> &SchemaVersion {
        latest(schemas).unwrap()
    }

    #[test]
    fn old_version_row_falls_back_to_latest_default_for_new_field() {
        let schemas = vec![schema_v0(), schema_v1()];
        let mut w = RowWriter::new();
        w.set("a", Value::Int(3));
        // encode against v0 directly to simulate a row written before v1 existed
        let bytes = w.encode(&schemas[0]).unwrap();
        let r = RowReader::bind(&schemas, &bytes).unwrap();
        assert_eq!(r.get("a").unwrap(), Value::Int(3));
        assert_eq!(r.get("b").unwrap(), Value::String("?".into()));
    }

    #[test]
    fn fixed_string_overflow_rejected() {
        let schema = SchemaVersion {
            version: 0,
            fields: vec![Field { name: "s".into(), ftype: FieldType::FixedString(2), nullable: true, default: None }],
            ttl: None,
        };
        let mut w = RowWriter::new();
        w.set("s", Value::String("abc".into()));
        assert_eq!(w.encode(&schema), Err(Error::InvalidFieldValue(
            "string of length 3 overflows FIXED_STRING(2)".into()
        )));
    }

    #[test]
    fn missing_required_field_rejected() {
        let schema = SchemaVersion {
            version: 0,
            fields: vec![Field { name: "c".into(), ftype: FieldType::String, nullable: false, default: None }],
            ttl: None,
        };
        let w = RowWriter::new();
        assert!(w.encode(&schema).is_err());
    }

    #[test]
    fn ttl_expiry() {
        let schema = SchemaVersion {
            version: 0,
            fields: vec![Field { name: "ts".into(), ftype: FieldType::Int, nullable: false, default: None }],
            ttl: Some(TtlSpec { field: "ts".into(), duration_secs: 100 }),
        };
        let schemas = vec![schema.clone()];
        let mut w = RowWriter::new();
        w.set("ts", Value::Int(1000));
        let bytes = w.encode(&schema).unwrap();
        let r = RowReader::bind(&schemas, &bytes).unwrap();
        assert!(!r.is_expired_at(1050));
        assert!(r.is_expired_at(1200));
    }
}
