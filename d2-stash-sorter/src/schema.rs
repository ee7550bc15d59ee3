//! Declarative binary-schema engine.
//!
//! A [`BinarySchema`] is an ordered list of named fields. The same
//! definition drives both directions: [`BinarySchema::decode`] walks the
//! fields left-to-right over a bit cursor, [`BinarySchema::encode`] walks
//! them left-to-right over a decoded record. Fields can be conditionally
//! present, repeated a (possibly field-dependent) number of times, and
//! nested; conditions and counts may reference the enclosing record
//! through an explicit scope chain.
//!
//! # Core Types
//!
//! - [`BinarySchema`]: ordered field list, the unit of composition
//! - [`SchemaField`]: one field with its codec, condition and count
//! - [`Value`] / [`Record`]: the dynamic decoded representation
//! - [`Condition`] / [`Count`]: declarative presence and repetition rules
//!
//! # Round-trip contract
//!
//! For every record `R` a schema produced by decoding, encoding `R`
//! yields exactly the bits decode consumed: conditions and counts
//! re-evaluate identically from the same record, opaque runs re-emit
//! verbatim, and any residue past the last field is kept under
//! [`UNPARSED_FIELD`] and appended unchanged.

use crate::bitbuf::{BitBuf, Bits};
use crate::codec::Primitive;
use crate::diagnostics::Diagnostics;
use crate::items::{self, Capability};
use crate::props::{PropList, PropListCodec};
use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{trace, warn};

/// Reserved field name for bits past the end of the schema.
pub const UNPARSED_FIELD: &str = "__unparsed";

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(u64),
    Bits(BitBuf),
    Str(String),
    Record(Record),
    List(Vec<Value>),
    Props(PropList),
}

/// A decoded record: field order matches declaration order, which is what
/// encode walks.
pub type Record = IndexMap<String, Value>;

impl Value {
    /// Truthiness for condition evaluation: zero integers and empty
    /// strings/runs/lists are falsy, everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(v) => *v != 0,
            Value::Bits(bits) => !bits.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Record(record) => !record.is_empty(),
            Value::List(values) => !values.is_empty(),
            Value::Props(list) => !list.properties.is_empty(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "an integer",
            Value::Bits(_) => "a bit run",
            Value::Str(_) => "a string",
            Value::Record(_) => "a record",
            Value::List(_) => "a list",
            Value::Props(_) => "a property list",
        }
    }

    pub fn as_int(&self, field: &str) -> Result<u64, SchemaError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(SchemaError::mismatch(field, "an integer", other)),
        }
    }

    pub fn as_bits(&self, field: &str) -> Result<&Bits, SchemaError> {
        match self {
            Value::Bits(bits) => Ok(bits),
            other => Err(SchemaError::mismatch(field, "a bit run", other)),
        }
    }

    pub fn as_str(&self, field: &str) -> Result<&str, SchemaError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(SchemaError::mismatch(field, "a string", other)),
        }
    }

    pub fn as_record(&self, field: &str) -> Result<&Record, SchemaError> {
        match self {
            Value::Record(record) => Ok(record),
            other => Err(SchemaError::mismatch(field, "a record", other)),
        }
    }

    pub fn as_record_mut(&mut self, field: &str) -> Result<&mut Record, SchemaError> {
        match self {
            Value::Record(record) => Ok(record),
            other => Err(SchemaError::mismatch(field, "a record", &other.clone())),
        }
    }

    pub fn as_list(&self, field: &str) -> Result<&[Value], SchemaError> {
        match self {
            Value::List(values) => Ok(values),
            other => Err(SchemaError::mismatch(field, "a list", other)),
        }
    }

    pub fn as_props(&self, field: &str) -> Result<&PropList, SchemaError> {
        match self {
            Value::Props(list) => Ok(list),
            other => Err(SchemaError::mismatch(field, "a property list", other)),
        }
    }
}

/// Follows a chain of record fields (`record.a.b.c`). `None` as soon as a
/// link is absent or not a record.
pub fn get_path<'r>(record: &'r Record, path: &[&str]) -> Option<&'r Value> {
    let (first, rest) = path.split_first()?;
    let mut value = record.get(*first)?;
    for segment in rest {
        match value {
            Value::Record(inner) => value = inner.get(*segment)?,
            _ => return None,
        }
    }
    Some(value)
}

/// One link of the decode/encode scope chain. Nested schemas see their
/// ancestors through `parent`.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub record: &'a Record,
    pub parent: Option<&'a Scope<'a>>,
}

/// Presence rule for a field.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Field is always present.
    Always,
    /// Present iff the named sibling is bound and truthy.
    IfField(&'static str),
    /// Present iff the named sibling is absent or falsy.
    UnlessField(&'static str),
    /// Present iff the named sibling equals the given integer.
    IfFieldEq(&'static str, u64),
    /// Present iff the named field of the enclosing record is truthy.
    /// Requires an enclosing scope.
    IfParentField(&'static str),
    /// Present iff the path, resolved against the enclosing record,
    /// equals the given integer.
    IfParentPathEq(&'static [&'static str], u64),
    /// Present iff the enclosing record's `item_type` has the given
    /// capability in the metadata tables.
    IfParentItemTypeHas(Capability),
}

impl Condition {
    fn evaluate(
        &self,
        record: &Record,
        parent: Option<&Scope<'_>>,
        field: &str,
    ) -> Result<bool, SchemaError> {
        let parent_record = |reference: &str| {
            parent.map(|scope| scope.record).ok_or_else(|| {
                SchemaError::UnresolvedReference {
                    field: field.to_string(),
                    reference: reference.to_string(),
                }
            })
        };

        match self {
            Condition::Always => Ok(true),
            Condition::IfField(name) => {
                Ok(record.get(*name).map(Value::is_truthy).unwrap_or(false))
            }
            Condition::UnlessField(name) => {
                Ok(!record.get(*name).map(Value::is_truthy).unwrap_or(false))
            }
            Condition::IfFieldEq(name, expected) => {
                Ok(matches!(record.get(*name), Some(Value::Int(v)) if v == expected))
            }
            Condition::IfParentField(name) => Ok(parent_record(name)?
                .get(*name)
                .map(Value::is_truthy)
                .unwrap_or(false)),
            Condition::IfParentPathEq(path, expected) => {
                let root = parent_record(&path.join("."))?;
                Ok(matches!(get_path(root, path), Some(Value::Int(v)) if v == expected))
            }
            Condition::IfParentItemTypeHas(capability) => {
                let root = parent_record("item_type")?;
                let code = root
                    .get("item_type")
                    .ok_or_else(|| SchemaError::UnresolvedReference {
                        field: field.to_string(),
                        reference: "item_type".to_string(),
                    })?
                    .as_str("item_type")?;
                Ok(items::type_has(code, *capability))
            }
        }
    }
}

/// Repetition rule for a field.
#[derive(Debug, Clone)]
pub enum Count {
    /// Plain scalar field.
    One,
    /// Exactly `n` elements.
    Fixed(usize),
    /// As many elements as the named sibling integer says. The sibling
    /// must already be bound.
    FromField(&'static str),
    /// As many elements as the integer at the given sibling path;
    /// a missing link anywhere along the path means zero elements.
    FromPath(&'static [&'static str]),
}

impl Count {
    /// `None` means scalar; `Some(n)` means a list of `n` elements.
    fn resolve(&self, record: &Record, field: &str) -> Result<Option<usize>, SchemaError> {
        match self {
            Count::One => Ok(None),
            Count::Fixed(n) => Ok(Some(*n)),
            Count::FromField(name) => {
                let value = record
                    .get(*name)
                    .ok_or_else(|| SchemaError::UnresolvedReference {
                        field: field.to_string(),
                        reference: name.to_string(),
                    })?;
                Ok(Some(value.as_int(name)? as usize))
            }
            Count::FromPath(path) => match get_path(record, path) {
                Some(value) => Ok(Some(value.as_int(&path.join("."))? as usize)),
                None => Ok(Some(0)),
            },
        }
    }
}

/// What a field holds.
#[derive(Debug, Clone)]
pub enum FieldType {
    /// An opaque run of bits, round-tripped verbatim.
    Opaque(usize),
    /// A primitive codec.
    Codec(Primitive),
    /// A nested schema.
    Record(Arc<BinarySchema>),
    /// A game property list.
    Props(PropListCodec),
}

/// One named field of a schema.
#[derive(Debug, Clone)]
pub struct SchemaField {
    pub name: &'static str,
    pub ty: FieldType,
    pub condition: Condition,
    pub count: Count,
}

impl SchemaField {
    pub fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            condition: Condition::Always,
            count: Count::One,
        }
    }

    pub fn int(name: &'static str, width: usize) -> Self {
        Self::new(name, FieldType::Codec(Primitive::integer(width)))
    }

    pub fn opaque(name: &'static str, width: usize) -> Self {
        Self::new(name, FieldType::Opaque(width))
    }

    pub fn chars(name: &'static str, count: usize) -> Self {
        Self::new(name, FieldType::Codec(Primitive::chars(count)))
    }

    pub fn nested(name: &'static str, schema: Arc<BinarySchema>) -> Self {
        Self::new(name, FieldType::Record(schema))
    }

    pub fn props(name: &'static str, codec: PropListCodec) -> Self {
        Self::new(name, FieldType::Props(codec))
    }

    /// Restricts the field's presence to the given condition.
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Turns the field into a list with the given repetition rule.
    pub fn repeated(mut self, count: Count) -> Self {
        self.count = count;
        self
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("ran out of data while decoding field '{field}'")]
    Truncated { field: String },

    #[error("value {value} does not fit in {width} bits for field '{field}'")]
    Overflow {
        field: String,
        value: i64,
        width: usize,
    },

    #[error("string for field '{field}' has {len} chars, at most {max} fit")]
    StringTooLong {
        field: String,
        len: usize,
        max: usize,
    },

    #[error("field '{0}' is required for encoding but missing")]
    MissingField(String),

    #[error("condition or count for field '{field}' references '{reference}', which is not in scope")]
    UnresolvedReference { field: String, reference: String },

    #[error("field '{field}' holds {found}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl SchemaError {
    pub(crate) fn truncated(field: &str) -> Self {
        SchemaError::Truncated {
            field: field.to_string(),
        }
    }

    pub(crate) fn mismatch(field: &str, expected: &'static str, found: &Value) -> Self {
        SchemaError::TypeMismatch {
            field: field.to_string(),
            expected,
            found: found.kind(),
        }
    }
}

/// An ordered field list driving both decode and encode.
#[derive(Debug, Clone, Default)]
pub struct BinarySchema {
    fields: Vec<SchemaField>,
}

impl BinarySchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    /// Decodes a whole buffer. Bits past the last field are kept under
    /// [`UNPARSED_FIELD`] so that [`BinarySchema::encode`] can append
    /// them verbatim.
    pub fn decode(&self, bits: &Bits, diags: &mut Diagnostics) -> Result<Record, SchemaError> {
        let (mut record, consumed) = self.decode_fields(bits, None, diags)?;
        if consumed < bits.len() {
            record.insert(
                UNPARSED_FIELD.to_string(),
                Value::Bits(bits[consumed..].to_bitvec()),
            );
        }
        Ok(record)
    }

    /// Decodes one record starting at the front of `bits`, returning it
    /// with the number of bits consumed. Used directly by nested fields.
    pub fn decode_fields(
        &self,
        bits: &Bits,
        parent: Option<&Scope<'_>>,
        diags: &mut Diagnostics,
    ) -> Result<(Record, usize), SchemaError> {
        let mut record = Record::new();
        let mut position = 0;

        for field in &self.fields {
            if !field.condition.evaluate(&record, parent, field.name)? {
                continue;
            }
            match field.count.resolve(&record, field.name)? {
                None => {
                    let (value, advance) =
                        self.decode_one(field, &bits[position..], &record, parent, diags)?;
                    trace!(field = field.name, position, advance, "decoded field");
                    position += advance;
                    record.insert(field.name.to_string(), value);
                }
                Some(count) => {
                    let mut values = Vec::with_capacity(count);
                    for _ in 0..count {
                        let (value, advance) =
                            self.decode_one(field, &bits[position..], &record, parent, diags)?;
                        position += advance;
                        values.push(value);
                    }
                    trace!(field = field.name, count, position, "decoded repeated field");
                    record.insert(field.name.to_string(), Value::List(values));
                }
            }
        }

        Ok((record, position))
    }

    fn decode_one(
        &self,
        field: &SchemaField,
        bits: &Bits,
        record: &Record,
        parent: Option<&Scope<'_>>,
        diags: &mut Diagnostics,
    ) -> Result<(Value, usize), SchemaError> {
        match &field.ty {
            FieldType::Opaque(width) => Primitive::raw(*width).decode(bits, field.name),
            FieldType::Codec(primitive) => primitive.decode(bits, field.name),
            FieldType::Record(schema) => {
                let scope = Scope { record, parent };
                let (nested, consumed) = schema.decode_fields(bits, Some(&scope), diags)?;
                Ok((Value::Record(nested), consumed))
            }
            FieldType::Props(codec) => {
                let (list, consumed) = codec.decode(bits, field.name, diags)?;
                Ok((Value::Props(list), consumed))
            }
        }
    }

    /// Encodes a record produced by this schema back into bits.
    pub fn encode(&self, record: &Record) -> Result<BitBuf, SchemaError> {
        let mut out = BitBuf::new();
        self.encode_fields(record, None, &mut out)?;
        Ok(out)
    }

    /// Encodes one record, appending to `out`. Used directly by nested
    /// fields.
    pub fn encode_fields(
        &self,
        record: &Record,
        parent: Option<&Scope<'_>>,
        out: &mut BitBuf,
    ) -> Result<(), SchemaError> {
        for field in &self.fields {
            if !field.condition.evaluate(record, parent, field.name)? {
                continue;
            }
            let value = record
                .get(field.name)
                .ok_or_else(|| SchemaError::MissingField(field.name.to_string()))?;
            match field.count.resolve(record, field.name)? {
                None => self.encode_one(field, value, record, parent, out)?,
                Some(count) => {
                    let values = value.as_list(field.name)?;
                    if values.len() != count {
                        // Tolerant policy: the supplied elements win, the
                        // count field is left as-is.
                        warn!(
                            field = field.name,
                            expected = count,
                            actual = values.len(),
                            "unexpected element count for repeated field"
                        );
                    }
                    for element in values {
                        self.encode_one(field, element, record, parent, out)?;
                    }
                }
            }
        }

        if let Some(Value::Bits(residue)) = record.get(UNPARSED_FIELD) {
            out.extend_from_bitslice(residue);
        }
        Ok(())
    }

    fn encode_one(
        &self,
        field: &SchemaField,
        value: &Value,
        record: &Record,
        parent: Option<&Scope<'_>>,
        out: &mut BitBuf,
    ) -> Result<(), SchemaError> {
        match &field.ty {
            FieldType::Opaque(width) => Primitive::raw(*width).encode_into(value, field.name, out),
            FieldType::Codec(primitive) => primitive.encode_into(value, field.name, out),
            FieldType::Record(schema) => {
                let scope = Scope { record, parent };
                schema.encode_fields(value.as_record(field.name)?, Some(&scope), out)
            }
            FieldType::Props(codec) => codec.encode_into(value.as_props(field.name)?, field.name, out),
        }
    }
}
