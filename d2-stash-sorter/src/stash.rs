//! Stash file model.
//!
//! The top-level schemas: item records (with their extended and
//! type-specific sub-records), pages, and the two stash variants. The
//! personal variant carries 32 reserved bits between magic and page
//! count; the shared variant goes straight to the page count. Both end
//! with a counted page list, each page a counted item list.
//!
//! Items are decoded as `{item, gems}` wrappers: after each item record,
//! `extended_info.gem_count` further item records follow for its socketed
//! gems. Whatever an item stores past the fields we understand is
//! captured by a `tail` field that runs until the next page or item
//! header, which is what keeps files with unknown property ids or odd
//! type-specific layouts byte-identical through a decode/encode cycle.

use crate::bitbuf::{self, BitBufError};
use crate::codec::Primitive;
use crate::diagnostics::Diagnostics;
use crate::items::Capability;
use crate::props::PropListCodec;
use crate::schema::{
    BinarySchema, Condition, Count, FieldType, Record, SchemaError, SchemaField, Value,
};
use std::sync::{Arc, LazyLock};
use thiserror::Error;

pub const PERSONAL_STASH_MAGIC: &[u8] = b"CSTM01";
pub const SHARED_STASH_MAGIC: &[u8] = &[0x53, 0x53, 0x53, 0x00, 0x30, 0x31];
pub const PAGE_MAGIC: &[u8] = &[0x53, 0x54, 0x00, 0x4a, 0x4d];
pub const ITEM_MAGIC: &[u8] = b"JM";

/// Decoded forms of the magic byte sequences.
pub const PERSONAL_HEADER: &str = "CSTM01";
pub const SHARED_HEADER: &str = "SSS\u{0}01";
pub const PAGE_HEADER: &str = "ST\u{0}JM";
pub const ITEM_HEADER: &str = "JM";

/// Item quality values as stored in `extended_info.quality`.
pub const QUALITY_LOW: u64 = 1;
pub const QUALITY_NORMAL: u64 = 2;
pub const QUALITY_SUPERIOR: u64 = 3;
pub const QUALITY_MAGIC: u64 = 4;
pub const QUALITY_SET: u64 = 5;
pub const QUALITY_RARE: u64 = 6;
pub const QUALITY_UNIQUE: u64 = 7;

static EXTENDED_INFO_SCHEMA: LazyLock<Arc<BinarySchema>> = LazyLock::new(|| {
    use Condition::*;
    Arc::new(BinarySchema::new(vec![
        SchemaField::int("gem_count", 3),
        SchemaField::int("guid", 32),
        SchemaField::int("drop_level", 7),
        SchemaField::int("quality", 4),
        SchemaField::int("has_gfx", 1),
        SchemaField::int("gfx", 3).when(IfField("has_gfx")),
        SchemaField::int("has_class_info", 1),
        SchemaField::opaque("class_info", 11).when(IfField("has_class_info")),
        SchemaField::int("low_quality_type", 3).when(IfFieldEq("quality", QUALITY_LOW)),
        SchemaField::int("high_quality_type", 3).when(IfFieldEq("quality", QUALITY_SUPERIOR)),
        SchemaField::int("magic_prefix", 11).when(IfFieldEq("quality", QUALITY_MAGIC)),
        SchemaField::int("magic_suffix", 11).when(IfFieldEq("quality", QUALITY_MAGIC)),
        SchemaField::int("set_id", 12).when(IfFieldEq("quality", QUALITY_SET)),
        SchemaField::int("rare_name_1", 8).when(IfFieldEq("quality", QUALITY_RARE)),
        SchemaField::int("rare_name_2", 8).when(IfFieldEq("quality", QUALITY_RARE)),
        SchemaField::int("has_rare_prefix_1", 1).when(IfFieldEq("quality", QUALITY_RARE)),
        SchemaField::int("rare_prefix_1", 11).when(IfField("has_rare_prefix_1")),
        SchemaField::int("has_rare_suffix_1", 1).when(IfFieldEq("quality", QUALITY_RARE)),
        SchemaField::int("rare_suffix_1", 11).when(IfField("has_rare_suffix_1")),
        SchemaField::int("has_rare_prefix_2", 1).when(IfFieldEq("quality", QUALITY_RARE)),
        SchemaField::int("rare_prefix_2", 11).when(IfField("has_rare_prefix_2")),
        SchemaField::int("has_rare_suffix_2", 1).when(IfFieldEq("quality", QUALITY_RARE)),
        SchemaField::int("rare_suffix_2", 11).when(IfField("has_rare_suffix_2")),
        SchemaField::int("has_rare_prefix_3", 1).when(IfFieldEq("quality", QUALITY_RARE)),
        SchemaField::int("rare_prefix_3", 11).when(IfField("has_rare_prefix_3")),
        SchemaField::int("has_rare_suffix_3", 1).when(IfFieldEq("quality", QUALITY_RARE)),
        SchemaField::int("rare_suffix_3", 11).when(IfField("has_rare_suffix_3")),
        SchemaField::int("unique_id", 12).when(IfFieldEq("quality", QUALITY_UNIQUE)),
        SchemaField::int("runeword_id", 16).when(IfParentField("has_runeword")),
        SchemaField::new("inscription", FieldType::Codec(Primitive::null_chars(7)))
            .when(IfParentField("inscribed")),
    ]))
});

static SPECIFIC_INFO_SCHEMA: LazyLock<Arc<BinarySchema>> = LazyLock::new(|| {
    use Condition::*;
    const SET_QUALITY_PATH: &[&str] = &["extended_info", "quality"];
    Arc::new(BinarySchema::new(vec![
        SchemaField::int("defense", 11).when(IfParentItemTypeHas(Capability::Defense)),
        SchemaField::int("max_durability", 9).when(IfParentItemTypeHas(Capability::Durability)),
        SchemaField::int("current_durability", 9).when(IfField("max_durability")),
        SchemaField::int("num_sockets", 4).when(IfParentField("socketed")),
        SchemaField::int("quantity", 9).when(IfParentItemTypeHas(Capability::Stackable)),
        SchemaField::int("has_set_props_1", 1).when(IfParentPathEq(SET_QUALITY_PATH, QUALITY_SET)),
        SchemaField::int("has_set_props_2", 1).when(IfParentPathEq(SET_QUALITY_PATH, QUALITY_SET)),
        SchemaField::int("has_set_props_3", 1).when(IfParentPathEq(SET_QUALITY_PATH, QUALITY_SET)),
        SchemaField::int("has_set_props_4", 1).when(IfParentPathEq(SET_QUALITY_PATH, QUALITY_SET)),
        SchemaField::int("has_set_props_5", 1).when(IfParentPathEq(SET_QUALITY_PATH, QUALITY_SET)),
        SchemaField::props("set_props_1", PropListCodec::game()).when(IfField("has_set_props_1")),
        SchemaField::props("set_props_2", PropListCodec::game()).when(IfField("has_set_props_2")),
        SchemaField::props("set_props_3", PropListCodec::game()).when(IfField("has_set_props_3")),
        SchemaField::props("set_props_4", PropListCodec::game()).when(IfField("has_set_props_4")),
        SchemaField::props("set_props_5", PropListCodec::game()).when(IfField("has_set_props_5")),
        SchemaField::props("properties", PropListCodec::game())
            .when(IfParentItemTypeHas(Capability::Properties)),
    ]))
});

static ITEM_DATA_SCHEMA: LazyLock<Arc<BinarySchema>> = LazyLock::new(|| {
    use Condition::*;
    Arc::new(BinarySchema::new(vec![
        SchemaField::chars("header", 2),
        SchemaField::opaque("_unk1", 4),
        SchemaField::int("identified", 1),
        SchemaField::opaque("_unk2", 6),
        SchemaField::int("socketed", 1),
        SchemaField::opaque("_unk3", 9),
        SchemaField::int("simple", 1),
        SchemaField::int("ethereal", 1),
        SchemaField::opaque("_unk4", 1),
        SchemaField::int("inscribed", 1),
        SchemaField::opaque("_unk5", 1),
        SchemaField::int("has_runeword", 1),
        SchemaField::opaque("_unk6", 22),
        SchemaField::int("position_x", 4),
        SchemaField::int("position_y", 4),
        SchemaField::opaque("_unk7", 3),
        SchemaField::chars("item_type", 4),
        SchemaField::nested("extended_info", EXTENDED_INFO_SCHEMA.clone())
            .when(UnlessField("simple")),
        SchemaField::int("has_random_pad", 1),
        SchemaField::opaque("random_pad", 96).when(IfField("has_random_pad")),
        SchemaField::nested("specific_info", SPECIFIC_INFO_SCHEMA.clone())
            .when(UnlessField("simple")),
        SchemaField::new(
            "tail",
            FieldType::Codec(Primitive::until(vec![
                bitbuf::bytes_to_bits(PAGE_MAGIC),
                bitbuf::bytes_to_bits(ITEM_MAGIC),
            ])),
        ),
    ]))
});

static ITEM_SCHEMA: LazyLock<Arc<BinarySchema>> = LazyLock::new(|| {
    Arc::new(BinarySchema::new(vec![
        SchemaField::nested("item", ITEM_DATA_SCHEMA.clone()),
        SchemaField::nested("gems", ITEM_DATA_SCHEMA.clone())
            .repeated(Count::FromPath(&["item", "extended_info", "gem_count"])),
    ]))
});

static PAGE_SCHEMA: LazyLock<Arc<BinarySchema>> = LazyLock::new(|| {
    Arc::new(BinarySchema::new(vec![
        SchemaField::chars("header", 5),
        SchemaField::int("item_count", 16),
        SchemaField::nested("items", ITEM_SCHEMA.clone()).repeated(Count::FromField("item_count")),
    ]))
});

static PERSONAL_STASH_SCHEMA: LazyLock<Arc<BinarySchema>> = LazyLock::new(|| {
    Arc::new(BinarySchema::new(vec![
        SchemaField::chars("header", 6),
        SchemaField::opaque("_reserved", 32),
        SchemaField::int("page_count", 32),
        SchemaField::nested("pages", PAGE_SCHEMA.clone()).repeated(Count::FromField("page_count")),
    ]))
});

static SHARED_STASH_SCHEMA: LazyLock<Arc<BinarySchema>> = LazyLock::new(|| {
    Arc::new(BinarySchema::new(vec![
        SchemaField::chars("header", 6),
        SchemaField::int("page_count", 32),
        SchemaField::nested("pages", PAGE_SCHEMA.clone()).repeated(Count::FromField("page_count")),
    ]))
});

pub fn item_data_schema() -> &'static BinarySchema {
    &ITEM_DATA_SCHEMA
}

pub fn personal_stash_schema() -> &'static BinarySchema {
    &PERSONAL_STASH_SCHEMA
}

pub fn shared_stash_schema() -> &'static BinarySchema {
    &SHARED_STASH_SCHEMA
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StashKind {
    Personal,
    Shared,
}

#[derive(Debug, Error)]
pub enum StashError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    BitBuf(#[from] BitBufError),

    #[error("bad stash magic: expected {expected:?}, found {found:?}")]
    BadMagic { expected: String, found: String },

    #[error("page {page} has a corrupt header: {found:?}")]
    BadPageHeader { page: usize, found: String },
}

/// A fully decoded stash file.
#[derive(Debug, Clone)]
pub struct Stash {
    kind: StashKind,
    record: Record,
}

impl Stash {
    /// Decodes a stash from its raw bytes, picking the variant by magic.
    /// Framing (stash and page magic) is verified strictly; everything
    /// the schemas do not understand lands in tails and round-trips
    /// verbatim.
    pub fn decode(bytes: &[u8], diags: &mut Diagnostics) -> Result<Self, StashError> {
        let kind = if bytes.starts_with(SHARED_STASH_MAGIC) {
            StashKind::Shared
        } else {
            StashKind::Personal
        };
        let bits = bitbuf::bytes_to_bits(bytes);
        let record = self::schema_for(kind).decode(&bits, diags)?;
        let stash = Stash { kind, record };
        stash.verify_framing()?;
        Ok(stash)
    }

    /// Re-encodes to bytes. For an unmodified stash this reproduces the
    /// input exactly.
    pub fn encode(&self) -> Result<Vec<u8>, StashError> {
        let bits = schema_for(self.kind).encode(&self.record)?;
        Ok(bitbuf::bits_to_bytes(&bits)?)
    }

    pub fn kind(&self) -> StashKind {
        self.kind
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn page_count(&self) -> u64 {
        self.record
            .get("page_count")
            .and_then(|v| v.as_int("page_count").ok())
            .unwrap_or(0)
    }

    pub fn pages(&self) -> &[Value] {
        match self.record.get("pages") {
            Some(Value::List(pages)) => pages,
            _ => &[],
        }
    }

    /// Clones every item wrapper out of every page, in file order.
    pub fn all_items(&self) -> Vec<Record> {
        let mut items = Vec::new();
        for page in self.pages() {
            if let Value::Record(page) = page {
                if let Some(Value::List(wrappers)) = page.get("items") {
                    for wrapper in wrappers {
                        if let Value::Record(wrapper) = wrapper {
                            items.push(wrapper.clone());
                        }
                    }
                }
            }
        }
        items
    }

    /// Replaces the page list, rewriting page headers and both count
    /// fields to match.
    pub fn replace_pages(&mut self, pages: Vec<Vec<Record>>) {
        let page_values: Vec<Value> = pages
            .into_iter()
            .map(|items| {
                let mut page = Record::new();
                page.insert("header".to_string(), Value::Str(PAGE_HEADER.to_string()));
                page.insert("item_count".to_string(), Value::Int(items.len() as u64));
                page.insert(
                    "items".to_string(),
                    Value::List(items.into_iter().map(Value::Record).collect()),
                );
                Value::Record(page)
            })
            .collect();
        self.record.insert(
            "page_count".to_string(),
            Value::Int(page_values.len() as u64),
        );
        self.record.insert("pages".to_string(), Value::List(page_values));
    }

    fn verify_framing(&self) -> Result<(), StashError> {
        let expected = match self.kind {
            StashKind::Personal => PERSONAL_HEADER,
            StashKind::Shared => SHARED_HEADER,
        };
        let found = self
            .record
            .get("header")
            .and_then(|v| v.as_str("header").ok())
            .unwrap_or_default();
        if found != expected {
            return Err(StashError::BadMagic {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }

        for (index, page) in self.pages().iter().enumerate() {
            let header = page
                .as_record("page")
                .ok()
                .and_then(|p| p.get("header"))
                .and_then(|v| v.as_str("header").ok())
                .unwrap_or_default();
            if header != PAGE_HEADER {
                return Err(StashError::BadPageHeader {
                    page: index,
                    found: header.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn schema_for(kind: StashKind) -> &'static BinarySchema {
    match kind {
        StashKind::Personal => personal_stash_schema(),
        StashKind::Shared => shared_stash_schema(),
    }
}

/// The inner item record of a `{item, gems}` wrapper.
pub fn item_data(wrapper: &Record) -> Result<&Record, SchemaError> {
    wrapper
        .get("item")
        .ok_or_else(|| SchemaError::MissingField("item".to_string()))?
        .as_record("item")
}

pub fn item_type_code(wrapper: &Record) -> Result<&str, SchemaError> {
    item_data(wrapper)?
        .get("item_type")
        .ok_or_else(|| SchemaError::MissingField("item_type".to_string()))?
        .as_str("item_type")
}

pub fn item_position(wrapper: &Record) -> Result<(u64, u64), SchemaError> {
    let data = item_data(wrapper)?;
    let x = data
        .get("position_x")
        .ok_or_else(|| SchemaError::MissingField("position_x".to_string()))?
        .as_int("position_x")?;
    let y = data
        .get("position_y")
        .ok_or_else(|| SchemaError::MissingField("position_y".to_string()))?
        .as_int("position_y")?;
    Ok((x, y))
}

pub fn set_item_position(wrapper: &mut Record, x: u64, y: u64) -> Result<(), SchemaError> {
    let data = wrapper
        .get_mut("item")
        .ok_or_else(|| SchemaError::MissingField("item".to_string()))?
        .as_record_mut("item")?;
    data.insert("position_x".to_string(), Value::Int(x));
    data.insert("position_y".to_string(), Value::Int(y));
    Ok(())
}

/// An integer field of the item's extended info, if the item has one.
pub fn extended_info_field(wrapper: &Record, name: &str) -> Option<u64> {
    let data = item_data(wrapper).ok()?;
    match data.get("extended_info")? {
        Value::Record(extended) => match extended.get(name)? {
            Value::Int(v) => Some(*v),
            _ => None,
        },
        _ => None,
    }
}

pub fn item_quality(wrapper: &Record) -> Option<u64> {
    extended_info_field(wrapper, "quality")
}

/// The gem item records socketed into this item.
pub fn item_gems(wrapper: &Record) -> &[Value] {
    match wrapper.get("gems") {
        Some(Value::List(gems)) => gems,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitbuf::BitBuf;
    use crate::props::{self, PropList, Property};

    fn zeros(n: usize) -> Value {
        Value::Bits(BitBuf::repeat(false, n))
    }

    /// A simple (flag set) item at the given position. All unknown runs
    /// are zeroed; tests override individual fields as needed.
    fn base_item(code: &str, x: u64, y: u64) -> Record {
        let mut item = Record::new();
        item.insert("header".to_string(), Value::Str(ITEM_HEADER.to_string()));
        item.insert("_unk1".to_string(), zeros(4));
        item.insert("identified".to_string(), Value::Int(1));
        item.insert("_unk2".to_string(), zeros(6));
        item.insert("socketed".to_string(), Value::Int(0));
        item.insert("_unk3".to_string(), zeros(9));
        item.insert("simple".to_string(), Value::Int(1));
        item.insert("ethereal".to_string(), Value::Int(0));
        item.insert("_unk4".to_string(), zeros(1));
        item.insert("inscribed".to_string(), Value::Int(0));
        item.insert("_unk5".to_string(), zeros(1));
        item.insert("has_runeword".to_string(), Value::Int(0));
        item.insert("_unk6".to_string(), zeros(22));
        item.insert("position_x".to_string(), Value::Int(x));
        item.insert("position_y".to_string(), Value::Int(y));
        item.insert("_unk7".to_string(), zeros(3));
        item.insert("item_type".to_string(), Value::Str(code.to_string()));
        item.insert("has_random_pad".to_string(), Value::Int(0));
        item.insert("tail".to_string(), Value::Bits(BitBuf::new()));
        item
    }

    fn wrap(item: Record, gems: Vec<Record>) -> Record {
        let mut wrapper = Record::new();
        wrapper.insert("item".to_string(), Value::Record(item));
        wrapper.insert(
            "gems".to_string(),
            Value::List(gems.into_iter().map(Value::Record).collect()),
        );
        wrapper
    }

    fn page(wrappers: Vec<Record>) -> Value {
        let mut page = Record::new();
        page.insert("header".to_string(), Value::Str(PAGE_HEADER.to_string()));
        page.insert("item_count".to_string(), Value::Int(wrappers.len() as u64));
        page.insert(
            "items".to_string(),
            Value::List(wrappers.into_iter().map(Value::Record).collect()),
        );
        Value::Record(page)
    }

    fn shared_stash(pages: Vec<Value>) -> Record {
        let mut stash = Record::new();
        stash.insert("header".to_string(), Value::Str(SHARED_HEADER.to_string()));
        stash.insert("page_count".to_string(), Value::Int(pages.len() as u64));
        stash.insert("pages".to_string(), Value::List(pages));
        stash
    }

    fn personal_stash(pages: Vec<Value>) -> Record {
        let mut stash = Record::new();
        stash.insert("header".to_string(), Value::Str(PERSONAL_HEADER.to_string()));
        stash.insert("_reserved".to_string(), zeros(32));
        stash.insert("page_count".to_string(), Value::Int(pages.len() as u64));
        stash.insert("pages".to_string(), Value::List(pages));
        stash
    }

    /// Pads the last item record's tail so the whole stash is
    /// byte-aligned, the way real files pad to a byte boundary.
    fn pad_to_alignment(stash: &mut Record, schema: &BinarySchema) {
        let bits = schema.encode(stash).expect("stash record encodes");
        let pad = (8 - bits.len() % 8) % 8;
        if pad == 0 {
            return;
        }
        let Some(Value::List(pages)) = stash.get_mut("pages") else {
            panic!("stash has pages");
        };
        let Some(Value::Record(page)) = pages.last_mut() else {
            panic!("at least one page");
        };
        let Some(Value::List(items)) = page.get_mut("items") else {
            panic!("page has items");
        };
        let Some(Value::Record(wrapper)) = items.last_mut() else {
            panic!("at least one item");
        };
        let target = match wrapper.get_mut("gems") {
            Some(Value::List(gems)) if !gems.is_empty() => match gems.last_mut() {
                Some(Value::Record(gem)) => gem,
                _ => panic!("gems are records"),
            },
            _ => match wrapper.get_mut("item") {
                Some(Value::Record(item)) => item,
                _ => panic!("wrapper has an item"),
            },
        };
        let mut tail = match target.get("tail") {
            Some(Value::Bits(tail)) => tail.clone(),
            _ => BitBuf::new(),
        };
        tail.extend(std::iter::repeat(false).take(pad));
        target.insert("tail".to_string(), Value::Bits(tail));
    }

    fn to_bytes(stash: &mut Record, schema: &BinarySchema) -> Vec<u8> {
        pad_to_alignment(stash, schema);
        let bits = schema.encode(stash).expect("stash record encodes");
        bitbuf::bits_to_bytes(&bits).expect("padded stash is byte aligned")
    }

    #[test]
    fn shared_stash_round_trips() {
        let wrappers = vec![
            wrap(base_item("rvl ", 0, 0), vec![]),
            wrap(base_item("hp3 ", 1, 0), vec![]),
        ];
        let mut record = shared_stash(vec![page(wrappers)]);
        let bytes = to_bytes(&mut record, shared_stash_schema());
        assert!(bytes.starts_with(SHARED_STASH_MAGIC));

        let mut diags = Diagnostics::default();
        let stash = Stash::decode(&bytes, &mut diags).expect("synthetic stash decodes");
        assert_eq!(stash.kind(), StashKind::Shared);
        assert_eq!(stash.page_count(), 1);
        assert_eq!(stash.all_items().len(), 2);
        assert!(diags.is_clean());

        assert_eq!(stash.encode().unwrap(), bytes);
    }

    #[test]
    fn personal_stash_round_trips() {
        let wrappers = vec![wrap(base_item("isc ", 3, 2), vec![])];
        let mut record = personal_stash(vec![page(wrappers)]);
        let bytes = to_bytes(&mut record, personal_stash_schema());
        assert!(bytes.starts_with(PERSONAL_STASH_MAGIC));

        let mut diags = Diagnostics::default();
        let stash = Stash::decode(&bytes, &mut diags).expect("synthetic stash decodes");
        assert_eq!(stash.kind(), StashKind::Personal);

        let items = stash.all_items();
        assert_eq!(item_type_code(&items[0]).unwrap(), "isc ");
        assert_eq!(item_position(&items[0]).unwrap(), (3, 2));

        assert_eq!(stash.encode().unwrap(), bytes);
    }

    /// A socketed magic amulet with one gem, a durability sword with an
    /// inscription and a runeword: exercises extended info, parent-flag
    /// conditions, capability-driven specific info and gem recursion in
    /// one file.
    #[test]
    fn extended_items_round_trip() {
        let mut amulet = base_item("amu ", 2, 3);
        amulet.insert("simple".to_string(), Value::Int(0));
        amulet.insert("socketed".to_string(), Value::Int(1));
        let mut extended = Record::new();
        extended.insert("gem_count".to_string(), Value::Int(1));
        extended.insert("guid".to_string(), Value::Int(0xdeadbeef));
        extended.insert("drop_level".to_string(), Value::Int(20));
        extended.insert("quality".to_string(), Value::Int(QUALITY_MAGIC));
        extended.insert("has_gfx".to_string(), Value::Int(0));
        extended.insert("has_class_info".to_string(), Value::Int(0));
        extended.insert("magic_prefix".to_string(), Value::Int(55));
        extended.insert("magic_suffix".to_string(), Value::Int(3));
        amulet.insert("extended_info".to_string(), Value::Record(extended));
        let mut specific = Record::new();
        specific.insert("num_sockets".to_string(), Value::Int(1));
        let strength = Property {
            def: props::game_def(0).expect("strength is defined"),
            values: vec![5],
        };
        specific.insert(
            "properties".to_string(),
            Value::Props(PropList {
                properties: vec![strength],
                terminated: true,
            }),
        );
        amulet.insert("specific_info".to_string(), Value::Record(specific));

        let gem = base_item("gsr ", 0, 0);

        let mut sword = base_item("lsd ", 4, 3);
        sword.insert("simple".to_string(), Value::Int(0));
        sword.insert("inscribed".to_string(), Value::Int(1));
        sword.insert("has_runeword".to_string(), Value::Int(1));
        let mut extended = Record::new();
        extended.insert("gem_count".to_string(), Value::Int(0));
        extended.insert("guid".to_string(), Value::Int(42));
        extended.insert("drop_level".to_string(), Value::Int(33));
        extended.insert("quality".to_string(), Value::Int(QUALITY_NORMAL));
        extended.insert("has_gfx".to_string(), Value::Int(0));
        extended.insert("has_class_info".to_string(), Value::Int(0));
        extended.insert("runeword_id".to_string(), Value::Int(27));
        extended.insert("inscription".to_string(), Value::Str("AZURE".to_string()));
        sword.insert("extended_info".to_string(), Value::Record(extended));
        let mut specific = Record::new();
        specific.insert("max_durability".to_string(), Value::Int(44));
        specific.insert("current_durability".to_string(), Value::Int(30));
        // An id the property table does not know: the list parses as
        // unterminated and the entry's bits stay in the item tail.
        specific.insert(
            "properties".to_string(),
            Value::Props(PropList {
                properties: vec![],
                terminated: false,
            }),
        );
        sword.insert("specific_info".to_string(), Value::Record(specific));
        sword.insert(
            "tail".to_string(),
            Value::Bits(crate::bitbuf::parse_bit_str("00110100111110000")),
        );

        let wrappers = vec![wrap(amulet, vec![gem]), wrap(sword, vec![])];
        let mut record = shared_stash(vec![page(wrappers)]);
        let bytes = to_bytes(&mut record, shared_stash_schema());

        let mut diags = Diagnostics::default();
        let stash = Stash::decode(&bytes, &mut diags).expect("synthetic stash decodes");
        assert_eq!(
            diags.unknown_property_ids().collect::<Vec<_>>(),
            vec![(300, 1)],
            "the sword tail starts with an unknown property id"
        );
        assert!(diags.missing_item_types().next().is_none());

        let items = stash.all_items();
        assert_eq!(items.len(), 2);
        assert_eq!(item_quality(&items[0]), Some(QUALITY_MAGIC));
        assert_eq!(item_gems(&items[0]).len(), 1);
        assert_eq!(extended_info_field(&items[1], "runeword_id"), Some(27));

        let sword_data = item_data(&items[1]).unwrap();
        let extended = sword_data["extended_info"].as_record("extended_info").unwrap();
        assert_eq!(extended["inscription"], Value::Str("AZURE".to_string()));

        assert_eq!(stash.encode().unwrap(), bytes);
    }

    #[test]
    fn replace_pages_rewrites_counts() {
        let wrappers = vec![
            wrap(base_item("rvl ", 0, 0), vec![]),
            wrap(base_item("hp3 ", 1, 0), vec![]),
        ];
        let mut record = shared_stash(vec![page(wrappers)]);
        let bytes = to_bytes(&mut record, shared_stash_schema());
        let mut stash = Stash::decode(&bytes, &mut Diagnostics::default()).unwrap();

        let items = stash.all_items();
        stash.replace_pages(vec![vec![items[0].clone()], vec![items[1].clone()]]);
        assert_eq!(stash.page_count(), 2);

        let reencoded = stash.encode().unwrap();
        let reparsed = Stash::decode(&reencoded, &mut Diagnostics::default()).unwrap();
        assert_eq!(reparsed.page_count(), 2);
        assert_eq!(reparsed.all_items().len(), 2);
    }

    #[test]
    fn corrupt_page_header_is_rejected() {
        let wrappers = vec![wrap(base_item("rvl ", 0, 0), vec![])];
        let mut record = shared_stash(vec![page(wrappers)]);
        let mut bytes = to_bytes(&mut record, shared_stash_schema());
        // Page header starts right after the 6 magic + 4 count bytes.
        bytes[10] = b'X';
        let err = Stash::decode(&bytes, &mut Diagnostics::default()).unwrap_err();
        assert!(matches!(err, StashError::BadPageHeader { page: 0, .. }));
    }

    #[test]
    fn bad_personal_magic_is_rejected() {
        let mut record = personal_stash(vec![]);
        record.insert("header".to_string(), Value::Str("XSTM01".to_string()));
        let bytes = to_bytes(&mut record, personal_stash_schema());
        let err = Stash::decode(&bytes, &mut Diagnostics::default()).unwrap_err();
        assert!(matches!(err, StashError::BadMagic { .. }));
    }

    #[test]
    fn truncated_stash_is_rejected() {
        let wrappers = vec![wrap(base_item("rvl ", 0, 0), vec![])];
        let mut record = shared_stash(vec![page(wrappers)]);
        let bytes = to_bytes(&mut record, shared_stash_schema());
        let err = Stash::decode(&bytes[..12], &mut Diagnostics::default()).unwrap_err();
        assert!(matches!(err, StashError::Schema(SchemaError::Truncated { .. })));
    }
}
