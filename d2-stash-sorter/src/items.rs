//! Static item metadata.
//!
//! A read-only table keyed by the 4-character item type code, loaded once
//! from the embedded CSV, plus the capability sets that drive which
//! type-specific fields an item record carries. Type codes are stored
//! trimmed; the wire form pads them with spaces to 4 chars.

use crate::diagnostics::Diagnostics;
use ahash::{AHashMap, AHashSet};
use serde::Deserialize;
use std::sync::LazyLock;

/// Grid footprint used when a type code has no table entry.
pub const DEFAULT_ITEM_SIZE: (u8, u8) = (2, 4);

/// Name and grid footprint of one item type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTypeInfo {
    pub code: String,
    pub name: String,
    /// `(width, height)` in grid cells; `None` for placeholder entries.
    pub size: Option<(u8, u8)>,
}

impl ItemTypeInfo {
    fn placeholder(code: &str) -> Self {
        Self {
            code: code.trim_end().to_string(),
            name: "??????????".to_string(),
            size: None,
        }
    }

    pub fn size_or_default(&self) -> (u8, u8) {
        self.size.unwrap_or(DEFAULT_ITEM_SIZE)
    }

    /// `"2x3"`, or `"?x?"` for placeholder entries.
    pub fn size_label(&self) -> String {
        match self.size {
            Some((w, h)) => format!("{w}x{h}"),
            None => "?x?".to_string(),
        }
    }
}

/// Which type-specific wire fields a type carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Armor-likes store an 11-bit defense value.
    Defense,
    /// Repairable gear stores max (and, when non-zero, current)
    /// durability.
    Durability,
    /// Consumable stacks store a 9-bit quantity.
    Stackable,
    /// Almost everything stores a property list; the few exceptions
    /// (severed ears) store none.
    Properties,
}

const ITEMS_CSV: &str = include_str!("../data/items.csv");

#[derive(Debug, Deserialize)]
struct ItemRow {
    id: String,
    name: String,
    width: u8,
    height: u8,
}

static KNOWN_ITEM_TYPES: LazyLock<AHashMap<String, ItemTypeInfo>> = LazyLock::new(|| {
    let mut reader = csv::Reader::from_reader(ITEMS_CSV.as_bytes());
    let mut types = AHashMap::new();
    for row in reader.deserialize() {
        let row: ItemRow = row.expect("embedded item table is well-formed");
        types.insert(
            row.id.clone(),
            ItemTypeInfo {
                code: row.id,
                name: row.name,
                size: Some((row.width, row.height)),
            },
        );
    }
    types
});

const DEFENSE_TYPES: &[&str] = &[
    // Helms
    "cap", "skp", "hlm", "fhl", "ghm", "crn", "msk", "bhm",
    // Body armor
    "qui", "lea", "hla", "stu", "rng", "scl", "chn", "brs", "spl", "plt",
    "fld", "gth", "ful", "aar", "ltp",
    // Shields
    "buc", "sml", "lrg", "kit", "tow", "gts", "spk", "bsh",
    // Boots, gloves, belts
    "lbt", "vbt", "mbt", "tbt", "hbt",
    "lgl", "vgl", "mgl", "tgl", "hgl",
    "lbl", "vbl", "mbl", "tbl", "hbl",
];

const WEAPON_TYPES: &[&str] = &[
    "hax", "axe", "2ax", "mpi", "wax", "lax", "bax", "btx", "gax", "gix",
    "wnd", "ywn", "bwn", "gwn", "clb", "scp", "gsc", "wsp", "spc", "mac",
    "mst", "fla", "whm", "mau", "gma", "ssd", "scm", "sbr", "flc", "crs",
    "bsd", "lsd", "wsd", "2hs", "clm", "gis", "bsw", "flb", "gsd", "dgr",
    "dir", "kri", "bld", "spr", "tri", "brn", "spt", "pik", "bar", "vou",
    "scy", "pax", "hal", "wsc", "sst", "lst", "cst", "bst", "wst",
];

const STACKABLE_TYPES: &[&str] = &[
    "key", "aqv", "cqv", "tbk", "ibk",
    "tkf", "tax", "bkf", "bal", "jav", "pil", "ssp", "glv", "tsp",
];

const ZERO_PROPS_TYPES: &[&str] = &["ear"];

static DEFENSE_SET: LazyLock<AHashSet<&'static str>> =
    LazyLock::new(|| DEFENSE_TYPES.iter().copied().collect());

static DURABILITY_SET: LazyLock<AHashSet<&'static str>> = LazyLock::new(|| {
    DEFENSE_TYPES
        .iter()
        .chain(WEAPON_TYPES.iter())
        .copied()
        .collect()
});

static STACKABLE_SET: LazyLock<AHashSet<&'static str>> =
    LazyLock::new(|| STACKABLE_TYPES.iter().copied().collect());

static ZERO_PROPS_SET: LazyLock<AHashSet<&'static str>> =
    LazyLock::new(|| ZERO_PROPS_TYPES.iter().copied().collect());

/// Looks up a type code (wire padding tolerated) in the static table.
pub fn lookup(code: &str) -> Option<&'static ItemTypeInfo> {
    KNOWN_ITEM_TYPES.get(code.trim_end())
}

/// Like [`lookup`], but degrades to a placeholder and records the miss.
pub fn info_or_placeholder(code: &str, diags: &mut Diagnostics) -> ItemTypeInfo {
    match lookup(code) {
        Some(info) => info.clone(),
        None => {
            diags.record_missing_item_type(code.trim_end());
            ItemTypeInfo::placeholder(code)
        }
    }
}

/// Whether a type code has the given capability. Unknown codes have
/// none except [`Capability::Properties`].
pub fn type_has(code: &str, capability: Capability) -> bool {
    let code = code.trim_end();
    match capability {
        Capability::Defense => DEFENSE_SET.contains(code),
        Capability::Durability => DURABILITY_SET.contains(code),
        Capability::Stackable => STACKABLE_SET.contains(code),
        Capability::Properties => !ZERO_PROPS_SET.contains(code),
    }
}

const CLASS_NAMES: &[&str] = &[
    "Amazon",
    "Sorceress",
    "Necromancer",
    "Paladin",
    "Barbarian",
    "Druid",
    "Assassin",
];

pub fn class_name(id: u64) -> Option<&'static str> {
    CLASS_NAMES.get(id as usize).copied()
}
