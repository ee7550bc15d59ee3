//! Per-run diagnostic counters.
//!
//! Decoding tolerates two kinds of holes in the static tables: item type
//! codes without metadata and property ids without a definition. Both
//! degrade gracefully (default dimensions, opaque tail) but are worth
//! reporting, so runs collect them here and the CLI prints a summary at
//! exit. One `Diagnostics` value is threaded through a whole decode +
//! layout pass; nothing global.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct Diagnostics {
    missing_item_types: BTreeSet<String>,
    unknown_property_ids: BTreeMap<u16, u64>,
}

impl Diagnostics {
    pub fn record_missing_item_type(&mut self, code: &str) {
        self.missing_item_types.insert(code.to_string());
    }

    pub fn record_unknown_property_id(&mut self, id: u16) {
        *self.unknown_property_ids.entry(id).or_insert(0) += 1;
    }

    /// Item type codes seen without table entries, sorted.
    pub fn missing_item_types(&self) -> impl Iterator<Item = &str> {
        self.missing_item_types.iter().map(String::as_str)
    }

    /// Unknown property ids with occurrence counts, sorted by id.
    pub fn unknown_property_ids(&self) -> impl Iterator<Item = (u16, u64)> + '_ {
        self.unknown_property_ids.iter().map(|(&id, &count)| (id, count))
    }

    pub fn is_clean(&self) -> bool {
        self.missing_item_types.is_empty() && self.unknown_property_ids.is_empty()
    }
}
