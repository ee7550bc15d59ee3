//! Declarative sort policy.
//!
//! A layout script is data: a list of pages, each a list of rows, each a
//! list of *pieces*. A piece is either a concrete item-type code or a
//! named filter, optionally with a sort override:
//!
//! ```yaml
//! pages:
//!   - rows:
//!       - - piece: uniques
//!           sort: unique_id
//!   - rows:
//!       - [gcr, gfr, gsr]
//! ```
//!
//! Scripts deserialize from YAML; the built-in default is embedded below
//! and a replacement can be loaded from a file. Reordering the stash is
//! a data change, not a code change.

use crate::schema::Record;
use crate::stash::{self, QUALITY_SET, QUALITY_UNIQUE};
use serde::Deserialize;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

/// Type codes never claimed by the `uniques` filter even at unique
/// quality; charms and jewels drown out the interesting pages.
const UNIQUES_EXCLUDED_TYPES: &[&str] = &["cm1", "cm2", "cm3", "jew"];

const DEFAULT_LAYOUT_YAML: &str = include_str!("../data/default_layout.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutScript {
    pub pages: Vec<ScriptPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPage {
    #[serde(default)]
    pub rows: Vec<Vec<PieceSpec>>,
}

/// One piece as written in the script.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PieceSpec {
    /// Bare filter name or item-type code.
    Name(String),
    /// Piece with a sort override.
    Configured {
        piece: String,
        #[serde(default)]
        sort: Option<SortOrder>,
    },
}

/// How a claimed bucket is ordered before placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Keep the original file order.
    Original,
    TypeCode,
    Quality,
    UniqueId,
    SetId,
    SoulNumber,
}

impl SortOrder {
    /// Stable sort, so ties keep file order.
    pub fn apply(self, items: &mut [Record]) {
        match self {
            SortOrder::Original => {}
            SortOrder::TypeCode => {
                items.sort_by_key(|w| type_code(w));
            }
            SortOrder::Quality => {
                items.sort_by_key(|w| stash::item_quality(w).unwrap_or(0));
            }
            SortOrder::UniqueId => {
                items.sort_by_key(|w| {
                    stash::extended_info_field(w, "unique_id").unwrap_or(u64::MAX)
                });
            }
            SortOrder::SetId => {
                items.sort_by_key(|w| stash::extended_info_field(w, "set_id").unwrap_or(u64::MAX));
            }
            SortOrder::SoulNumber => {
                items.sort_by_key(|w| soul_number(w).unwrap_or(u64::MAX));
            }
        }
    }
}

/// The built-in filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Uniques,
    Sets,
    Souls,
}

impl FilterKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uniques" => Some(FilterKind::Uniques),
            "sets" => Some(FilterKind::Sets),
            "souls" => Some(FilterKind::Souls),
            _ => None,
        }
    }

    pub fn matches(self, wrapper: &Record) -> bool {
        match self {
            FilterKind::Uniques => {
                stash::item_quality(wrapper) == Some(QUALITY_UNIQUE)
                    && !is_soul_code(&type_code(wrapper))
                    && !UNIQUES_EXCLUDED_TYPES.contains(&type_code(wrapper).as_str())
            }
            FilterKind::Sets => stash::item_quality(wrapper) == Some(QUALITY_SET),
            FilterKind::Souls => is_soul_code(&type_code(wrapper)),
        }
    }

    pub fn default_sort(self) -> SortOrder {
        match self {
            FilterKind::Uniques => SortOrder::UniqueId,
            FilterKind::Sets => SortOrder::SetId,
            FilterKind::Souls => SortOrder::SoulNumber,
        }
    }
}

/// A resolved piece: what it claims and how its bucket is sorted.
#[derive(Debug, Clone)]
pub struct ResolvedPiece {
    pub matcher: PieceMatcher,
    pub sort: SortOrder,
}

#[derive(Debug, Clone)]
pub enum PieceMatcher {
    TypeCode(String),
    Filter(FilterKind),
}

impl ResolvedPiece {
    pub fn matches(&self, wrapper: &Record) -> bool {
        match &self.matcher {
            PieceMatcher::TypeCode(code) => type_code(wrapper) == *code,
            PieceMatcher::Filter(kind) => kind.matches(wrapper),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedScript {
    pub pages: Vec<Vec<Vec<ResolvedPiece>>>,
}

impl ResolvedScript {
    /// All pieces in script order; the claim pass walks this.
    pub fn flat_pieces(&self) -> impl Iterator<Item = &ResolvedPiece> {
        self.pages.iter().flatten().flatten()
    }

    pub fn piece_count(&self) -> usize {
        self.flat_pieces().count()
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown piece {0:?}: not a filter name and not an item-type code")]
    UnknownPiece(String),
}

impl LayoutScript {
    pub fn from_yaml(content: &str) -> Result<Self, PolicyError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Resolves names to filters or type codes. Names longer than a
    /// type code that match no filter are rejected.
    pub fn resolve(&self) -> Result<ResolvedScript, PolicyError> {
        let mut pages = Vec::with_capacity(self.pages.len());
        for page in &self.pages {
            let mut rows = Vec::with_capacity(page.rows.len());
            for row in &page.rows {
                let mut pieces = Vec::with_capacity(row.len());
                for spec in row {
                    pieces.push(resolve_piece(spec)?);
                }
                rows.push(pieces);
            }
            pages.push(rows);
        }
        Ok(ResolvedScript { pages })
    }
}

fn resolve_piece(spec: &PieceSpec) -> Result<ResolvedPiece, PolicyError> {
    let (name, sort) = match spec {
        PieceSpec::Name(name) => (name.as_str(), None),
        PieceSpec::Configured { piece, sort } => (piece.as_str(), *sort),
    };

    if let Some(kind) = FilterKind::from_name(name) {
        return Ok(ResolvedPiece {
            matcher: PieceMatcher::Filter(kind),
            sort: sort.unwrap_or_else(|| kind.default_sort()),
        });
    }
    if (1..=4).contains(&name.len()) {
        return Ok(ResolvedPiece {
            matcher: PieceMatcher::TypeCode(name.trim_end().to_string()),
            sort: sort.unwrap_or(SortOrder::Original),
        });
    }
    Err(PolicyError::UnknownPiece(name.to_string()))
}

static DEFAULT_SCRIPT: LazyLock<LayoutScript> = LazyLock::new(|| {
    LayoutScript::from_yaml(DEFAULT_LAYOUT_YAML).expect("embedded default layout is well-formed")
});

pub fn default_script() -> &'static LayoutScript {
    &DEFAULT_SCRIPT
}

fn type_code(wrapper: &Record) -> String {
    stash::item_type_code(wrapper)
        .map(|code| code.trim_end().to_string())
        .unwrap_or_default()
}

fn soul_number(wrapper: &Record) -> Option<u64> {
    let code = type_code(wrapper);
    if is_soul_code(&code) {
        code.parse().ok()
    } else {
        None
    }
}

/// Soul type codes are all digits.
fn is_soul_code(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_ascii_digit())
}
