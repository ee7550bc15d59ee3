//! Game property lists.
//!
//! Magic properties are stored as a variable-length list of entries, each
//! a 9-bit id followed by that property's fields at their declared
//! widths; the list ends with the 9-bit sentinel `0x1FF`. Field values
//! are stored biased: some definitions carry per-field offsets that are
//! subtracted on decode (yielding possibly negative logical values) and
//! re-added on encode.
//!
//! Ids the table does not know stop the parse: the 9 bits are rewound,
//! the list is marked unterminated, and the remaining bits flow into the
//! surrounding item's tail. The game introduces ids faster than tables
//! follow, and preserving the remainder verbatim keeps the round-trip
//! lossless without full knowledge of every definition. Several entries
//! below are marked `[?]` in their display text; they are provisional
//! and kept exactly as shipped.

use crate::bitbuf::{self, BitBuf, Bits};
use crate::diagnostics::Diagnostics;
use crate::schema::SchemaError;
use rustc_hash::FxHashMap;
use std::sync::{Arc, LazyLock};
use tracing::warn;

/// 9-bit sentinel ending a terminated property list.
pub const LIST_TERMINATOR: u16 = 0x1ff;

const ID_BITS: usize = 9;

/// Static definition of one property id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    /// Wire tag, 9 bits.
    pub id: u16,
    /// Width in bits of each stored field, in wire order.
    pub field_widths: Vec<u8>,
    /// Display template, `{}`-style with optional `{n:...}` positions and
    /// a `+` flag for signed rendering.
    pub format: &'static str,
    /// Per-field bias subtracted from the stored unsigned value.
    pub offsets: Option<Vec<i32>>,
}

impl PropertyDef {
    pub fn new(id: u16, field_widths: &[u8], format: &'static str) -> Self {
        Self {
            id,
            field_widths: field_widths.to_vec(),
            format,
            offsets: None,
        }
    }

    pub fn with_offsets(mut self, offsets: &[i32]) -> Self {
        self.offsets = Some(offsets.to_vec());
        self
    }

    fn offset(&self, index: usize) -> i64 {
        self.offsets
            .as_ref()
            .and_then(|offsets| offsets.get(index))
            .copied()
            .unwrap_or(0) as i64
    }
}

/// One decoded property: its definition plus the logical (de-biased)
/// field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub def: Arc<PropertyDef>,
    pub values: Vec<i64>,
}

impl Property {
    /// Renders the property the way the game displays it.
    pub fn as_game_str(&self) -> String {
        render_format(self.def.format, &self.values)
    }
}

/// A decoded property list. `terminated` records whether the sentinel
/// was seen, so encode reproduces exactly the bits that were read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropList {
    pub properties: Vec<Property>,
    pub terminated: bool,
}

/// Lookup table from property id to definition.
#[derive(Debug, Default)]
pub struct PropertyTable {
    defs: FxHashMap<u16, Arc<PropertyDef>>,
}

impl PropertyTable {
    pub fn from_defs(defs: impl IntoIterator<Item = PropertyDef>) -> Self {
        Self {
            defs: defs
                .into_iter()
                .map(|def| (def.id, Arc::new(def)))
                .collect(),
        }
    }

    pub fn get(&self, id: u16) -> Option<&Arc<PropertyDef>> {
        self.defs.get(&id)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// Codec for a property list, parameterized by the id table so tests can
/// run against small synthetic tables.
#[derive(Debug, Clone)]
pub struct PropListCodec {
    table: Arc<PropertyTable>,
}

impl PropListCodec {
    /// Codec over the full game table.
    pub fn game() -> Self {
        Self {
            table: GAME_TABLE.clone(),
        }
    }

    pub fn with_table(table: Arc<PropertyTable>) -> Self {
        Self { table }
    }

    /// Decodes entries until the terminator or an unknown id. Unknown
    /// ids rewind their 9 bits, are counted in `diags`, and leave the
    /// list unterminated; the caller's tail field preserves the rest.
    pub fn decode(
        &self,
        bits: &Bits,
        field: &str,
        diags: &mut Diagnostics,
    ) -> Result<(PropList, usize), SchemaError> {
        let mut position = 0;
        let mut properties = Vec::new();
        let mut terminated = false;

        loop {
            let id = bitbuf::read_uint(&bits[position..], ID_BITS)
                .map_err(|_| SchemaError::truncated(field))? as u16;
            position += ID_BITS;

            if id == LIST_TERMINATOR {
                terminated = true;
                break;
            }

            let Some(def) = self.table.get(id) else {
                warn!(id, "unknown property id, leaving the rest of the item opaque");
                diags.record_unknown_property_id(id);
                position -= ID_BITS;
                break;
            };

            let mut values = Vec::with_capacity(def.field_widths.len());
            for (index, &width) in def.field_widths.iter().enumerate() {
                let raw = bitbuf::read_uint(&bits[position..], width as usize)
                    .map_err(|_| SchemaError::truncated(field))?;
                position += width as usize;
                values.push(raw as i64 - def.offset(index));
            }
            properties.push(Property {
                def: def.clone(),
                values,
            });
        }

        Ok((
            PropList {
                properties,
                terminated,
            },
            position,
        ))
    }

    /// Appends the wire form of `list` to `out`.
    pub fn encode_into(
        &self,
        list: &PropList,
        field: &str,
        out: &mut BitBuf,
    ) -> Result<(), SchemaError> {
        for property in &list.properties {
            bitbuf::write_uint(out, property.def.id as u64, ID_BITS);
            for (index, &width) in property.def.field_widths.iter().enumerate() {
                let value = property
                    .values
                    .get(index)
                    .copied()
                    .ok_or_else(|| SchemaError::MissingField(format!("{field}[{index}]")))?;
                let raw = value + property.def.offset(index);
                let width = width as usize;
                if raw < 0 || (width < 64 && raw >> width != 0) {
                    return Err(SchemaError::Overflow {
                        field: format!("{field}[{index}]"),
                        value: raw,
                        width,
                    });
                }
                bitbuf::write_uint(out, raw as u64, width);
            }
        }
        if list.terminated {
            bitbuf::write_uint(out, LIST_TERMINATOR as u64, ID_BITS);
        }
        Ok(())
    }
}

/// Renders a `{}`-style display template against logical values.
///
/// Supports empty specs (`{}`), format specs (`{:d}`, `{:+d}`) and
/// explicit positions (`{1:d}`). The `+` flag forces a sign on
/// non-negative values. Out-of-range positions render as `?`.
fn render_format(format: &str, values: &[i64]) -> String {
    let mut out = String::new();
    let mut chars = format.chars();
    let mut next_index = 0;

    while let Some(c) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut spec = String::new();
        for d in chars.by_ref() {
            if d == '}' {
                break;
            }
            spec.push(d);
        }
        let (position, flags) = match spec.split_once(':') {
            Some((position, flags)) => (position, flags),
            None => (spec.as_str(), ""),
        };
        let index = match position.parse::<usize>() {
            Ok(explicit) => explicit,
            Err(_) => {
                let implicit = next_index;
                next_index += 1;
                implicit
            }
        };
        match values.get(index) {
            Some(&value) => {
                if flags.contains('+') && value >= 0 {
                    out.push('+');
                }
                out.push_str(&value.to_string());
            }
            None => out.push('?'),
        }
    }

    out
}

static GAME_TABLE: LazyLock<Arc<PropertyTable>> =
    LazyLock::new(|| Arc::new(PropertyTable::from_defs(game_defs())));

/// Looks up a definition in the full game table.
pub fn game_def(id: u16) -> Option<Arc<PropertyDef>> {
    GAME_TABLE.get(id).cloned()
}

/// The property definitions as shipped. Widths and offsets come from the
/// game's item stat cost data; entries whose text carries `[?]` are
/// unconfirmed observations kept verbatim.
#[rustfmt::skip]
fn game_defs() -> Vec<PropertyDef> {
    let def = PropertyDef::new;
    vec![
        def(0, &[10], "{:+d} to Strength").with_offsets(&[32]),
        def(1, &[10], "{:+d} to Energy").with_offsets(&[32]),
        def(2, &[10], "{:+d} to Dexterity").with_offsets(&[32]),
        def(3, &[10], "{:+d} to Vitality").with_offsets(&[32]),
        def(7, &[10], "{:+d} to Life").with_offsets(&[32]),
        def(9, &[10], "{:+d} to Mana").with_offsets(&[32]),
        def(11, &[10], "{:+d} Maximum Stamina").with_offsets(&[32]),
        def(16, &[9], "{:+d}% Enhanced Defense"),
        def(17, &[9, 9], "{:+d}% Enhanced Damage"),
        def(19, &[10], "{:+d} to Attack Rating"),
        def(20, &[6], "{:+d}% Increased Chance of Blocking"),
        def(21, &[8], "{:+d} to Minimum Damage"),
        def(22, &[9], "{:+d} to Maximum Damage"),
        def(23, &[8], "{:+d} to Minimum Damage"),
        def(24, &[9], "{:+d} to Maximum Damage"),
        def(27, &[8], "Regenerate Mana {:d}%"),
        def(28, &[8], "Heal Stamina Plus {:d}%"),
        def(31, &[11], "{:+d} Defense").with_offsets(&[10]),
        def(32, &[10], "{:+d} Defense vs. Missile"),
        def(33, &[10], "{:+d} Defense vs. Melee"),
        def(34, &[16], "Damage Reduced by {:d}"),
        def(35, &[16], "Magic Damage Reduced by {:d}"),
        def(36, &[8], "Damage Reduced by {:+d}%"),
        def(37, &[8], "Magic Resist {:+d}%").with_offsets(&[50]),
        def(38, &[5], "+{:d}% to Maximum Magic Resist"),
        def(39, &[8], "Fire Resist {:+d}%").with_offsets(&[50]),
        def(40, &[5], "+{:d}% to max fire resist"),
        def(41, &[8], "Lightning Resist {:+d}%").with_offsets(&[50]),
        def(42, &[5], "+{:d}% to max lightning resist"),
        def(43, &[8], "Cold Resist {:+d}%").with_offsets(&[50]),
        def(44, &[5], "+{:d}% to max cold resist"),
        def(45, &[8], "Poison Resist {:+d}%").with_offsets(&[50]),
        def(46, &[5], "{:+d} to max Poison Resist"),
        def(48, &[10, 11], "Adds {:d}-{:d} fire damage"),
        def(50, &[10, 11], "Adds {:d}-{:d} lightning damage"),
        def(52, &[10, 11], "Adds {:d}-{:d} magic damage"),
        def(54, &[10, 11, 10], "Adds {:d}-{:d} cold damage"),
        def(57, &[13, 13, 16], "+({:d}-{:d})/256 poison damage over {:d}/25 s"),
        def(60, &[8], "{:d}% Life Stolen per Hit").with_offsets(&[50]),
        def(62, &[8], "{:d}% Mana Stolen per Hit").with_offsets(&[50]),
        def(66, &[12], "Hit Stuns Enemies <{:d}>"),
        def(73, &[9], "[?][73] <{:d}>"),
        def(74, &[16], "+{:d} Replenish Life").with_offsets(&[3000]),
        def(75, &[7], "Increased Maximum Durability {:d}%").with_offsets(&[20]),
        def(76, &[8], "Increase Maximum Life {:d}%").with_offsets(&[10]),
        def(77, &[8], "Increase Maximum Mana {:d}%").with_offsets(&[10]),
        def(78, &[16], "Attacker takes damage of {:d}"),
        def(79, &[13], "{:d}% Extra Gold from Monsters"),
        def(80, &[13], "{:d}% Better Chance of Getting Magic Items"),
        def(81, &[7], "Knockback"),
        def(83, &[3, 5], "+{1:d} to Class<{0:d}> Skill Levels"),
        def(85, &[12], "{:d}% to Experience Gained").with_offsets(&[50]),
        def(86, &[7], "{:+d} Life after each Kill"),
        def(87, &[7], "Reduces all Vendor Prices {:d}%"),
        def(89, &[5], "{:+d} to Light Radius").with_offsets(&[12]),
        def(91, &[12], "Requirements {:+d}%").with_offsets(&[100]),
        def(92, &[12], "Unknown<92>: {:+d}"),
        def(93, &[9], "{:+d}% Increased Attack Speed").with_offsets(&[20]),
        def(96, &[9], "{:+d}% Faster Run/Walk").with_offsets(&[100]),
        def(97, &[10, 7], "+{1:d} to Skill<{0:d}> (All) [97]"),
        def(98, &[10], "ConvertTo[?]<98>: {:d}"),
        def(99, &[8], "{:+d}% Faster Hit Recovery").with_offsets(&[20]),
        def(102, &[8], "{:+d}% Faster Block Rate").with_offsets(&[20]),
        def(105, &[9], "{:+d}% Faster Cast Rate").with_offsets(&[50]),
        def(107, &[10, 7], "+{1:d} to Skill<{0:d}> (Class Only) [107]"),
        def(108, &[3], "Slain Monster Rest in Peace <{:+d}>%"),
        def(109, &[9], "Shorter Curse Duration {:+d}%").with_offsets(&[100]),
        def(110, &[8], "Poison Length Reduced by {:d}%").with_offsets(&[20]),
        def(112, &[7], "Hit Causes Monster to Flee {:d}%").with_offsets(&[10]),
        def(113, &[7], "Hit Blinds Target ({:d})"),
        def(114, &[7], "{:d}% Damage Taken Goes To Mana"),
        def(115, &[1], "Ignore Target's Defense"),
        def(116, &[7], "-{:d}% Target Defense"),
        def(117, &[7], "Prevent Monster Heal"),
        def(118, &[1], "Half Freeze Duration"),
        def(119, &[12], "{:+d}% Bonus to Attack Rating").with_offsets(&[20]),
        def(120, &[7], "{:+d} to Monster Defense Per Hit").with_offsets(&[128]),
        def(121, &[12], "{:+d}% Damage to Demons").with_offsets(&[20]),
        def(122, &[12], "{:+d}% Damage to Undead").with_offsets(&[20]),
        def(123, &[13], "{:+d} to Attack Rating against Demons").with_offsets(&[128]),
        def(124, &[13], "{:+d} to Attack Rating against Undead").with_offsets(&[128]),
        def(127, &[5], "+{:d} to All Skills"),
        def(128, &[16], "Attacker Takes Lightning Damage of {:+d}"),
        def(134, &[5], "Freezes Target <{:d}>"),
        def(135, &[9], "{:d}% Chance of Open Wounds"),
        def(136, &[9], "{:d}% Chance of Crushing Blow"),
        def(138, &[7], "{:+d} to Mana after each Kill"),
        def(139, &[7], "{:+d} to Life after each Kill"),
        def(140, &[7], "Unknown<140>: {:d}"),
        def(141, &[8], "{:d}% Deadly Strke"),
        def(142, &[8], "Fire Absorb {:d}%"),
        def(143, &[16], "{:d} Fire Absorb"),
        def(144, &[8], "Lightning Absorb {:d}%"),
        def(145, &[16], "{:d} Lightning Absorb"),
        def(146, &[8], "Magic Absorb {:d}%"),
        def(147, &[16], "{:d} Magic Absorb"),
        def(148, &[8], "Cold Absorb {:d}%"),
        def(149, &[16], "{:d} Cold Absorb"),
        def(150, &[7], "Slows Target by {:d}%"),
        def(151, &[10, 8], "Level {1:d} Skill<{0:d}> When Equipped"),
        def(152, &[1], "Indestructible"),
        def(153, &[1], "Cannot Be Frozen"),
        def(154, &[8], "{:+d}% Slower Stamina Drain").with_offsets(&[90]),
        def(155, &[10, 7], "{1:d}% reanimate as: Mob<{0:d}>"),
        def(156, &[7], "Piercing Attack <{:d}>"),
        def(157, &[7], "Fires Magic Arrows <{:d}>"),
        def(158, &[7], "Fires Explosive Arrows or Bolds <{:d}>"),
        def(159, &[9], "{:+d} to Minimum Damage"),
        def(160, &[10], "{:+d} to Maximum Damage"),
        def(181, &[9], "[?][181] ??? <{:d}>"),
        // TODO: 188 is unconfirmed, the width pair looks weird in captures.
        def(188, &[16, 3], "+{1:d} to Skill<{0:d}> [188][?]"),
        def(195, &[6, 10, 7], "{2:d}% Chance to cast Level {0:d} Skill<{1:d}> on attack"),
        def(196, &[6, 10, 7], "{2:d}% Chance to cast Level {0:d} Skill<{1:d}> when you Kill an Enemy"),
        def(197, &[6, 10, 7], "{2:d}% Chance to cast Level {0:d} Skill<{1:d}> when you Die"),
        def(198, &[6, 10, 7], "{2:d}% Chance to cast Level {0:d} Skill<{1:d}> on striking"),
        def(201, &[6, 10, 7], "{2:d}% Chance to cast Level {0:d} Skill<{1:d}> when struck"),
        def(204, &[6, 10, 8, 8], "Level {:d} Skill<{:d}> ({:d}/{:d} charges)"),
        def(214, &[6], "{:+d}/8 to Defense (Based on Character Level)"),
        def(215, &[6], "{:+d}/16% Enhanced Defense (Based on Character Level)"),
        def(217, &[6], "{:+d}/16 to Mana (Based on Character Level)"),
        def(218, &[6], "{:+d}/16 to Maximum Damage (Based on Character Level)"),
        def(220, &[6], "{:+d}/16 to Strength (Based on Character Level)"),
        def(221, &[6], "{:+d}/16 to Dexterity (Based on Character Level)"),
        def(222, &[6], "{:+d}/16 to Energy (Based on Character Level)"),
        def(224, &[6], "{:+d}/2 to Attack Rating (Based on Character Level)"),
        def(225, &[6], "{:+d}/8% Bonus to Attack Rating (Based on Character Level)"),
        def(228, &[6], "Indestructible [?]"),
        def(230, &[6], "Cold Resist {:d}/16 (Based on Character Level)"),
        def(231, &[6], "Fire Resist {:d}/16 (Based on Character Level)"),
        def(232, &[6], "{:+d}/16 to Lightning Resist (Based on Character Level)"),
        def(233, &[6], "{:+d}/16 to Poison Resist (Based on Character Level)"),
        def(239, &[6], "{:+d}/16 Extra Gold form Monsters (Based on Character Level)"),
        def(240, &[6], "{:+d}/16 Better Chance of Getting Magic Items (Based on Character Level)"),
        def(252, &[6], "Repairs 1 durability in 100/{:d} seconds"),
        def(253, &[8], "Replenishes Quantity ({:+d}/??)[?]"),
        def(254, &[8], "Increaed Stack Size ({:+d})"),
        def(329, &[12], "{:+d}% to Fire Skill Damage").with_offsets(&[50]),
        def(330, &[12], "{:+d}% to Lightning Skill Damage").with_offsets(&[50]),
        def(331, &[12], "{:+d}% to Cold Skill Damage").with_offsets(&[50]),
        def(332, &[12], "{:+d}% to Poison Skill Damage").with_offsets(&[50]),
        def(333, &[9], "-{:d}% to Enemy Lightning Resistance"),
        def(334, &[9], "-{:d}% to Enemy Lightning Resistance"),
        def(335, &[9], "-{:d}% to Enemy Cold Resistance"),
        def(336, &[9], "-{:d}% to Enemy Poison Resistance"),
        def(338, &[7], "Chance to dodge melee attack when still +{:d}%"),
        def(339, &[7], "Chance to dodge missile attack when still +{:d}%"),
        def(340, &[7], "Chance to dodge attacks when moving +{:d}%"),
        def(349, &[8], "Elemental resistance of summons {:+d}%"),
        def(357, &[12], "{:+d}% to Magic Skill Damage").with_offsets(&[50]),
        def(359, &[12], "Magic Affinity Bonus {:+d}%").with_offsets(&[100]),
        def(362, &[12], "Extra Throwing Potion Damage +{:d}%"),
        def(365, &[8], "Strength bonus {:d}%").with_offsets(&[10]),
        def(366, &[8], "Energy bonus {:d}%").with_offsets(&[10]),
        def(367, &[8], "Dexterity bonus {:d}%").with_offsets(&[10]),
        def(372, &[8], "[?][372] <{:d}>"),
        def(388, &[9], "{:d}% Extra Base Life to Summons").with_offsets(&[50]),
        def(407, &[6, 10, 7], "{2:d}% Chance to cast Level {0:d} Skill<{1:d}> when struck"),
        def(441, &[7], "Extra resistance from temporary resistance potions +{:d}%"),
        def(443, &[15], "+{:d} Extra duration (in frames) to all resistance potions"),
        def(444, &[15], "+{:d} Extra duration (in frames) to stamina potions"),
        def(446, &[9], "Stamina Bonus {:d}%").with_offsets(&[60]),
        def(449, &[7], "bonus healing from normal rejuvination potions {:d}%"),
        def(451, &[4], "Boosts the effectiveness of mana potions by x {:d}"),
        def(465, &[9], "Boosts Double Throw Damage by {:d}%"),
        def(471, &[9], "Boosts damage of Hireling Skills by {:d}%"),
        def(479, &[5], "+{:d} extra Potions launched from Potion Launcher skill"),
        def(495, &[6], "+{:d}/?? Min/Max Fire Damage (Increases with kills)[?]"),
        def(502, &[15], "+{:d} Extra duration (in frames) to RIP Potions"),
        def(505, &[15], "+{:d} Extra duration (in frames) to portable shrines"),
        def(508, &[12], "Boosts Summon Damage by {:d}%"),
    ]
}
