//! Primitive wire codecs.
//!
//! The atomic parse/emit units the schema engine composes: fixed-width
//! integers, opaque bit runs, fixed-count and NUL-terminated character
//! fields, and the "read until a known header" run used for item tails.
//!
//! Every primitive obeys the same contract: `decode` reads exactly the
//! bits it reports consuming, starting at the front of the supplied
//! slice, and `encode_into` appends the exact bits `decode` consumed for
//! that value. That pairing is what makes the whole-file round-trip
//! byte-identical.

use crate::bitbuf::{self, BitBuf, Bits};
use crate::schema::{SchemaError, Value};

/// An atomic codec for one wire field.
#[derive(Debug, Clone)]
pub enum Primitive {
    /// Unsigned integer of `width` bits, LSB first.
    Integer { width: usize },
    /// Opaque run of `width` bits, preserved verbatim.
    Raw { width: usize },
    /// `count` character codes of `char_bits` bits each, LSB first per
    /// char. Trailing zero codes are stripped on decode and restored on
    /// encode; interior NULs (page headers contain one) pass through.
    Chars { count: usize, char_bits: usize },
    /// Character codes of `char_bits` bits until an all-zero code. The
    /// terminator is consumed but not part of the value.
    NullTerminatedChars { char_bits: usize },
    /// Everything up to the first occurrence of any of `patterns`, or to
    /// the end of the buffer. Re-emitted verbatim.
    Until { patterns: Vec<BitBuf> },
}

impl Primitive {
    pub fn integer(width: usize) -> Self {
        Primitive::Integer { width }
    }

    pub fn raw(width: usize) -> Self {
        Primitive::Raw { width }
    }

    pub fn chars(count: usize) -> Self {
        Primitive::Chars {
            count,
            char_bits: 8,
        }
    }

    pub fn null_chars(char_bits: usize) -> Self {
        Primitive::NullTerminatedChars { char_bits }
    }

    /// # Panics
    ///
    /// Panics when `patterns` is empty or contains a zero-length
    /// pattern; such a codec would match everywhere.
    pub fn until(patterns: Vec<BitBuf>) -> Self {
        assert!(
            !patterns.is_empty() && patterns.iter().all(|p| !p.is_empty()),
            "Until requires at least one non-empty pattern"
        );
        Primitive::Until { patterns }
    }

    /// Decodes one value from the front of `bits`, returning it together
    /// with the number of bits consumed.
    pub fn decode(&self, bits: &Bits, field: &str) -> Result<(Value, usize), SchemaError> {
        match self {
            Primitive::Integer { width } => {
                let value = bitbuf::read_uint(bits, *width)
                    .map_err(|_| SchemaError::truncated(field))?;
                Ok((Value::Int(value), *width))
            }
            Primitive::Raw { width } => {
                if bits.len() < *width {
                    return Err(SchemaError::truncated(field));
                }
                Ok((Value::Bits(bits[..*width].to_bitvec()), *width))
            }
            Primitive::Chars { count, char_bits } => {
                let total = count * char_bits;
                if bits.len() < total {
                    return Err(SchemaError::truncated(field));
                }
                let mut codes = Vec::with_capacity(*count);
                for i in 0..*count {
                    let chunk = &bits[i * char_bits..(i + 1) * char_bits];
                    codes.push(bitbuf::read_uint(chunk, *char_bits).expect("chunk is char-sized"));
                }
                while codes.last() == Some(&0) {
                    codes.pop();
                }
                let chars: String = codes.iter().map(|&c| char::from(c as u8)).collect();
                Ok((Value::Str(chars), total))
            }
            Primitive::NullTerminatedChars { char_bits } => {
                let mut chars = String::new();
                let mut position = 0;
                loop {
                    let code = bitbuf::read_uint(&bits[position..], *char_bits)
                        .map_err(|_| SchemaError::truncated(field))?;
                    position += char_bits;
                    if code == 0 {
                        return Ok((Value::Str(chars), position));
                    }
                    chars.push(char::from(code as u8));
                }
            }
            Primitive::Until { patterns } => {
                let stop = patterns
                    .iter()
                    .filter_map(|pattern| bitbuf::find(bits, pattern, 0))
                    .min()
                    .unwrap_or(bits.len());
                Ok((Value::Bits(bits[..stop].to_bitvec()), stop))
            }
        }
    }

    /// Appends the wire bits for `value` to `out`.
    pub fn encode_into(
        &self,
        value: &Value,
        field: &str,
        out: &mut BitBuf,
    ) -> Result<(), SchemaError> {
        match self {
            Primitive::Integer { width } => {
                let v = value.as_int(field)?;
                if *width < 64 && v >> width != 0 {
                    return Err(SchemaError::Overflow {
                        field: field.to_string(),
                        value: v as i64,
                        width: *width,
                    });
                }
                bitbuf::write_uint(out, v, *width);
                Ok(())
            }
            Primitive::Raw { .. } | Primitive::Until { .. } => {
                // Preserved bits are written back unchanged.
                out.extend_from_bitslice(value.as_bits(field)?);
                Ok(())
            }
            Primitive::Chars { count, char_bits } => {
                let chars = value.as_str(field)?;
                let len = chars.chars().count();
                if len > *count {
                    return Err(SchemaError::StringTooLong {
                        field: field.to_string(),
                        len,
                        max: *count,
                    });
                }
                for c in chars.chars() {
                    write_char(out, c, *char_bits, field)?;
                }
                for _ in len..*count {
                    bitbuf::write_uint(out, 0, *char_bits);
                }
                Ok(())
            }
            Primitive::NullTerminatedChars { char_bits } => {
                let chars = value.as_str(field)?;
                for c in chars.chars() {
                    write_char(out, c, *char_bits, field)?;
                }
                bitbuf::write_uint(out, 0, *char_bits);
                Ok(())
            }
        }
    }
}

fn write_char(out: &mut BitBuf, c: char, char_bits: usize, field: &str) -> Result<(), SchemaError> {
    let code = c as u32 as u64;
    if char_bits < 64 && code >> char_bits != 0 {
        return Err(SchemaError::Overflow {
            field: field.to_string(),
            value: code as i64,
            width: char_bits,
        });
    }
    bitbuf::write_uint(out, code, char_bits);
    Ok(())
}
