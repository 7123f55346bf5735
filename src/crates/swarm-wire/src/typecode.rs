//! 64-bit type codes derived from short message tags.
//!
//! A message tag is up to 10 characters from `0-9`, `A-Z`, `a-z` and `_`,
//! each packed into 6 bits, little-endian, into the low 60 bits of a
//! `u64`. The top 4 bits are reserved and are zero for every user code;
//! the all-ones value is the distinguished null code used on the wire for
//! absent messages.

use std::fmt;

use crate::error::{Result, WireError};

/// Maximum tag length.
pub const MAX_NAME_LEN: usize = 10;

const BITS_PER_CHAR: u32 = 6;
const RESERVED_MASK: u64 = 0xF << 60;

/// A 64-bit message type code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeCode(u64);

/// Wire value for "no message".
pub const NULL_TYPE_CODE: TypeCode = TypeCode(u64::MAX);

impl TypeCode {
    /// Packs a tag into its type code.
    ///
    /// Character codes: `'0'..='9'` map to 0..=9, `'A'..='Z'` to 11..=36,
    /// `'_'` to 37 and `'a'..='z'` to 38..=63 (code 10 is unused). Fails on
    /// any other character or on tags longer than [`MAX_NAME_LEN`].
    pub fn from_name(name: &str) -> Result<TypeCode> {
        let mut result: u64 = 0;
        let mut len = 0usize;
        for ch in name.chars() {
            if len == MAX_NAME_LEN {
                return Err(WireError::NameTooLong(name.to_owned()));
            }
            let code: u64 = match ch {
                '0'..='9' => ch as u64 - '0' as u64,
                'A'..='Z' => ch as u64 - 'A' as u64 + 11,
                '_' => 37,
                'a'..='z' => ch as u64 - 'a' as u64 + 38,
                _ => {
                    return Err(WireError::InvalidNameChar {
                        name: name.to_owned(),
                        ch,
                    })
                }
            };
            result |= code << (len as u32 * BITS_PER_CHAR);
            len += 1;
        }
        Ok(TypeCode(result))
    }

    /// Wraps a raw wire value.
    pub fn from_raw(raw: u64) -> TypeCode {
        TypeCode(raw)
    }

    /// The raw wire value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// True when the reserved top nibble is set (includes the null code).
    pub fn is_reserved(self) -> bool {
        self.0 & RESERVED_MASK != 0
    }

    /// Unpacks the tag this code was built from. A zero 6-bit group reads
    /// as end-of-name, so the character `'0'` (which packs to zero) ends
    /// the decoded tag early; decoding is exact for `'0'`-free tags.
    pub fn name(self) -> String {
        let mut out = String::new();
        for i in 0..MAX_NAME_LEN as u32 {
            let group = (self.0 >> (i * BITS_PER_CHAR)) & 0x3F;
            if group == 0 {
                break;
            }
            let ch = match group {
                0..=9 => (b'0' + group as u8) as char,
                11..=36 => (b'A' + (group - 11) as u8) as char,
                37 => '_',
                38..=63 => (b'a' + (group - 38) as u8) as char,
                // 10 is the gap left by the original alphabet.
                _ => '?',
            };
            out.push(ch);
        }
        out
    }
}

impl fmt::Debug for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NULL_TYPE_CODE {
            write!(f, "TypeCode(null)")
        } else {
            write!(f, "TypeCode({:#018x} '{}')", self.0, self.name())
        }
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NULL_TYPE_CODE {
            write!(f, "null")
        } else {
            write!(f, "{}", self.name())
        }
    }
}
