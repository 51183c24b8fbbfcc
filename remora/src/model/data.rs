use std::fmt;

use bitflags::bitflags;
use bytes::{Bytes, BytesMut};

use crate::{
    Error, Label, Result,
    message::wire::{Decode, Encode},
};

/// Semantic role of a cell value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Label)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    Display,
    Decoration,
    Edit,
    ToolTip,
    StatusTip,
    CheckState,
    Foreground,
    Background,
    /// Application defined role, `0..=127`.
    User(u8),
}

impl Role {
    const USER_BASE: u8 = 0x80;
}

impl From<Role> for u8 {
    fn from(role: Role) -> u8 {
        match role {
            Role::Display => 0,
            Role::Decoration => 1,
            Role::Edit => 2,
            Role::ToolTip => 3,
            Role::StatusTip => 4,
            Role::CheckState => 5,
            Role::Foreground => 6,
            Role::Background => 7,
            Role::User(n) => Role::USER_BASE | (n & 0x7f),
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        Ok(match raw {
            0 => Role::Display,
            1 => Role::Decoration,
            2 => Role::Edit,
            3 => Role::ToolTip,
            4 => Role::StatusTip,
            5 => Role::CheckState,
            6 => Role::Foreground,
            7 => Role::Background,
            n if n >= Role::USER_BASE => Role::User(n - Role::USER_BASE),
            other => return Err(Error::decode(format!("unknown role {other}"))),
        })
    }
}

impl Encode for Role {
    fn encode(&self, buf: &mut BytesMut) {
        u8::from(*self).encode(buf);
    }
}

impl Decode for Role {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Role::try_from(u8::decode(buf)?)
    }
}

/// A cell or header value. `Null` also stands for "not known yet".
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Bytes),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            Value::UInt(v) => i64::try_from(v).ok(),
            Value::Bool(v) => Some(i64::from(v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Value::Bytes(v)
    }
}

impl Encode for Value {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Value::Null => 0u8.encode(buf),
            Value::Bool(v) => {
                1u8.encode(buf);
                v.encode(buf);
            }
            Value::Int(v) => {
                2u8.encode(buf);
                v.encode(buf);
            }
            Value::UInt(v) => {
                3u8.encode(buf);
                v.encode(buf);
            }
            Value::Double(v) => {
                4u8.encode(buf);
                v.encode(buf);
            }
            Value::String(v) => {
                5u8.encode(buf);
                v.encode(buf);
            }
            Value::Bytes(v) => {
                6u8.encode(buf);
                v.encode(buf);
            }
        }
    }
}

impl Decode for Value {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(match u8::decode(buf)? {
            0 => Value::Null,
            1 => Value::Bool(bool::decode(buf)?),
            2 => Value::Int(i64::decode(buf)?),
            3 => Value::UInt(u64::decode(buf)?),
            4 => Value::Double(f64::decode(buf)?),
            5 => Value::String(String::decode(buf)?),
            6 => Value::Bytes(Bytes::decode(buf)?),
            other => return Err(Error::decode(format!("unknown value tag {other}"))),
        })
    }
}

bitflags! {
    /// Capabilities of a cell.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ItemFlags: u32 {
        const SELECTABLE = 1 << 0;
        const EDITABLE = 1 << 1;
        const ENABLED = 1 << 2;
        const CHECKABLE = 1 << 3;
        const NEVER_HAS_CHILDREN = 1 << 4;
    }
}

impl Encode for ItemFlags {
    fn encode(&self, buf: &mut BytesMut) {
        self.bits().encode(buf);
    }
}

impl Decode for ItemFlags {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(ItemFlags::from_bits_truncate(u32::decode(buf)?))
    }
}

/// Header orientation. Horizontal headers label columns, vertical ones rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Label)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl Encode for Orientation {
    fn encode(&self, buf: &mut BytesMut) {
        let raw: u8 = match self {
            Orientation::Horizontal => 1,
            Orientation::Vertical => 2,
        };
        raw.encode(buf);
    }
}

impl Decode for Orientation {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        match u8::decode(buf)? {
            1 => Ok(Orientation::Horizontal),
            2 => Ok(Orientation::Vertical),
            other => Err(Error::decode(format!("unknown orientation {other}"))),
        }
    }
}
