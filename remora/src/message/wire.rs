//! Field-level encoding of message payloads.
//!
//! All integers are big endian. Strings and byte blobs carry a `u32` length
//! prefix, sequences a `u32` element count, optionals a `u8` presence flag.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

pub trait Encode {
    fn encode(&self, buf: &mut BytesMut);
}

pub trait Decode: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self>;
}

#[inline]
fn ensure(buf: &Bytes, needed: usize, what: &'static str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::decode(format!(
            "truncated {what}: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

macro_rules! primitive {
    ($ty:ty, $put:ident, $get:ident) => {
        impl Encode for $ty {
            #[inline]
            fn encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }
        }

        impl Decode for $ty {
            #[inline]
            fn decode(buf: &mut Bytes) -> Result<Self> {
                ensure(buf, size_of::<$ty>(), stringify!($ty))?;
                Ok(buf.$get())
            }
        }
    };
}

primitive!(u8, put_u8, get_u8);
primitive!(i32, put_i32, get_i32);
primitive!(u32, put_u32, get_u32);
primitive!(i64, put_i64, get_i64);
primitive!(u64, put_u64, get_u64);
primitive!(f64, put_f64, get_f64);

impl Encode for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        match u8::decode(buf)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::decode(format!("invalid bool {other}"))),
        }
    }
}

/// Encode a collection length, which the wire format limits to `u32`.
pub(crate) fn encode_len(len: usize, buf: &mut BytesMut) {
    buf.put_u32(u32::try_from(len).unwrap_or(u32::MAX));
}

impl Encode for str {
    fn encode(&self, buf: &mut BytesMut) {
        encode_len(self.len(), buf);
        buf.put_slice(self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_str().encode(buf);
    }
}

impl Decode for String {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let len = u32::decode(buf)? as usize;
        ensure(buf, len, "string")?;
        let raw = buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|e| Error::decode(e.to_string()))
    }
}

impl Encode for Bytes {
    fn encode(&self, buf: &mut BytesMut) {
        encode_len(self.len(), buf);
        buf.put_slice(self);
    }
}

impl Decode for Bytes {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let len = u32::decode(buf)? as usize;
        ensure(buf, len, "byte blob")?;
        Ok(buf.split_to(len))
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, buf: &mut BytesMut) {
        encode_len(self.len(), buf);
        for item in self {
            item.encode(buf);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_slice().encode(buf);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let len = u32::decode(buf)? as usize;
        // every element takes at least one byte, so a bogus count can't make us allocate
        ensure(buf, len, "sequence")?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(buf)?);
        }
        Ok(items)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Some(value) => {
                true.encode(buf);
                value.encode(buf);
            }
            None => false.encode(buf),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        if bool::decode(buf)? {
            Ok(Some(T::decode(buf)?))
        } else {
            Ok(None)
        }
    }
}

macro_rules! tuple {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: Encode),+> Encode for ($($name,)+) {
            fn encode(&self, buf: &mut BytesMut) {
                $(self.$idx.encode(buf);)+
            }
        }

        impl<$($name: Decode),+> Decode for ($($name,)+) {
            fn decode(buf: &mut Bytes) -> Result<Self> {
                Ok(($($name::decode(buf)?,)+))
            }
        }
    };
}

tuple!(A 0, B 1);
tuple!(A 0, B 1, C 2);
tuple!(A 0, B 1, C 2, D 3);

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, buf: &mut BytesMut) {
        (**self).encode(buf);
    }
}

/// Implement [`Encode`] and [`Decode`] for a struct, field by field in the
/// listed order.
macro_rules! wire_struct {
    ($name:ident { $($field:ident),* $(,)? }) => {
        impl $crate::message::Encode for $name {
            fn encode(&self, buf: &mut ::bytes::BytesMut) {
                $($crate::message::Encode::encode(&self.$field, buf);)*
            }
        }

        impl $crate::message::Decode for $name {
            fn decode(buf: &mut ::bytes::Bytes) -> $crate::Result<Self> {
                Ok(Self {
                    $($field: $crate::message::Decode::decode(buf)?),*
                })
            }
        }
    };
}

pub(crate) use wire_struct;

/// Encode a single value into a fresh payload.
pub fn to_payload<T: Encode + ?Sized>(value: &T) -> Bytes {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_layout_is_length_prefixed() {
        let payload = to_payload("ab");
        assert_eq!(&payload[..], &[0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_truncated_string_is_rejected() {
        let mut raw = Bytes::from_static(&[0, 0, 0, 9, b'a']);
        assert!(matches!(String::decode(&mut raw), Err(Error::Decode(_))));
    }

    #[test]
    fn test_bogus_sequence_length_does_not_allocate() {
        let mut raw = Bytes::from_static(&[0xff, 0xff, 0xff, 0xff]);
        assert!(Vec::<u64>::decode(&mut raw).is_err());
    }

    #[test]
    fn test_invalid_bool() {
        let mut raw = Bytes::from_static(&[7]);
        assert!(bool::decode(&mut raw).is_err());
    }

    #[test]
    fn test_nested_values() {
        let value: Vec<(u8, Option<String>)> = vec![(1, None), (2, Some("x".into()))];
        let mut payload = to_payload(&value);
        let decoded = Vec::<(u8, Option<String>)>::decode(&mut payload).unwrap();
        assert_eq!(decoded, value);
        assert!(payload.is_empty());
    }
}
