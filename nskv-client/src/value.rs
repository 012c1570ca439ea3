//! # Values on the Wire
//!
//! The store only knows byte strings. `ToArg` renders Rust values into command
//! arguments and `FromValue` coerces stored bytes back, failing with
//! `CoerceFailed` when the bytes are not a valid representation.
//!
//! Booleans are written as `1`/`0` and read back from either that form or the
//! usual textual spellings (`t`, `true`, `FALSE`, ...).

use std::borrow::Cow;

use crate::error::{ClientError, ClientResult};

/// A value that can be sent as a single command argument.
pub trait ToArg {
    fn to_arg(&self) -> Cow<'_, [u8]>;
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Cow<'_, [u8]> {
        (**self).to_arg()
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self[..])
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_slice())
    }
}

impl ToArg for bool {
    fn to_arg(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(if *self { b"1" } else { b"0" })
    }
}

macro_rules! display_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Cow<'_, [u8]> {
                    Cow::Owned(self.to_string().into_bytes())
                }
            }
        )*
    };
}

display_arg!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

/// A type that stored bytes can be coerced into.
pub trait FromValue: Sized {
    fn from_value(raw: Vec<u8>) -> ClientResult<Self>;
}

impl FromValue for Vec<u8> {
    fn from_value(raw: Vec<u8>) -> ClientResult<Self> {
        Ok(raw)
    }
}

impl FromValue for String {
    fn from_value(raw: Vec<u8>) -> ClientResult<Self> {
        String::from_utf8(raw).map_err(|_| ClientError::CoerceFailed { target: "string" })
    }
}

impl FromValue for bool {
    fn from_value(raw: Vec<u8>) -> ClientResult<Self> {
        match raw.as_slice() {
            b"1" | b"t" | b"T" | b"true" | b"TRUE" | b"True" => Ok(true),
            b"0" | b"f" | b"F" | b"false" | b"FALSE" | b"False" => Ok(false),
            _ => Err(ClientError::CoerceFailed { target: "bool" }),
        }
    }
}

macro_rules! parsed_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(raw: Vec<u8>) -> ClientResult<Self> {
                    std::str::from_utf8(&raw)
                        .ok()
                        .and_then(|text| text.parse::<$ty>().ok())
                        .ok_or(ClientError::CoerceFailed { target: stringify!($ty) })
                }
            }
        )*
    };
}

parsed_value!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);
