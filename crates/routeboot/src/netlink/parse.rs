//! Parser combinators and the `FromNetlink` trait for typed messages.

use std::net::Ipv4Addr;

use winnow::binary::le_u16;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;

use super::attr::{NLA_HDRLEN, NLA_TYPE_MASK, nla_align};
use super::error::{Error, Result};

/// Result type for winnow parsers.
pub type PResult<T> = core::result::Result<T, ErrMode<ContextError>>;

/// Trait for types that can be parsed from netlink wire format.
pub trait FromNetlink: Sized {
    /// Parse from a mutable byte slice reference.
    /// The slice is advanced past the consumed bytes.
    fn parse(input: &mut &[u8]) -> PResult<Self>;

    /// Parse from a complete message payload. Trailing bytes are ignored.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut input = data;
        Self::parse(&mut input).map_err(|e| Error::Parse(format!("{}", e)))
    }

    /// Write the family header required for dump requests.
    fn write_dump_header(buf: &mut Vec<u8>);
}

/// Error for a header that does not fit its fixed layout.
pub(crate) fn cut() -> ErrMode<ContextError> {
    ErrMode::Cut(ContextError::new())
}

/// Parse a netlink attribute header and return (type, payload).
///
/// The type has the nested and byte-order flag bits masked off.
pub fn parse_attr<'a>(input: &mut &'a [u8]) -> PResult<(u16, &'a [u8])> {
    let len = le_u16.parse_next(input)? as usize;
    let attr_type = le_u16.parse_next(input)?;

    if len < NLA_HDRLEN {
        return Err(cut());
    }

    let payload: &[u8] = take(len - NLA_HDRLEN).parse_next(input)?;

    let padding = nla_align(len) - len;
    if input.len() >= padding {
        let _: &[u8] = take(padding).parse_next(input)?;
    }

    Ok((attr_type & NLA_TYPE_MASK, payload))
}

/// Parse all attributes from remaining input, stopping at the first malformed one.
pub fn parse_attrs<'a>(input: &mut &'a [u8]) -> PResult<Vec<(u16, &'a [u8])>> {
    let mut attrs = Vec::new();
    while input.len() >= NLA_HDRLEN {
        match parse_attr(input) {
            Ok(attr) => attrs.push(attr),
            Err(_) => break,
        }
    }
    Ok(attrs)
}

/// Parse an IPv4 address attribute payload.
pub fn parse_ipv4(data: &[u8]) -> Option<Ipv4Addr> {
    match data.get(..4) {
        Some(&[a, b, c, d]) => Some(Ipv4Addr::new(a, b, c, d)),
        _ => None,
    }
}
