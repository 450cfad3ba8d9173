//! Recursive-length-prefix codec.
//!
//! Decoding works on untrusted proof bytes, so every length is bounds checked
//! and non-canonical headers are rejected instead of being normalized.

use alloc::vec::Vec;

use crate::ProofError;

/// An owned RLP value: a byte string or a list of values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rlp {
    Bytes(Vec<u8>),
    List(Vec<Rlp>),
}

impl Rlp {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Rlp::Bytes(data) => encode_bytes(data),
            Rlp::List(items) => {
                let encoded: Vec<Vec<u8>> = items.iter().map(Rlp::encode).collect();
                encode_list(&encoded)
            }
        }
    }

    pub fn decode(input: &[u8]) -> Result<Self, ProofError> {
        RlpItem::decode(input)?.to_rlp()
    }
}

/// A borrowed view of one encoded item.
///
/// `raw` is the full encoding (header included), `payload` the bytes after the
/// header. Trie nodes need both: inline children are compared by their raw
/// encoding while strings are used by payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RlpItem<'a> {
    raw: &'a [u8],
    payload: &'a [u8],
    is_list: bool,
}

#[derive(Clone, Copy)]
struct Header {
    is_list: bool,
    header_len: usize,
    payload_len: usize,
}

impl<'a> RlpItem<'a> {
    /// Decode a single item that must span all of `input`.
    pub fn decode(input: &'a [u8]) -> Result<Self, ProofError> {
        let (item, rest) = Self::decode_prefix(input)?;
        if !rest.is_empty() {
            return Err(ProofError::MalformedEncoding);
        }
        Ok(item)
    }

    fn decode_prefix(input: &'a [u8]) -> Result<(Self, &'a [u8]), ProofError> {
        let header = decode_header(input)?;
        let total_len = header.header_len + header.payload_len;
        let item = RlpItem {
            raw: &input[..total_len],
            payload: &input[header.header_len..total_len],
            is_list: header.is_list,
        };
        Ok((item, &input[total_len..]))
    }

    pub fn is_list(&self) -> bool {
        self.is_list
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// The payload of a string item.
    pub fn bytes(&self) -> Result<&'a [u8], ProofError> {
        if self.is_list {
            return Err(ProofError::MalformedEncoding);
        }
        Ok(self.payload)
    }

    /// The items of a list, in order.
    pub fn items(&self) -> Result<Vec<RlpItem<'a>>, ProofError> {
        if !self.is_list {
            return Err(ProofError::MalformedEncoding);
        }

        let mut out = Vec::new();
        let mut rest = self.payload;
        while !rest.is_empty() {
            let (item, tail) = Self::decode_prefix(rest)?;
            out.push(item);
            rest = tail;
        }
        Ok(out)
    }

    pub fn to_rlp(&self) -> Result<Rlp, ProofError> {
        if !self.is_list {
            return Ok(Rlp::Bytes(self.payload.to_vec()));
        }
        let items = self
            .items()?
            .iter()
            .map(RlpItem::to_rlp)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Rlp::List(items))
    }
}

fn decode_header(input: &[u8]) -> Result<Header, ProofError> {
    let prefix = *input.first().ok_or(ProofError::MalformedEncoding)?;

    let header = match prefix {
        0x00..=0x7f => Header {
            is_list: false,
            header_len: 0,
            payload_len: 1,
        },
        0x80..=0xb7 => {
            let len = (prefix - 0x80) as usize;
            // A lone byte below 0x80 must be encoded as itself.
            if len == 1 && input.get(1).is_some_and(|b| *b < 0x80) {
                return Err(ProofError::MalformedEncoding);
            }
            Header {
                is_list: false,
                header_len: 1,
                payload_len: len,
            }
        }
        0xb8..=0xbf => {
            let len_of_len = (prefix - 0xb7) as usize;
            Header {
                is_list: false,
                header_len: 1 + len_of_len,
                payload_len: read_long_length(input, len_of_len)?,
            }
        }
        0xc0..=0xf7 => Header {
            is_list: true,
            header_len: 1,
            payload_len: (prefix - 0xc0) as usize,
        },
        0xf8..=0xff => {
            let len_of_len = (prefix - 0xf7) as usize;
            Header {
                is_list: true,
                header_len: 1 + len_of_len,
                payload_len: read_long_length(input, len_of_len)?,
            }
        }
    };

    let total_len = header
        .header_len
        .checked_add(header.payload_len)
        .ok_or(ProofError::MalformedEncoding)?;
    if total_len > input.len() {
        return Err(ProofError::MalformedEncoding);
    }
    Ok(header)
}

fn read_long_length(input: &[u8], len_of_len: usize) -> Result<usize, ProofError> {
    let len_bytes = input
        .get(1..1 + len_of_len)
        .ok_or(ProofError::MalformedEncoding)?;
    if len_bytes[0] == 0 {
        return Err(ProofError::MalformedEncoding);
    }
    let len = read_be_usize(len_bytes)?;
    if len <= 55 {
        return Err(ProofError::MalformedEncoding);
    }
    Ok(len)
}

fn read_be_usize(input: &[u8]) -> Result<usize, ProofError> {
    if input.is_empty() || input.len() > core::mem::size_of::<usize>() {
        return Err(ProofError::MalformedEncoding);
    }
    let mut out = 0usize;
    for b in input {
        out = out
            .checked_mul(256)
            .and_then(|v| v.checked_add(*b as usize))
            .ok_or(ProofError::MalformedEncoding)?;
    }
    Ok(out)
}

/// RLP-encode a byte string.
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] <= 0x7f {
        return alloc::vec![data[0]];
    }

    let mut out = encode_header(0x80, data.len());
    out.extend_from_slice(data);
    out
}

/// RLP-encode a list of already-encoded items.
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_len: usize = items.iter().map(|it| it.len()).sum();
    let mut out = encode_header(0xc0, payload_len);
    out.reserve(payload_len);
    for it in items {
        out.extend_from_slice(it);
    }
    out
}

/// RLP-encode an unsigned integer as its minimal big-endian byte string.
pub fn encode_uint(value: u64) -> Vec<u8> {
    encode_bytes(trim_leading_zeros(&value.to_be_bytes()))
}

pub fn trim_leading_zeros(data: &[u8]) -> &[u8] {
    let first = data.iter().position(|b| *b != 0).unwrap_or(data.len());
    &data[first..]
}

fn encode_header(base: u8, len: usize) -> Vec<u8> {
    if len <= 55 {
        let mut out = Vec::with_capacity(1 + len);
        out.push(base + len as u8);
        return out;
    }

    let len_bytes = trim_leading_zeros(&len.to_be_bytes()).to_vec();
    let mut out = Vec::with_capacity(1 + len_bytes.len() + len);
    out.push(base + 55 + len_bytes.len() as u8);
    out.extend_from_slice(&len_bytes);
    out
}
