//! A narrow, hand-rolled canonical binary codec in the bencode family:
//! `i<n>e` for unsigned integers, `<len>:bytes` for byte strings, `l...e` for
//! lists, `d...e` for dictionaries with lexicographically sorted keys.
//!
//! This is intentionally not a general-purpose serde backend: the only
//! documents this crate ever needs to encode are small, fixed-shape
//! dictionaries (metainfo), so a `Value` tree plus a couple of typed
//! convenience methods is simpler and sufficient.

use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unexpected end of input while decoding bencode")]
    UnexpectedEof,
    #[error("expected a digit at position {0}")]
    ExpectedDigit(usize),
    #[error("invalid bencode tag byte {0:#x} at position {1}")]
    InvalidTag(u8, usize),
    #[error("integer overflow while decoding bencode")]
    IntegerOverflow,
    #[error("trailing bytes after a complete bencode value")]
    TrailingBytes,
    #[error("dict keys were not in sorted order")]
    UnsortedKeys,
    #[error("type mismatch: expected {expected}, found a different value")]
    TypeMismatch { expected: &'static str },
    #[error("missing dict key {0:?}")]
    MissingKey(String),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Int(u64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn as_int(&self) -> Result<u64> {
        match self {
            Value::Int(n) => Ok(*n),
            _ => Err(Error::TypeMismatch { expected: "int" }),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Value::Bytes(b) => Ok(b),
            _ => Err(Error::TypeMismatch { expected: "bytes" }),
        }
    }

    pub fn as_list(&self) -> Result<&[Value]> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(Error::TypeMismatch { expected: "list" }),
        }
    }

    pub fn as_dict(&self) -> Result<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Ok(d),
            _ => Err(Error::TypeMismatch { expected: "dict" }),
        }
    }

    pub fn get<'a>(&'a self, key: &str) -> Result<&'a Value> {
        self.as_dict()?
            .get(key.as_bytes())
            .ok_or_else(|| Error::MissingKey(key.to_string()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(n) => {
                out.push(b'i');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'e');
            }
            Value::Bytes(b) => {
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(b);
            }
            Value::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Value::Dict(map) => {
                out.push(b'd');
                // BTreeMap iterates keys in sorted byte order already, which
                // is exactly the canonical ordering bencode requires.
                for (k, v) in map {
                    Value::Bytes(k.clone()).encode_into(out);
                    v.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let value = decode_value(buf, &mut pos)?;
        if pos != buf.len() {
            return Err(Error::TrailingBytes);
        }
        Ok(value)
    }
}

fn decode_value(buf: &[u8], pos: &mut usize) -> Result<Value> {
    match buf.get(*pos) {
        Some(b'i') => decode_int(buf, pos).map(Value::Int),
        Some(b'l') => decode_list(buf, pos),
        Some(b'd') => decode_dict(buf, pos),
        Some(b'0'..=b'9') => decode_bytes(buf, pos).map(Value::Bytes),
        Some(&other) => Err(Error::InvalidTag(other, *pos)),
        None => Err(Error::UnexpectedEof),
    }
}

fn decode_digits_until(buf: &[u8], pos: &mut usize, terminator: u8) -> Result<u64> {
    let start = *pos;
    while buf.get(*pos).copied().is_some_and(|b| b != terminator) {
        if !buf[*pos].is_ascii_digit() {
            return Err(Error::ExpectedDigit(*pos));
        }
        *pos += 1;
    }
    if *pos >= buf.len() {
        return Err(Error::UnexpectedEof);
    }
    let digits = &buf[start..*pos];
    if digits.is_empty() {
        return Err(Error::ExpectedDigit(*pos));
    }
    let s = std::str::from_utf8(digits).map_err(|_| Error::ExpectedDigit(start))?;
    let n = s.parse::<u64>().map_err(|_| Error::IntegerOverflow)?;
    *pos += 1; // consume terminator
    Ok(n)
}

fn decode_int(buf: &[u8], pos: &mut usize) -> Result<u64> {
    *pos += 1; // consume 'i'
    let n = decode_digits_until(buf, pos, b'e')?;
    Ok(n)
}

fn decode_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = decode_digits_until(buf, pos, b':')? as usize;
    let end = pos.checked_add(len).ok_or(Error::IntegerOverflow)?;
    if end > buf.len() {
        return Err(Error::UnexpectedEof);
    }
    let out = buf[*pos..end].to_vec();
    *pos = end;
    Ok(out)
}

fn decode_list(buf: &[u8], pos: &mut usize) -> Result<Value> {
    *pos += 1; // consume 'l'
    let mut items = Vec::new();
    loop {
        match buf.get(*pos) {
            Some(b'e') => {
                *pos += 1;
                return Ok(Value::List(items));
            }
            Some(_) => items.push(decode_value(buf, pos)?),
            None => return Err(Error::UnexpectedEof),
        }
    }
}

fn decode_dict(buf: &[u8], pos: &mut usize) -> Result<Value> {
    *pos += 1; // consume 'd'
    let mut map = BTreeMap::new();
    let mut last_key: Option<Vec<u8>> = None;
    loop {
        match buf.get(*pos) {
            Some(b'e') => {
                *pos += 1;
                return Ok(Value::Dict(map));
            }
            Some(_) => {
                let key = decode_bytes(buf, pos)?;
                if let Some(prev) = &last_key
                    && *prev >= key
                {
                    return Err(Error::UnsortedKeys);
                }
                let value = decode_value(buf, pos)?;
                last_key = Some(key.clone());
                map.insert(key, value);
            }
            None => return Err(Error::UnexpectedEof),
        }
    }
}
