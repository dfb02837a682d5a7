//! Cache keys: SQL fingerprints and the primary-key list codec
//!
//! # PK list format
//!
//! ```text
//! version:u8  count:u32  { arity:u32  { tag:u8 payload }* }*
//! ```
//!
//! All integers are big-endian. Value tags:
//!
//! - `Null`: `0x00`
//! - `Bool`: `0x01` + `0x00`/`0x01`
//! - `Int`: `0x02` + 8 bytes
//! - `UInt`: `0x03` + 8 bytes
//! - `Text`: `0x04` + 4 bytes length + UTF-8 bytes
//! - `Bytes`: `0x05` + 4 bytes length + raw bytes

use query_core::{CacheError, Pk, Result, Value};
use sha2::{Digest, Sha256};

/// Version byte leading every encoded PK list
pub const PK_LIST_VERSION: u8 = 1;

mod tags {
    pub const NULL: u8 = 0x00;
    pub const BOOL: u8 = 0x01;
    pub const INT: u8 = 0x02;
    pub const UINT: u8 = 0x03;
    pub const TEXT: u8 = 0x04;
    pub const BYTES: u8 = 0x05;
}

/// Build the fingerprint identifying a cached id-list.
///
/// Whitespace runs outside quoted regions (`'...'`, `"..."`, `` `...` ``)
/// collapse to a single space and `\`-escaped characters stay inside their
/// region. The rendered arguments are then appended in order:
/// `SELECT * FROM user WHERE age>?-[18]`.
pub fn fingerprint(sql: &str, args: &[Value]) -> String {
    let mut out = normalize_sql(sql);
    out.push_str("-[");
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&arg.to_string());
    }
    out.push(']');
    out
}

fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    // Closing character of the quoted region being copied, if any
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut pending_space = false;

    for c in sql.trim().chars() {
        if let Some(close) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == close {
                quote = None;
            }
            continue;
        }

        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if matches!(c, '\'' | '"' | '`') {
            quote = Some(c);
        }
        out.push(c);
    }
    out
}

/// Short, stable digest of a fingerprint, used where key length must stay bounded
pub fn fingerprint_digest(fingerprint: &str) -> String {
    let digest = Sha256::digest(fingerprint.as_bytes());
    hex::encode(&digest[..8])
}

/// Storage key of a bean
///
/// The table name is length-prefixed so a `:` inside it cannot move the
/// boundary between table and id.
pub fn bean_key(table: &str, id: &str) -> String {
    format!("bean:{}:{}:{}", table.len(), table, id)
}

/// Storage key of an id-list, length-prefixed like [`bean_key`]
pub fn ids_key(table: &str, fingerprint: &str) -> String {
    format!("sql:{}:{}:{}", table.len(), table, fingerprint)
}

/// Encode an ordered list of primary keys
pub fn encode_pk_list(pks: &[Pk]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(5 + pks.len() * 13);
    buf.push(PK_LIST_VERSION);
    put_len(&mut buf, pks.len(), "pk list")?;
    for pk in pks {
        put_len(&mut buf, pk.len(), "composite key")?;
        for value in pk.values() {
            encode_value(&mut buf, value)?;
        }
    }
    Ok(buf)
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => buf.push(tags::NULL),
        Value::Bool(b) => {
            buf.push(tags::BOOL);
            buf.push(u8::from(*b));
        }
        Value::Int(i) => {
            buf.push(tags::INT);
            buf.extend_from_slice(&i.to_be_bytes());
        }
        Value::UInt(u) => {
            buf.push(tags::UINT);
            buf.extend_from_slice(&u.to_be_bytes());
        }
        Value::Text(s) => {
            buf.push(tags::TEXT);
            put_len(buf, s.len(), "text")?;
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            buf.push(tags::BYTES);
            put_len(buf, b.len(), "bytes")?;
            buf.extend_from_slice(b);
        }
    }
    Ok(())
}

fn put_len(buf: &mut Vec<u8>, len: usize, what: &str) -> Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| CacheError::Encoding(format!("{} too long", what)))?;
    buf.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Decode a list produced by [`encode_pk_list`]
pub fn decode_pk_list(bytes: &[u8]) -> Result<Vec<Pk>> {
    let mut reader = Reader { bytes, pos: 0 };

    let version = reader.u8()?;
    if version != PK_LIST_VERSION {
        return Err(CacheError::Encoding(format!(
            "unsupported pk list version {}",
            version
        )));
    }

    let count = reader.len()?;
    // Each key needs at least its arity prefix, which bounds a corrupt count
    let mut pks = Vec::with_capacity(count.min(reader.remaining() / 4));
    for _ in 0..count {
        let arity = reader.len()?;
        let mut values = Vec::with_capacity(arity.min(reader.remaining()));
        for _ in 0..arity {
            values.push(reader.value()?);
        }
        pks.push(Pk::new(values));
    }

    if reader.remaining() != 0 {
        return Err(CacheError::Encoding(format!(
            "{} trailing bytes after pk list",
            reader.remaining()
        )));
    }
    Ok(pks)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CacheError::Encoding("unexpected end of input".to_string()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn array8(&mut self) -> Result<[u8; 8]> {
        self.take(8)?
            .try_into()
            .map_err(|_| CacheError::Encoding("failed to read 8 bytes".to_string()))
    }

    fn len(&mut self) -> Result<usize> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CacheError::Encoding("failed to read length".to_string()))?;
        Ok(u32::from_be_bytes(bytes) as usize)
    }

    fn value(&mut self) -> Result<Value> {
        match self.u8()? {
            tags::NULL => Ok(Value::Null),
            tags::BOOL => Ok(Value::Bool(self.u8()? != 0)),
            tags::INT => Ok(Value::Int(i64::from_be_bytes(self.array8()?))),
            tags::UINT => Ok(Value::UInt(u64::from_be_bytes(self.array8()?))),
            tags::TEXT => {
                let len = self.len()?;
                let raw = self.take(len)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|e| CacheError::Encoding(format!("invalid utf-8 in key: {}", e)))?;
                Ok(Value::Text(s.to_string()))
            }
            tags::BYTES => {
                let len = self.len()?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            tag => Err(CacheError::Encoding(format!("unknown value tag {:#04x}", tag))),
        }
    }
}
