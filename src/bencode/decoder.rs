use crate::error::{BittorrentError, Result};
use super::BencodeValue;
use std::collections::BTreeMap;

/// Deepest list/dictionary nesting accepted before decoding gives up
pub const MAX_DEPTH: usize = 64;

/// Decode bencoded data into a BencodeValue
pub fn decode(data: &[u8]) -> Result<BencodeValue> {
    Decoder::new(data).value()
}

/// Raw encoded bytes of the value stored under `key` in a top-level
/// dictionary, exactly as they appear in `data`.
pub fn raw_dict_value<'a>(data: &'a [u8], key: &[u8]) -> Result<&'a [u8]> {
    let mut decoder = Decoder::new(data);
    decoder.expect(b'd')?;

    while decoder.peek()? != b'e' {
        let entry_key = decoder.byte_string()?;
        let start = decoder.pos;
        decoder.value()?;

        if entry_key == key {
            return Ok(&data[start..decoder.pos]);
        }
    }

    Err(error(format!(
        "Key '{}' not found",
        String::from_utf8_lossy(key)
    )))
}

fn error(message: impl Into<String>) -> BittorrentError {
    BittorrentError::BencodeError(message.into())
}

/// Cursor over a bencoded buffer
struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| error("Unexpected end of input"))
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        let found = self.peek()?;
        if found != byte {
            return Err(error(format!(
                "Expected '{}' at {}, found '{}'",
                byte as char, self.pos, found as char
            )));
        }
        self.pos += 1;
        Ok(())
    }

    /// Consume bytes up to (not including) `terminator` and return them
    fn take_until(&mut self, terminator: u8) -> Result<&'a [u8]> {
        let data = self.data;
        let rest = &data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == terminator)
            .ok_or_else(|| error(format!("Missing '{}'", terminator as char)))?;

        self.pos += len + 1;
        Ok(&rest[..len])
    }

    fn value(&mut self) -> Result<BencodeValue> {
        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(),
            b'd' => self.dict(),
            b'0'..=b'9' => Ok(BencodeValue::String(self.byte_string()?.to_vec())),
            c => Err(error(format!("Invalid bencode token: {}", c as char))),
        }
    }

    fn integer(&mut self) -> Result<BencodeValue> {
        self.expect(b'i')?;
        let digits = self.take_until(b'e')?;

        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(BencodeValue::Integer)
            .ok_or_else(|| error("Invalid integer"))
    }

    fn byte_string(&mut self) -> Result<&'a [u8]> {
        let digits = self.take_until(b':')?;
        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| error("Invalid string length"))?;

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| error("String length exceeds data"))?;

        let data = self.data;
        let bytes = &data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn list(&mut self) -> Result<BencodeValue> {
        self.expect(b'l')?;
        self.descend()?;

        let mut list = Vec::new();
        while self.peek()? != b'e' {
            list.push(self.value()?);
        }
        self.pos += 1;
        self.depth -= 1;

        Ok(BencodeValue::List(list))
    }

    fn dict(&mut self) -> Result<BencodeValue> {
        self.expect(b'd')?;
        self.descend()?;

        let mut dict = BTreeMap::new();
        while self.peek()? != b'e' {
            let key = self.byte_string()?.to_vec();
            let value = self.value()?;
            dict.insert(key, value);
        }
        self.pos += 1;
        self.depth -= 1;

        Ok(BencodeValue::Dict(dict))
    }

    fn descend(&mut self) -> Result<()> {
        if self.depth == MAX_DEPTH {
            return Err(error(format!(
                "Nesting deeper than {} levels at {}",
                MAX_DEPTH, self.pos
            )));
        }
        self.depth += 1;
        Ok(())
    }
}
