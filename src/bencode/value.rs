use std::collections::BTreeMap;

/// Represents a bencoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    /// Integer: i<number>e
    Integer(i64),
    /// Byte string: <length>:<contents>
    String(Vec<u8>),
    /// List: l<values>e
    List(Vec<BencodeValue>),
    /// Dictionary: d<key-value pairs>e
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Byte string interpreted as UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up `key` when this value is a dictionary
    pub fn get(&self, key: &str) -> Option<&BencodeValue> {
        self.as_dict()?.get(key.as_bytes())
    }
}
