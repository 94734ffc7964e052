use crate::bencode::{raw_dict_value, BencodeValue};
use crate::error::{BittorrentError, Result};
use sha1::{Digest, Sha1};

/// Represents a file in a multi-file torrent
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: Vec<String>,
    pub length: u64,
}

/// Information about the torrent contents
#[derive(Debug, Clone)]
pub struct TorrentInfo {
    /// Suggested name for the file or directory
    pub name: String,
    /// Number of bytes in each piece
    pub piece_length: u64,
    /// Number of pieces, one per 20-byte hash in 'pieces'
    pub piece_count: usize,
    /// Files in the torrent
    pub files: Vec<FileInfo>,
    /// Total length of all files
    pub total_length: u64,
}

fn invalid(message: &str) -> BittorrentError {
    BittorrentError::InvalidTorrent(message.to_string())
}

fn required_u64(value: &BencodeValue, key: &str) -> Result<u64> {
    value
        .get(key)
        .and_then(|v| v.as_integer())
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| BittorrentError::InvalidTorrent(format!("Missing or invalid '{}' field", key)))
}

impl TorrentInfo {
    fn from_bencode(value: &BencodeValue) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(invalid("Info must be a dict"));
        }

        let name = value
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("Missing 'name' field"))?
            .to_string();

        let piece_length = required_u64(value, "piece length")?;
        if piece_length == 0 {
            return Err(invalid("'piece length' must be positive"));
        }

        let pieces = value
            .get("pieces")
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| invalid("Missing 'pieces' field"))?;

        if pieces.len() % 20 != 0 {
            return Err(invalid("Pieces length must be multiple of 20"));
        }
        let piece_count = pieces.len() / 20;

        let files = if value.get("length").is_some() {
            // Single-file mode
            vec![FileInfo {
                path: vec![name.clone()],
                length: required_u64(value, "length")?,
            }]
        } else if let Some(entries) = value.get("files").and_then(|v| v.as_list()) {
            entries
                .iter()
                .map(parse_file_entry)
                .collect::<Result<Vec<_>>>()?
        } else {
            return Err(invalid("Missing 'length' or 'files' field"));
        };

        let total_length = files.iter().map(|f| f.length).sum();

        Ok(TorrentInfo {
            name,
            piece_length,
            piece_count,
            files,
            total_length,
        })
    }
}

fn parse_file_entry(entry: &BencodeValue) -> Result<FileInfo> {
    let length = required_u64(entry, "length")?;

    let path = entry
        .get("path")
        .and_then(|v| v.as_list())
        .ok_or_else(|| invalid("Missing file 'path'"))?
        .iter()
        .map(|component| {
            component
                .as_str()
                .map(String::from)
                .ok_or_else(|| invalid("Invalid path component"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(FileInfo { path, length })
}

/// Top-level metainfo structure from a .torrent file
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// URL of the tracker
    pub announce: String,
    /// Information about the torrent contents
    pub info: TorrentInfo,
    /// SHA1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
}

impl Metainfo {
    pub fn from_bencode(value: BencodeValue, raw_data: &[u8]) -> Result<Self> {
        if value.as_dict().is_none() {
            return Err(invalid("Torrent must be a dict"));
        }

        let announce = value
            .get("announce")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid("Missing 'announce' field"))?
            .to_string();

        let info_value = value
            .get("info")
            .ok_or_else(|| invalid("Missing 'info' field"))?;
        let info = TorrentInfo::from_bencode(info_value)?;

        // Hash the info dict exactly as it was encoded in the file
        let raw_info = raw_dict_value(raw_data, b"info")?;
        let info_hash: [u8; 20] = Sha1::digest(raw_info).into();

        Ok(Metainfo {
            announce,
            info,
            info_hash,
        })
    }

    /// Get the info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }
}
