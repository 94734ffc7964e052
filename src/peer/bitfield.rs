use crate::error::ProtocolError;
use std::collections::BTreeMap;

/// Which pieces a remote peer has told us it holds.
///
/// Filled wholesale from a Bitfield message and then extended one index at a
/// time by Have messages. Available indices are never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerPieces {
    pieces: BTreeMap<u32, bool>,
}

impl PeerPieces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a wire bitfield for a torrent with `piece_count` pieces.
    /// The most significant bit of byte 0 is piece 0. The bitfield must be
    /// exactly `ceil(piece_count / 8)` bytes with every spare trailing bit
    /// clear.
    pub fn from_bitfield(bitfield: &[u8], piece_count: usize) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidBitfield {
            piece_count,
            length: bitfield.len(),
        };

        if bitfield.len() != (piece_count + 7) / 8 {
            return Err(invalid());
        }
        if (piece_count..bitfield.len() * 8).any(|index| bit_is_set(bitfield, index)) {
            return Err(invalid());
        }

        let pieces = (0..piece_count)
            .map(|index| (index as u32, bit_is_set(bitfield, index)))
            .collect();

        Ok(Self { pieces })
    }

    /// Mark a single piece as available. Never unsets.
    pub fn set_available(&mut self, piece_index: u32) {
        self.pieces.insert(piece_index, true);
    }

    /// Check if peer has a specific piece
    pub fn has_piece(&self, piece_index: u32) -> bool {
        self.pieces.get(&piece_index).copied().unwrap_or(false)
    }

    /// Indices currently marked available, in ascending order
    pub fn available(&self) -> Vec<u32> {
        self.pieces
            .iter()
            .filter(|(_, &available)| available)
            .map(|(&index, _)| index)
            .collect()
    }

    pub fn available_count(&self) -> usize {
        self.pieces.values().filter(|&&available| available).count()
    }

    /// Number of indices known, available or not
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}

fn bit_is_set(bitfield: &[u8], index: usize) -> bool {
    let byte_index = index / 8;
    let bit_index = 7 - (index % 8);

    match bitfield.get(byte_index) {
        Some(byte) => (byte >> bit_index) & 1 == 1,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitfield_msb_first() {
        let pieces = PeerPieces::from_bitfield(&[0b1010_0000, 0b0000_0000], 16).unwrap();

        assert_eq!(pieces.len(), 16);
        assert!(pieces.has_piece(0));
        assert!(!pieces.has_piece(1));
        assert!(pieces.has_piece(2));
        for index in 3..16 {
            assert!(!pieces.has_piece(index), "piece {} should be missing", index);
        }
        assert_eq!(pieces.available(), vec![0, 2]);
    }

    #[test]
    fn test_partial_last_byte() {
        let pieces = PeerPieces::from_bitfield(&[0xff, 0b1111_0000], 12).unwrap();

        assert_eq!(pieces.len(), 12);
        assert_eq!(pieces.available_count(), 12);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert_eq!(
            PeerPieces::from_bitfield(&[0xff], 12),
            Err(ProtocolError::InvalidBitfield {
                piece_count: 12,
                length: 1
            })
        );
        assert!(PeerPieces::from_bitfield(&[0xff, 0, 0], 12).is_err());
        assert!(PeerPieces::from_bitfield(&[], 1).is_err());
    }

    #[test]
    fn test_spare_bits_rejected() {
        assert!(PeerPieces::from_bitfield(&[0b1110_0000], 3).is_ok());
        assert_eq!(
            PeerPieces::from_bitfield(&[0b1111_0000], 3),
            Err(ProtocolError::InvalidBitfield {
                piece_count: 3,
                length: 1
            })
        );
    }

    #[test]
    fn test_empty_torrent_takes_empty_bitfield() {
        let pieces = PeerPieces::from_bitfield(&[], 0).unwrap();
        assert!(pieces.is_empty());
    }

    #[test]
    fn test_set_available_never_unsets() {
        let mut pieces = PeerPieces::from_bitfield(&[0b0000_0000], 8).unwrap();
        assert!(!pieces.has_piece(7));

        pieces.set_available(7);
        pieces.set_available(7);

        assert!(pieces.has_piece(7));
        assert_eq!(pieces.available(), vec![7]);
    }
}
