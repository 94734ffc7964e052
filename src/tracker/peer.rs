use crate::bencode::BencodeValue;
use crate::error::{BittorrentError, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Parse the compact peer format: 6 bytes per peer, 4 IP + 2 port
pub fn from_compact_list(data: &[u8]) -> Result<Vec<SocketAddr>> {
    if data.len() % 6 != 0 {
        return Err(BittorrentError::TrackerError(format!(
            "Compact peer list length {} is not a multiple of 6",
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect())
}

/// Parse the dictionary peer format: a list of {ip, port, peer id}
pub fn from_dict_list(list: &[BencodeValue]) -> Result<Vec<SocketAddr>> {
    list.iter()
        .map(|peer| {
            let ip: IpAddr = peer
                .get("ip")
                .and_then(|v| v.as_str())
                .ok_or_else(|| BittorrentError::TrackerError("Missing peer 'ip'".to_string()))?
                .parse()
                .map_err(|_| BittorrentError::TrackerError("Invalid peer IP address".to_string()))?;

            let port = peer
                .get("port")
                .and_then(|v| v.as_integer())
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| BittorrentError::TrackerError("Missing peer 'port'".to_string()))?;

            Ok(SocketAddr::new(ip, port))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn test_compact_peers() {
        let peers = from_compact_list(&[127, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0, 80]).unwrap();

        assert_eq!(
            peers,
            vec![
                "127.0.0.1:6881".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:80".parse().unwrap(),
            ]
        );
    }

    #[test]
    fn test_compact_peers_bad_length() {
        assert!(from_compact_list(&[1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_dict_peers() {
        let value = decode(b"ld2:ip9:127.0.0.17:peer id20:aaaaaaaaaaaaaaaaaaaa4:porti6881eee").unwrap();
        let peers = from_dict_list(value.as_list().unwrap()).unwrap();

        assert_eq!(peers, vec!["127.0.0.1:6881".parse::<SocketAddr>().unwrap()]);
    }
}
