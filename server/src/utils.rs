use rand::Rng;
use shared::SESSION_ID_DIGITS;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Short shareable session code: a zero-padded random number.
pub fn generate_session_code() -> String {
    let upper = 10u32.pow(SESSION_ID_DIGITS as u32);
    let code = rand::thread_rng().gen_range(0..upper);
    format!("{:0width$}", code, width = SESSION_ID_DIGITS)
}

/// Provisional id for a freshly accepted connection.
///
/// Unique per connection: the accept sequence number is mixed in so two
/// clients behind the same address never collide. Without an address the id
/// falls back to the accept time.
pub fn derive_peer_id(addr: Option<SocketAddr>, seq: u64) -> String {
    match addr {
        Some(addr) => {
            let mut hasher = DefaultHasher::new();
            addr.ip().hash(&mut hasher);
            addr.port().hash(&mut hasher);
            seq.hash(&mut hasher);
            format!("peer-{}-{:08x}", addr.ip(), hasher.finish() as u32)
        }
        None => format!("peer-{}-{}", timestamp_millis(), seq),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_code_is_fixed_width_digits() {
        for _ in 0..200 {
            let code = generate_session_code();
            assert_eq!(code.len(), SESSION_ID_DIGITS);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_peer_ids_differ_per_connection() {
        let addr: SocketAddr = "10.0.0.7:50000".parse().unwrap();
        let first = derive_peer_id(Some(addr), 1);
        let second = derive_peer_id(Some(addr), 2);

        assert!(first.starts_with("peer-10.0.0.7-"));
        assert_ne!(first, second);
        assert_eq!(first, derive_peer_id(Some(addr), 1));
    }

    #[test]
    fn test_peer_id_without_address() {
        let id = derive_peer_id(None, 9);
        assert!(id.starts_with("peer-"));
        assert!(id.ends_with("-9"));
    }
}
