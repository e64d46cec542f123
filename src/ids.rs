//! Identifier generation.
//!
//! Task ids are `bd-` + 8 hex digits, memory ids are `mem-` + 16 hex digits.
//! Everything else (agents, leases, messages, snapshots) uses a plain UUIDv4
//! string.

use rand::RngCore;

fn hex_nonce(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// Generate a new task id: `bd-` followed by an 8 hex-digit nonce.
pub fn new_task_id() -> String {
    format!("bd-{}", hex_nonce(4))
}

/// Generate a new memory id: `mem-` followed by a 16 hex-digit nonce.
pub fn new_memory_id() -> String {
    format!("mem-{}", hex_nonce(8))
}

/// Generate a collision-resistant token for leases, messages, snapshots, and agents.
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_has_expected_shape() {
        let id = new_task_id();
        assert!(id.starts_with("bd-"));
        assert_eq!(id.len(), "bd-".len() + 8);
        assert!(id["bd-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn memory_id_has_expected_shape() {
        let id = new_memory_id();
        assert!(id.starts_with("mem-"));
        assert_eq!(id.len(), "mem-".len() + 16);
    }

    #[test]
    fn ids_are_not_trivially_repeated() {
        let a = new_task_id();
        let b = new_task_id();
        assert_ne!(a, b);
    }
}
