//! ID and timestamp utilities for Chorus
//!
//! All persisted timestamps are Unix milliseconds (`i64`) so they compare
//! directly inside SQLite.

use chrono::Utc;
use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a conversation thread ID
///
/// Format: `thr-{timestamp_ms}-{random_hex}`
/// Example: `thr-1738300800123-a1b2`
pub fn generate_thread_id() -> String {
    let random: u16 = rand::rng().random();
    format!("thr-{}-{:04x}", now_ms(), random)
}

/// Trigger key for a message-driven coordination.
///
/// Every avatar answering the same message shares this key, which is what the
/// rate-limit gate counts responders against.
pub fn message_trigger_key(channel_id: &str, message_id: &str) -> String {
    format!("msg:{}:{}", channel_id, message_id)
}

/// Trigger key for an ambient coordination in a given epoch.
pub fn ambient_trigger_key(channel_id: &str, tick_id: u64) -> String {
    format!("amb:{}:{}", channel_id, tick_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        // Should be after 2020-01-01 and before 2100-01-01
        assert!(ts > 1577836800000);
        assert!(ts < 4102444800000);
    }

    #[test]
    fn test_generate_thread_id_format() {
        let id = generate_thread_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "thr");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_thread_id_uniqueness() {
        // Random suffix keeps ids distinct within the same millisecond
        let ids: std::collections::HashSet<String> = (0..20).map(|_| generate_thread_id()).collect();
        assert!(ids.len() > 1);
    }

    #[test]
    fn test_trigger_keys() {
        assert_eq!(message_trigger_key("c1", "m9"), "msg:c1:m9");
        assert_eq!(ambient_trigger_key("c1", 7), "amb:c1:7");
        assert_ne!(message_trigger_key("c1", "7"), ambient_trigger_key("c1", 7));
    }
}
