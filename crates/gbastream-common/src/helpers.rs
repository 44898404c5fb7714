//! Environment lookups used by the client configuration.

pub fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

pub fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Reads a comma separated list, falling back to `default` when the variable
/// is unset or contains no usable entries.
pub fn env_list(name: &str, default: &[&str]) -> Vec<String> {
    let parsed = std::env::var(name)
        .map(|value| split_list(&value))
        .unwrap_or_default();
    if parsed.is_empty() {
        default.iter().map(|s| s.to_string()).collect()
    } else {
        parsed
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_skips_blanks() {
        let list = split_list("stun:a:1, ,stun:b:2;stun:c:3,");
        assert_eq!(list, vec!["stun:a:1", "stun:b:2", "stun:c:3"]);
    }

    #[test]
    fn test_env_list_falls_back_when_unset() {
        let list = env_list("GBASTREAM_TEST_SURELY_UNSET_LIST", &["stun:x:1"]);
        assert_eq!(list, vec!["stun:x:1".to_string()]);
    }
}
