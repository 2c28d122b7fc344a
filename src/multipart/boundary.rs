//! Multipart boundary tokens

use rand::Rng;

/// Random bytes per generated boundary (hex encoded to twice as many chars)
const BOUNDARY_BYTES: usize = 30;

/// Longest boundary allowed by RFC 2046
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Generate a fresh random boundary token
pub fn random_boundary() -> String {
    let mut raw = [0u8; BOUNDARY_BYTES];
    rand::thread_rng().fill(&mut raw[..]);

    let mut token = String::with_capacity(BOUNDARY_BYTES * 2);
    for byte in raw {
        token.push_str(&format!("{:02x}", byte));
    }
    token
}

/// Strip leading and trailing `-` padding from a boundary parameter
///
/// Some cameras put the wire marker's leading `--` into the parameter,
/// advertising `boundary=--myboundary` while emitting `--myboundary`.
/// Trimming recovers `myboundary`. Extra dashes on the wire itself are not
/// handled.
pub fn trim_boundary(raw: &str) -> &str {
    raw.trim_matches('-')
}

/// Check that a boundary is non-empty, short enough, and uses only
/// characters RFC 2046 permits
pub fn is_valid_boundary(boundary: &str) -> bool {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return false;
    }

    boundary.bytes().all(|b| {
        b.is_ascii_alphanumeric() || b"'()+_,-./:=? ".contains(&b)
    }) && !boundary.ends_with(' ')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_boundary_shape() {
        let boundary = random_boundary();

        assert_eq!(boundary.len(), 60);
        assert!(boundary.bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(is_valid_boundary(&boundary));
    }

    #[test]
    fn test_random_boundary_is_fresh() {
        assert_ne!(random_boundary(), random_boundary());
    }

    #[test]
    fn test_trim_boundary() {
        assert_eq!(trim_boundary("--myboundary"), "myboundary");
        assert_eq!(trim_boundary("myboundary--"), "myboundary");
        assert_eq!(trim_boundary("my-boundary"), "my-boundary");
        assert_eq!(trim_boundary("----"), "");
    }

    #[test]
    fn test_is_valid_boundary() {
        assert!(is_valid_boundary("X"));
        assert!(is_valid_boundary("boundarydonotcross"));
        assert!(!is_valid_boundary(""));
        assert!(!is_valid_boundary(&"a".repeat(71)));
        assert!(!is_valid_boundary("bad\r\nboundary"));
        assert!(!is_valid_boundary("trailing "));
    }
}
