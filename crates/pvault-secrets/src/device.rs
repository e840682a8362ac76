//! Device fingerprint derivation.
//!
//! The fingerprint is generated once, stored as a secure entry and reused. It
//! is never transmitted or exported. Preferred form is CSPRNG-derived; hosts
//! whose RNG cannot be reached fall back to a hash of environment signals.

/// Number of random bytes behind a CSPRNG fingerprint.
pub const FINGERPRINT_RANDOM_BYTES: usize = 16;

/// Format CSPRNG output as a fingerprint: `dfp-<hex>`.
pub fn fingerprint_from_random(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(4 + bytes.len() * 2);
    out.push_str("dfp-");
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Derive a stable fingerprint from hostname, user, OS and architecture:
/// `env-<first 32 hex chars of BLAKE3>`.
pub fn environment_fingerprint() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".into());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".into());

    fingerprint_from_signals(&[
        &host,
        &user,
        std::env::consts::OS,
        std::env::consts::ARCH,
    ])
}

fn fingerprint_from_signals(signals: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"pvault-device-fingerprint-v1");
    for signal in signals {
        // length-prefix each signal so ("ab","c") and ("a","bc") differ
        hasher.update(&(signal.len() as u64).to_be_bytes());
        hasher.update(signal.as_bytes());
    }
    let hex = hasher.finalize().to_hex();
    format!("env-{}", &hex.as_str()[..32])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_fingerprint_format() {
        let fp = fingerprint_from_random(&[0x00, 0xAB, 0xFF]);
        assert_eq!(fp, "dfp-00abff");
    }

    #[test]
    fn test_environment_fingerprint_is_stable() {
        let a = environment_fingerprint();
        let b = environment_fingerprint();
        assert_eq!(a, b);
        assert!(a.starts_with("env-"));
        assert_eq!(a.len(), 4 + 32);
    }

    #[test]
    fn test_signal_boundaries_matter() {
        assert_ne!(
            fingerprint_from_signals(&["ab", "c"]),
            fingerprint_from_signals(&["a", "bc"])
        );
    }
}
