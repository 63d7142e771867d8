//! Syntactic token-address validation
//!
//! A plausible address is 32 to 44 symbols drawn from the base-58
//! alphabet (no 0, O, I or l). This says nothing about the identifier
//! existing on any ledger.

/// Minimum address length, inclusive
pub const MIN_ADDRESS_LEN: usize = 32;
/// Maximum address length, inclusive
pub const MAX_ADDRESS_LEN: usize = 44;

/// Check that a captured substring is a syntactically plausible address.
///
/// The bs58 decoder is the alphabet authority: it rejects any byte
/// outside the base-58 set, including the visually ambiguous 0/O/I/l.
pub fn validate(address: &str) -> bool {
    if address.len() < MIN_ADDRESS_LEN || address.len() > MAX_ADDRESS_LEN {
        return false;
    }

    bs58::decode(address).into_vec().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_addresses() {
        assert!(validate("So11111111111111111111111111111111111111112"));
        assert!(validate("7EYnhQoR9YM3N7UoaKRoA44Uy8JeaZV3qyouov87awMs"));
        // Exactly at the length bounds
        assert!(validate(&"1".repeat(32)));
        assert!(validate(&"1".repeat(44)));
    }

    #[test]
    fn test_length_bounds() {
        assert!(!validate(&"1".repeat(31)));
        assert!(!validate(&"1".repeat(45)));
        assert!(!validate(""));
    }

    #[test]
    fn test_disallowed_alphabet() {
        // 0, O, I and l are excluded from base-58
        assert!(!validate(&format!("0{}", "1".repeat(33))));
        assert!(!validate(&format!("O{}", "1".repeat(33))));
        assert!(!validate(&format!("I{}", "1".repeat(33))));
        assert!(!validate(&format!("l{}", "1".repeat(33))));
        // Punctuation never passes
        assert!(!validate(&format!("-{}", "1".repeat(33))));
    }

    #[test]
    fn test_alphanumeric_but_not_base58() {
        // Shape-wise plausible, alphabet-wise not
        assert!(!validate("Abc1234567890defghijklmnopqrstuvwxyzABCDE"));
    }
}
