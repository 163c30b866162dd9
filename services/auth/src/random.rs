//! Random string generation for tokens, session ids, and OAuth state
//!
//! All material comes from the OS CSPRNG. Characters are drawn by rejection
//! sampling so no alphabet position is favored, with a bounded retry budget
//! instead of an unbounded loop.

use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

/// Characters allowed in reset tokens and OAuth state nonces. Every one of
/// them survives a URL path segment without escaping.
pub const TOKEN_ALPHABET: &str = concat!(
    "abcdefghijklmnopqrstuvwxyz",
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "0123456789",
    "-_~",
);

/// Characters used for session identifiers.
pub const SESSION_ID_ALPHABET: &str = concat!(
    "abcdefghijklmnopqrstuvwxyz",
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "0123456789",
);

/// Draws allowed per output character before generation gives up.
const BUDGET_PER_CHAR: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RandomError {
    /// Alphabets must be ASCII with between 2 and 256 characters.
    #[error("invalid alphabet for random string generation")]
    InvalidAlphabet,
    /// The rejection-sampling budget ran out before `n` characters were
    /// accepted. Reported to the caller, never silently degraded.
    #[error("random string generation exceeded its retry budget")]
    RetryBudgetExhausted,
}

/// Generate an unbiased random string of `n` characters drawn from
/// `alphabet`.
///
/// Random bytes are masked down to the smallest power-of-two range covering
/// the alphabet and rejected when they fall past its end, so the result
/// carries no modulo bias.
pub fn random_string(n: usize, alphabet: &str) -> Result<String, RandomError> {
    if !alphabet.is_ascii() {
        return Err(RandomError::InvalidAlphabet);
    }
    let alphabet = alphabet.as_bytes();
    if alphabet.len() < 2 || alphabet.len() > 256 {
        return Err(RandomError::InvalidAlphabet);
    }

    let mask = (alphabet.len().next_power_of_two() - 1) as u8;
    let mut out = String::with_capacity(n);
    let mut budget = n.saturating_mul(BUDGET_PER_CHAR);
    let mut buf = [0u8; 64];
    let mut idx = buf.len();

    while out.len() < n {
        if budget == 0 {
            return Err(RandomError::RetryBudgetExhausted);
        }
        if idx == buf.len() {
            OsRng.fill_bytes(&mut buf);
            idx = 0;
        }
        let candidate = (buf[idx] & mask) as usize;
        idx += 1;
        budget -= 1;
        if candidate < alphabet.len() {
            out.push(alphabet[candidate] as char);
        }
    }

    Ok(out)
}

/// Constant-time byte comparison, used wherever an attacker-supplied value is
/// checked against a stored secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_requested_length_from_alphabet() {
        let token = random_string(32, TOKEN_ALPHABET).expect("generation should succeed");
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| TOKEN_ALPHABET.contains(c)));
    }

    #[test]
    fn consecutive_strings_differ() {
        let a = random_string(32, TOKEN_ALPHABET).unwrap();
        let b = random_string(32, TOKEN_ALPHABET).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_degenerate_alphabets() {
        assert_eq!(random_string(8, ""), Err(RandomError::InvalidAlphabet));
        assert_eq!(random_string(8, "x"), Err(RandomError::InvalidAlphabet));
        assert_eq!(random_string(8, "héllo"), Err(RandomError::InvalidAlphabet));
    }

    #[test]
    fn zero_length_is_empty() {
        assert_eq!(random_string(0, TOKEN_ALPHABET).unwrap(), "");
    }

    #[test]
    fn constant_time_eq_matches_semantics() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"short", b"longer"));
        assert!(constant_time_eq(b"", b""));
    }
}
