//! Short random content identifiers.

use rand::Rng;

/// 64-symbol alphabet; 8 symbols give a 2^48 id space.
const ALPHABET: &[u8; 64] = b"abcdefghijklmnopqrstuvwxyz0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_-";

pub const ID_LEN: usize = 8;

/// Generate a new 8-character identifier from the OS-seeded thread RNG.
pub fn random_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// True if `s` could have been produced by [`random_id`].
pub fn is_valid_id(s: &str) -> bool {
    s.len() == ID_LEN && s.bytes().all(|b| ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_have_fixed_length_and_alphabet() {
        for _ in 0..200 {
            let id = random_id();
            assert_eq!(id.len(), ID_LEN);
            assert!(is_valid_id(&id), "unexpected id {id}");
        }
    }

    #[test]
    fn ids_do_not_repeat_in_small_samples() {
        let ids: HashSet<String> = (0..1000).map(|_| random_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn rejects_foreign_ids() {
        assert!(!is_valid_id("short"));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id("abc/defg"));
        assert!(is_valid_id("aB3_-xyZ"));
    }
}
