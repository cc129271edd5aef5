//! Grant token generation.

use rand::Rng;

/// Characters a token body is drawn from.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const GROUP_LEN: usize = 4;

/// Generate a grant token such as `WS-7K2Q-M0ZD-PX41-C9RT`.
///
/// The body is `body_length` random characters from [`TOKEN_ALPHABET`],
/// split into dash-separated groups of four.
pub fn generate_grant_token(prefix: &str, body_length: usize) -> String {
    let mut rng = rand::rng();
    let body: Vec<char> = (0..body_length)
        .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();

    let mut token = String::with_capacity(prefix.len() + body_length + body_length / GROUP_LEN + 1);
    token.push_str(prefix);
    for group in body.chunks(GROUP_LEN) {
        token.push('-');
        token.extend(group);
    }
    token
}

/// Trim surrounding whitespace from a client-supplied token.
pub fn normalize_token(raw: &str) -> &str {
    raw.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_shape() {
        let token = generate_grant_token("WS", 16);
        assert_eq!(token.len(), 2 + 4 * 5);
        let parts: Vec<&str> = token.split('-').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "WS");
        for part in &parts[1..] {
            assert_eq!(part.len(), 4);
            assert!(part.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn uneven_body_keeps_short_tail_group() {
        let token = generate_grant_token("X", 6);
        let parts: Vec<&str> = token.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "X");
        assert_eq!(parts[1].len(), 4);
        assert_eq!(parts[2].len(), 2);
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(generate_grant_token("WS", 16), generate_grant_token("WS", 16));
    }

    #[test]
    fn normalize_trims() {
        assert_eq!(normalize_token("  WS-AAAA \n"), "WS-AAAA");
    }
}
