//! Room Codes
//!
//! Short human-friendly identifiers a broadcaster shares so watchers can join.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use thiserror::Error;

/// Unambiguous uppercase characters (no 0/O, 1/I/L, 2/Z, 5/S)
const ALPHABET: &[u8] = b"346789ABCDEFGHJKMNPQRTUVWXY";

/// Characters per code, displayed as two groups of four
const CODE_LENGTH: usize = 8;

const GROUP_LENGTH: usize = CODE_LENGTH / 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomCodeError {
    #[error("expected 8 characters, got {0}")]
    Length(usize),

    #[error("invalid character '{0}'")]
    Character(char),
}

/// A room code that can be shared to join a room
///
/// Stored normalized (uppercase, no separators).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a fresh random code
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..CODE_LENGTH)
            .filter_map(|_| ALPHABET.choose(&mut rng))
            .map(|&b| b as char)
            .collect();
        RoomCode(code)
    }

    /// Parse user input, ignoring case, spaces and dashes
    pub fn parse(input: &str) -> Option<Self> {
        input.parse().ok()
    }

    /// Normalized form, as used on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut code = String::with_capacity(CODE_LENGTH);
        for c in input.chars().filter(|c| !c.is_whitespace() && *c != '-') {
            let upper = c.to_ascii_uppercase();
            if !upper.is_ascii() || !ALPHABET.contains(&(upper as u8)) {
                return Err(RoomCodeError::Character(c));
            }
            code.push(upper);
        }

        if code.len() != CODE_LENGTH {
            return Err(RoomCodeError::Length(code.len()));
        }
        Ok(RoomCode(code))
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (head, tail) = self.0.split_at(GROUP_LENGTH.min(self.0.len()));
        write!(f, "{}-{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_lenient() {
        let code: RoomCode = "ABCD-EFGH".parse().unwrap();
        assert_eq!(code.as_str(), "ABCDEFGH");

        let code: RoomCode = " abcd efgh ".parse().unwrap();
        assert_eq!(code.as_str(), "ABCDEFGH");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("ABC".parse::<RoomCode>(), Err(RoomCodeError::Length(3)));
        assert_eq!("ABCDEFGH3".parse::<RoomCode>(), Err(RoomCodeError::Length(9)));
        assert_eq!("ABCD-EFG0".parse::<RoomCode>(), Err(RoomCodeError::Character('0')));
        assert!(RoomCode::parse("ABCD_EFGH").is_none());
    }

    #[test]
    fn test_display_groups() {
        let code = RoomCode("ABCDEFGH".to_string());
        assert_eq!(code.to_string(), "ABCD-EFGH");

        // Display output parses back to the same code
        assert_eq!(RoomCode::parse(&code.to_string()), Some(code));
    }

    #[test]
    fn test_random_codes() {
        let code = RoomCode::random();
        assert_eq!(code.as_str().len(), CODE_LENGTH);
        assert!(code.as_str().bytes().all(|b| ALPHABET.contains(&b)));
        assert_ne!(code, RoomCode::random());
    }
}
