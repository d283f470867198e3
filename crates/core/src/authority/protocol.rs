#![allow(missing_docs)]

//! Wire encoding of the one-shot authorization exchange.
//!
//! The train writes `<trainId>~<current>~<next>` in ASCII; the server reads
//! until the payload decodes, the peer half-closes or the size cap is hit,
//! then answers with a single byte, `1` for granted and `0` for
//! denied, then closes.

use std::fmt;

use crate::{
    error::{ControlError, ControlResult},
    models::Position,
};

/// Upper bound on a request payload; anything longer is malformed.
pub const MAX_REQUEST_LEN: usize = 64;

/// A train asking to move from `current` to `next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub train: u32,
    pub current: Position,
    pub next: Position,
}

impl AuthorizationRequest {
    pub fn new(train: u32, current: Position, next: Position) -> Self {
        Self {
            train,
            current,
            next,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse a request payload. Trailing NULs and whitespace are ignored.
    pub fn decode(payload: &[u8]) -> ControlResult<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| ControlError::parse("request", String::from_utf8_lossy(payload)))?
            .trim_matches(|c: char| c == '\0' || c.is_whitespace());
        let malformed = || ControlError::parse("request", text);

        let mut fields = text.split('~');
        let (Some(train), Some(current), Some(next), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed());
        };
        Ok(Self {
            train: train.parse().map_err(|_| malformed())?,
            current: current.parse()?,
            next: next.parse()?,
        })
    }
}

impl fmt::Display for AuthorizationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}~{}", self.train, self.current, self.next)
    }
}

pub fn encode_response(granted: bool) -> u8 {
    u8::from(granted)
}

pub fn decode_response(byte: u8) -> ControlResult<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ControlError::parse("response", format!("{other:#04x}"))),
    }
}
