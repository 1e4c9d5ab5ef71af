//! Grid wire protocol.
//!
//! Every frame is UTF-8 text of the form `<type>:<payload>`, split on the
//! first colon. The only untyped frame is the grid snapshot the server sends
//! first on every connection.
//!
//! Inbound types: `p` (cursor position), `s` (toggle a cell).
//! Outbound types: `c` (assigned id), `r` (peer joined), `d` (peer left),
//! `p` (relayed position), `s` (toggle result).

use std::fmt;

use crate::error::{GridError, Result};

/// A decoded `<type>:<payload>` frame borrowing from the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub kind: &'a str,
    pub payload: &'a str,
}

impl<'a> Frame<'a> {
    pub fn parse(text: &'a str) -> Result<Self> {
        let (kind, payload) = text
            .split_once(':')
            .ok_or_else(|| GridError::ProtocolMalformed(format!("missing type separator in {text:?}")))?;
        Ok(Self { kind, payload })
    }
}

/// A cursor position broadcast by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: String,
    x: String,
    y: String,
}

impl Position {
    /// Parse `<id>:<x>:<y>`. Coordinates must be finite numbers; they are kept
    /// as written for relay.
    pub fn parse(payload: &str) -> Result<Self> {
        let mut parts = payload.rsplitn(3, ':');
        let (Some(y), Some(x), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GridError::ProtocolMalformed(format!(
                "position needs <id>:<x>:<y>, got {payload:?}"
            )));
        };
        for coord in [x, y] {
            let valid = coord.parse::<f64>().map(f64::is_finite).unwrap_or(false);
            if !valid {
                return Err(GridError::ProtocolMalformed(format!("bad coordinate {coord:?}")));
            }
        }
        Ok(Self {
            id: id.to_string(),
            x: x.to_string(),
            y: y.to_string(),
        })
    }
}

/// Parse the payload of an `s` frame. Range checks are left to the grid.
pub fn parse_cell(payload: &str) -> Result<i64> {
    payload
        .trim()
        .parse()
        .map_err(|_| GridError::ProtocolMalformed(format!("bad cell index {payload:?}")))
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encoded grid bytes, sent once before anything else.
    Snapshot(String),
    Assigned(String),
    Joined(String),
    Left(String),
    Position(Position),
    Toggled { index: i64, bit: u8 },
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outbound::Snapshot(encoded) => f.write_str(encoded),
            Outbound::Assigned(id) => write!(f, "c:{id}"),
            Outbound::Joined(id) => write!(f, "r:{id}"),
            Outbound::Left(id) => write!(f, "d:{id}"),
            Outbound::Position(p) => write!(f, "p:{}:{}:{}", p.id, p.x, p.y),
            Outbound::Toggled { index, bit } => write!(f, "s:{index}:{bit}"),
        }
    }
}
