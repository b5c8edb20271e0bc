use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, CoreResult};

const MAX_SHOW_ID_LEN: usize = 64;
const MAX_SESSION_ID_LEN: usize = 128;
const MAX_USER_ID_LEN: usize = 256;
const MAX_ROW_LETTERS: usize = 3;
const MAX_COLUMN: u16 = 999;

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn parse_token(kind: &str, raw: &str, max_len: usize) -> CoreResult<String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(CoreError::ValidationError(format!("{} must not be empty", kind)));
    }
    if value.len() > max_len {
        return Err(CoreError::ValidationError(format!(
            "{} exceeds {} characters",
            kind, max_len
        )));
    }
    if !value.chars().all(is_token_char) {
        return Err(CoreError::ValidationError(format!(
            "{} contains invalid characters: {}",
            kind, value
        )));
    }
    Ok(value.to_string())
}

/// Identifies one screening.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShowId(String);

impl ShowId {
    pub fn parse(raw: &str) -> CoreResult<Self> {
        parse_token("show id", raw, MAX_SHOW_ID_LEN).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Client-generated correlation id for one seat-selection attempt.
///
/// Treated as an untrusted token: it scopes lock ownership and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> CoreResult<Self> {
        parse_token("session id", raw, MAX_SESSION_ID_LEN).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque user identifier handed over by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let value = raw.trim();
        if value.is_empty() || value.len() > MAX_USER_ID_LEN {
            return Err(CoreError::ValidationError("user id must be 1-256 characters".to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Row letters plus a column number, e.g. `D5` or `AA12`.
///
/// Ordering follows the room: rows first (`A` < `Z` < `AA`), then columns
/// numerically, so `A2` sorts before `A10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeatId {
    row: String,
    column: u16,
}

impl SeatId {
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let value = raw.trim().to_ascii_uppercase();
        let split = value
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| CoreError::ValidationError(format!("malformed seat id: {}", raw)))?;
        let (row, column) = value.split_at(split);

        let row_ok = !row.is_empty()
            && row.len() <= MAX_ROW_LETTERS
            && row.chars().all(|c| c.is_ascii_uppercase());
        let column_ok = !column.starts_with('0') && column.chars().all(|c| c.is_ascii_digit());
        if !row_ok || !column_ok {
            return Err(CoreError::ValidationError(format!("malformed seat id: {}", raw)));
        }

        let column: u16 = column
            .parse()
            .ok()
            .filter(|c| *c >= 1 && *c <= MAX_COLUMN)
            .ok_or_else(|| CoreError::ValidationError(format!("malformed seat id: {}", raw)))?;

        Ok(Self { row: row.to_string(), column })
    }

    pub fn row(&self) -> &str {
        &self.row
    }

    /// 1-based row index: `A` = 1, `Z` = 26, `AA` = 27.
    pub fn row_index(&self) -> u32 {
        self.row
            .bytes()
            .fold(0u32, |acc, b| acc * 26 + u32::from(b - b'A' + 1))
    }

    pub fn column(&self) -> u16 {
        self.column
    }
}

impl Ord for SeatId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.row_index()
            .cmp(&other.row_index())
            .then(self.column.cmp(&other.column))
    }
}

impl PartialOrd for SeatId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

macro_rules! string_conversions {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.to_string()
            }
        }
    };
}

string_conversions!(ShowId);
string_conversions!(SessionId);
string_conversions!(UserId);

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.column)
    }
}

impl FromStr for SeatId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SeatId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SeatId> for String {
    fn from(value: SeatId) -> Self {
        value.to_string()
    }
}

/// Parses a batch of raw seat ids, rejecting empty batches and duplicates.
pub fn parse_seats(raw: &[String]) -> CoreResult<Vec<SeatId>> {
    if raw.is_empty() {
        return Err(CoreError::ValidationError("seat list must not be empty".to_string()));
    }

    let mut seats = Vec::with_capacity(raw.len());
    for value in raw {
        let seat = SeatId::parse(value)?;
        if seats.contains(&seat) {
            return Err(CoreError::ValidationError(format!("duplicate seat id: {}", seat)));
        }
        seats.push(seat);
    }
    Ok(seats)
}
