use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{SeatId, ShowId};
use crate::{CoreError, CoreResult};

const MAX_ROWS: u32 = 702; // A..ZZ
const MAX_COLUMNS: u16 = 999;

/// Price tier of a seat. Assigned per row in the room layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatCategory {
    Standard,
    Premium,
    Vip,
}

impl SeatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatCategory::Standard => "STANDARD",
            SeatCategory::Premium => "PREMIUM",
            SeatCategory::Vip => "VIP",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STANDARD" => Some(SeatCategory::Standard),
            "PREMIUM" => Some(SeatCategory::Premium),
            "VIP" => Some(SeatCategory::Vip),
            _ => None,
        }
    }
}

/// Room geometry: `rows` rows labelled `A`, `B`, ... and `columns` seats per row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowLayout {
    pub rows: u32,
    pub columns: u16,
    /// Row label -> category. Rows not listed are `Standard`.
    #[serde(default)]
    pub row_categories: BTreeMap<String, SeatCategory>,
}

impl ShowLayout {
    pub fn new(rows: u32, columns: u16) -> CoreResult<Self> {
        let layout = Self { rows, columns, row_categories: BTreeMap::new() };
        layout.validate()?;
        Ok(layout)
    }

    pub fn with_category(mut self, row: &str, category: SeatCategory) -> Self {
        self.row_categories.insert(row.to_ascii_uppercase(), category);
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.rows == 0 || self.rows > MAX_ROWS {
            return Err(CoreError::ValidationError(format!("rows must be 1-{}", MAX_ROWS)));
        }
        if self.columns == 0 || self.columns > MAX_COLUMNS {
            return Err(CoreError::ValidationError(format!("columns must be 1-{}", MAX_COLUMNS)));
        }
        for row in self.row_categories.keys() {
            let probe = SeatId::parse(&format!("{}1", row))?;
            if probe.row_index() > self.rows {
                return Err(CoreError::ValidationError(format!("row {} is outside the room", row)));
            }
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.rows as usize * self.columns as usize
    }

    pub fn contains(&self, seat: &SeatId) -> bool {
        seat.row_index() <= self.rows && seat.column() <= self.columns
    }

    pub fn category_of(&self, seat: &SeatId) -> SeatCategory {
        self.row_categories
            .get(seat.row())
            .copied()
            .unwrap_or(SeatCategory::Standard)
    }

    /// Every seat of the room in natural order.
    pub fn seats(&self) -> Vec<SeatId> {
        let mut seats = Vec::with_capacity(self.capacity());
        for row in 1..=self.rows {
            let label = row_label(row);
            for column in 1..=self.columns {
                if let Ok(seat) = SeatId::parse(&format!("{}{}", label, column)) {
                    seats.push(seat);
                }
            }
        }
        seats
    }
}

/// Inverse of `SeatId::row_index`.
pub fn row_label(mut index: u32) -> String {
    let mut label = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        label.push(b'A' + rem as u8);
        index = (index - 1) / 26;
    }
    label.reverse();
    String::from_utf8(label).unwrap_or_default()
}

/// A screening: movie, room and time slot are carried as plain labels since
/// the catalog that owns them lives outside this system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Show {
    pub id: ShowId,
    pub title: String,
    pub room: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub layout: ShowLayout,
}
