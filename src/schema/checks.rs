// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Element-wise column checks.
//!
//! Each check looks at one coerced cell at a time, and either accepts it or
//! describes what is wrong with it. Checks never see the rest of the row.

use crate::config::NamedPriorities;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Cell value after coercion to its declared column type.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    TextList(Vec<String>),
    Float(f64),
    Date(NaiveDate),
}

impl Display for Cell {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Text(text) => write!(fmt, "{text:?}"),
            Self::TextList(texts) => write!(fmt, "{texts:?}"),
            Self::Float(value) => write!(fmt, "{value}"),
            Self::Date(date) => write!(fmt, "{date}"),
        }
    }
}

/// Check applied to every non-null cell of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnCheck {
    /// Numeric value must lie inside inclusive range.
    InRange { min: f64, max: f64 },

    /// Text must be one of the listed values.
    OneOf(Vec<String>),

    /// Text is a separator-joined combination of named values in priority
    /// order.
    NamedPriority(NamedPriorities),

    /// Text must start with one of the listed prefixes.
    Prefixed(Vec<String>),

    /// Date must not lie in the future.
    NotInFuture,
}

impl ColumnCheck {
    /// Apply check to a coerced cell.
    ///
    /// Checks that do not concern the cell's type accept it.
    ///
    /// # Errors
    ///
    /// - Return description of the failure if the cell is rejected.
    pub fn apply(&self, cell: &Cell) -> Result<(), String> {
        match (self, cell) {
            (Self::InRange { min, max }, Cell::Float(value)) => {
                if value < min || value > max {
                    return Err(format!("value {value} outside {min}..={max}"));
                }
            }
            (Self::OneOf(allowed), Cell::Text(text)) => {
                if !allowed.iter().any(|value| value == text) {
                    return Err(format!("value {text:?} is not one of {allowed:?}"));
                }
            }
            (Self::NamedPriority(priorities), Cell::Text(text)) => {
                named_priority(text, priorities)?;
            }
            (Self::Prefixed(prefixes), Cell::Text(text)) => {
                if !lineament_id(text, prefixes) {
                    return Err(format!(
                        "identifier {text:?} does not start with one of {prefixes:?}"
                    ));
                }
            }
            (Self::NotInFuture, Cell::Date(date)) => {
                if *date > Local::now().date_naive() {
                    return Err(format!("date {date} is in the future"));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

/// Check separator-joined named values against their priorities.
///
/// Every part must be a known name, and parts must appear in strictly
/// increasing priority, e.g., `LiDAR+Mag` but never `Mag+LiDAR` or
/// `LiDAR+LiDAR`.
///
/// # Errors
///
/// - Return description of the first offending part.
pub fn named_priority(value: &str, priorities: &NamedPriorities) -> Result<(), String> {
    let mut previous: Option<(&str, u32)> = None;
    for part in value.split(priorities.separator.as_str()) {
        let Some(priority) = priorities.order.get(part).copied() else {
            return Err(format!(
                "unknown value {part:?}, expected one of {:?}",
                priorities.order.keys().collect::<Vec<_>>()
            ));
        };

        if let Some((earlier, earlier_priority)) = previous {
            if priority <= earlier_priority {
                return Err(format!("{part:?} cannot follow {earlier:?} in {value:?}"));
            }
        }
        previous = Some((part, priority));
    }

    Ok(())
}

/// Check that identifier is a known prefix followed by an alphanumeric tail.
pub fn lineament_id(value: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| {
        value.strip_prefix(prefix.as_str()).is_some_and(|tail| {
            !tail.is_empty() && tail.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        })
    })
}

/// Parse a date or date-time into its calendar date.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps, and naive timestamps with
/// either a `T` or a space between date and time.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|stamp| stamp.date_naive())
        })
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
                .into_iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|stamp| stamp.date())
        })
}
