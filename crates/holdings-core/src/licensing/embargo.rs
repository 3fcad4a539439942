//! Moving walls and rolling windows (`embargo_info` column).

use std::sync::LazyLock;

use chrono::{Days, Months, NaiveDate};
use regex::Regex;

use crate::licensing::dates::{truncate, PartialDate};
use crate::licensing::CoverageError;

static EMBARGO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)([PR])([0-9]+)([DMY])$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbargoKind {
    /// `P`: only content older than the wall is available.
    MovingWall,
    /// `R`: only content newer than the wall is available.
    RollingWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbargoUnit {
    Day,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Embargo {
    pub kind: EmbargoKind,
    pub amount: u32,
    pub unit: EmbargoUnit,
}

/// Outcome of reading an `embargo_info` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbargoSpec {
    None,
    Restricted(Embargo),
    /// The value could not be read; access is left unrestricted.
    Unparsable,
}

impl EmbargoSpec {
    pub fn parse(raw: &str) -> EmbargoSpec {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return EmbargoSpec::None;
        }
        let Some(caps) = EMBARGO_RE.captures(trimmed) else {
            return EmbargoSpec::Unparsable;
        };
        let kind = match caps[1].to_ascii_uppercase().as_str() {
            "P" => EmbargoKind::MovingWall,
            _ => EmbargoKind::RollingWindow,
        };
        let amount = match caps[2].parse::<u32>() {
            Ok(n) => n,
            Err(_) => return EmbargoSpec::Unparsable,
        };
        let unit = match caps[3].to_ascii_uppercase().as_str() {
            "D" => EmbargoUnit::Day,
            "M" => EmbargoUnit::Month,
            _ => EmbargoUnit::Year,
        };
        EmbargoSpec::Restricted(Embargo { kind, amount, unit })
    }

    /// Check a requested date against the wall as seen from `today`.
    pub fn check(&self, requested: &PartialDate, today: NaiveDate) -> Result<(), CoverageError> {
        match self {
            EmbargoSpec::None | EmbargoSpec::Unparsable => Ok(()),
            EmbargoSpec::Restricted(embargo) => embargo.check(requested, today),
        }
    }
}

impl Embargo {
    /// The date `amount` units before `today`; saturates at the calendar start.
    pub fn wall(&self, today: NaiveDate) -> NaiveDate {
        let wall = match self.unit {
            EmbargoUnit::Day => today.checked_sub_days(Days::new(u64::from(self.amount))),
            EmbargoUnit::Month => today.checked_sub_months(Months::new(self.amount)),
            EmbargoUnit::Year => self
                .amount
                .checked_mul(12)
                .and_then(|months| today.checked_sub_months(Months::new(months))),
        };
        wall.unwrap_or(NaiveDate::MIN)
    }

    pub fn check(&self, requested: &PartialDate, today: NaiveDate) -> Result<(), CoverageError> {
        let wall = truncate(self.wall(today), requested.granularity);
        match self.kind {
            EmbargoKind::MovingWall if requested.date > wall => Err(CoverageError::AfterMovingWall),
            EmbargoKind::RollingWindow if requested.date < wall => {
                Err(CoverageError::BeforeRollingWindow)
            }
            _ => Ok(()),
        }
    }
}
