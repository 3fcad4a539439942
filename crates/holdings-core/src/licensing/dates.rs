//! Partial date parsing with granularity tracking.
//!
//! Coverage files and records spell dates at different precisions: `"2008"`,
//! `"2008-03"`, `"2008-Mar-2"`, `"2008-xx-xx"` and so on. A parsed date keeps
//! the precision it was written at, so that comparisons between a year-only
//! boundary and a day-precise record do not invent information.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, Month, NaiveDate};
use regex::Regex;

/// How complete a date is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Granularity {
    Year,
    Month,
    Day,
}

impl Granularity {
    /// The less precise of two granularities.
    pub fn coarser(self, other: Granularity) -> Granularity {
        self.min(other)
    }
}

/// A date together with the precision it was specified at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialDate {
    pub date: NaiveDate,
    pub granularity: Granularity,
}

impl PartialDate {
    pub fn new(date: NaiveDate, granularity: Granularity) -> Self {
        Self { date, granularity }
    }

    /// Far-past boundary used when a coverage start is missing.
    pub fn unbounded_past() -> Self {
        Self::new(NaiveDate::MIN, Granularity::Day)
    }

    /// Far-future boundary used when a coverage end is missing.
    pub fn unbounded_future() -> Self {
        Self::new(NaiveDate::MAX, Granularity::Day)
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    /// The date with every component finer than `g` reset to its first value.
    pub fn truncated(&self, g: Granularity) -> NaiveDate {
        truncate(self.date, g)
    }
}

/// Reset the components of `date` finer than `g`.
pub fn truncate(date: NaiveDate, g: Granularity) -> NaiveDate {
    let truncated = match g {
        Granularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
        Granularity::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
        Granularity::Day => Some(date),
    };
    truncated.unwrap_or(date)
}

// ---------------------------------------------------------------------------
// Layouts, most specific first
// ---------------------------------------------------------------------------

struct DateLayout {
    pattern: &'static str,
    granularity: Granularity,
}

/// Candidate layouts, tried in order. The first layout that yields a valid
/// calendar date decides the granularity.
const DATE_LAYOUTS: &[DateLayout] = &[
    DateLayout { pattern: r"^(?P<y>\d{4})$", granularity: Granularity::Year },
    DateLayout { pattern: r"^(?P<y>\d{4})-(?P<m>\d{2})-(?P<d>\d{2})$", granularity: Granularity::Day },
    DateLayout { pattern: r"^(?P<y>\d{4})-$", granularity: Granularity::Year },
    DateLayout { pattern: r"^(?P<y>\d{4})-(?P<m>\d{2})-(?P<d>\d{1,2})$", granularity: Granularity::Day },
    DateLayout { pattern: r"^(?P<y>\d{4})-(?P<m>\d{2})$", granularity: Granularity::Month },
    DateLayout { pattern: r"^(?P<y>\d{4})-(?P<m>\d{1,2})-(?P<d>\d{1,2})$", granularity: Granularity::Day },
    DateLayout { pattern: r"^(?P<y>\d{4})-(?P<m>\d{1,2})$", granularity: Granularity::Month },
    DateLayout { pattern: r"^(?P<y>\d{4})-(?P<mon>[A-Za-z]{3})-(?P<d>\d{1,2})$", granularity: Granularity::Day },
    DateLayout { pattern: r"^(?P<y>\d{4})-(?P<mon>[A-Za-z]{3})$", granularity: Granularity::Month },
    DateLayout { pattern: r"^(?P<y>\d{4})-(?P<mon>[A-Za-z]{4,9})-(?P<d>\d{1,2})$", granularity: Granularity::Day },
    DateLayout { pattern: r"^(?P<y>\d{4})-(?P<mon>[A-Za-z]{4,9})$", granularity: Granularity::Month },
    DateLayout { pattern: r"^(?P<y>\d{4})-[xX]{1,2}-[xX]{1,2}$", granularity: Granularity::Year },
    DateLayout { pattern: r"^(?P<y>\d{4})-[xX]{1,2}$", granularity: Granularity::Year },
    DateLayout { pattern: r"^(?P<y>\d{4})(?P<m>\d{2})(?P<d>\d{2})$", granularity: Granularity::Day },
    DateLayout { pattern: r"^(?P<y>\d{4})(?P<m>\d{2})$", granularity: Granularity::Month },
];

static COMPILED_LAYOUTS: LazyLock<Vec<(Regex, Granularity)>> = LazyLock::new(|| {
    DATE_LAYOUTS
        .iter()
        .map(|layout| (Regex::new(layout.pattern).unwrap(), layout.granularity))
        .collect()
});

/// Parse a date string, returning `None` when no layout matches.
pub fn parse_partial_date(s: &str) -> Option<PartialDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    COMPILED_LAYOUTS
        .iter()
        .find_map(|(re, granularity)| {
            let caps = re.captures(s)?;
            let year: i32 = caps.name("y")?.as_str().parse().ok()?;
            let month = if let Some(m) = caps.name("m") {
                m.as_str().parse::<u32>().ok()?
            } else if let Some(name) = caps.name("mon") {
                Month::from_str(name.as_str()).ok()?.number_from_month()
            } else {
                1
            };
            let day = match caps.name("d") {
                Some(d) => d.as_str().parse::<u32>().ok()?,
                None => 1,
            };
            NaiveDate::from_ymd_opt(year, month, day).map(|date| PartialDate::new(date, *granularity))
        })
}
