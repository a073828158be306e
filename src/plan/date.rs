// src/plan/date.rs

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

use super::RowDataset;

/// `Klasse_moodle 7.3.` at the start of a header cell; day and month only.
static DATE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Klasse_moodle\s+(\d{1,2})\.(\d{1,2})\.").expect("date marker regex is valid")
});

/// Placeholder rendered when the header carries no publication date.
pub const UNKNOWN_DATE: &str = "???";

/// Publication date of a plan, or the explicit absence of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolvedDate {
    Known(NaiveDate),
    Unknown,
}

impl ResolvedDate {
    pub fn known(&self) -> Option<NaiveDate> {
        match self {
            ResolvedDate::Known(d) => Some(*d),
            ResolvedDate::Unknown => None,
        }
    }
}

impl fmt::Display for ResolvedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedDate::Known(d) => write!(f, "{}", d.format("%d.%m.%Y")),
            ResolvedDate::Unknown => f.write_str(UNKNOWN_DATE),
        }
    }
}

/// How the missing year of a `D.M.` header date is filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum YearPolicy {
    /// Always the year of `today`. A January plan read in late December
    /// therefore lands one year early.
    #[default]
    CurrentYear,
    /// The year (previous, current or next) that puts the date closest to `today`.
    Nearest,
}

impl YearPolicy {
    fn apply(self, day: u32, month: u32, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            YearPolicy::CurrentYear => NaiveDate::from_ymd_opt(today.year(), month, day),
            YearPolicy::Nearest => (today.year() - 1..=today.year() + 1)
                .filter_map(|y| NaiveDate::from_ymd_opt(y, month, day))
                .min_by_key(|d| (*d - today).num_days().abs()),
        }
    }
}

/// Resolve the publication date from the header rows using the year of `today`.
pub fn resolve_date(header: &RowDataset, today: NaiveDate) -> ResolvedDate {
    resolve_date_with_policy(header, today, YearPolicy::CurrentYear)
}

/// Scan the first cell of every header row for the date marker. The first
/// marker that forms a valid calendar date wins; no match is `Unknown`.
pub fn resolve_date_with_policy(
    header: &RowDataset,
    today: NaiveDate,
    policy: YearPolicy,
) -> ResolvedDate {
    for (idx, row) in header.rows().iter().enumerate() {
        let Some(first) = row.first() else {
            continue;
        };
        let Some(caps) = DATE_MARKER.captures(first) else {
            continue;
        };
        let (Ok(day), Ok(month)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            continue;
        };
        match policy.apply(day, month, today) {
            Some(date) => {
                debug!(row = idx, %date, "publication date found");
                return ResolvedDate::Known(date);
            }
            None => warn!(row = idx, day, month, "date marker is not a calendar date"),
        }
    }
    warn!(rows = header.len(), "no publication date in header");
    ResolvedDate::Unknown
}
