// src/plan/mod.rs
//! Extraction-and-matching pipeline: header/body rows in, report text out.

pub mod date;
pub mod entry;
pub mod report;
pub mod subscription;
pub mod utils;

pub use date::{resolve_date, resolve_date_with_policy, ResolvedDate, YearPolicy};
pub use entry::{parse_entries, ParsedBody, RowWarning, RowWarningKind, ScheduleEntry};
pub use report::format_report;
pub use subscription::{filter_entries, Subscription};

/// Rows of text cells as produced by the table extractor, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDataset {
    rows: Vec<Vec<String>>,
}

impl RowDataset {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<R, C> FromIterator<R> for RowDataset
where
    R: IntoIterator<Item = C>,
    C: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        )
    }
}
