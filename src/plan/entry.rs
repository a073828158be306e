// src/plan/entry.rs

use std::fmt;
use tracing::{debug, trace, warn};

use super::utils::{clean_cell, is_blank};
use super::RowDataset;

/// First cell of the body row that precedes the data rows.
pub const MARKER: &str = "Klasse";

/// Number of positional cells each data row supplies.
pub const ENTRY_CELLS: usize = 8;

/// One row of the substitution table: a single affected lesson slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub class_name: String,
    pub period: String,
    pub original_teacher: String,
    /// Subject actually taught in the slot.
    pub substitute_subject: String,
    pub room: String,
    /// Subject originally scheduled.
    pub subject: String,
    pub cancelled: bool,
    pub note: Option<String>,
}

impl ScheduleEntry {
    fn from_cells(cells: &[String]) -> Self {
        let note = clean_cell(&cells[7]);
        Self {
            class_name: clean_cell(&cells[0]),
            period: clean_cell(&cells[1]),
            original_teacher: clean_cell(&cells[2]),
            substitute_subject: clean_cell(&cells[3]),
            room: clean_cell(&cells[4]),
            subject: clean_cell(&cells[5]),
            cancelled: cells[6].trim().eq_ignore_ascii_case("x"),
            note: (!note.is_empty()).then_some(note),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowWarningKind {
    TooFewCells { found: usize },
    TooManyCells { found: usize },
    MissingClassName,
}

/// A body row that was dropped instead of becoming an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowWarning {
    /// 0-based index into the body dataset.
    pub row: usize,
    pub kind: RowWarningKind,
}

impl fmt::Display for RowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RowWarningKind::TooFewCells { found } => write!(
                f,
                "row {}: {} cells, expected {}",
                self.row, found, ENTRY_CELLS
            ),
            RowWarningKind::TooManyCells { found } => write!(
                f,
                "row {}: {} cells with content past column {}",
                self.row, found, ENTRY_CELLS
            ),
            RowWarningKind::MissingClassName => write!(f, "row {}: empty class name", self.row),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedBody {
    pub entries: Vec<ScheduleEntry>,
    pub warnings: Vec<RowWarning>,
    pub marker_found: bool,
}

fn is_marker(row: &[String]) -> bool {
    row.first().map(|c| c == MARKER).unwrap_or(false)
}

/// Turn the body rows following the `Klasse` marker into entries.
///
/// Everything up to and including the first marker row is header noise.
/// Repeated marker rows (one per page) are skipped. Rows of the wrong shape
/// are dropped and reported in `warnings`; parsing itself never fails.
pub fn parse_entries(body: &RowDataset) -> ParsedBody {
    let mut out = ParsedBody::default();

    for (idx, row) in body.rows().iter().enumerate() {
        if is_marker(row) {
            if out.marker_found {
                trace!(row = idx, "repeated marker row");
            }
            out.marker_found = true;
            continue;
        }
        if !out.marker_found {
            continue;
        }
        if row.iter().all(|c| is_blank(c)) {
            trace!(row = idx, "blank row");
            continue;
        }

        let kind = if row.len() < ENTRY_CELLS {
            Some(RowWarningKind::TooFewCells { found: row.len() })
        } else if row[ENTRY_CELLS..].iter().any(|c| !is_blank(c)) {
            Some(RowWarningKind::TooManyCells { found: row.len() })
        } else if is_blank(&row[0]) {
            Some(RowWarningKind::MissingClassName)
        } else {
            None
        };

        match kind {
            Some(kind) => {
                let warning = RowWarning { row: idx, kind };
                warn!(%warning, "skipping body row");
                out.warnings.push(warning);
            }
            None => out.entries.push(ScheduleEntry::from_cells(&row[..ENTRY_CELLS])),
        }
    }

    if !out.marker_found {
        warn!(rows = body.len(), "no `{}` marker row in body", MARKER);
    }
    debug!(
        entries = out.entries.len(),
        warnings = out.warnings.len(),
        "parsed body"
    );
    out
}
