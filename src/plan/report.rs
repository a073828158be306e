// src/plan/report.rs

use std::borrow::Borrow;
use std::fmt::Write;

use super::{ResolvedDate, ScheduleEntry};

const NO_ENTRIES: &str = "keine Einträge gefunden";

/// Render the date and the (already filtered) entries as the message text.
///
/// Cancelled lessons carry `*Entfall*`; the asterisks are markup for the
/// messenger and are passed through untouched.
pub fn format_report<E: Borrow<ScheduleEntry>>(date: ResolvedDate, entries: &[E]) -> String {
    let mut s = format!("{}: ", date);
    if entries.is_empty() {
        s.push_str(NO_ENTRIES);
        return s;
    }

    let noun = if entries.len() == 1 { "Eintrag" } else { "Einträge" };
    // writing into a String cannot fail
    let _ = write!(s, "{} {} gefunden:", entries.len(), noun);
    for e in entries {
        let e = e.borrow();
        let _ = write!(s, "\n{}: ", e.class_name);
        if e.cancelled {
            let _ = write!(s, "{}. Stunde {} *Entfall*", e.period, e.subject);
        } else {
            let _ = write!(
                s,
                "{}. Stunde {} anstatt {} in Raum {} bei {}",
                e.period, e.substitute_subject, e.subject, e.room, e.original_teacher
            );
        }
        if let Some(note) = &e.note {
            let _ = write!(s, " ({})", note);
        }
    }
    s
}
