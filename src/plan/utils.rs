/// Trim whitespace and fold the line breaks the extractor leaves inside
/// multi-line table cells into single spaces.
pub fn clean_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains(['\r', '\n']) {
        trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        trimmed.to_string()
    }
}

/// A cell counts as blank when it holds nothing but whitespace.
pub fn is_blank(cell: &str) -> bool {
    cell.trim().is_empty()
}
