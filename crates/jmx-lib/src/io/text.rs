use crate::signal::{Events, SampleIndex};
use anyhow::{Context, Result};
use std::path::Path;

/// Parse newline-delimited sample indices, ignoring blank/comment lines.
///
/// An input without any index is a valid empty sequence (a detector that
/// found nothing). Sign and ordering are left to the interval analysis.
pub fn parse_event_indices(text: &str) -> Result<Vec<SampleIndex>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let val: SampleIndex = trimmed
            .parse()
            .with_context(|| format!("line {} is not an integer index: {}", idx + 1, trimmed))?;
        out.push(val);
    }
    Ok(out)
}

/// Read event indices from a file.
pub fn read_event_indices(path: &Path) -> Result<Vec<SampleIndex>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_event_indices(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Read an event file into [`Events`].
pub fn read_events(path: &Path) -> Result<Events> {
    read_event_indices(path).map(Events::from_indices)
}
