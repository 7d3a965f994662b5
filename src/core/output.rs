//! Bounded text rendering for notifications and terminal output.

/// Collapse whitespace and cap length, marking truncation with `...`.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` ids on one line, noting how many were left out.
pub fn preview_ids(ids: &[String], max_items: usize, max_chars: usize) -> String {
    if ids.is_empty() {
        return String::new();
    }
    let shown = ids
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(", ");
    if ids.len() > max_items {
        format!("{} (+{} more)", shown, ids.len() - max_items)
    } else {
        shown
    }
}

/// Split `lines` into newline-joined chunks of at most `max_chars` characters.
///
/// Lines are never split across chunks; a single line longer than the limit
/// is truncated with [`compact_line`] so every chunk respects the bound.
pub fn chunk_lines(lines: &[String], max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    for line in lines {
        let line = if line.chars().count() > max_chars {
            compact_line(line, max_chars.saturating_sub(3))
        } else {
            line.clone()
        };
        let len = line.chars().count();
        let needed = if current.is_empty() { len } else { len + 1 };
        if !current.is_empty() && current_len + needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(&line);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Human readable byte count (`1.5 GiB`).
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
