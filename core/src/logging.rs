//! Logging helpers shared by the platform shells.

use log::{Level, LevelFilter, log};

/// syslog() drops anything past 1024 bytes.
pub const MAX_LOG_LINE: usize = 1024;

/// Log filter for the number of `--debug` flags given.
pub fn level_for(debug: u8) -> LevelFilter {
    match debug {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Log `prefix` followed by `items`, repeating the prefix on as many lines as
/// needed to keep each line within [`MAX_LOG_LINE`] bytes.
pub fn log_list(level: Level, prefix: &str, items: &[String]) {
    for line in chunk_items(prefix, items, MAX_LOG_LINE) {
        log!(level, "{line}");
    }
}

/// Split `items` into `prefix a, b, c` lines no longer than `max_len` bytes.
/// Items too long to fit on a line by themselves are truncated.
pub fn chunk_items(prefix: &str, items: &[String], max_len: usize) -> Vec<String> {
    let room = max_len.saturating_sub(prefix.len());
    let mut lines = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;

    for item in items {
        let item = truncate(item, room);
        let added = if current.is_empty() { item.len() } else { item.len() + 2 };
        if !current.is_empty() && current_len + added > room {
            lines.push(format!("{prefix}{}", current.join(", ")));
            current.clear();
            current_len = 0;
        }
        current_len += if current.is_empty() { item.len() } else { item.len() + 2 };
        current.push(item);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(format!("{prefix}{}", current.join(", ")));
    }
    lines
}

fn truncate(item: &str, max: usize) -> &str {
    if item.len() <= max {
        return item;
    }
    let mut end = max;
    while !item.is_char_boundary(end) {
        end -= 1;
    }
    &item[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn short_lists_fit_on_one_line() {
        let lines = chunk_items("Watching: ", &items(&["a", "b", "c"]), 1024);
        assert_eq!(lines, vec!["Watching: a, b, c"]);
    }

    #[test]
    fn long_lists_are_split_without_exceeding_the_limit() {
        let names: Vec<String> = (0..40).map(|i| format!("NSWorkspaceEvent{i:02}")).collect();
        let lines = chunk_items("Listening: ", &names, 120);

        assert!(lines.len() > 1);
        for line in &lines {
            assert!(line.len() <= 120, "{line} is {} bytes", line.len());
            assert!(line.starts_with("Listening: "));
        }
        let rejoined: Vec<String> = lines
            .iter()
            .flat_map(|l| l["Listening: ".len()..].split(", ").map(String::from))
            .collect();
        assert_eq!(rejoined, names);
    }

    #[test]
    fn oversized_items_are_truncated() {
        let lines = chunk_items("P: ", &items(&[&"x".repeat(50), "y"]), 20);
        assert_eq!(lines, vec![format!("P: {}", "x".repeat(17)), "P: y".to_string()]);
    }

    #[test]
    fn empty_list_still_logs_the_prefix() {
        assert_eq!(chunk_items("Nothing: ", &[], 1024), vec!["Nothing: "]);
    }
}
