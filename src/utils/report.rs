// src/utils/report.rs

//! Run report helpers on top of the `log` facade.
//!
//! Keeps step and summary output consistent between the CLI commands.

/// Log a step in a process.
pub fn step(step_num: usize, total: usize, message: &str) {
    log::info!("[STEP {}/{}] {}", step_num, total, message);
}

/// Log a separator line.
pub fn separator() {
    log::info!("{}", "─".repeat(60));
}

/// Log a header.
pub fn header(title: &str) {
    let border = "═".repeat(60);
    log::info!("{}", border);
    log::info!("  {}", title);
    log::info!("{}", border);
}

/// Log an indented sub-item.
pub fn sub_item(message: &str) {
    log::info!("    {}", message);
}

/// Log a summary section.
pub fn summary(title: &str, items: &[(&str, String)]) {
    log::info!("[SUMMARY] {}", title);
    for line in summary_lines(items) {
        log::info!("{}", line);
    }
}

fn summary_lines(items: &[(&str, String)]) -> Vec<String> {
    let width = items.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    items
        .iter()
        .map(|(key, value)| format!("    {key:<width$} : {value}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_keys_are_aligned() {
        let lines = summary_lines(&[("created", "3".into()), ("failed", "0".into())]);
        assert_eq!(lines, vec!["    created : 3", "    failed  : 0"]);
    }
}
