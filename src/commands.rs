//! Shell command extraction from a finished answer.
//!
//! The model wraps every command it suggests in `<command>` ... `</command>`.
//! Each open marker pairs with the first close marker after it; an open marker
//! with no close marker after it contributes nothing.

use regex::Regex;
use std::sync::LazyLock;

pub const COMMAND_OPEN: &str = "<command>";
pub const COMMAND_CLOSE: &str = "</command>";

static COMMAND_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "(?s){}(.*?){}",
        regex::escape(COMMAND_OPEN),
        regex::escape(COMMAND_CLOSE)
    ))
    .expect("command marker pattern is valid")
});

/// Collect the text between each marker pair, in source order.
pub fn extract_commands(answer: &str) -> Vec<String> {
    COMMAND_SPAN
        .captures_iter(answer)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Join commands for the clipboard, one per line.
pub fn join_commands(commands: &[String]) -> String {
    commands.join("\n")
}
