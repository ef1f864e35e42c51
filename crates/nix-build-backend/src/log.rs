//! Build log text helpers

use regex::Regex;
use std::sync::OnceLock;

fn ansi_escape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // ESC followed by either a 7-bit C1 Fe sequence or a CSI sequence
    RE.get_or_init(|| {
        Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("static ANSI regex is valid")
    })
}

/// Remove ANSI color and cursor sequences from terminal output.
pub fn strip_ansi_colors(text: &str) -> String {
    ansi_escape().replace_all(text, "").into_owned()
}

/// Keep only the last `tail` bytes of a log, marking the cut.
pub fn truncate_log(log: &str, tail: usize) -> String {
    if log.len() <= tail {
        return log.to_string();
    }
    let mut start = log.len() - tail;
    while !log.is_char_boundary(start) {
        start += 1;
    }
    format!("This file has been truncated\n{}", &log[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_colors() {
        let colored = "\x1b[31;1merror:\x1b[0m builder for '\x1b[35;1m/nix/store/x.drv\x1b[0m' failed";
        assert_eq!(
            strip_ansi_colors(colored),
            "error: builder for '/nix/store/x.drv' failed"
        );
    }

    #[test]
    fn test_strip_ansi_leaves_plain_text() {
        assert_eq!(strip_ansi_colors("plain"), "plain");
    }

    #[test]
    fn test_truncate_log() {
        assert_eq!(truncate_log("short", 100), "short");
        assert_eq!(
            truncate_log("0123456789", 4),
            "This file has been truncated\n6789"
        );
    }
}
