//! Renders source excerpts around a stop location.

use std::fs;
use std::path::Path;

use crate::errors::Result;

/// Read `path` and render `context` lines around `line`, marking the
/// target line with a cursor.
pub fn listing(path: &Path, line: u64, context: u64) -> Result<String> {
    let text = fs::read_to_string(path)?;
    Ok(render(&text, line, context))
}

fn render(text: &str, line: u64, context: u64) -> String {
    let first = line.saturating_sub(context).max(1);
    let last = line + context;

    let mut out = String::new();
    for (idx, src_line) in text.lines().enumerate() {
        let number = idx as u64 + 1;
        if number < first {
            continue;
        }
        if number > last {
            break;
        }
        let cursor = if number == line { '>' } else { ' ' };
        out.push_str(&format!("{cursor} {number:4} {src_line}\n"));
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    const TEXT: &str = "one\ntwo\nthree\nfour\nfive\nsix\n";

    #[test]
    fn test_render_window_around_line() {
        let out = render(TEXT, 3, 1);
        assert_eq!(out, "     2 two\n>    3 three\n     4 four\n");
    }

    #[test]
    fn test_render_clamps_at_file_start() {
        let out = render(TEXT, 1, 2);
        assert_eq!(out, ">    1 one\n     2 two\n     3 three\n");
    }

    #[test]
    fn test_render_clamps_at_file_end() {
        let out = render(TEXT, 6, 2);
        assert_eq!(out, "     4 four\n     5 five\n>    6 six\n");
    }
}
