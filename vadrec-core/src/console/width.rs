//! Display-width helpers for truncating console output without splitting
//! wide (East-Asian) characters or overflowing the terminal.

use unicode_width::UnicodeWidthChar;

/// Display width of one character: 4 for a tab, 0 for other control
/// characters, 2 for fullwidth/wide East-Asian characters, 1 otherwise.
pub fn char_display_width(ch: char) -> usize {
    if ch == '\t' {
        return 4;
    }
    if (ch as u32) < 32 || ch as u32 == 127 {
        return 0;
    }
    ch.width().unwrap_or(0)
}

/// Sum of `char_display_width` over every character in `text`.
pub fn display_width(text: &str) -> usize {
    text.chars().map(char_display_width).sum()
}

/// Truncate `text` to at most `max_width` display columns, appending `...`
/// when truncation occurred. Never splits a wide character in half.
pub fn shorten_by_display_width(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if display_width(text) <= max_width {
        return text.to_string();
    }

    let ellipsis = "...";
    let ellipsis_width = display_width(ellipsis);
    if max_width <= ellipsis_width {
        return text.chars().take(max_width).collect();
    }

    let target = max_width - ellipsis_width;
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = char_display_width(ch);
        if used + w > target {
            break;
        }
        out.push(ch);
        used += w;
    }
    format!("{}{ellipsis}", out.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_unaffected_when_short() {
        assert_eq!(shorten_by_display_width("hello", 10), "hello");
    }

    #[test]
    fn ascii_truncates_with_ellipsis() {
        assert_eq!(shorten_by_display_width("hello world", 8), "hello...");
    }

    #[test]
    fn wide_chars_count_double() {
        // Three fullwidth Japanese characters = 6 display columns.
        assert_eq!(display_width("日本語"), 6);
    }

    #[test]
    fn truncation_respects_wide_char_boundaries() {
        let text = "日本語です";
        let shortened = shorten_by_display_width(text, 7);
        assert!(display_width(&shortened) <= 7);
        assert!(shortened.ends_with("..."));
    }

    #[test]
    fn tab_counts_as_four_columns() {
        assert_eq!(display_width("\t"), 4);
    }

    #[test]
    fn control_chars_count_as_zero() {
        assert_eq!(display_width("\u{7}"), 0);
    }
}
