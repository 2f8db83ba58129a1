use serde_json::Value;
use unicode_width::UnicodeWidthChar;

pub fn char_display_width(ch: char) -> usize {
    UnicodeWidthChar::width(ch).unwrap_or(0)
}

pub fn display_width(text: &str) -> usize {
    text.chars().map(char_display_width).sum()
}

/// Cuts `text` to `max_width` terminal columns, ending with `…` when cut.
pub fn truncate_to_display_width(text: &str, max_width: usize) -> String {
    if display_width(text) <= max_width {
        return text.to_string();
    }
    let budget = max_width.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let ch_width = char_display_width(ch);
        if used + ch_width > budget {
            break;
        }
        out.push(ch);
        used += ch_width;
    }
    out.push('…');
    out
}

pub fn content_stats(content: &str) -> (usize, usize) {
    (content.chars().count(), content.lines().count())
}

/// Compact one-line rendering of tool arguments.
pub fn compact_arguments(name: &str, arguments: &str) -> String {
    let Ok(input) = serde_json::from_str::<Value>(arguments) else {
        return single_line(arguments);
    };
    match name {
        "write_file" => {
            let path = input.get("path").and_then(Value::as_str).unwrap_or("<missing>");
            let content = input.get("content").and_then(Value::as_str).unwrap_or("");
            let (chars, lines) = content_stats(content);
            format!("{path}, {chars} chars/{lines} lines")
        }
        "edit_file" => {
            let path = input.get("path").and_then(Value::as_str).unwrap_or("<missing>");
            let old = input.get("old_str").and_then(Value::as_str).unwrap_or("");
            let new = input.get("new_str").and_then(Value::as_str).unwrap_or("");
            let (old_chars, old_lines) = content_stats(old);
            let (new_chars, new_lines) = content_stats(new);
            format!("{path}, {old_chars} chars/{old_lines} lines -> {new_chars} chars/{new_lines} lines")
        }
        _ => match input.as_object() {
            Some(map) if map.is_empty() => String::new(),
            Some(map) => map
                .iter()
                .map(|(key, value)| match value {
                    Value::String(text) => format!("{key}={}", single_line(text)),
                    other => format!("{key}={other}"),
                })
                .collect::<Vec<_>>()
                .join(", "),
            None => single_line(&input.to_string()),
        },
    }
}

/// First non-empty line plus a count of the remaining lines.
pub fn result_summary(content: &str) -> String {
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let Some(first) = lines.next() else {
        return "(empty)".to_string();
    };
    let rest = lines.count();
    if rest == 0 {
        first.trim().to_string()
    } else {
        format!("{} (+{rest} lines)", first.trim())
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_wide_characters() {
        assert_eq!(truncate_to_display_width("short", 10), "short");
        assert_eq!(truncate_to_display_width("abcdefgh", 5), "abcd…");
        assert_eq!(truncate_to_display_width("你好世界", 5), "你好…");
    }

    #[test]
    fn compact_arguments_summarize_file_writes() {
        assert_eq!(
            compact_arguments("write_file", r#"{"path":"a.txt","content":"x\ny\n"}"#),
            "a.txt, 4 chars/2 lines"
        );
        assert_eq!(
            compact_arguments("search_files", r#"{"query":"fn  main","max_results":5}"#),
            "max_results=5, query=fn main"
        );
        assert_eq!(compact_arguments("x", "not json\nat all"), "not json at all");
        assert_eq!(compact_arguments("x", "{}"), "");
    }

    #[test]
    fn result_summary_counts_extra_lines() {
        assert_eq!(result_summary(""), "(empty)");
        assert_eq!(result_summary("one"), "one");
        assert_eq!(result_summary("\none\ntwo\nthree"), "one (+2 lines)");
    }
}
