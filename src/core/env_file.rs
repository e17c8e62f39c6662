//! `.env` file loader.
//!
//! Key=value lines with an optional `export ` prefix. `#` starts a comment
//! at line start or after whitespace. Quoted values may span multiple lines;
//! double quotes understand `\n \r \t \\ \"`, single quotes `\\ \'`.
//! Values are applied only when the variable is not already set.

use std::path::{Path, PathBuf};

fn find_unescaped_quote(text: &str, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == quote {
            return Some(idx);
        }
    }
    None
}

fn unescape_quoted(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek() {
                let replacement = if quote == '"' {
                    match next {
                        'n' => Some('\n'),
                        'r' => Some('\r'),
                        't' => Some('\t'),
                        '\\' => Some('\\'),
                        '"' => Some('"'),
                        _ => None,
                    }
                } else {
                    match next {
                        '\\' => Some('\\'),
                        '\'' => Some('\''),
                        _ => None,
                    }
                };
                if let Some(rep) = replacement {
                    out.push(rep);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    out
}

fn strip_inline_comment_unquoted(value: &str) -> String {
    let mut escaped = false;
    let mut prev_is_space = true;
    for (idx, ch) in value.char_indices() {
        if escaped {
            escaped = false;
            prev_is_space = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            prev_is_space = false;
            continue;
        }
        if ch == '#' && prev_is_space {
            return value[..idx].trim_end().to_string();
        }
        prev_is_space = ch.is_whitespace();
    }
    value.trim_end().to_string()
}

/// Parse one value starting at `lines[start_idx]`; returns the value and the
/// index of the line it ended on (quoted values may consume further lines).
fn parse_value(value_part: &str, lines: &[&str], start_idx: usize) -> (String, usize) {
    let value_part = value_part.trim_start();
    if value_part.is_empty() {
        return (String::new(), start_idx);
    }

    let quote = value_part.chars().next().unwrap_or('\0');
    if quote != '\'' && quote != '"' {
        return (
            strip_inline_comment_unquoted(value_part).trim().to_string(),
            start_idx,
        );
    }

    let mut idx = start_idx;
    let mut buffer = value_part[quote.len_utf8()..].to_string();
    loop {
        if let Some(end) = find_unescaped_quote(&buffer, quote) {
            return (unescape_quoted(&buffer[..end], quote), idx);
        }
        idx += 1;
        if idx >= lines.len() {
            return (unescape_quoted(&buffer, quote), idx - 1);
        }
        buffer.push('\n');
        buffer.push_str(lines[idx]);
    }
}

/// Parse the file and return the key/value pairs in order of appearance.
pub fn parse_env_file(text: &str) -> Vec<(String, String)> {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let raw = lines[idx].trim();
        if raw.is_empty() || raw.starts_with('#') {
            idx += 1;
            continue;
        }
        let raw = raw.strip_prefix("export ").map(str::trim).unwrap_or(raw);
        let Some((key, value_part)) = raw.split_once('=') else {
            idx += 1;
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            idx += 1;
            continue;
        }
        let (value, end_idx) = parse_value(value_part, &lines, idx);
        out.push((key.to_string(), value));
        idx = end_idx + 1;
    }
    out
}

/// Load `path` and set each variable that is not already present.
pub fn load_env_file(path: &Path) {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            eprintln!("[config] failed to read env file '{}': {}", path.display(), e);
            return;
        }
    };
    for (key, value) in parse_env_file(&text) {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
        }
    }
}

/// Default search: `PAGESCOUT_ENV_FILE`, then `.env` beside the executable,
/// then `.env` in the working directory. First hit wins.
pub fn load_default_env_file() {
    if let Ok(explicit) = std::env::var("PAGESCOUT_ENV_FILE") {
        let p = PathBuf::from(explicit);
        if p.exists() {
            load_env_file(&p);
            return;
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(".env");
            if candidate.exists() {
                load_env_file(&candidate);
                return;
            }
        }
    }
    let cwd = PathBuf::from(".env");
    if cwd.exists() {
        load_env_file(&cwd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_exported_pairs() {
        let pairs = parse_env_file("A=1\nexport B=two\n\n# comment\nC=3");
        assert_eq!(
            pairs,
            vec![
                ("A".into(), "1".into()),
                ("B".into(), "two".into()),
                ("C".into(), "3".into()),
            ]
        );
    }

    #[test]
    fn strips_trailing_comment_from_unquoted_values() {
        let pairs = parse_env_file("KEY=value # note\nURL=http://e.com/#frag");
        assert_eq!(pairs[0].1, "value");
        // '#' not preceded by whitespace is part of the value.
        assert_eq!(pairs[1].1, "http://e.com/#frag");
    }

    #[test]
    fn double_quoted_values_support_escapes() {
        let pairs = parse_env_file(r#"KEY="line1\nline2\t\"x\"""#);
        assert_eq!(pairs[0].1, "line1\nline2\t\"x\"");
    }

    #[test]
    fn single_quoted_values_keep_most_backslashes() {
        let pairs = parse_env_file(r"KEY='a\nb\'c'");
        assert_eq!(pairs[0].1, r"a\nb'c");
    }

    #[test]
    fn quoted_values_may_span_lines() {
        let pairs = parse_env_file("KEY=\"first\nsecond\"\nNEXT=1");
        assert_eq!(pairs[0].1, "first\nsecond");
        assert_eq!(pairs[1], ("NEXT".into(), "1".into()));
    }
}
