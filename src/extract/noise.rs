//! Line-level noise filtering for extracted text and markdown.
//!
//! Rules load from `rules/noise_zh.txt` and `rules/noise_en.txt` on first
//! use and stay cached for the process lifetime. Rule syntax per line:
//! blank or `#…` is ignored, `re:<pat>` compiles to a case-insensitive
//! regex matched against the trimmed line, `sub:<needle>` (or a bare line)
//! is a lowercase substring matched against a compacted form of the line.
//! Substring rules only fire on lines whose compacted form is ≤ 40 chars,
//! so long paragraphs that merely mention a needle survive.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use tracing::warn;

const RULE_FILES: &[&str] = &["noise_zh.txt", "noise_en.txt"];
const SUBSTRING_MAX_COMPACT_LEN: usize = 40;

const FALLBACK_REGEX_RULES: &[&str] = &[
    r"^\s*(skip to main content|back to top|reload|dismiss alert)\s*$",
    r"^\s*(repository files navigation|view all files)\s*$",
    r"^\s*(登录|注册|请先登录|立即登录)\s*$",
    r"^\s*(点赞|收藏|分享|评论|关注|举报)\s*$",
];
const FALLBACK_SUBSTRINGS: &[&str] = &[
    "打开app",
    "下载app",
    "访问异常",
    "安全验证",
    "captcha",
    "robot check",
];

pub struct NoiseRules {
    regexes: Vec<Regex>,
    substrings: Vec<String>,
}

static CACHE: RwLock<Option<Arc<NoiseRules>>> = RwLock::new(None);

fn parse_rule_file(text: &str) -> (Vec<String>, Vec<String>) {
    let mut regex_rules = Vec::new();
    let mut substring_rules = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(pattern) = line.strip_prefix("re:") {
            let pattern = pattern.trim();
            if !pattern.is_empty() {
                regex_rules.push(pattern.to_string());
            }
        } else if let Some(needle) = line.strip_prefix("sub:") {
            let needle = needle.trim().to_lowercase();
            if !needle.is_empty() {
                substring_rules.push(needle);
            }
        } else {
            substring_rules.push(line.to_lowercase());
        }
    }
    (regex_rules, substring_rules)
}

fn rules_dir_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(dir) = std::env::var("PAGESCOUT_RULES_DIR") {
        if !dir.trim().is_empty() {
            candidates.push(PathBuf::from(dir));
        }
    }
    candidates.push(PathBuf::from("rules"));
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("rules"));
        }
    }
    candidates
}

fn build_rules() -> NoiseRules {
    let mut regex_sources: Vec<String> = Vec::new();
    let mut substring_sources: Vec<String> = Vec::new();

    for dir in rules_dir_candidates() {
        for filename in RULE_FILES {
            let path = dir.join(filename);
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    let (regexes, substrings) = parse_rule_file(&text);
                    regex_sources.extend(regexes);
                    substring_sources.extend(substrings);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to read noise rule file {}: {}", path.display(), e),
            }
        }
        if !regex_sources.is_empty() || !substring_sources.is_empty() {
            break;
        }
    }

    if regex_sources.is_empty() {
        regex_sources.extend(FALLBACK_REGEX_RULES.iter().map(|s| s.to_string()));
    }
    if substring_sources.is_empty() {
        substring_sources.extend(FALLBACK_SUBSTRINGS.iter().map(|s| s.to_string()));
    }

    let mut compiled = Vec::new();
    for rule in regex_sources {
        match Regex::new(&format!("(?i){}", rule)) {
            Ok(re) => compiled.push(re),
            Err(e) => warn!("invalid noise regex skipped: {} ({})", rule, e),
        }
    }

    NoiseRules {
        regexes: compiled,
        substrings: substring_sources,
    }
}

/// Rules are loaded once; a second load observes the cached set.
pub fn load_noise_rules() -> Arc<NoiseRules> {
    if let Ok(cache) = CACHE.read() {
        if let Some(rules) = cache.as_ref() {
            return Arc::clone(rules);
        }
    }
    let built = Arc::new(build_rules());
    if let Ok(mut cache) = CACHE.write() {
        if let Some(existing) = cache.as_ref() {
            return Arc::clone(existing);
        }
        *cache = Some(Arc::clone(&built));
    }
    built
}

#[doc(hidden)]
pub fn reset_rules_cache() {
    if let Ok(mut cache) = CACHE.write() {
        *cache = None;
    }
}

/// Lowercased line with whitespace, zero-width characters, and everything
/// that is neither alphanumeric nor CJK removed.
fn compact_line(line: &str) -> String {
    line.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() && !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}'))
        .collect()
}

impl NoiseRules {
    pub fn is_noise_line(&self, line: &str) -> bool {
        let stripped = line.trim();
        if stripped.is_empty() {
            return false;
        }
        if self.regexes.iter().any(|re| re.is_match(stripped)) {
            return true;
        }
        let compact = compact_line(stripped);
        if compact.chars().count() <= SUBSTRING_MAX_COMPACT_LEN {
            return self
                .substrings
                .iter()
                .any(|needle| !needle.is_empty() && compact.contains(needle.as_str()));
        }
        false
    }
}

fn collapse_blank_runs(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap());
    re.replace_all(text, "\n\n").trim().to_string()
}

/// Drop noise lines from plain text, preserving blank-line structure.
pub fn clean_extracted_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let rules = load_noise_rules();
    let mut lines: Vec<String> = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            if lines.last().map(|l| !l.is_empty()).unwrap_or(false) {
                lines.push(String::new());
            }
            continue;
        }
        if rules.is_noise_line(line) {
            continue;
        }
        lines.push(line.to_string());
    }
    collapse_blank_runs(&lines.join("\n"))
}

/// Markdown variant: lines inside fenced code blocks pass through untouched,
/// heading lines lose a trailing `#` and are tested on their content.
pub fn clean_extracted_markdown(markdown: &str) -> String {
    if markdown.is_empty() {
        return String::new();
    }
    static TRAILING_HASH_RE: OnceLock<Regex> = OnceLock::new();
    let trailing_hash = TRAILING_HASH_RE.get_or_init(|| Regex::new(r"\s*#\s*$").unwrap());

    let rules = load_noise_rules();
    let mut lines: Vec<String> = Vec::new();
    let mut in_code_block = false;
    for raw_line in markdown.lines() {
        let line = raw_line.trim_end();
        let stripped = line.trim();
        if stripped.starts_with("```") {
            in_code_block = !in_code_block;
            lines.push(line.to_string());
            continue;
        }
        if in_code_block {
            lines.push(line.to_string());
            continue;
        }
        if stripped.is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut line = line.to_string();
        let mut stripped = stripped.to_string();
        if stripped.starts_with('#') {
            line = trailing_hash.replace(&line, "").to_string();
            stripped = line.trim().to_string();
        }
        let candidate = if stripped.starts_with('#') {
            stripped.trim_start_matches('#').trim().to_string()
        } else {
            stripped.clone()
        };
        if rules.is_noise_line(&candidate) {
            continue;
        }
        lines.push(line);
    }
    collapse_blank_runs(&lines.join("\n"))
}
