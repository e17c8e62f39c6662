//! Parsing of AI research replies: tool-trace URLs, markdown/bare/JSON
//! links, summary selection, and URL stripping.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::types::SearchLink;
use crate::urls::{normalize_for_dedup, unwrap_redirect};

fn md_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[([^\]]+)\]\(((?:https?://|//|www\.)[^)\s]+)\)").unwrap()
    })
}

fn bare_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?:https?://|//|www\.)[^\s<>"'\)\]，。、；：）】}]+"#).unwrap()
    })
}

fn json_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""url"\s*:\s*"([^"]+)""#).unwrap())
}

fn browse_page_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)browse_page\s*\{\s*"url"\s*:\s*"((?:[^"\\]|\\.)+)"(?:\s*,\s*"instructions"\s*:\s*"((?:[^"\\]|\\.)*)")?\s*\}"#,
        )
        .unwrap()
    })
}

fn trailing_bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s\)\]\}>,，。、；：]+$").unwrap())
}

fn trailing_punct_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.,;:!?]+$").unwrap())
}

/// Trim trailing brackets/punctuation, upgrade the scheme, and unwrap
/// redirectors. Returns an empty string for hopeless input.
fn normalize_candidate(raw_url: &str) -> String {
    let mut url = raw_url.trim().to_string();
    if url.is_empty() {
        return String::new();
    }
    url = trailing_bracket_re().replace(&url, "").to_string();
    url = trailing_punct_re().replace(&url, "").to_string();
    if let Some(rest) = url.strip_prefix("//") {
        url = format!("https://{}", rest);
    } else if url.starts_with("www.") {
        url = format!("https://{}", url);
    }
    unwrap_redirect(&url).trim().to_string()
}

fn host_as_title(url: &str) -> String {
    let after_scheme = url.rsplit_once("//").map(|(_, rest)| rest).unwrap_or(url);
    after_scheme.split('/').next().unwrap_or(after_scheme).to_string()
}

/// Remove reasoning wrappers (`<think>…</think>`, namespaced render tags)
/// and collapse blank runs.
pub fn clean_ai_tags(text: &str) -> String {
    static THINK_BLOCK: OnceLock<Regex> = OnceLock::new();
    static THINK_TAG: OnceLock<Regex> = OnceLock::new();
    static GROK_RENDER: OnceLock<Regex> = OnceLock::new();
    static NS_TAG: OnceLock<Regex> = OnceLock::new();
    static BLANK_RUN: OnceLock<Regex> = OnceLock::new();

    let think_block = THINK_BLOCK.get_or_init(|| Regex::new(r"(?is)<think>.*?</think>").unwrap());
    let think_tag = THINK_TAG.get_or_init(|| Regex::new(r"(?i)</?think>").unwrap());
    let grok_render =
        GROK_RENDER.get_or_init(|| Regex::new(r"(?s)<grok:render[^>]*>.*?</grok:render>").unwrap());
    let ns_tag =
        NS_TAG.get_or_init(|| Regex::new(r"(?s)<[a-z_]+:[^>]+>.*?</[a-z_]+:[^>]+>").unwrap());
    let blank_run = BLANK_RUN.get_or_init(|| Regex::new(r"\n{3,}").unwrap());

    let text = think_block.replace_all(text, "");
    let text = think_tag.replace_all(&text, "");
    let text = grok_render.replace_all(&text, "");
    let text = ns_tag.replace_all(&text, "");
    blank_run.replace_all(&text, "\n\n").trim().to_string()
}

/// Strip every URL form from prose, collapse the husks left behind, and cut
/// the text at a references/sources section header.
pub fn strip_urls(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    static ANGLE_URL: OnceLock<Regex> = OnceLock::new();
    static EMPTY_PARENS: OnceLock<Regex> = OnceLock::new();
    static EMPTY_BRACKETS: OnceLock<Regex> = OnceLock::new();
    static SPACE_RUN: OnceLock<Regex> = OnceLock::new();
    static BLANK_RUN: OnceLock<Regex> = OnceLock::new();
    static REFERENCES_LINE: OnceLock<Regex> = OnceLock::new();
    static LONE_BULLET: OnceLock<Regex> = OnceLock::new();
    static MD_HTTP_LINK: OnceLock<Regex> = OnceLock::new();
    static HTTP_URL: OnceLock<Regex> = OnceLock::new();

    let md_http_link = MD_HTTP_LINK
        .get_or_init(|| Regex::new(r"\[([^\]]+)\]\((https?://[^)]+)\)").unwrap());
    let angle_url = ANGLE_URL.get_or_init(|| Regex::new(r"<(https?://[^>]+)>").unwrap());
    let http_url = HTTP_URL
        .get_or_init(|| Regex::new(r#"https?://[^\s<>"'\)\]，。、；：）】}]+"#).unwrap());
    let empty_parens = EMPTY_PARENS.get_or_init(|| Regex::new(r"\(\s*\)").unwrap());
    let empty_brackets = EMPTY_BRACKETS.get_or_init(|| Regex::new(r"\[\s*\]").unwrap());
    let space_run = SPACE_RUN.get_or_init(|| Regex::new(r"[ \t]{2,}").unwrap());
    let blank_run = BLANK_RUN.get_or_init(|| Regex::new(r"\n{3,}").unwrap());
    let references_line = REFERENCES_LINE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(参考来源|参考资料|参考链接|Sources|References)\b.*[:：]\s*$").unwrap()
    });
    let lone_bullet = LONE_BULLET.get_or_init(|| Regex::new(r"^\s*[-*]\s*$").unwrap());

    let text = md_http_link.replace_all(text, "$1");
    let text = angle_url.replace_all(&text, "");
    let text = http_url.replace_all(&text, "");
    let text = empty_parens.replace_all(&text, "");
    let text = empty_brackets.replace_all(&text, "");
    let text = space_run.replace_all(&text, " ");
    let text = blank_run.replace_all(&text, "\n\n");

    let mut lines: Vec<&str> = text.lines().collect();
    if let Some(cut) = lines.iter().position(|l| references_line.is_match(l)) {
        lines.truncate(cut);
    }
    let kept: Vec<&str> = lines
        .into_iter()
        .filter(|l| !lone_bullet.is_match(l))
        .collect();

    blank_run
        .replace_all(&kept.join("\n"), "\n\n")
        .trim()
        .to_string()
}

/// Parse links out of an AI reply: markdown `[title](url)`, bare URLs, and
/// JSON `"url": "…"` fragments, deduplicated by normalized key. Returns the
/// links plus the summary section (Chinese summary headings preferred,
/// whole content otherwise), scrubbed of AI tags.
pub fn parse_markdown_links(content: &str, extra_text: &str) -> (Vec<SearchLink>, String) {
    let link_source = if extra_text.is_empty() {
        content.to_string()
    } else {
        format!("{}\n{}", content, extra_text)
    };

    let mut links: Vec<SearchLink> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let mut push_link = |title: String, url: String, seen: &mut HashSet<String>, links: &mut Vec<SearchLink>| {
        let key = {
            let normalized = normalize_for_dedup(&url);
            if normalized.is_empty() {
                url.clone()
            } else {
                normalized
            }
        };
        if seen.insert(key) {
            links.push(SearchLink {
                title,
                url,
                description: String::new(),
            });
        }
    };

    for capture in md_link_re().captures_iter(&link_source) {
        let title = capture[1].trim().to_string();
        let url = normalize_candidate(&capture[2]);
        if !url.starts_with("http") {
            continue;
        }
        push_link(title, url, &mut seen, &mut links);
    }

    let without_md = md_link_re().replace_all(&link_source, "");
    for m in bare_url_re().find_iter(&without_md) {
        let url = normalize_candidate(m.as_str());
        if !url.starts_with("http") || url.len() <= 10 {
            continue;
        }
        let title = host_as_title(&url);
        push_link(title, url, &mut seen, &mut links);
    }

    for capture in json_url_re().captures_iter(&link_source) {
        let url = normalize_candidate(&capture[1]);
        if !url.starts_with("http") || url.len() <= 10 {
            continue;
        }
        let title = host_as_title(&url);
        push_link(title, url, &mut seen, &mut links);
    }

    static SUMMARY_HEADINGS: OnceLock<Vec<Regex>> = OnceLock::new();
    let summary_headings = SUMMARY_HEADINGS.get_or_init(|| {
        [
            r"###\s*详细总结分析",
            r"###\s*总结分析",
            r"##\s*总结",
            r"####\s*结论",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    });

    let trimmed_content = content.trim();
    let summary_source = if trimmed_content.is_empty() {
        link_source.as_str()
    } else {
        trimmed_content
    };
    let mut summary = String::new();
    for heading in summary_headings {
        if let Some(m) = heading.find(summary_source) {
            summary = summary_source[m.start()..].trim().to_string();
            break;
        }
    }
    if summary.is_empty() {
        summary = summary_source.to_string();
    }

    (links, clean_ai_tags(&summary))
}

fn unescape_json_fragment(value: &str) -> String {
    value.replace("\\/", "/").replace("\\\"", "\"")
}

/// Extract URLs from tool-trace lines shaped like
/// `browse_page {"url":"https://…","instructions":"…"}`.
pub fn extract_browse_page_links(content: &str, extra_text: &str) -> Vec<SearchLink> {
    let source = if extra_text.is_empty() {
        content.to_string()
    } else {
        format!("{}\n{}", content, extra_text)
    };
    if source.is_empty() {
        return Vec::new();
    }

    let mut links = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for capture in browse_page_re().captures_iter(&source) {
        let raw_url = unescape_json_fragment(capture[1].trim());
        let instruction = capture
            .get(2)
            .map(|m| unescape_json_fragment(m.as_str().trim()))
            .unwrap_or_default();
        let url = unwrap_redirect(&raw_url);
        if url.is_empty() || !url.starts_with("http") {
            continue;
        }
        let key = {
            let normalized = normalize_for_dedup(&url);
            if normalized.is_empty() {
                url.clone()
            } else {
                normalized
            }
        };
        if !seen.insert(key) {
            continue;
        }
        let title = if instruction.is_empty() {
            host_as_title(&url)
        } else {
            let prefix: String = instruction.chars().take(80).collect();
            format!("browse_page: {}", prefix.trim())
        };
        links.push(SearchLink {
            title,
            url,
            description: String::new(),
        });
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_and_bare_links_are_collected_once() {
        let (links, _summary) =
            parse_markdown_links("[Example](https://example.com/a) bare https://example.com/b", "");
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
        assert_eq!(links[0].title, "Example");
        assert_eq!(links[1].title, "example.com");
    }

    #[test]
    fn duplicate_links_collapse_on_dedup_key() {
        let (links, _) = parse_markdown_links(
            "[A](https://example.com/a?utm_source=x) and https://example.com/a/",
            "",
        );
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn json_url_fragments_are_parsed() {
        let (links, _) = parse_markdown_links(r#"some trace "url": "https://example.com/doc" end"#, "");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/doc");
    }

    #[test]
    fn trailing_punctuation_is_trimmed() {
        let (links, _) = parse_markdown_links("see https://example.com/page), or not.", "");
        assert_eq!(links[0].url, "https://example.com/page");
    }

    #[test]
    fn strip_urls_removes_every_url_form() {
        let input = "[Example](https://example.com/a) bare https://example.com/b";
        let cleaned = strip_urls(input);
        assert!(!cleaned.contains("http://"));
        assert!(!cleaned.contains("https://"));
        assert!(cleaned.contains("Example"));
    }

    #[test]
    fn strip_urls_cuts_at_references_header() {
        let input = "Body text.\n\nReferences:\n- https://example.com/a";
        let cleaned = strip_urls(input);
        assert!(cleaned.contains("Body text."));
        assert!(!cleaned.to_lowercase().contains("references"));
    }

    #[test]
    fn browse_page_trace_extraction() {
        let links = extract_browse_page_links(
            r#"browse_page {"url":"https://openai.com/","instructions":"check"}"#,
            "",
        );
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://openai.com/");
        assert_eq!(links[0].title, "browse_page: check");
    }

    #[test]
    fn browse_page_titles_fall_back_to_host() {
        let links = extract_browse_page_links(r#"browse_page {"url":"https:\/\/example.com\/x"}"#, "");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/x");
        assert_eq!(links[0].title, "example.com");
    }

    #[test]
    fn summary_prefers_chinese_summary_heading() {
        let content = "前言部分\n\n### 总结分析\n这是结论。";
        let (_links, summary) = parse_markdown_links(content, "");
        assert!(summary.starts_with("### 总结分析"));
        assert!(summary.contains("这是结论"));
    }

    #[test]
    fn think_blocks_are_scrubbed_from_summaries() {
        let content = "<think>hidden chain</think>可见结论。";
        let (_links, summary) = parse_markdown_links(content, "");
        assert!(!summary.contains("hidden chain"));
        assert!(summary.contains("可见结论"));
    }
}
