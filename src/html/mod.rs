//! Challenge/block detection, HTML-to-text conversion, and metadata parsing.

use scraper::{Html, Selector};

use crate::core::types::{MetaLink, PageMetadata};
use crate::core::AppConfig;

const ENGLISH_BLOCK_HINTS: &[&str] = &[
    "captcha",
    "robot check",
    "access denied",
    "verify you are human",
    "unusual traffic",
];

// Matched case-sensitively against the visible text.
const CHINESE_BLOCK_HINTS: &[&str] = &[
    "访问异常",
    "安全验证",
    "滑动验证",
    "验证码",
    "请完成验证",
    "检测到异常",
    "系统检测到",
    "访问过于频繁",
    "请稍后再试",
    "请先登录",
    "登录后查看更多",
    "请登录后继续访问",
    "马上登录",
    "立即登录",
    "登录即可",
];

/// Interstitial challenge pages (Cloudflare and friends).
pub fn looks_like_challenge(content: &str) -> bool {
    let lowered = content.to_lowercase();
    lowered.contains("just a moment")
        || lowered.contains("checking your browser")
        || lowered.contains("attention required")
        || lowered.contains("cf-browser-verification")
        || (lowered.contains("cloudflare") && lowered.contains("ray id"))
}

/// Generic blocks, captcha walls, and login walls (best-effort).
pub fn looks_like_blocked(content: &str) -> bool {
    if content.is_empty() {
        return false;
    }
    if looks_like_challenge(content) {
        return true;
    }

    let visible = if content.contains('<') && content.contains('>') {
        html_to_text(content)
    } else {
        content.to_string()
    };

    let lowered = visible.to_lowercase();
    if ENGLISH_BLOCK_HINTS.iter().any(|hint| lowered.contains(hint)) {
        return true;
    }
    CHINESE_BLOCK_HINTS.iter().any(|hint| visible.contains(hint))
}

const DROPPED_TAGS: &[&str] = &[
    "script", "style", "header", "footer", "nav", "aside", "form", "button", "svg",
];

/// Visible text with chrome elements dropped, one line per text node.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines: Vec<String> = Vec::new();
    collect_visible_text(document.root_element(), &mut lines);
    lines.join("\n")
}

fn collect_visible_text(element: scraper::ElementRef<'_>, lines: &mut Vec<String>) {
    for child in element.children() {
        if let Some(el) = scraper::ElementRef::wrap(child) {
            let name = el.value().name();
            if DROPPED_TAGS.contains(&name) {
                continue;
            }
            collect_visible_text(el, lines);
        } else if let Some(text) = child.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
    }
}

fn select_first_text(document: &Html, css: &str) -> String {
    let Ok(selector) = Selector::parse(css) else {
        return String::new();
    };
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn select_first_attr(document: &Html, css: &str, attr: &str) -> String {
    let Ok(selector) = Selector::parse(css) else {
        return String::new();
    };
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn meta_content(document: &Html, css: &str) -> String {
    select_first_attr(document, css, "content")
}

/// Page title and description with the OG → twitter → plain fallback chain.
pub fn extract_title_and_description(html: &str) -> (String, String) {
    let document = Html::parse_document(html);
    title_and_description_from(&document)
}

fn title_and_description_from(document: &Html) -> (String, String) {
    let mut title = meta_content(document, r#"meta[property="og:title"]"#);
    if title.is_empty() {
        title = meta_content(document, r#"meta[name="twitter:title"]"#);
    }
    if title.is_empty() {
        title = select_first_text(document, "title");
    }

    let mut description = meta_content(document, r#"meta[property="og:description"]"#);
    if description.is_empty() {
        description = meta_content(document, r#"meta[name="twitter:description"]"#);
    }
    if description.is_empty() {
        description = meta_content(document, r#"meta[name="description"]"#);
    }

    (title, description)
}

/// Metadata for the `meta` fetch mode: title/description/canonical plus up
/// to 50 anchors. When the serialized anchor list would blow the character
/// budget, the list is truncated proportionally by average link size.
pub fn extract_metadata(html: &str, config: &AppConfig) -> (PageMetadata, bool) {
    let document = Html::parse_document(html);
    let (title, description) = title_and_description_from(&document);
    let canonical_url = select_first_attr(&document, r#"link[rel="canonical"]"#, "href");

    let mut links: Vec<MetaLink> = Vec::new();
    if let Ok(selector) = Selector::parse("a[href]") {
        for anchor in document.select(&selector).take(50) {
            let href = anchor.value().attr("href").unwrap_or("").to_string();
            if href.is_empty() {
                continue;
            }
            links.push(MetaLink {
                text: anchor.text().collect::<String>().trim().to_string(),
                href,
            });
        }
    }

    let serialized = serde_json::to_string(&links).unwrap_or_default();
    let budget = config.char_budget();
    let mut truncated = false;
    if serialized.len() > budget && !links.is_empty() {
        truncated = true;
        let avg_length = serialized.len() / links.len();
        let keep = if avg_length > 0 {
            (budget / avg_length).max(1)
        } else {
            1
        };
        links.truncate(keep);
    }

    (
        PageMetadata {
            title,
            description,
            canonical_url,
            links,
        },
        truncated,
    )
}
