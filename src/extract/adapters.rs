//! Host-specific HTML pruning stages.
//!
//! Each adapter reduces the page to its real content container before the
//! general boilerplate extractor runs, so the quality competition starts
//! from a cleaner document on sites whose markup we know.

use scraper::{ElementRef, Html, Selector};

use crate::html::extract_title_and_description;

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn select_first<'a>(document: &'a Html, selectors: &[&str]) -> Option<ElementRef<'a>> {
    for css in selectors {
        if let Ok(selector) = Selector::parse(css) {
            if let Some(el) = document.select(&selector).next() {
                return Some(el);
            }
        }
    }
    None
}

struct DropList<'a> {
    tags: &'a [&'a str],
    classes: &'a [&'a str],
    ids: &'a [&'a str],
}

impl DropList<'_> {
    fn drops(&self, el: &ElementRef<'_>) -> bool {
        let value = el.value();
        if self.tags.contains(&value.name()) {
            return true;
        }
        if value
            .id()
            .map(|id| self.ids.contains(&id))
            .unwrap_or(false)
        {
            return true;
        }
        value.classes().any(|c| self.classes.contains(&c))
    }
}

/// Re-serialize `root` while skipping elements on the drop list. scraper
/// documents are immutable, so pruning is done on the way back out.
fn serialize_pruned(root: ElementRef<'_>, drop: &DropList<'_>) -> String {
    let mut out = String::new();
    write_element(root, drop, &mut out);
    out
}

fn write_element(el: ElementRef<'_>, drop: &DropList<'_>, out: &mut String) {
    let value = el.value();
    out.push('<');
    out.push_str(value.name());
    for (name, attr_value) in value.attrs() {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_html(attr_value));
        out.push('"');
    }
    out.push('>');
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if drop.drops(&child_el) {
                continue;
            }
            write_element(child_el, drop, out);
        } else if let Some(text) = child.value().as_text() {
            out.push_str(&escape_html(text));
        }
    }
    out.push_str("</");
    out.push_str(value.name());
    out.push('>');
}

fn wrap_body(parts: &[String]) -> String {
    format!("<html><body>{}</body></html>", parts.concat())
}

/// CSDN articles: keep `#content_views` (or the article), drop the widget
/// boxes, and prepend the page title.
pub fn prune_csdn(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let title = select_first(&document, &["h1.title-article", "h1"])
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();
    let main = select_first(&document, &["#content_views", "article"])?;

    let drop = DropList {
        tags: &["script", "style", "header", "footer", "nav", "aside"],
        classes: &[
            "hide-article-box",
            "recommend-box",
            "tool-box",
            "blog-tags-box",
            "article-info-box",
            "operating",
            "csdn-toolbar",
        ],
        ids: &["passportbox", "toolBarBox"],
    };

    let mut parts = Vec::new();
    if !title.is_empty() {
        parts.push(format!("<h1>{}</h1>", escape_html(&title)));
    }
    parts.push(serialize_pruned(main, &drop));
    Some(wrap_body(&parts))
}

/// GitHub repository pages: keep the rendered readme, drop the UI chrome,
/// prepend OG title and description.
pub fn prune_github(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let (title, description) = extract_title_and_description(html);
    let readme = select_first(
        &document,
        &[
            "#readme article.markdown-body",
            "#readme .markdown-body",
            "article.markdown-body",
        ],
    )?;

    let drop = DropList {
        tags: &["svg", "button", "summary", "details", "clipboard-copy"],
        classes: &["anchor", "anchorjs-link", "octicon"],
        ids: &[],
    };

    let mut parts = Vec::new();
    if !title.is_empty() {
        parts.push(format!("<h1>{}</h1>", escape_html(&title)));
    }
    if !description.is_empty() {
        parts.push(format!("<p>{}</p>", escape_html(&description)));
    }
    parts.push(serialize_pruned(readme, &drop));
    Some(wrap_body(&parts))
}

/// Bangumi (bgm.tv / bangumi.tv / chii.in): the two content columns.
pub fn prune_bangumi(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let (title, description) = extract_title_and_description(html);
    let col_a = select_first(&document, &["#columnA"]);
    let col_b = select_first(&document, &["#columnB"]);
    if col_a.is_none() && col_b.is_none() {
        return None;
    }

    let drop = DropList {
        tags: &["script", "style"],
        classes: &[],
        ids: &[],
    };

    let mut parts = Vec::new();
    if !title.is_empty() {
        parts.push(format!("<h1>{}</h1>", escape_html(&title)));
    }
    if !description.is_empty() {
        parts.push(format!("<p>{}</p>", escape_html(&description)));
    }
    if let Some(col) = col_a {
        parts.push(serialize_pruned(col, &drop));
    }
    if let Some(col) = col_b {
        parts.push(serialize_pruned(col, &drop));
    }
    Some(wrap_body(&parts))
}

/// Steam Community: the responsive page template content minus the global
/// headers and menus.
pub fn prune_steamcommunity(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let (title, description) = extract_title_and_description(html);
    let main = select_first(
        &document,
        &[
            "#responsive_page_template_content",
            ".responsive_page_template_content",
        ],
    )?;

    let drop = DropList {
        tags: &["script", "style"],
        classes: &[
            "responsive_page_menu_ctn",
            "responsive_header",
            "responsive_page_menu",
            "responsive_local_menu",
            "pulldown",
        ],
        ids: &["global_header", "global_actions", "footer"],
    };

    let mut parts = Vec::new();
    if !title.is_empty() {
        parts.push(format!("<h1>{}</h1>", escape_html(&title)));
    }
    if !description.is_empty() {
        parts.push(format!("<p>{}</p>", escape_html(&description)));
    }
    parts.push(serialize_pruned(main, &drop));
    Some(wrap_body(&parts))
}

/// Discourse topics rendered as HTML: the posts' `.cooked` bodies.
pub fn prune_discourse(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let root = select_first(&document, &["#main-outlet", "main", "body"])?;

    let drop = DropList {
        tags: &["svg", "button"],
        classes: &["post-menu-area", "topic-map", "names"],
        ids: &[],
    };

    let cooked_selector = Selector::parse(".cooked").ok()?;
    let article_selector = Selector::parse("article[data-post-id], article.topic-post").ok()?;

    let mut cooked_blocks: Vec<String> = Vec::new();
    let articles: Vec<ElementRef<'_>> = root.select(&article_selector).collect();
    if !articles.is_empty() {
        for article in articles {
            if let Some(cooked) = article.select(&cooked_selector).next() {
                cooked_blocks.push(serialize_pruned(cooked, &drop));
            }
        }
    } else {
        for cooked in root.select(&cooked_selector) {
            cooked_blocks.push(serialize_pruned(cooked, &drop));
        }
    }
    if cooked_blocks.is_empty() {
        return None;
    }

    let (title, _) = extract_title_and_description(html);
    let mut parts = Vec::new();
    if !title.is_empty() {
        parts.push(format!("<h1>{}</h1>", escape_html(&title)));
    }
    parts.extend(cooked_blocks);
    Some(wrap_body(&parts))
}

/// Text-level Discourse fallback: slice the visible text from the topic
/// title down to the related-topics block, filtering pager fragments.
pub fn prune_discourse_text(html: &str) -> Option<String> {
    let (title, _) = extract_title_and_description(html);
    let title = title.trim();
    if title.is_empty() {
        return None;
    }

    let topic_title = regex::Regex::new(r"\s+-\s+")
        .ok()?
        .splitn(title, 2)
        .next()
        .unwrap_or("")
        .trim()
        .to_string();
    if topic_title.len() < 4 {
        return None;
    }

    let raw_text = crate::html::html_to_text(html);
    if raw_text.is_empty() {
        return None;
    }
    let lines: Vec<String> = raw_text
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }

    let mut start_idx = lines.iter().position(|l| l == &topic_title);
    if start_idx.is_none() {
        start_idx = lines
            .iter()
            .position(|l| l.contains(&topic_title) && l.len() <= topic_title.len() + 12);
    }
    let start_idx = start_idx.unwrap_or(0);

    let mut end_idx = lines.len();
    for marker in ["相关话题", "话题列表", "Related topics", "Topic list"] {
        if let Some(i) = lines
            .iter()
            .enumerate()
            .skip(start_idx + 1)
            .find(|(_, l)| l.as_str() == marker || l.contains(marker))
            .map(|(i, _)| i)
        {
            end_idx = end_idx.min(i);
        }
    }

    let bare_number = regex::Regex::new(r"^\d{1,2}$").ok()?;
    let pager = regex::Regex::new(r"^\d+\s*/\s*\d+$").ok()?;
    let kept: Vec<&String> = lines[start_idx..end_idx]
        .iter()
        .filter(|l| !bare_number.is_match(l) && !pager.is_match(l))
        .collect();

    let joined = kept
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = super::noise::clean_extracted_text(&joined);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
