//! Multi-extractor content-quality competition.
//!
//! For one page we produce several candidate renderings — site-adapter
//! pruned, precision- and recall-biased boilerplate removal, a fast
//! selector-driven pass, a baseline whole-document rendering, and raw
//! visible text — clean each through the noise filter, score them, and
//! return the best one that clears the strategy's thresholds.

pub mod adapters;
pub mod noise;

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::core::config::{AppConfig, ExtractionStrategy};
use crate::core::types::QualityMetrics;
use crate::urls::hostname;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Markdown,
    Text,
}

/// One scored rendering of a page. `content` is already noise-cleaned.
#[derive(Debug, Clone, Default)]
pub struct ExtractionCandidate {
    pub content: String,
    pub extractor: String,
    pub quality_score: u8,
    pub char_len: usize,
    pub line_count: usize,
    pub unique_line_ratio: f64,
    pub noise_line_ratio: f64,
    pub degraded: bool,
}

impl ExtractionCandidate {
    pub fn metrics(&self) -> QualityMetrics {
        QualityMetrics {
            char_len: self.char_len,
            line_count: self.line_count,
            unique_line_ratio: self.unique_line_ratio,
            noise_line_ratio: self.noise_line_ratio,
        }
    }
}

// ── Strategy tuning ─────────────────────────────────────────────────────────

struct Tuning {
    adapter_min_quality: u8,
    general_min_quality: u8,
    bonus_adapter: i32,
    bonus_precision: i32,
    bonus_recall: i32,
    bonus_fast: i32,
    bonus_baseline: i32,
    early_stop_enabled: bool,
    early_stop_quality: u8,
    early_stop_chars: usize,
}

const QUALITY_TUNING: Tuning = Tuning {
    adapter_min_quality: 10,
    general_min_quality: 30,
    bonus_adapter: 15,
    bonus_precision: 10,
    bonus_recall: 9,
    bonus_fast: 8,
    bonus_baseline: 6,
    early_stop_enabled: true,
    early_stop_quality: 80,
    early_stop_chars: 900,
};

const BALANCED_TUNING: Tuning = Tuning {
    adapter_min_quality: 8,
    general_min_quality: 25,
    bonus_adapter: 13,
    bonus_precision: 9,
    bonus_recall: 8,
    bonus_fast: 8,
    bonus_baseline: 5,
    early_stop_enabled: true,
    early_stop_quality: 72,
    early_stop_chars: 700,
};

const SPEED_TUNING: Tuning = Tuning {
    adapter_min_quality: 6,
    general_min_quality: 18,
    bonus_adapter: 10,
    bonus_precision: 8,
    bonus_recall: 7,
    bonus_fast: 9,
    bonus_baseline: 4,
    early_stop_enabled: false,
    early_stop_quality: 65,
    early_stop_chars: 600,
};

fn tuning_for(strategy: ExtractionStrategy) -> &'static Tuning {
    match strategy {
        ExtractionStrategy::Quality => &QUALITY_TUNING,
        ExtractionStrategy::Balanced => &BALANCED_TUNING,
        ExtractionStrategy::Speed => &SPEED_TUNING,
    }
}

fn extractor_bonus(extractor: &str, tuning: &Tuning) -> i32 {
    if extractor.starts_with("adapter:") {
        tuning.bonus_adapter
    } else if extractor.starts_with("readability:precision") {
        tuning.bonus_precision
    } else if extractor.starts_with("readability:recall") {
        tuning.bonus_recall
    } else if extractor.starts_with("readability:fast") {
        tuning.bonus_fast
    } else if extractor.starts_with("readability:baseline") {
        tuning.bonus_baseline
    } else {
        0
    }
}

// ── Scoring ─────────────────────────────────────────────────────────────────

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*#{1,6}\s+\S").unwrap())
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*[-*]\s+\S").unwrap())
}

/// Score cleaned content on length, line uniqueness, noise density, a
/// short-line penalty for list-shaped pages, and markdown structure.
pub fn score_content(content: &str) -> ExtractionCandidate {
    let content = content.trim();
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let char_len = content.chars().count();
    let line_count = lines.len();

    let meaningful: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect();
    let unique_source: &[&str] = if meaningful.is_empty() { &lines } else { &meaningful };
    let unique_ratio = if unique_source.is_empty() {
        0.0
    } else {
        let unique: HashSet<&&str> = unique_source.iter().collect();
        unique.len() as f64 / unique_source.len() as f64
    };

    let rules = noise::load_noise_rules();
    let noise_hits = lines.iter().filter(|l| rules.is_noise_line(l)).count();
    let noise_ratio = if line_count == 0 {
        0.0
    } else {
        noise_hits as f64 / line_count as f64
    };

    let short_source: &[&str] = if meaningful.is_empty() { &lines } else { &meaningful };
    let short_ratio = if short_source.is_empty() {
        0.0
    } else {
        let short_hits = short_source
            .iter()
            .filter(|l| l.chars().count() <= 12)
            .count();
        short_hits as f64 / short_source.len() as f64
    };

    let code_fence_count = content.matches("```").count();
    let heading_count = heading_re().find_iter(content).count();
    let bullet_count = bullet_re().find_iter(content).count();
    let paragraph_count = content.matches("\n\n").count();
    let is_markdown_like = code_fence_count > 0 || heading_count > 0 || bullet_count > 0;

    let mut structure_bonus = 0.0;
    if is_markdown_like {
        structure_bonus += if code_fence_count >= 2 {
            6.0
        } else if code_fence_count >= 1 {
            3.0
        } else {
            0.0
        };
        structure_bonus += (paragraph_count as f64).min(6.0);
        if line_count > 0 {
            structure_bonus += (line_count as f64 / 8.0 * 4.0).min(4.0);
        }
        structure_bonus += (heading_count as f64).min(2.0);
        if bullet_count > 0 {
            structure_bonus += (bullet_count as f64 / 3.0 * 2.0).min(2.0);
        }
    }

    let length_score = (char_len as f64 / 2000.0 * 60.0).min(60.0);
    let unique_score = (unique_ratio * 20.0).min(20.0);
    let noise_penalty = (noise_ratio * 70.0).min(50.0);
    let short_line_penalty = if line_count >= 40 && short_ratio >= 0.6 {
        ((short_ratio - 0.6) * 100.0).min(30.0)
    } else {
        0.0
    };

    let score = (length_score + unique_score - noise_penalty - short_line_penalty
        + structure_bonus)
        .clamp(0.0, 100.0);

    ExtractionCandidate {
        content: content.to_string(),
        extractor: String::new(),
        quality_score: score.round() as u8,
        char_len,
        line_count,
        unique_line_ratio: (unique_ratio * 1000.0).round() / 1000.0,
        noise_line_ratio: (noise_ratio * 1000.0).round() / 1000.0,
        degraded: false,
    }
}

// ── Degraded fallbacks ──────────────────────────────────────────────────────

pub fn build_degraded_markdown(html: &str) -> Option<String> {
    let (title, description) = crate::html::extract_title_and_description(html);
    if title.is_empty() && description.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    if !title.is_empty() {
        parts.push(format!("# {}", title));
    }
    if !description.is_empty() {
        parts.push(description);
    }
    Some(parts.join("\n\n").trim().to_string())
}

pub fn build_degraded_text(html: &str) -> Option<String> {
    let (title, description) = crate::html::extract_title_and_description(html);
    if title.is_empty() && description.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    if !title.is_empty() {
        parts.push(title);
    }
    if !description.is_empty() {
        parts.push(description);
    }
    Some(parts.join("\n\n").trim().to_string())
}

/// Noise-clean `text` in the cleaner matching the output format.
pub fn clean_for(output: OutputFormat, text: &str) -> String {
    match output {
        OutputFormat::Markdown => noise::clean_extracted_markdown(text),
        OutputFormat::Text => noise::clean_extracted_text(text),
    }
}

// ── General extractor engine ────────────────────────────────────────────────

const PRECISION_DROP_TAGS: &[&str] = &[
    "script", "style", "header", "footer", "nav", "aside", "form", "button", "svg", "iframe",
    "noscript",
];

const MAIN_CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    "#content",
    ".post-content",
    ".article-content",
    ".markdown-body",
];

fn link_markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap())
}

fn render_markdown(html: &str, include_links: bool) -> String {
    let md = html2md::parse_html(html);
    if include_links {
        md
    } else {
        link_markup_re().replace_all(&md, "$1").to_string()
    }
}

fn render_for(output: OutputFormat, html: &str, include_links: bool) -> String {
    match output {
        OutputFormat::Markdown => render_markdown(html, include_links),
        OutputFormat::Text => crate::html::html_to_text(html),
    }
}

/// Serialize `<body>` with the aggressive drop-list applied: the starting
/// point for precision-biased extraction.
fn preprocess_aggressive(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(body_selector) = Selector::parse("body") else {
        return html.to_string();
    };
    let Some(body) = document.select(&body_selector).next() else {
        return html.to_string();
    };
    let mut kept = String::new();
    serialize_without_tags(body, PRECISION_DROP_TAGS, &mut kept);
    format!("<html><body>{}</body></html>", kept)
}

fn serialize_without_tags(el: ElementRef<'_>, drop_tags: &[&str], out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if drop_tags.contains(&child_el.value().name()) {
                continue;
            }
            out.push('<');
            out.push_str(child_el.value().name());
            for (name, value) in child_el.value().attrs() {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&adapters::escape_html(value));
                out.push('"');
            }
            out.push('>');
            serialize_without_tags(child_el, drop_tags, out);
            out.push_str("</");
            out.push_str(child_el.value().name());
            out.push('>');
        } else if let Some(text) = child.value().as_text() {
            out.push_str(&adapters::escape_html(text));
        }
    }
}

fn base_url_for(url: &str) -> Url {
    Url::parse(url)
        .or_else(|_| Url::parse("https://localhost/"))
        .unwrap_or_else(|_| unreachable!())
}

/// Readability pass over `html`. `aggressive` pre-prunes chrome elements
/// first (precision bias); without it the whole document competes (recall
/// bias).
pub fn readability_extract(
    html: &str,
    url: &str,
    output: OutputFormat,
    aggressive: bool,
    include_links: bool,
) -> Option<String> {
    let source = if aggressive {
        preprocess_aggressive(html)
    } else {
        html.to_string()
    };
    let base = base_url_for(url);
    let product = match readability::extractor::extract(&mut source.as_bytes(), &base) {
        Ok(p) => p,
        Err(e) => {
            debug!("readability extraction failed: {}", e);
            return None;
        }
    };
    let rendered = match output {
        OutputFormat::Markdown => render_markdown(&product.content, include_links),
        OutputFormat::Text => product.text,
    };
    let rendered = rendered.trim().to_string();
    if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    }
}

/// Fast pass: take the largest obvious main-content node and render it
/// directly, skipping readability's scoring walk entirely.
fn fast_extract(html: &str, output: OutputFormat) -> Option<String> {
    let pruned = preprocess_aggressive(html);
    let document = Html::parse_document(&pruned);

    let mut best: Option<(usize, String)> = None;
    for css in MAIN_CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for el in document.select(&selector) {
            let inner = el.html();
            let text_len = el.text().map(str::len).sum::<usize>();
            if best.as_ref().map(|(l, _)| text_len > *l).unwrap_or(true) {
                best = Some((text_len, inner));
            }
        }
    }

    let source = best.map(|(_, html)| html).unwrap_or(pruned);
    let rendered = render_for(output, &source, false).trim().to_string();
    if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    }
}

/// Baseline: whole-document rendering with no content selection at all.
fn baseline_extract(html: &str, output: OutputFormat) -> Option<String> {
    let rendered = render_for(output, html, false).trim().to_string();
    if rendered.is_empty() {
        None
    } else {
        Some(rendered)
    }
}

// ── Candidate pipeline ──────────────────────────────────────────────────────

struct Pipeline<'a> {
    output: OutputFormat,
    tuning: &'static Tuning,
    quality_first: bool,
    speed_first: bool,
    min_chars: usize,
    candidates: Vec<ExtractionCandidate>,
    seen_cleaned: HashSet<String>,
    url: &'a str,
}

impl<'a> Pipeline<'a> {
    fn add_candidate(&mut self, content: Option<String>, extractor: &str) -> Option<usize> {
        let content = content?;
        if content.is_empty() {
            return None;
        }
        let cleaned = clean_for(self.output, &content);
        if cleaned.is_empty() || self.seen_cleaned.contains(&cleaned) {
            return None;
        }
        self.seen_cleaned.insert(cleaned.clone());

        let mut candidate = score_content(&cleaned);
        candidate.extractor = extractor.to_string();
        self.candidates.push(candidate);
        Some(self.candidates.len() - 1)
    }

    fn should_early_stop(&self, index: Option<usize>) -> bool {
        let Some(index) = index else {
            return false;
        };
        if !self.tuning.early_stop_enabled || !self.quality_first {
            return false;
        }
        let candidate = &self.candidates[index];
        let early_chars = self.min_chars.max(self.tuning.early_stop_chars);
        candidate.char_len >= early_chars
            && candidate.quality_score >= self.tuning.early_stop_quality
    }

    fn run_adapters(&mut self, html: &str, host: &str) -> Option<usize> {
        if host.ends_with("csdn.net") {
            if let Some(pruned) = adapters::prune_csdn(html) {
                let idx = self.add_candidate(
                    readability_extract(&pruned, self.url, self.output, true, false),
                    "adapter:csdn+readability",
                );
                if self.should_early_stop(idx) {
                    return idx;
                }
            }
        }

        if host.ends_with("github.com") {
            if let Some(pruned) = adapters::prune_github(html) {
                let idx = self.add_candidate(
                    readability_extract(&pruned, self.url, self.output, true, true),
                    "adapter:github+readability",
                );
                if self.should_early_stop(idx) {
                    return idx;
                }
            }
        }

        if host.ends_with("bgm.tv") || host.ends_with("bangumi.tv") || host.ends_with("chii.in") {
            if let Some(pruned) = adapters::prune_bangumi(html) {
                let idx = self.add_candidate(
                    baseline_extract(&pruned, self.output),
                    "adapter:bangumi+baseline",
                );
                if self.should_early_stop(idx) {
                    return idx;
                }
                let idx = self.add_candidate(
                    Some(crate::html::html_to_text(&pruned)),
                    "adapter:bangumi+text",
                );
                if self.should_early_stop(idx) {
                    return idx;
                }
            }
        }

        if host.ends_with("steamcommunity.com") {
            if let Some(pruned) = adapters::prune_steamcommunity(html) {
                let idx = self.add_candidate(
                    baseline_extract(&pruned, self.output),
                    "adapter:steamcommunity+baseline",
                );
                if self.should_early_stop(idx) {
                    return idx;
                }
                let idx = self.add_candidate(
                    Some(crate::html::html_to_text(&pruned)),
                    "adapter:steamcommunity+text",
                );
                if self.should_early_stop(idx) {
                    return idx;
                }
            }
        }

        // Discourse heuristic keys off the URL path, not the host.
        if self.url.contains("/t/") {
            if let Some(pruned) = adapters::prune_discourse(html) {
                let idx = self.add_candidate(
                    readability_extract(&pruned, self.url, self.output, true, true),
                    "adapter:discourse+readability",
                );
                if self.should_early_stop(idx) {
                    return idx;
                }
            }
            let idx = self.add_candidate(
                adapters::prune_discourse_text(html),
                "adapter:discourse:text_pruned",
            );
            if self.should_early_stop(idx) {
                return idx;
            }
        }

        None
    }

    fn run_general(&mut self, html: &str) -> Option<usize> {
        let idx = self.add_candidate(
            readability_extract(html, self.url, self.output, true, false),
            "readability:precision",
        );
        if self.should_early_stop(idx) {
            return idx;
        }

        if !self.speed_first {
            let idx = self.add_candidate(
                readability_extract(html, self.url, self.output, false, false),
                "readability:recall",
            );
            if self.should_early_stop(idx) {
                return idx;
            }
        }

        let idx = self.add_candidate(fast_extract(html, self.output), "readability:fast");
        if self.should_early_stop(idx) {
            return idx;
        }

        if !self.speed_first {
            let idx =
                self.add_candidate(baseline_extract(html, self.output), "readability:baseline");
            if self.should_early_stop(idx) {
                return idx;
            }
        }

        let idx = self.add_candidate(Some(crate::html::html_to_text(html)), "html:text");
        if self.should_early_stop(idx) {
            return idx;
        }

        None
    }
}

fn meets(candidate: &ExtractionCandidate, min_chars: usize, min_quality: u8) -> bool {
    candidate.char_len >= min_chars && candidate.quality_score >= min_quality
}

/// Run the full competition and return the single best candidate, a
/// degraded title+description fallback, or an empty terminal record.
pub fn extract_best_content(
    html: &str,
    url: &str,
    output: OutputFormat,
    config: &AppConfig,
) -> ExtractionCandidate {
    let host = hostname(url);
    let strategy = config.extraction.strategy;
    let tuning = tuning_for(strategy);
    let min_chars = match output {
        OutputFormat::Markdown => config.extraction.markdown_min_chars,
        OutputFormat::Text => config.extraction.text_min_chars,
    };

    let mut pipeline = Pipeline {
        output,
        tuning,
        quality_first: strategy == ExtractionStrategy::Quality,
        speed_first: strategy == ExtractionStrategy::Speed,
        min_chars,
        candidates: Vec::new(),
        seen_cleaned: HashSet::new(),
        url,
    };

    if let Some(idx) = pipeline.run_adapters(html, &host) {
        return pipeline.candidates.swap_remove(idx);
    }
    if let Some(idx) = pipeline.run_general(html) {
        return pipeline.candidates.swap_remove(idx);
    }

    let mut ranked = pipeline.candidates;
    ranked.sort_by(|a, b| {
        let ka = (
            a.quality_score as i32 + extractor_bonus(&a.extractor, tuning),
            a.quality_score,
            a.char_len,
        );
        let kb = (
            b.quality_score as i32 + extractor_bonus(&b.extractor, tuning),
            b.quality_score,
            b.char_len,
        );
        kb.cmp(&ka)
    });

    for candidate in ranked.iter().filter(|c| c.extractor.starts_with("adapter:")) {
        if meets(candidate, min_chars, tuning.adapter_min_quality) {
            return candidate.clone();
        }
    }
    for candidate in &ranked {
        if meets(candidate, min_chars, tuning.general_min_quality) {
            return candidate.clone();
        }
    }

    // Speed mode keeps the best non-empty candidate even below thresholds.
    if strategy == ExtractionStrategy::Speed {
        if let Some(top) = ranked.first() {
            return top.clone();
        }
    }

    let degraded_source = match output {
        OutputFormat::Markdown => build_degraded_markdown(html),
        OutputFormat::Text => build_degraded_text(html),
    };
    if let Some(degraded) = degraded_source {
        let cleaned = clean_for(output, &degraded);
        let mut candidate = score_content(&cleaned);
        candidate.extractor = "meta:degraded".to_string();
        candidate.degraded = true;
        return candidate;
    }

    ranked.into_iter().next().unwrap_or(ExtractionCandidate {
        content: String::new(),
        extractor: "none".to_string(),
        degraded: true,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_for(strategy: &str) -> AppConfig {
        let env: HashMap<String, String> =
            [("EXTRACTION_STRATEGY".to_string(), strategy.to_string())].into();
        crate::core::config::build_config(&[], &env).config
    }

    fn article_html() -> String {
        let body = "This is test content. ".repeat(80);
        format!(
            "<html><head><title>Demo</title></head><body>\
             <nav>home about contact</nav>\
             <article><h1>Heading</h1><p>{}</p></article>\
             <footer>copyright</footer></body></html>",
            body
        )
    }

    #[test]
    fn every_strategy_produces_content() {
        for strategy in ["quality", "balanced", "speed"] {
            let config = config_for(strategy);
            let result = extract_best_content(
                &article_html(),
                "https://example.com",
                OutputFormat::Markdown,
                &config,
            );
            assert!(!result.content.is_empty(), "strategy {}", strategy);
            assert!(!result.extractor.is_empty(), "strategy {}", strategy);
        }
    }

    #[test]
    fn candidates_never_duplicate_cleaned_content() {
        let config = config_for("speed");
        let mut pipeline = Pipeline {
            output: OutputFormat::Text,
            tuning: tuning_for(config.extraction.strategy),
            quality_first: false,
            speed_first: true,
            min_chars: 1,
            candidates: Vec::new(),
            seen_cleaned: HashSet::new(),
            url: "https://example.com",
        };
        assert!(pipeline
            .add_candidate(Some("Same body text".into()), "a")
            .is_some());
        assert!(pipeline
            .add_candidate(Some("Same body text".into()), "b")
            .is_none());
        assert_eq!(pipeline.candidates.len(), 1);
    }

    #[test]
    fn empty_page_yields_terminal_record() {
        let config = config_for("quality");
        let result = extract_best_content(
            "<html><body></body></html>",
            "https://example.com",
            OutputFormat::Text,
            &config,
        );
        assert_eq!(result.extractor, "none");
        assert!(result.degraded);
        assert!(result.content.is_empty());
    }

    #[test]
    fn blocked_page_degrades_to_title_and_description() {
        let config = config_for("quality");
        let html = r#"<html><head><title>Page title</title>
            <meta name="description" content="A one line description."></head>
            <body><p>tiny</p></body></html>"#;
        let result =
            extract_best_content(html, "https://example.com", OutputFormat::Markdown, &config);
        assert_eq!(result.extractor, "meta:degraded");
        assert!(result.degraded);
        assert!(result.content.contains("Page title"));
    }

    #[test]
    fn scoring_rewards_length_and_penalizes_repetition() {
        let long_unique = (0..40)
            .map(|i| format!("Unique informative sentence number {} with detail.", i))
            .collect::<Vec<_>>()
            .join("\n");
        let repeated = "same line\n".repeat(40);
        let good = score_content(&long_unique);
        let bad = score_content(&repeated);
        assert!(good.quality_score > bad.quality_score);
        assert!(good.unique_line_ratio > bad.unique_line_ratio);
    }

    #[test]
    fn short_line_penalty_activates_only_on_long_listings() {
        let listing = "ab\n".repeat(50);
        let scored = score_content(&listing);
        // 50 short lines: uniqueness collapses and the short-line penalty bites.
        assert!(scored.quality_score < 20);

        let few = "ab\ncd\nef";
        let small = score_content(few);
        assert!(small.line_count < 40);
    }

    #[test]
    fn github_adapter_participates_for_github_urls() {
        let config = config_for("quality");
        let readme_body = "Install with cargo. ".repeat(40);
        let html = format!(
            r#"<html><head><meta property="og:title" content="acme/widget"></head>
            <body><div id="readme"><article class="markdown-body"><p>{}</p></article></div>
            </body></html>"#,
            readme_body
        );
        let result = extract_best_content(
            &html,
            "https://github.com/acme/widget",
            OutputFormat::Markdown,
            &config,
        );
        assert!(result.extractor.starts_with("adapter:github"));
        assert!(result.content.contains("Install with cargo."));
    }
}
