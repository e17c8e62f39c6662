//! Extraction config surface: strategy selection, defaults, and the
//! strategy smoke test over a real article-shaped document.

use std::collections::HashMap;

use pagescout::core::config::build_config;
use pagescout::extract::{extract_best_content, OutputFormat};

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn defaults_are_applied() {
    let cfg = build_config(&[], &env(&[])).config;
    assert_eq!(cfg.extraction.strategy.as_str(), "quality");
    assert_eq!(cfg.extraction.markdown_min_chars, 120);
    assert_eq!(cfg.extraction.text_min_chars, 200);
}

#[test]
fn explicit_extraction_options_are_honored() {
    let cfg = build_config(
        &[],
        &env(&[
            ("EXTRACTION_STRATEGY", "speed"),
            ("EXTRACTION_MARKDOWN_MIN_CHARS", "150"),
            ("EXTRACTION_TEXT_MIN_CHARS", "260"),
        ]),
    )
    .config;
    assert_eq!(cfg.extraction.strategy.as_str(), "speed");
    assert_eq!(cfg.extraction.markdown_min_chars, 150);
    assert_eq!(cfg.extraction.text_min_chars, 260);
}

#[test]
fn deprecated_tuning_variables_are_silently_ignored() {
    let outcome = build_config(
        &[],
        &env(&[
            ("EXTRACTION_ADAPTER_MIN_QUALITY", "99"),
            ("EXTRACTION_GENERAL_MIN_QUALITY", "99"),
            ("EXTRACTION_BONUS_ADAPTER", "99"),
            ("EXTRACTION_BONUS_PRECISION", "99"),
            ("EXTRACTION_BONUS_RECALL", "99"),
            ("EXTRACTION_BONUS_FAST", "99"),
            ("EXTRACTION_BONUS_BASELINE", "99"),
            ("EXTRACTION_EARLY_STOP", "0"),
            ("EXTRACTION_EARLY_STOP_QUALITY", "99"),
            ("EXTRACTION_EARLY_STOP_CHARS", "9999"),
        ]),
    );
    assert_eq!(outcome.config.extraction.strategy.as_str(), "quality");
    assert_eq!(outcome.config.extraction.markdown_min_chars, 120);
    assert_eq!(outcome.config.extraction.text_min_chars, 200);
    assert!(outcome.warnings.is_empty());
}

#[test]
fn invalid_strategy_falls_back_to_quality_with_a_diagnostic() {
    let outcome = build_config(&[], &env(&[("EXTRACTION_STRATEGY", "fastest")]));
    assert_eq!(outcome.config.extraction.strategy.as_str(), "quality");
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("invalid value for EXTRACTION_STRATEGY")));
}

#[test]
fn every_strategy_extracts_a_repetitive_article() {
    let body = "This is test content. ".repeat(80);
    let html = format!(
        "<html><head><title>Demo</title></head><body><article><h1>Heading</h1><p>{}</p></article></body></html>",
        body
    );
    for strategy in ["quality", "balanced", "speed"] {
        let cfg = build_config(&[], &env(&[("EXTRACTION_STRATEGY", strategy)])).config;
        let result = extract_best_content(&html, "https://example.com", OutputFormat::Markdown, &cfg);
        assert!(!result.content.is_empty(), "strategy {}", strategy);
        assert!(!result.extractor.is_empty(), "strategy {}", strategy);
    }
}

#[test]
fn markdown_and_text_modes_use_their_own_minimums() {
    let cfg = build_config(
        &[],
        &env(&[("EXTRACTION_MARKDOWN_MIN_CHARS", "1"), ("EXTRACTION_TEXT_MIN_CHARS", "1")]),
    )
    .config;
    let html = "<html><head><title>T</title></head><body><article><p>Short but real content line that still counts.</p></article></body></html>";
    let md = extract_best_content(html, "https://example.com", OutputFormat::Markdown, &cfg);
    let txt = extract_best_content(html, "https://example.com", OutputFormat::Text, &cfg);
    assert!(!md.content.is_empty());
    assert!(!txt.content.is_empty());
}
