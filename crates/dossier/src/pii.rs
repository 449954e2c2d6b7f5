// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! PII detection and redaction for investigation reports.
//!
//! Scans entity fields and report text for common PII patterns (SSN, phone,
//! email, DOB, financial accounts) and produces redacted versions.

use crate::models::{InvestigationState, PiiAnnotation};
use regex::Regex;
use std::sync::OnceLock;

struct PiiPattern {
    tag: &'static str,
    regex: Regex,
    replacement: &'static str,
}

fn patterns() -> &'static Vec<PiiPattern> {
    static PATTERNS: OnceLock<Vec<PiiPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        #[allow(clippy::expect_used)]
        let build = |tag, pattern: &str, replacement| PiiPattern {
            tag,
            regex: Regex::new(pattern).expect("static PII pattern"),
            replacement,
        };
        vec![
            // SSN: 123-45-6789 or 123456789
            build("ssn", r"\b\d{3}-\d{2}-\d{4}\b", "[SSN REDACTED]"),
            build("ssn", r"\b\d{9}\b", "[SSN REDACTED]"),
            // Phone in common US formats
            build(
                "phone",
                r"\b\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
                "[PHONE REDACTED]",
            ),
            build(
                "email",
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
                "[EMAIL REDACTED]",
            ),
            // DOB: MM/DD/YYYY or YYYY-MM-DD
            build("dob", r"\b\d{1,2}/\d{1,2}/\d{4}\b", "[DOB REDACTED]"),
            build("dob", r"\b\d{4}-\d{2}-\d{2}\b", "[DOB REDACTED]"),
            build(
                "financial_account",
                r"(?i)\baccount\s*#?\s*\d{8,17}\b",
                "[ACCOUNT REDACTED]",
            ),
        ]
    })
}

/// Scans text and state for PII and produces redacted versions.
#[derive(Debug, Default, Clone, Copy)]
pub struct PiiRedactor;

impl PiiRedactor {
    pub fn new() -> Self {
        Self
    }

    /// Scan a text string for PII patterns.
    pub fn scan_text(&self, text: &str) -> Vec<PiiAnnotation> {
        let mut annotations = Vec::new();
        for pattern in patterns() {
            for m in pattern.regex.find_iter(text) {
                annotations.push(PiiAnnotation {
                    entity_id: String::new(),
                    field_name: String::new(),
                    pii_type: pattern.tag.to_string(),
                    original_value: m.as_str().to_string(),
                    redacted_value: pattern.replacement.to_string(),
                });
            }
        }
        annotations
    }

    /// Scan a state's entities and final report.
    pub fn scan_state(&self, state: &InvestigationState) -> Vec<PiiAnnotation> {
        let mut annotations = Vec::new();
        for entity in &state.entities {
            for (key, value) in &entity.attributes {
                for mut ann in self.scan_text(value) {
                    ann.entity_id = entity.id.clone();
                    ann.field_name = format!("attributes.{key}");
                    annotations.push(ann);
                }
            }
            if !entity.description.is_empty() {
                for mut ann in self.scan_text(&entity.description) {
                    ann.entity_id = entity.id.clone();
                    ann.field_name = "description".to_string();
                    annotations.push(ann);
                }
            }
        }
        for mut ann in self.scan_text(&state.final_report) {
            ann.field_name = "final_report".to_string();
            annotations.push(ann);
        }
        annotations
    }

    /// Produce a redacted version of the report. Longest matches replace
    /// first so overlapping values don't leave fragments behind.
    pub fn redact_report(&self, report: &str, annotations: &[PiiAnnotation]) -> String {
        let mut sorted: Vec<&PiiAnnotation> = annotations.iter().collect();
        sorted.sort_by_key(|a| std::cmp::Reverse(a.original_value.len()));
        let mut redacted = report.to_string();
        for ann in sorted {
            if redacted.contains(&ann.original_value) {
                redacted = redacted.replace(&ann.original_value, &ann.redacted_value);
            }
        }
        redacted
    }
}
