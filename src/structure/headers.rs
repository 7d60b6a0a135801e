use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

use super::font_profile::FontThresholds;

const SIZE_EPSILON: f32 = 0.005;
const SHORT_BOLD_MAX_WORDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "u8")]
pub enum HeaderLevel {
    Main,
    Sub,
    SubSub,
}

impl HeaderLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            HeaderLevel::Main => 1,
            HeaderLevel::Sub => 2,
            HeaderLevel::SubSub => 3,
        }
    }
}

impl From<HeaderLevel> for u8 {
    fn from(level: HeaderLevel) -> Self {
        level.as_u8()
    }
}

/// Lexical header patterns, compiled once and shared by every document.
#[derive(Debug)]
pub struct HeaderPatterns {
    main_section: Regex,
    appendix: Regex,
    subsection: Regex,
    labelled_figure: Regex,
    sub_subsection: Regex,
    toc_line: Regex,
}

impl HeaderPatterns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            main_section: Regex::new(r"^\d+\.\s+[A-Z][A-Z\s&]+$")
                .context("failed to compile main section regex")?,
            appendix: Regex::new(r"(?i)^appendix\s*(?:\d+|[A-Z])\b")
                .context("failed to compile appendix regex")?,
            subsection: Regex::new(r"^\d+\.\d+\s+.+$")
                .context("failed to compile subsection regex")?,
            labelled_figure: Regex::new(r"(?i)^(?:algorithm|table)\s*(?:\d+|[A-Z])\b")
                .context("failed to compile algorithm/table label regex")?,
            sub_subsection: Regex::new(r"^\d+\.\d+\.\d+\s+.+$")
                .context("failed to compile sub-subsection regex")?,
            toc_line: Regex::new(r"\.{3,}\s*\d+\s*$")
                .context("failed to compile table-of-contents line regex")?,
        })
    }

    fn match_level(&self, text: &str) -> Option<HeaderLevel> {
        if self.main_section.is_match(text) || self.appendix.is_match(text) {
            return Some(HeaderLevel::Main);
        }
        if self.subsection.is_match(text) || self.labelled_figure.is_match(text) {
            return Some(HeaderLevel::Sub);
        }
        if self.sub_subsection.is_match(text) {
            return Some(HeaderLevel::SubSub);
        }
        None
    }
}

/// Decides whether a block is a header, using one document's thresholds.
#[derive(Debug, Clone, Copy)]
pub struct HeaderClassifier<'a> {
    patterns: &'a HeaderPatterns,
    thresholds: FontThresholds,
}

impl<'a> HeaderClassifier<'a> {
    pub fn new(patterns: &'a HeaderPatterns, thresholds: FontThresholds) -> Self {
        Self {
            patterns,
            thresholds,
        }
    }

    pub fn classify(&self, text: &str, font_size: f32, is_bold: bool) -> Option<HeaderLevel> {
        let text = text.trim();
        if text.is_empty() || self.patterns.toc_line.is_match(text) {
            return None;
        }

        if let Some(level) = self.patterns.match_level(text) {
            return Some(level);
        }

        if !is_bold {
            return None;
        }
        if font_size + SIZE_EPSILON >= self.thresholds.main_section {
            return Some(HeaderLevel::Main);
        }
        if font_size + SIZE_EPSILON >= self.thresholds.subsection {
            return Some(HeaderLevel::Sub);
        }
        if text.split_whitespace().count() < SHORT_BOLD_MAX_WORDS {
            return Some(HeaderLevel::SubSub);
        }

        None
    }
}
