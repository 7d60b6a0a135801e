use std::fmt;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

pub const DEFAULT_POPULATION: &str = "General";
const ENTITY_MENTION_CAP: usize = 50;
const ABBREVIATION_MAX_CHARS: usize = 3;

/// Population keyword table; the first population with a matching keyword wins.
const POPULATION_KEYWORDS: &[(&str, &[&str])] = &[
    ("General", &["general population", "all patients", "men with ed"]),
    (
        "Diabetes",
        &["diabetes", "diabetic", "dm", "type 2 diabetes", "hyperglycemia"],
    ),
    (
        "Cardiac Disease",
        &[
            "cardiac",
            "cardiovascular",
            "heart disease",
            "cvd",
            "ihd",
            "heart failure",
        ],
    ),
    (
        "Spinal Cord Injury",
        &["spinal cord injury", "sci", "neurogenic"],
    ),
    (
        "Hypertension",
        &["hypertension", "hypertensive", "high blood pressure"],
    ),
    (
        "Elderly",
        &["elderly", "older men", "advanced age", "geriatric"],
    ),
    (
        "Post-prostatectomy",
        &["prostatectomy", "radical prostatectomy", "post-surgical"],
    ),
];

const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::Diagnosis,
        &[
            "diagnosis",
            "assessment",
            "evaluation",
            "history",
            "examination",
            "investigation",
        ],
    ),
    (
        Category::Treatment,
        &[
            "treatment",
            "therapy",
            "management",
            "pharmacological",
            "intervention",
        ],
    ),
    (
        Category::Referral,
        &[
            "referral",
            "refer",
            "specialist",
            "urologist",
            "cardiologist",
            "psychiatrist",
        ],
    ),
    (
        Category::Monitoring,
        &["monitoring", "follow-up", "surveillance", "review"],
    ),
    (
        Category::Prevention,
        &[
            "prevention",
            "preventive",
            "lifestyle modification",
            "risk reduction",
        ],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EvidenceLevel {
    #[serde(rename = "Level I")]
    LevelI,
    #[serde(rename = "Level II")]
    LevelII,
    #[serde(rename = "Level III")]
    LevelIII,
}

impl EvidenceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceLevel::LevelI => "Level I",
            EvidenceLevel::LevelII => "Level II",
            EvidenceLevel::LevelIII => "Level III",
        }
    }

    fn from_marker(marker: &str) -> Option<Self> {
        match marker.to_ascii_uppercase().as_str() {
            "I" | "1" => Some(EvidenceLevel::LevelI),
            "II" | "2" => Some(EvidenceLevel::LevelII),
            "III" | "3" => Some(EvidenceLevel::LevelIII),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Grade {
    #[serde(rename = "Grade A")]
    A,
    #[serde(rename = "Grade B")]
    B,
    #[serde(rename = "Grade C")]
    C,
    #[serde(rename = "Key Recommendation")]
    KeyRecommendation,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::A => "Grade A",
            Grade::B => "Grade B",
            Grade::C => "Grade C",
            Grade::KeyRecommendation => "Key Recommendation",
        }
    }

    fn from_letter(letter: &str) -> Option<Self> {
        match letter.to_ascii_uppercase().as_str() {
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "C" => Some(Grade::C),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Category {
    Diagnosis,
    Treatment,
    Referral,
    Monitoring,
    Prevention,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Diagnosis => "Diagnosis",
            Category::Treatment => "Treatment",
            Category::Referral => "Referral",
            Category::Monitoring => "Monitoring",
            Category::Prevention => "Prevention",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(EvidenceLevel, Grade, Category);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTags {
    pub evidence_level: Option<EvidenceLevel>,
    pub grade: Option<Grade>,
    pub target_population: String,
    pub category: Option<Category>,
    pub is_recommendation: bool,
    pub entities_mentioned: usize,
}

/// Rule-based chunk annotator. Every extractor is a pure function of its
/// input text, so one tagger is shared across documents.
#[derive(Debug)]
pub struct MetadataTagger {
    evidence_level: Regex,
    grade: Regex,
    key_recommendation: Regex,
    numbered_recommendation: Regex,
    directive: Regex,
    populations: Vec<(&'static str, Regex)>,
    categories: Vec<(Category, Regex)>,
    entity_mentions: Vec<Regex>,
}

impl MetadataTagger {
    pub fn new() -> Result<Self> {
        let populations = POPULATION_KEYWORDS
            .iter()
            .map(|(population, keywords)| {
                keyword_regex(keywords)
                    .with_context(|| format!("failed to compile {population} keyword regex"))
                    .map(|regex| (*population, regex))
            })
            .collect::<Result<Vec<_>>>()?;
        let categories = CATEGORY_KEYWORDS
            .iter()
            .map(|(category, keywords)| {
                keyword_regex(keywords)
                    .with_context(|| format!("failed to compile {category} keyword regex"))
                    .map(|regex| (*category, regex))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            evidence_level: Regex::new(r"(?i)\blevel\s+(I{1,3}|[1-3])(?:\b|[a-c]\b)")
                .context("failed to compile evidence level regex")?,
            grade: Regex::new(r"(?i)\bgrade\s+([A-C])\b").context("failed to compile grade regex")?,
            key_recommendation: Regex::new(r"(?i)\bkey\s+recommendation")
                .context("failed to compile key recommendation regex")?,
            numbered_recommendation: Regex::new(r"(?i)\brecommendation\s*\d+")
                .context("failed to compile numbered recommendation regex")?,
            directive: Regex::new(r"(?i)\b(?:should|shall|must|recommended)\b")
                .context("failed to compile directive regex")?,
            populations,
            categories,
            entity_mentions: vec![
                Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b")
                    .context("failed to compile proper noun regex")?,
                Regex::new(r"\b(?:PDE5i?|SSRI|ECG|HbA1c)\b")
                    .context("failed to compile clinical abbreviation regex")?,
                Regex::new(r"\b\d+\s*(?:mg|ml)\b").context("failed to compile dosage regex")?,
            ],
        })
    }

    /// Tags one chunk. Population and category also look at the owning
    /// section's title; the other extractors see only the chunk text.
    pub fn tag(&self, section_title: &str, text: &str) -> ChunkTags {
        let titled = format!("{section_title} {text}");
        let grade = self.grade(text);
        ChunkTags {
            evidence_level: self.evidence_level(text),
            grade,
            target_population: self.population(&titled).to_string(),
            category: self.category(&titled),
            is_recommendation: grade.is_some() || self.has_recommendation_language(text),
            entities_mentioned: self.entities_mentioned(text),
        }
    }

    pub fn evidence_level(&self, text: &str) -> Option<EvidenceLevel> {
        self.evidence_level
            .captures(text)
            .and_then(|captures| captures.get(1))
            .and_then(|marker| EvidenceLevel::from_marker(marker.as_str()))
    }

    pub fn grade(&self, text: &str) -> Option<Grade> {
        if let Some(grade) = self
            .grade
            .captures(text)
            .and_then(|captures| captures.get(1))
            .and_then(|letter| Grade::from_letter(letter.as_str()))
        {
            return Some(grade);
        }
        self.key_recommendation
            .is_match(text)
            .then_some(Grade::KeyRecommendation)
    }

    pub fn population(&self, text: &str) -> &'static str {
        self.populations
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(population, _)| *population)
            .unwrap_or(DEFAULT_POPULATION)
    }

    pub fn category(&self, text: &str) -> Option<Category> {
        self.categories
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(category, _)| *category)
    }

    pub fn is_recommendation(&self, text: &str) -> bool {
        self.grade(text).is_some() || self.has_recommendation_language(text)
    }

    pub fn entities_mentioned(&self, text: &str) -> usize {
        let count = self
            .entity_mentions
            .iter()
            .map(|regex| regex.find_iter(text).count())
            .sum::<usize>();
        count.min(ENTITY_MENTION_CAP)
    }

    fn has_recommendation_language(&self, text: &str) -> bool {
        self.numbered_recommendation.is_match(text) || self.directive.is_match(text)
    }
}

/// Keywords match from a word start, so inflected forms ("treatments",
/// "diabetics") tag too. Abbreviations of up to three letters must also end
/// at a word boundary.
fn keyword_regex(keywords: &[&str]) -> Result<Regex> {
    let alternation = keywords
        .iter()
        .map(|keyword| {
            let escaped = regex::escape(keyword);
            if keyword.chars().count() <= ABBREVIATION_MAX_CHARS {
                format!(r"{escaped}\b")
            } else {
                escaped
            }
        })
        .collect::<Vec<String>>()
        .join("|");
    Ok(Regex::new(&format!(r"(?i)\b(?:{alternation})"))?)
}
