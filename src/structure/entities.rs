use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use regex::Regex;

/// Categorised entity lists keyed by category name.
pub type EntityMap = BTreeMap<String, Vec<String>>;

/// Pluggable entity extraction. The structuring pipeline only depends on
/// this trait, so an LLM-backed extractor can replace the keyword one.
pub trait EntityExtractor: Send + Sync {
    fn extract_entities(&self, text: &str) -> EntityMap;
}

const ENTITY_VOCABULARY: &[(&str, &[&str])] = &[
    (
        "conditions",
        &[
            "Erectile Dysfunction",
            "Psychogenic ED",
            "Organic ED",
            "Mixed ED",
            "Vasculogenic ED",
            "Neurogenic ED",
            "Arteriogenic ED",
            "Veno-occlusive dysfunction",
            "Peyronie's disease",
            "Hypogonadism",
            "Testicular atrophy",
            "Diabetes Mellitus",
            "Type 2 Diabetes",
            "Hypertension",
            "Dyslipidemia",
            "Cardiovascular Disease",
            "Ischaemic Heart Disease",
            "Coronary Artery Disease",
            "Heart Failure",
            "Atrial Fibrillation",
            "Stroke",
            "Depression",
            "Anxiety",
            "Benign Prostatic Hyperplasia",
            "LUTS",
            "Prostate Cancer",
            "Spinal Cord Injury",
            "Premature Ejaculation",
            "Obesity",
            "Metabolic Syndrome",
        ],
    ),
    (
        "medications",
        &[
            "Phosphodiesterase-5 inhibitors",
            "PDE5i",
            "Alpha-blockers",
            "Antihypertensives",
            "Nitrates",
            "Androgens",
            "Antidepressants",
            "SSRI",
            "Sildenafil",
            "Tadalafil",
            "Vardenafil",
            "Avanafil",
            "Udenafil",
            "Alprostadil",
            "Papaverine",
            "Phentolamine",
            "Yohimbine",
            "Glyceryl trinitrate",
            "Isosorbide mononitrate",
            "Riociguat",
            "Doxazosin",
            "Tongkat Ali",
            "Ginseng",
            "L-arginine",
            "Propionyl-L-carnitine",
        ],
    ),
    (
        "diagnostic_tools",
        &[
            "IIEF-5",
            "International Index of Erectile Function",
            "EHS",
            "Erection Hardness Score",
            "Framingham Risk Score",
            "Princeton Consensus",
            "PHQ-9",
            "GAD-7",
            "Fasting Blood Glucose",
            "HbA1c",
            "Lipid Profile",
            "Total Testosterone",
            "Prolactin",
            "LH",
            "PSA",
            "Serum Creatinine",
            "Urinalysis",
            "ECG",
            "Nocturnal Penile Tumescence",
            "NPTR",
            "Penile Duplex Doppler Ultrasound",
            "Pudendal Arteriography",
        ],
    ),
    (
        "procedures",
        &[
            "Lifestyle modification",
            "Weight loss",
            "Smoking cessation",
            "Pelvic floor muscle training",
            "Physical activity",
            "Vacuum Erection Device",
            "VED",
            "Low-intensity Extracorporeal Shockwave Therapy",
            "Li-ESWT",
            "Penile Prosthesis",
            "Inflatable Penile Prosthesis",
            "Malleable Prosthesis",
            "Penile Revascularization",
            "Angioplasty",
            "Psychosexual therapy",
            "CBT",
            "Couples therapy",
            "Sex therapy",
        ],
    ),
    (
        "risk_factors",
        &[
            "Smoking",
            "Sedentary lifestyle",
            "Alcohol consumption",
            "Recreational drug use",
            "Advanced age",
            "Pelvic surgery",
            "Radiotherapy",
            "Trauma",
            "Morning erection loss",
            "Low libido",
            "Performance anxiety",
        ],
    ),
    (
        "adverse_events",
        &[
            "Priapism",
            "Hypotension",
            "Headache",
            "Flushing",
            "Dyspepsia",
            "Nasal congestion",
            "Visual abnormalities",
            "Myalgia",
            "Back pain",
            "NAION",
            "Hearing loss",
        ],
    ),
];

#[derive(Debug)]
struct EntityCategory {
    name: &'static str,
    pattern: Regex,
    canonical: HashMap<String, &'static str>,
}

/// Vocabulary matcher over a fixed clinical term list. Matching is
/// case-insensitive, word-bounded and tolerant of line breaks inside a term.
#[derive(Debug)]
pub struct KeywordEntityExtractor {
    categories: Vec<EntityCategory>,
}

impl KeywordEntityExtractor {
    pub fn new() -> Result<Self> {
        let categories = ENTITY_VOCABULARY
            .iter()
            .map(|(name, terms)| compile_category(name, terms))
            .collect::<Result<Vec<EntityCategory>>>()?;
        Ok(Self { categories })
    }
}

impl EntityExtractor for KeywordEntityExtractor {
    fn extract_entities(&self, text: &str) -> EntityMap {
        let mut entities = EntityMap::new();
        for category in &self.categories {
            let mut found = Vec::<String>::new();
            for matched in category.pattern.find_iter(text) {
                let Some(term) = category.canonical.get(&normalize_term(matched.as_str())) else {
                    continue;
                };
                if !found.iter().any(|existing| existing == term) {
                    found.push((*term).to_string());
                }
            }
            if !found.is_empty() {
                entities.insert(category.name.to_string(), found);
            }
        }
        entities
    }
}

fn compile_category(name: &'static str, terms: &[&'static str]) -> Result<EntityCategory> {
    // Longest first so "Type 2 Diabetes" wins over a shorter overlapping term.
    let mut ordered = terms.to_vec();
    ordered.sort_by_key(|term| std::cmp::Reverse(term.len()));

    let alternation = ordered
        .iter()
        .map(|term| {
            term.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<String>>()
                .join(r"\s+")
        })
        .collect::<Vec<String>>()
        .join("|");
    let pattern = Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
        .with_context(|| format!("failed to compile {name} entity regex"))?;

    let canonical = terms
        .iter()
        .map(|term| (normalize_term(term), *term))
        .collect();

    Ok(EntityCategory {
        name,
        pattern,
        canonical,
    })
}

fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}
