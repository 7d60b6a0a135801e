use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use super::*;
use crate::sources::text::parse_plain_text;
use crate::util::char_len;
use chunking::{ALGORITHMS_GROUP, TABLES_GROUP, split_content};
use document::{BoundingBox, DetectedTable, EmbeddedImage, SourcePage, TextSpan};
use entities::KeywordEntityExtractor;
use font_profile::FontThresholds;
use headers::HeaderLevel;
use hierarchy::PREAMBLE_TITLE;
use tables::{LayoutTableFinder, ProvidedTableFinder, TableFinder};
use tagging::{Category, EvidenceLevel, Grade};
use vision::{VisionDescriber, VisionOptions, describe_algorithms};

fn structurer() -> Structurer {
    Structurer::new().expect("patterns compile")
}

fn identity() -> DocumentIdentity {
    DocumentIdentity {
        doc_id: "cpg_sample".to_string(),
        source_path: "sources/cpg_sample.txt".to_string(),
        source_sha256: "0".repeat(64),
        fallback_title: "cpg_sample".to_string(),
    }
}

fn structure_text(text: &str, config: &ChunkingConfig) -> StructuredDocument {
    let structurer = structurer();
    let document = parse_plain_text(text);
    let layout = structurer.analyze_layout(&document, None);
    structurer
        .assemble(layout, &[], config, None, identity())
        .expect("assemble chunks")
}

fn span(text: &str, font_size: f32, is_bold: bool, block: u32, bbox: BoundingBox) -> TextSpan {
    TextSpan {
        text: text.to_string(),
        font_size,
        is_bold,
        bbox,
        block,
        line: block,
    }
}

fn image(index: usize, size: usize) -> EmbeddedImage {
    EmbeddedImage {
        index,
        mime_type: "image/png".to_string(),
        data: vec![7u8; size],
    }
}

#[test]
fn treatment_scenario_builds_two_sections_and_tags_chunks() {
    let text = "4. TREATMENT\n\nPDE5 inhibitors are first-line. [Grade A]\n\n4.2 Pharmacological Treatment\n\nSildenafil 50mg on-demand.";
    let structured = structure_text(text, &ChunkingConfig::default());

    let tree = &structured.tree;
    assert_eq!(tree.len(), 2);
    assert_eq!(tree.roots().len(), 1);
    let root = tree.get(tree.roots()[0]);
    assert_eq!(root.title, "4. TREATMENT");
    assert_eq!(root.level, HeaderLevel::Main);
    assert_eq!(root.children.len(), 1);
    let child = tree.get(root.children[0]);
    assert_eq!(child.title, "4.2 Pharmacological Treatment");
    assert_eq!(child.level, HeaderLevel::Sub);
    assert_eq!(child.parent, Some(root.id));

    assert_eq!(structured.chunks.len(), 2);
    let first = &structured.chunks[0];
    assert_eq!(first.section_hierarchy, vec!["4. TREATMENT"]);
    assert_eq!(first.grade, Some(Grade::A));
    assert!(first.is_recommendation);
    assert_eq!(first.parent_section, None);

    let second = &structured.chunks[1];
    assert_eq!(
        second.section_hierarchy,
        vec!["4. TREATMENT", "4.2 Pharmacological Treatment"]
    );
    assert_eq!(second.parent_section.as_deref(), Some("4. TREATMENT"));
    assert_eq!(second.category, Some(Category::Treatment));
    assert_eq!(second.content, "Sildenafil 50mg on-demand.");

    assert_eq!(
        structured.metadata.top_level_section_titles,
        vec!["4. TREATMENT"]
    );
    assert_eq!(structured.metadata.title, "cpg_sample");
    assert_eq!(structured.metadata.chunk_summary.recommendations, 1);
    assert_eq!(
        structured.metadata.chunk_summary.by_grade.get("Grade A"),
        Some(&1)
    );
}

fn long_section_text() -> (String, String) {
    let mut paragraphs = Vec::new();
    for paragraph in 0..28 {
        let sentences = (0..5)
            .map(|sentence| {
                format!(
                    "Paragraph {paragraph} sentence {sentence} describes assessment findings in detail for the clinician."
                )
            })
            .collect::<Vec<String>>();
        paragraphs.push(sentences.join(" "));
    }
    let oversized = (0..30)
        .map(|sentence| {
            format!("Oversized sentence {sentence} keeps going with enough words to need splitting.")
        })
        .collect::<Vec<String>>()
        .join(" ");
    paragraphs.insert(10, oversized);

    let body = paragraphs.join("\n\n");
    (format!("1. INTRODUCTION\n\n{body}"), body)
}

fn words(text: &str) -> Vec<&str> {
    text.split_whitespace().collect()
}

#[test]
fn long_section_splits_within_max_size_and_preserves_order() {
    let (text, body) = long_section_text();
    assert!(char_len(&body) >= 12_000);

    let config = ChunkingConfig::default();
    let structured = structure_text(&text, &config);
    let marker = chunking::context_marker(&["1. INTRODUCTION".to_string()]);

    assert!(structured.chunks.len() >= 6);
    for chunk in &structured.chunks {
        assert!(char_len(&chunk.content) <= config.max_chunk_size);
        assert!(chunk.content.starts_with(&marker));
    }

    let rebuilt = structured
        .chunks
        .iter()
        .map(|chunk| chunk.content.trim_start_matches(marker.as_str()))
        .collect::<Vec<&str>>()
        .join("\n\n");
    assert_eq!(words(&rebuilt), words(&body));
}

#[test]
fn context_markers_can_be_disabled() {
    let (text, body) = long_section_text();
    let config = ChunkingConfig {
        context_markers: false,
        ..ChunkingConfig::default()
    };
    let structured = structure_text(&text, &config);

    assert!(structured.chunks.iter().all(|chunk| !chunk.content.contains("<!-- CONTEXT")));
    let rebuilt = structured
        .chunks
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<&str>>()
        .join("\n\n");
    assert_eq!(words(&rebuilt), words(&body));
}

#[test]
fn single_oversized_sentence_is_kept_whole() {
    let sentence = "x".repeat(1_500);
    let content = format!("{sentence}\n\nShort paragraph.");
    let pieces = split_content(&content, 1_000);

    assert_eq!(pieces.len(), 2);
    assert_eq!(pieces[0], sentence);
    assert_eq!(pieces[1], "Short paragraph.");
}

#[test]
fn small_content_is_a_single_piece() {
    assert_eq!(split_content("  One paragraph.  ", 100), vec!["One paragraph."]);
    assert!(split_content("   ", 100).is_empty());
}

#[test]
fn chunking_config_rejects_inverted_sizes() {
    assert!(ChunkingConfig::default().validate().is_ok());
    let zero = ChunkingConfig {
        chunk_size: 0,
        ..ChunkingConfig::default()
    };
    assert!(zero.validate().is_err());
    let inverted = ChunkingConfig {
        chunk_size: 3_000,
        max_chunk_size: 2_000,
        context_markers: true,
    };
    assert!(inverted.validate().is_err());
}

#[test]
fn token_count_is_quarter_of_character_length() {
    let (text, _) = long_section_text();
    let structured = structure_text(&text, &ChunkingConfig::default());
    for chunk in &structured.chunks {
        assert_eq!(chunk.token_count, char_len(&chunk.content) / 4);
    }
}

#[test]
fn header_classifier_applies_patterns_before_typography() {
    let patterns = HeaderPatterns::new().expect("patterns compile");
    let classifier = HeaderClassifier::new(&patterns, FontThresholds::default());

    assert_eq!(classifier.classify("4. TREATMENT", 10.0, false), Some(HeaderLevel::Main));
    assert_eq!(
        classifier.classify("Appendix 2 Drug Dosages", 10.0, false),
        Some(HeaderLevel::Main)
    );
    assert_eq!(
        classifier.classify("4.2 Pharmacological Treatment", 10.0, false),
        Some(HeaderLevel::Sub)
    );
    assert_eq!(
        classifier.classify("Table 3: PDE5 inhibitor dosing", 10.0, false),
        Some(HeaderLevel::Sub)
    );
    assert_eq!(
        classifier.classify("Algorithm A Management of ED", 10.0, false),
        Some(HeaderLevel::Sub)
    );
    assert_eq!(
        classifier.classify("4.2.1 Sildenafil", 10.0, false),
        Some(HeaderLevel::SubSub)
    );
    assert_eq!(classifier.classify("Tablets should be taken whole.", 10.0, false), None);
    assert_eq!(classifier.classify("4. TREATMENT ........ 12", 14.0, true), None);
    assert_eq!(classifier.classify("   ", 20.0, true), None);
}

#[test]
fn header_classifier_falls_back_to_font_thresholds() {
    let patterns = HeaderPatterns::new().expect("patterns compile");
    let classifier = HeaderClassifier::new(&patterns, FontThresholds::default());

    assert_eq!(
        classifier.classify("Management of erectile dysfunction", 14.0, true),
        Some(HeaderLevel::Main)
    );
    assert_eq!(
        classifier.classify("Oral pharmacotherapy", 12.0, true),
        Some(HeaderLevel::Sub)
    );
    assert_eq!(classifier.classify("Key points", 10.0, true), Some(HeaderLevel::SubSub));
    assert_eq!(
        classifier.classify(
            "This bold sentence is far too long to be any kind of header at all",
            10.0,
            true
        ),
        None
    );
    assert_eq!(classifier.classify("Oral pharmacotherapy", 16.0, false), None);
}

#[test]
fn header_classifier_is_pure() {
    let patterns = HeaderPatterns::new().expect("patterns compile");
    let classifier = HeaderClassifier::new(&patterns, FontThresholds::default());
    let inputs = [
        ("4. TREATMENT", 10.0, false),
        ("Key points", 10.0, true),
        ("Plain body text.", 11.0, false),
        ("Oral pharmacotherapy", 12.0, true),
    ];
    for (text, size, bold) in inputs {
        assert_eq!(
            classifier.classify(text, size, bold),
            classifier.classify(text, size, bold)
        );
    }
}

#[test]
fn tagger_extracts_grades_and_levels() {
    let structurer = structurer();
    let tagger = structurer.tagger();

    assert_eq!(tagger.grade("Offer PDE5i first. [Grade A]"), Some(Grade::A));
    assert_eq!(tagger.grade("offer counselling (grade b)"), Some(Grade::B));
    assert_eq!(
        tagger.grade("Key Recommendation: screen for CVD"),
        Some(Grade::KeyRecommendation)
    );
    assert_eq!(tagger.grade("Sildenafil 50mg on-demand."), None);

    assert_eq!(tagger.evidence_level("Level 2 evidence"), Some(EvidenceLevel::LevelII));
    assert_eq!(tagger.evidence_level("Level III"), Some(EvidenceLevel::LevelIII));
    assert_eq!(tagger.evidence_level("level i, grade c"), Some(EvidenceLevel::LevelI));
    assert_eq!(tagger.evidence_level("the level in serum"), None);
    assert_eq!(
        tagger.evidence_level("Level IIa evidence"),
        Some(EvidenceLevel::LevelII)
    );
    assert_eq!(tagger.evidence_level("Level 1a"), Some(EvidenceLevel::LevelI));
    assert_eq!(tagger.evidence_level("Level IId"), None);
}

#[test]
fn tagger_defaults_population_and_category() {
    let structurer = structurer();
    let tagger = structurer.tagger();

    assert_eq!(tagger.population("Scientific evidence is limited."), "General");
    assert_eq!(tagger.population("Men with diabetes and the elderly"), "Diabetes");
    assert_eq!(tagger.population("after radical prostatectomy"), "Post-prostatectomy");
    assert_eq!(tagger.category("Background text."), None);
    assert_eq!(tagger.category("Refer to a urologist"), Some(Category::Referral));
    assert_eq!(
        tagger.category("Take a sexual history and treatment history"),
        Some(Category::Diagnosis)
    );

    let tags = tagger.tag("Overview", "No keywords here.");
    assert_eq!(tags.target_population, "General");
    assert_eq!(tags.category, None);
    assert!(!tags.is_recommendation);
}

#[test]
fn tagger_matches_plural_and_inflected_keywords() {
    let structurer = structurer();
    let tagger = structurer.tagger();

    assert_eq!(tagger.category("Treatments for ED"), Some(Category::Treatment));
    assert_eq!(
        tagger.category("Referrals to specialists"),
        Some(Category::Referral)
    );
    assert_eq!(
        tagger.category("Physical examinations"),
        Some(Category::Diagnosis)
    );
    assert_eq!(tagger.population("Diabetics with ED"), "Diabetes");
    assert_eq!(tagger.population("Hypertensives on beta blockers"), "Hypertension");

    let tags = tagger.tag("Treatments for ED", "Offer counselling.");
    assert_eq!(tags.category, Some(Category::Treatment));
}

#[test]
fn tagger_keeps_abbreviations_word_bounded() {
    let structurer = structurer();
    let tagger = structurer.tagger();

    assert_eq!(tagger.population("patients on hospital admission"), "General");
    assert_eq!(tagger.population("Scientific evidence is limited."), "General");
    assert_eq!(tagger.population("Men with DM and ED"), "Diabetes");
    assert_eq!(tagger.population("history of IHD"), "Cardiac Disease");
}

#[test]
fn tagger_detects_recommendation_language() {
    let structurer = structurer();
    let tagger = structurer.tagger();

    assert!(tagger.is_recommendation("Recommendation 3: offer lifestyle advice"));
    assert!(tagger.is_recommendation("Patients SHOULD be screened"));
    assert!(tagger.is_recommendation("Grade C"));
    assert!(!tagger.is_recommendation("We reviewed the literature."));
}

#[test]
fn tagger_counts_entity_mentions_with_cap() {
    let structurer = structurer();
    let tagger = structurer.tagger();

    assert_eq!(tagger.entities_mentioned("Sildenafil 50 mg and an ECG"), 3);
    let crowded = "Sildenafil and ".repeat(80);
    assert_eq!(tagger.entities_mentioned(&crowded), 50);
}

#[test]
fn hierarchy_paths_follow_nesting() {
    let text = "1. INTRODUCTION\n\nIntro.\n\n1.1 Scope\n\nScope text.\n\n1.1.1 Users\n\nUsers text.\n\n1.2 Methods\n\nMethods text.\n\n2. DIAGNOSIS\n\nDiagnosis text.";
    let structured = structure_text(text, &ChunkingConfig::default());
    let tree = &structured.tree;

    for id in tree.depth_first() {
        let section = tree.get(id);
        let path = tree.path(id);
        assert_eq!(path.len(), tree.depth(id));
        assert_eq!(path.last(), Some(&section.title));
        if let Some(parent) = section.parent {
            let parent = tree.get(parent);
            assert!(parent.level < section.level);
            let parent_position = path.iter().position(|title| *title == parent.title);
            assert_eq!(parent_position, Some(path.len() - 2));
        }
    }

    let users = structured
        .chunks
        .iter()
        .find(|chunk| chunk.content == "Users text.")
        .expect("users chunk");
    assert_eq!(
        users.section_hierarchy,
        vec!["1. INTRODUCTION", "1.1 Scope", "1.1.1 Users"]
    );
    assert_eq!(users.parent_section.as_deref(), Some("1.1 Scope"));

    let order = structured
        .chunks
        .iter()
        .map(|chunk| chunk.content.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(
        order,
        vec![
            "Intro.",
            "Scope text.",
            "Users text.",
            "Methods text.",
            "Diagnosis text."
        ]
    );
}

#[test]
fn sub_subsection_without_open_subsection_attaches_to_main_section() {
    let text = "1. ASSESSMENT\n\nAssessment text.\n\n1.1.1 Questionnaires\n\nIIEF-5 text.";
    let structured = structure_text(text, &ChunkingConfig::default());
    let tree = &structured.tree;

    assert_eq!(tree.roots().len(), 1);
    assert_eq!(tree.orphan_count(), 0);
    let root = tree.get(tree.roots()[0]);
    let child = tree.get(root.children[0]);
    assert_eq!(child.title, "1.1.1 Questionnaires");
    assert_eq!(child.level, HeaderLevel::SubSub);
    assert_eq!(child.parent, Some(root.id));

    let chunk = structured
        .chunks
        .iter()
        .find(|chunk| chunk.content == "IIEF-5 text.")
        .expect("questionnaire chunk");
    assert_eq!(
        chunk.section_hierarchy,
        vec!["1. ASSESSMENT", "1.1.1 Questionnaires"]
    );
    assert_eq!(chunk.parent_section.as_deref(), Some("1. ASSESSMENT"));
}

#[test]
fn main_section_closes_previous_subsections() {
    let text = "1. ASSESSMENT\n\nA text.\n\n1.1 History\n\nB text.\n\n2. TREATMENT\n\nC text.\n\n2.1.1 Dosing\n\nD text.";
    let structured = structure_text(text, &ChunkingConfig::default());
    let tree = &structured.tree;

    assert_eq!(tree.roots().len(), 2);
    let treatment = tree.get(tree.roots()[1]);
    assert_eq!(treatment.title, "2. TREATMENT");
    let dosing = tree.get(treatment.children[0]);
    assert_eq!(dosing.title, "2.1.1 Dosing");
    assert_eq!(dosing.parent, Some(treatment.id));

    let history = tree.get(tree.get(tree.roots()[0]).children[0]);
    assert_eq!(history.title, "1.1 History");
    assert!(history.children.is_empty());

    let chunk = structured
        .chunks
        .iter()
        .find(|chunk| chunk.content == "D text.")
        .expect("dosing chunk");
    assert_eq!(chunk.section_hierarchy, vec!["2. TREATMENT", "2.1.1 Dosing"]);
    assert_eq!(chunk.parent_section.as_deref(), Some("2. TREATMENT"));
}

#[test]
fn orphaned_subsection_becomes_its_own_root() {
    let text = "2.1 Background\n\nEarly text.\n\n3. MANAGEMENT\n\nLater text.";
    let structured = structure_text(text, &ChunkingConfig::default());
    let tree = &structured.tree;

    assert_eq!(tree.orphan_count(), 1);
    assert_eq!(tree.roots().len(), 2);
    let orphan = tree.get(tree.roots()[0]);
    assert_eq!(orphan.title, "2.1 Background");
    assert_eq!(orphan.parent, None);
    assert_eq!(orphan.content, "Early text.");
    assert_eq!(tree.top_level_titles(), vec!["3. MANAGEMENT"]);
    assert_eq!(structured.chunks[0].section_hierarchy, vec!["2.1 Background"]);
    assert_eq!(structured.metadata.orphan_sections, 1);
}

#[test]
fn text_before_first_header_lands_in_preamble() {
    let text = "Published by the ministry.\n\n1. SCOPE\n\nBody.";
    let structured = structure_text(text, &ChunkingConfig::default());
    let tree = &structured.tree;

    let preamble = tree.get(tree.roots()[0]);
    assert_eq!(preamble.title, PREAMBLE_TITLE);
    assert!(preamble.synthetic);
    assert_eq!(preamble.content, "Published by the ministry.");
    assert_eq!(tree.top_level_titles(), vec!["1. SCOPE"]);
}

#[test]
fn section_pages_span_contributing_blocks() {
    let text = "1. SCOPE\n\nFirst page body.\u{000c}Second page body.";
    let structured = structure_text(text, &ChunkingConfig::default());
    let section = structured.tree.get(structured.tree.roots()[0]);

    assert_eq!(section.start_page, 1);
    assert_eq!(section.end_page, 2);
    assert_eq!(structured.chunks[0].page_numbers, vec![1, 2]);
}

fn profile_document(sizes: &[(&str, f32)]) -> SourceDocument {
    SourceDocument {
        pages: vec![SourcePage {
            number: 1,
            spans: sizes
                .iter()
                .enumerate()
                .map(|(index, (text, size))| {
                    span(text, *size, false, index as u32, BoundingBox::default())
                })
                .collect(),
            ..SourcePage::default()
        }],
    }
}

#[test]
fn font_profile_calibrates_from_distinct_sizes() {
    let document = profile_document(&[
        ("Clinical Practice Guidelines", 24.0),
        ("Management of ED", 16.0),
        ("Subsection", 13.0),
        ("Body text", 11.0),
        ("More body", 11.0),
    ]);
    let profile = analyze_font_profile(&document);

    assert!(profile.calibrated);
    assert_eq!(
        profile.thresholds,
        FontThresholds {
            title: 24.0,
            main_section: 16.0,
            subsection: 13.0,
            body: 11.0,
        }
    );
    assert_eq!(profile.title.as_deref(), Some("Clinical Practice Guidelines"));
}

#[test]
fn font_profile_keeps_defaults_without_variety() {
    let document = profile_document(&[("Body text", 11.0), ("Small print", 9.0)]);
    let profile = analyze_font_profile(&document);

    assert!(!profile.calibrated);
    assert_eq!(profile.thresholds, FontThresholds::default());
    assert_eq!(profile.title, None);
}

#[test]
fn provided_tables_are_normalized() {
    let document = SourceDocument {
        pages: vec![SourcePage {
            number: 3,
            tables: vec![
                DetectedTable {
                    headers: vec![
                        Some("Drug".to_string()),
                        None,
                        Some("  ".to_string()),
                        Some("Drug".to_string()),
                    ],
                    rows: vec![
                        vec![
                            Some("Sildenafil".to_string()),
                            Some("50 mg".to_string()),
                            None,
                            Some("x|y".to_string()),
                        ],
                        vec![None, None, None, None],
                    ],
                    bbox: None,
                },
                DetectedTable {
                    headers: vec![Some("Header only".to_string())],
                    rows: Vec::new(),
                    bbox: None,
                },
            ],
            ..SourcePage::default()
        }],
    };

    let extraction = tables::extract_tables(&document, &ProvidedTableFinder);
    assert_eq!(extraction.tables.len(), 1);
    let table = &extraction.tables[0];
    assert_eq!(table.page, 3);
    assert_eq!(table.headers, vec!["Drug", "Column_1", "Column_2", "Drug_2"]);
    assert_eq!(table.json_rows.len(), 1);
    assert_eq!(
        table.json_rows[0].keys().cloned().collect::<Vec<String>>(),
        table.headers
    );
    let lines = table.markdown.lines().collect::<Vec<&str>>();
    assert_eq!(lines[0], "| Drug | Column_1 | Column_2 | Drug_2 |");
    assert_eq!(lines[1], "| --- | --- | --- | --- |");
    assert_eq!(lines[2], "| Sildenafil | 50 mg |  | x\\|y |");
    assert_eq!(lines.len(), 4);
}

struct FailingFirstPage;

impl TableFinder for FailingFirstPage {
    fn find_tables(&self, page: &SourcePage) -> anyhow::Result<Vec<DetectedTable>> {
        if page.number == 1 {
            bail!("detector crashed");
        }
        Ok(vec![DetectedTable {
            headers: vec![Some("A".to_string()), Some("B".to_string())],
            rows: vec![vec![Some("1".to_string()), Some("2".to_string())]],
            bbox: None,
        }])
    }
}

#[test]
fn table_failures_are_contained_per_page() {
    let document = SourceDocument {
        pages: vec![
            SourcePage {
                number: 1,
                ..SourcePage::default()
            },
            SourcePage {
                number: 2,
                ..SourcePage::default()
            },
        ],
    };
    let extraction = tables::extract_tables(&document, &FailingFirstPage);

    assert_eq!(extraction.failed_pages, vec![1]);
    assert_eq!(extraction.warnings.len(), 1);
    assert_eq!(extraction.tables.len(), 1);
    assert_eq!(extraction.tables[0].page, 2);
}

#[test]
fn layout_finder_detects_aligned_rows() {
    let cell = |text: &str, x: f32, y: f32, block: u32| {
        span(text, 10.0, false, block, BoundingBox::new(x, y, x + 60.0, y + 10.0))
    };
    let page = SourcePage {
        number: 1,
        spans: vec![
            cell("Drug", 100.0, 100.0, 0),
            cell("Dose", 250.0, 100.0, 0),
            cell("Notes", 400.0, 100.0, 0),
            cell("Sildenafil", 100.0, 115.0, 1),
            cell("50 mg", 252.0, 115.0, 1),
            cell("On demand", 401.0, 115.0, 1),
            cell("Tadalafil", 100.0, 130.0, 2),
            cell("5 mg", 250.0, 130.0, 2),
            cell("Daily", 399.0, 130.0, 2),
            cell("A paragraph well below the table.", 100.0, 300.0, 3),
        ],
        ..SourcePage::default()
    };

    let tables = LayoutTableFinder::default()
        .find_tables(&page)
        .expect("layout detection");
    assert_eq!(tables.len(), 1);
    let table = &tables[0];
    assert_eq!(
        table.headers,
        vec![
            Some("Drug".to_string()),
            Some("Dose".to_string()),
            Some("Notes".to_string())
        ]
    );
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[1][2].as_deref(), Some("Daily"));
}

#[test]
fn layout_finder_ignores_pages_without_geometry() {
    let document = parse_plain_text("Drug Dose\n\nSildenafil 50 mg");
    let tables = LayoutTableFinder::default()
        .find_tables(&document.pages[0])
        .expect("layout detection");
    assert!(tables.is_empty());
}

struct EchoDescriber {
    calls: AtomicUsize,
}

#[async_trait]
impl VisionDescriber for EchoDescriber {
    async fn describe(&self, image: &[u8], _mime_type: &str, page_number: u32) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Later pages finish first so ordering has to be restored.
        let delay = 10 * u64::from(5u32.saturating_sub(page_number));
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Some(format!(
            "Step 1: assess patient (page {page_number}, {} bytes)",
            image.len()
        ))
    }
}

struct SilentDescriber;

#[async_trait]
impl VisionDescriber for SilentDescriber {
    async fn describe(&self, _image: &[u8], _mime_type: &str, _page_number: u32) -> Option<String> {
        None
    }
}

struct StalledDescriber;

#[async_trait]
impl VisionDescriber for StalledDescriber {
    async fn describe(&self, _image: &[u8], _mime_type: &str, _page_number: u32) -> Option<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Some("too late".to_string())
    }
}

fn image_document(pages: &[(u32, Vec<usize>)]) -> SourceDocument {
    SourceDocument {
        pages: pages
            .iter()
            .map(|(number, sizes)| SourcePage {
                number: *number,
                images: sizes
                    .iter()
                    .enumerate()
                    .map(|(index, size)| image(index, *size))
                    .collect(),
                ..SourcePage::default()
            })
            .collect(),
    }
}

#[tokio::test]
async fn small_images_are_skipped_without_vision_calls() {
    let document = image_document(&[(1, vec![5_000, 10_000]), (2, vec![12_000])]);
    let describer = EchoDescriber {
        calls: AtomicUsize::new(0),
    };

    let extraction = describe_algorithms(&document, &describer, VisionOptions::default()).await;

    assert_eq!(describer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(extraction.skipped_small_images, 2);
    assert_eq!(extraction.images_considered, 1);
    assert_eq!(extraction.algorithms.len(), 1);
    assert_eq!(extraction.algorithms[0].page, 2);
    assert_eq!(extraction.algorithms[0].image_size, 12_000);
}

#[tokio::test]
async fn descriptions_are_ordered_by_page_and_index() {
    let document = image_document(&[(1, vec![20_000, 15_000]), (3, vec![11_000]), (4, vec![10_001])]);
    let describer = EchoDescriber {
        calls: AtomicUsize::new(0),
    };

    let extraction = describe_algorithms(
        &document,
        &describer,
        VisionOptions {
            concurrency: 4,
            timeout: Duration::from_secs(5),
        },
    )
    .await;

    let order = extraction
        .algorithms
        .iter()
        .map(|algorithm| (algorithm.page, algorithm.index))
        .collect::<Vec<(u32, usize)>>();
    assert_eq!(order, vec![(1, 0), (1, 1), (3, 0), (4, 0)]);
}

#[tokio::test]
async fn vision_failures_and_timeouts_omit_chunks() {
    let document = image_document(&[(1, vec![20_000]), (2, vec![30_000])]);

    let failed = describe_algorithms(&document, &SilentDescriber, VisionOptions::default()).await;
    assert!(failed.algorithms.is_empty());
    assert_eq!(failed.failed, 2);

    let timed_out = describe_algorithms(
        &document,
        &StalledDescriber,
        VisionOptions {
            concurrency: 2,
            timeout: Duration::from_millis(20),
        },
    )
    .await;
    assert!(timed_out.algorithms.is_empty());
    assert_eq!(timed_out.timed_out, 2);
}

#[tokio::test]
async fn tables_and_algorithms_follow_section_chunks() {
    let structurer = structurer();
    let mut document = parse_plain_text("1. SCOPE\n\nBody text.");
    document.pages[0].tables.push(DetectedTable {
        headers: vec![Some("Drug".to_string()), Some("Dose".to_string())],
        rows: vec![vec![Some("Tadalafil".to_string()), Some("5 mg".to_string())]],
        bbox: None,
    });
    document.pages[0].images.push(image(0, 40_000));

    let layout = structurer.analyze_layout(&document, Some(&ProvidedTableFinder));
    let describer = EchoDescriber {
        calls: AtomicUsize::new(0),
    };
    let algorithms = describe_algorithms(&document, &describer, VisionOptions::default()).await;
    let extractor = KeywordEntityExtractor::new().expect("vocabulary compiles");
    let structured = structurer
        .assemble(
            layout,
            &algorithms.algorithms,
            &ChunkingConfig::default(),
            Some(&extractor),
            identity(),
        )
        .expect("assemble");

    assert_eq!(structured.chunks.len(), 3);
    for (index, chunk) in structured.chunks.iter().enumerate() {
        assert_eq!(chunk.index, index);
        assert_eq!(chunk.metadata.total_chunks, Some(3));
        assert!(!(chunk.is_table && chunk.is_algorithm));
    }

    let table = &structured.chunks[1];
    assert!(table.is_table);
    assert_eq!(table.section_hierarchy, vec![TABLES_GROUP]);
    assert!(table.content.starts_with("**Table (Page 1)**\n\n"));
    assert!(table.content.contains("\"Drug\": \"Tadalafil\""));
    assert_eq!(table.table_data.as_ref().map(Vec::len), Some(1));
    assert_eq!(table.metadata.table_index, Some(0));
    assert_eq!(
        table.entities.get("medications"),
        Some(&vec!["Tadalafil".to_string()])
    );

    let algorithm = &structured.chunks[2];
    assert!(algorithm.is_algorithm);
    assert_eq!(algorithm.section_hierarchy, vec![ALGORITHMS_GROUP]);
    assert!(algorithm.content.starts_with("**Algorithm/Flowchart (Page 1)**\n\n"));
    assert_eq!(algorithm.metadata.image_size, Some(40_000));
    assert_eq!(algorithm.page_numbers, vec![1]);

    assert_eq!(structured.metadata.table_count, 1);
    assert_eq!(structured.metadata.algorithm_count, 1);
    assert_eq!(structured.metadata.chunk_summary.tables, 1);
    assert_eq!(structured.metadata.chunk_summary.algorithms, 1);
    assert!(structured.full_content().contains("Body text."));
}

#[test]
fn keyword_entities_are_grouped_by_category() {
    let extractor = KeywordEntityExtractor::new().expect("vocabulary compiles");
    let entities = extractor.extract_entities(
        "Sildenafil may cause headache and flushing in men with diabetes\nmellitus; check HbA1c. Headache is common.",
    );

    assert_eq!(entities.get("medications"), Some(&vec!["Sildenafil".to_string()]));
    assert_eq!(
        entities.get("adverse_events"),
        Some(&vec!["Headache".to_string(), "Flushing".to_string()])
    );
    assert_eq!(
        entities.get("conditions"),
        Some(&vec!["Diabetes Mellitus".to_string()])
    );
    assert_eq!(entities.get("diagnostic_tools"), Some(&vec!["HbA1c".to_string()]));
    assert!(!entities.contains_key("procedures"));
}
