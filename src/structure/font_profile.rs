use serde::Serialize;

use super::document::SourceDocument;

const SAMPLE_PAGES: usize = 5;
const TITLE_PAGES: u32 = 2;
const TITLE_MIN_FONT_SIZE: f32 = 14.0;
const TITLE_MIN_CHARS: usize = 5;

/// Font-size cut-offs calibrated for one document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FontThresholds {
    pub title: f32,
    pub main_section: f32,
    pub subsection: f32,
    pub body: f32,
}

impl Default for FontThresholds {
    fn default() -> Self {
        Self {
            title: 18.0,
            main_section: 14.0,
            subsection: 12.0,
            body: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FontProfile {
    pub thresholds: FontThresholds,
    pub calibrated: bool,
    pub title: Option<String>,
    #[serde(skip)]
    pub sampled_sizes: Vec<f32>,
}

/// Samples the first pages and derives header thresholds from the four
/// largest distinct font sizes. Too little font variety keeps the defaults.
pub fn analyze_font_profile(document: &SourceDocument) -> FontProfile {
    let mut sampled_sizes = Vec::<f32>::new();
    let mut title_candidates = Vec::<(String, f32)>::new();

    for (page_index, page) in document.pages.iter().take(SAMPLE_PAGES).enumerate() {
        for span in &page.spans {
            sampled_sizes.push(span.font_size);

            let text = span.text.trim();
            if (page_index as u32) < TITLE_PAGES
                && span.font_size > TITLE_MIN_FONT_SIZE
                && text.chars().count() > TITLE_MIN_CHARS
            {
                title_candidates.push((text.to_string(), span.font_size));
            }
        }
    }

    let distinct = distinct_sizes_descending(&sampled_sizes);
    let (thresholds, calibrated) = if distinct.len() >= 4 {
        (
            FontThresholds {
                title: distinct[0],
                main_section: distinct[1],
                subsection: distinct[2],
                body: distinct[3],
            },
            true,
        )
    } else {
        (FontThresholds::default(), false)
    };

    // First candidate wins among equal sizes.
    let title = title_candidates
        .into_iter()
        .fold(None::<(String, f32)>, |best, candidate| match best {
            Some(current) if current.1 >= candidate.1 => Some(current),
            _ => Some(candidate),
        })
        .map(|(text, _)| text);

    FontProfile {
        thresholds,
        calibrated,
        title,
        sampled_sizes,
    }
}

fn distinct_sizes_descending(sizes: &[f32]) -> Vec<f32> {
    let mut quantized = sizes
        .iter()
        .filter(|size| size.is_finite() && **size > 0.0)
        .map(|size| (size * 100.0).round() as i64)
        .collect::<Vec<i64>>();
    quantized.sort_unstable_by(|a, b| b.cmp(a));
    quantized.dedup();

    quantized
        .into_iter()
        .map(|value| value as f32 / 100.0)
        .collect()
}
