use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};

use super::{LoadOptions, LoadedDocument};
use crate::structure::document::{
    BoundingBox, EmbeddedImage, SourceDocument, SourcePage, TextSpan,
};
use crate::util::ensure_directory;

const LINE_TOP_TOLERANCE: f32 = 3.0;
const BLOCK_GAP_FACTOR: f32 = 1.5;
const FONT_SIZE_CHANGE: f32 = 0.5;

pub fn load_pdf(path: &Path, options: LoadOptions<'_>) -> Result<LoadedDocument> {
    let xml = run_pdftohtml(path, options.max_pages)?;
    let mut document = parse_pdftohtml_xml(&xml)
        .with_context(|| format!("failed to parse pdftohtml output for {}", path.display()))?;

    let mut warnings = Vec::new();
    match extract_images(path, options.work_dir, options.max_pages) {
        Ok(images) => attach_images(&mut document, images),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "image extraction failed; continuing without images");
            warnings.push(format!(
                "image extraction failed for {}: {err:#}",
                path.display()
            ));
        }
    }

    if options.work_dir.exists() {
        if let Err(err) = fs::remove_dir_all(options.work_dir) {
            debug!(path = %options.work_dir.display(), error = %err, "failed to remove image work directory");
        }
    }

    Ok(LoadedDocument {
        document,
        warnings,
    })
}

fn run_pdftohtml(pdf_path: &Path, max_pages: Option<usize>) -> Result<String> {
    let mut command = Command::new("pdftohtml");
    command.arg("-xml").arg("-i").arg("-q").arg("-f").arg("1");
    if let Some(max_pages) = max_pages {
        command.arg("-l").arg(max_pages.to_string());
    }
    command.arg("-stdout").arg(pdf_path);

    let output = command
        .output()
        .with_context(|| format!("failed to execute pdftohtml for {}", pdf_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdftohtml returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[derive(Debug, Clone, Copy)]
struct FontSpec {
    size: f32,
    bold_family: bool,
}

#[derive(Debug, Default)]
struct RawText {
    top: f32,
    left: f32,
    width: f32,
    height: f32,
    font: String,
    text: String,
    bold_chars: usize,
    total_chars: usize,
}

#[derive(Debug)]
struct RawPage {
    number: u32,
    width: f32,
    height: f32,
    texts: Vec<RawText>,
}

/// Parses `pdftohtml -xml` output into the page model. Text elements are
/// regrouped into lines and blocks from their positions.
pub fn parse_pdftohtml_xml(xml: &str) -> Result<SourceDocument> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().check_end_names = false;

    let mut fonts = HashMap::<String, FontSpec>::new();
    let mut pages = Vec::<RawPage>::new();
    let mut current: Option<RawText> = None;
    let mut bold_depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"page" => pages.push(page_from_attributes(&e)?),
                b"fontspec" => {
                    let (id, spec) = fontspec_from_attributes(&e)?;
                    fonts.insert(id, spec);
                }
                b"text" => {
                    current = Some(text_from_attributes(&e)?);
                    bold_depth = 0;
                }
                b"b" if current.is_some() => bold_depth += 1,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"page" => pages.push(page_from_attributes(&e)?),
                b"fontspec" => {
                    let (id, spec) = fontspec_from_attributes(&e)?;
                    fonts.insert(id, spec);
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if let Some(text) = current.as_mut() {
                    let value = e.unescape()?;
                    let visible = value.chars().filter(|c| !c.is_whitespace()).count();
                    text.total_chars += visible;
                    if bold_depth > 0 {
                        text.bold_chars += visible;
                    }
                    text.text.push_str(&value);
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"b" => bold_depth = bold_depth.saturating_sub(1),
                b"text" => {
                    if let (Some(text), Some(page)) = (current.take(), pages.last_mut()) {
                        page.texts.push(text);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    Ok(SourceDocument {
        pages: pages
            .into_iter()
            .map(|page| layout_page(page, &fonts))
            .collect(),
    })
}

fn attribute_map(element: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut values = HashMap::new();
    for attribute in element.attributes() {
        let attribute = attribute?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        values.insert(key, attribute.unescape_value()?.into_owned());
    }
    Ok(values)
}

fn number_attribute(values: &HashMap<String, String>, key: &str) -> f32 {
    values
        .get(key)
        .and_then(|value| value.trim().parse::<f32>().ok())
        .unwrap_or_default()
}

fn page_from_attributes(element: &BytesStart<'_>) -> Result<RawPage> {
    let values = attribute_map(element)?;
    let number = values
        .get("number")
        .and_then(|value| value.trim().parse::<u32>().ok())
        .context("page element without a numeric number attribute")?;
    Ok(RawPage {
        number,
        width: number_attribute(&values, "width"),
        height: number_attribute(&values, "height"),
        texts: Vec::new(),
    })
}

fn fontspec_from_attributes(element: &BytesStart<'_>) -> Result<(String, FontSpec)> {
    let values = attribute_map(element)?;
    let id = values
        .get("id")
        .cloned()
        .context("fontspec element without an id attribute")?;
    let family = values
        .get("family")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    Ok((
        id,
        FontSpec {
            size: number_attribute(&values, "size"),
            bold_family: family.contains("bold") || family.contains("black"),
        },
    ))
}

fn text_from_attributes(element: &BytesStart<'_>) -> Result<RawText> {
    let values = attribute_map(element)?;
    Ok(RawText {
        top: number_attribute(&values, "top"),
        left: number_attribute(&values, "left"),
        width: number_attribute(&values, "width"),
        height: number_attribute(&values, "height"),
        font: values.get("font").cloned().unwrap_or_default(),
        ..RawText::default()
    })
}

#[derive(Debug)]
struct Positioned {
    text: String,
    font_size: f32,
    is_bold: bool,
    bbox: BoundingBox,
}

fn layout_page(page: RawPage, fonts: &HashMap<String, FontSpec>) -> SourcePage {
    let mut items = page
        .texts
        .into_iter()
        .filter(|raw| !raw.text.trim().is_empty())
        .map(|raw| {
            let spec = fonts.get(&raw.font).copied();
            let is_bold = spec.map(|spec| spec.bold_family).unwrap_or(false)
                || (raw.total_chars > 0 && raw.bold_chars * 2 >= raw.total_chars);
            Positioned {
                text: raw.text.split_whitespace().collect::<Vec<&str>>().join(" "),
                font_size: spec.map(|spec| spec.size).unwrap_or_default(),
                is_bold,
                bbox: BoundingBox::new(
                    raw.left,
                    raw.top,
                    raw.left + raw.width,
                    raw.top + raw.height,
                ),
            }
        })
        .collect::<Vec<Positioned>>();
    items.sort_by(|a, b| {
        a.bbox
            .y0
            .total_cmp(&b.bbox.y0)
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });

    let mut lines = Vec::<Vec<Positioned>>::new();
    for item in items {
        match lines.last_mut() {
            Some(line)
                if line
                    .first()
                    .map(|first| (first.bbox.y0 - item.bbox.y0).abs() <= LINE_TOP_TOLERANCE)
                    .unwrap_or(false) =>
            {
                line.push(item)
            }
            _ => lines.push(vec![item]),
        }
    }

    let mut spans = Vec::new();
    let mut block = 0u32;
    let mut previous: Option<(f32, f32, f32, bool)> = None;

    for (line_index, mut line) in lines.into_iter().enumerate() {
        line.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
        let top = line.first().map(|item| item.bbox.y0).unwrap_or_default();
        let height = line
            .iter()
            .map(|item| item.bbox.height())
            .fold(0.0_f32, f32::max);
        let size = line.iter().map(|item| item.font_size).fold(0.0_f32, f32::max);
        let bold = line.iter().all(|item| item.is_bold);

        if let Some((previous_top, previous_height, previous_size, previous_bold)) = previous {
            let gap = top - previous_top;
            if gap > previous_height.max(1.0) * BLOCK_GAP_FACTOR
                || (size - previous_size).abs() > FONT_SIZE_CHANGE
                || bold != previous_bold
            {
                block += 1;
            }
        }
        previous = Some((top, height, size, bold));

        for (position, item) in line.into_iter().enumerate() {
            let text = if position == 0 {
                item.text
            } else {
                format!(" {}", item.text)
            };
            spans.push(TextSpan {
                text,
                font_size: item.font_size,
                is_bold: item.is_bold,
                bbox: item.bbox,
                block,
                line: line_index as u32,
            });
        }
    }

    SourcePage {
        number: page.number,
        width: page.width,
        height: page.height,
        spans,
        images: Vec::new(),
        tables: Vec::new(),
    }
}

/// Runs `pdfimages -all -p` and returns the extracted images keyed by page.
fn extract_images(
    pdf_path: &Path,
    work_dir: &Path,
    max_pages: Option<usize>,
) -> Result<BTreeMap<u32, Vec<EmbeddedImage>>> {
    ensure_directory(work_dir)?;

    let mut command = Command::new("pdfimages");
    command.arg("-all").arg("-p").arg("-f").arg("1");
    if let Some(max_pages) = max_pages {
        command.arg("-l").arg(max_pages.to_string());
    }
    command.arg(pdf_path).arg(work_dir.join("img"));

    let output = command
        .output()
        .with_context(|| format!("failed to execute pdfimages for {}", pdf_path.display()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "pdfimages returned non-zero exit status for {}: {}",
            pdf_path.display(),
            stderr.trim()
        );
    }

    let mut found = Vec::<(u32, u32, String, std::path::PathBuf)>::new();
    for entry in fs::read_dir(work_dir)
        .with_context(|| format!("failed to list {}", work_dir.display()))?
    {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some((page, number, extension)) = parse_image_file_name(file_name) else {
            continue;
        };
        found.push((page, number, extension, path));
    }
    found.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut images = BTreeMap::<u32, Vec<EmbeddedImage>>::new();
    for (page, _, extension, path) in found {
        let data = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let page_images = images.entry(page).or_default();
        page_images.push(EmbeddedImage {
            index: page_images.len(),
            mime_type: mime_type_for_extension(&extension).to_string(),
            data,
        });
    }
    Ok(images)
}

/// `img-012-003.png` is image 3 of page 12.
pub fn parse_image_file_name(file_name: &str) -> Option<(u32, u32, String)> {
    let (stem, extension) = file_name.rsplit_once('.')?;
    let rest = stem.strip_prefix("img-")?;
    let (page, number) = rest.split_once('-')?;
    Some((
        page.parse().ok()?,
        number.parse().ok()?,
        extension.to_ascii_lowercase(),
    ))
}

pub fn mime_type_for_extension(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "jp2" => "image/jp2",
        "tif" | "tiff" => "image/tiff",
        "pbm" | "pgm" | "ppm" | "pnm" => "image/x-portable-anymap",
        "jb2e" | "jb2g" => "image/jbig2",
        _ => "application/octet-stream",
    }
}

fn attach_images(document: &mut SourceDocument, mut images: BTreeMap<u32, Vec<EmbeddedImage>>) {
    for page in &mut document.pages {
        if let Some(page_images) = images.remove(&page.number) {
            page.images = page_images;
        }
    }
    if !images.is_empty() {
        debug!(
            pages = images.len(),
            "discarded images for pages outside the loaded range"
        );
    }
}
