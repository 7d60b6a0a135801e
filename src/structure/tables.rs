use anyhow::{Result, bail};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::document::{BoundingBox, DetectedTable, SourceDocument, SourcePage, TextSpan};

/// Table-detection collaborator. Failing on one page never stops the others.
pub trait TableFinder {
    fn find_tables(&self, page: &SourcePage) -> Result<Vec<DetectedTable>>;
}

/// Uses the tables the upstream page parser already attached to each page.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProvidedTableFinder;

impl TableFinder for ProvidedTableFinder {
    fn find_tables(&self, page: &SourcePage) -> Result<Vec<DetectedTable>> {
        Ok(page.tables.clone())
    }
}

/// Detects tables from span geometry: runs of visual rows whose cells start
/// at the same x positions as the first row of the run.
#[derive(Debug, Clone, Copy)]
pub struct LayoutTableFinder {
    pub row_tolerance: f32,
    pub column_tolerance: f32,
    pub cell_merge_gap: f32,
    pub min_rows: usize,
}

impl Default for LayoutTableFinder {
    fn default() -> Self {
        Self {
            row_tolerance: 3.0,
            column_tolerance: 8.0,
            cell_merge_gap: 4.0,
            min_rows: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct LayoutCell {
    text: String,
    x0: f32,
    bbox: BoundingBox,
}

#[derive(Debug, Clone)]
struct LayoutRow {
    y0: f32,
    height: f32,
    cells: Vec<LayoutCell>,
}

impl TableFinder for LayoutTableFinder {
    fn find_tables(&self, page: &SourcePage) -> Result<Vec<DetectedTable>> {
        if page
            .spans
            .iter()
            .any(|span| !span.bbox.x0.is_finite() || !span.bbox.y0.is_finite())
        {
            bail!("page {} has spans with non-finite coordinates", page.number);
        }
        if page.spans.iter().all(|span| span.bbox.height() == 0.0) {
            return Ok(Vec::new());
        }

        let rows = self.visual_rows(&page.spans);
        let mut tables = Vec::new();
        let mut start = 0usize;

        while start < rows.len() {
            if rows[start].cells.len() < 2 {
                start += 1;
                continue;
            }

            let anchors = rows[start]
                .cells
                .iter()
                .map(|cell| cell.x0)
                .collect::<Vec<f32>>();
            let mut end = start + 1;
            while end < rows.len()
                && self.row_is_aligned(&rows[end], &anchors)
                && self.rows_are_adjacent(&rows[end - 1], &rows[end])
            {
                end += 1;
            }

            if end - start >= self.min_rows {
                tables.push(self.build_table(&rows[start..end], &anchors));
                start = end;
            } else {
                start += 1;
            }
        }

        Ok(tables)
    }
}

impl LayoutTableFinder {
    fn visual_rows(&self, spans: &[TextSpan]) -> Vec<LayoutRow> {
        let mut ordered = spans
            .iter()
            .filter(|span| !span.text.trim().is_empty())
            .collect::<Vec<&TextSpan>>();
        ordered.sort_by(|a, b| {
            a.bbox
                .y0
                .total_cmp(&b.bbox.y0)
                .then(a.bbox.x0.total_cmp(&b.bbox.x0))
        });

        let mut grouped = Vec::<Vec<&TextSpan>>::new();
        for span in ordered {
            match grouped.last_mut() {
                Some(row)
                    if row
                        .first()
                        .map(|first| (first.bbox.y0 - span.bbox.y0).abs() <= self.row_tolerance)
                        .unwrap_or(false) =>
                {
                    row.push(span)
                }
                _ => grouped.push(vec![span]),
            }
        }

        grouped
            .into_iter()
            .map(|mut row| {
                row.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
                let mut cells = Vec::<LayoutCell>::new();
                for span in row {
                    let text = span.text.trim();
                    match cells.last_mut() {
                        Some(cell) if span.bbox.x0 - cell.bbox.x1 <= self.cell_merge_gap => {
                            cell.text.push(' ');
                            cell.text.push_str(text);
                            cell.bbox = cell.bbox.union(&span.bbox);
                        }
                        _ => cells.push(LayoutCell {
                            text: text.to_string(),
                            x0: span.bbox.x0,
                            bbox: span.bbox,
                        }),
                    }
                }

                let y0 = cells.first().map(|cell| cell.bbox.y0).unwrap_or_default();
                let height = cells
                    .iter()
                    .map(|cell| cell.bbox.height())
                    .fold(0.0_f32, f32::max);
                LayoutRow { y0, height, cells }
            })
            .collect()
    }

    fn row_is_aligned(&self, row: &LayoutRow, anchors: &[f32]) -> bool {
        if row.cells.len() < 2 {
            return false;
        }

        let aligned = row
            .cells
            .iter()
            .filter(|cell| {
                anchors
                    .iter()
                    .any(|anchor| (anchor - cell.x0).abs() <= self.column_tolerance)
            })
            .count();
        aligned >= 2 && aligned * 2 >= row.cells.len()
    }

    fn rows_are_adjacent(&self, previous: &LayoutRow, next: &LayoutRow) -> bool {
        let line_height = previous.height.max(1.0);
        next.y0 - previous.y0 <= line_height * 4.0
    }

    fn column_for(&self, x0: f32, anchors: &[f32]) -> usize {
        anchors
            .iter()
            .rposition(|anchor| *anchor - self.column_tolerance <= x0)
            .unwrap_or(0)
    }

    fn build_table(&self, rows: &[LayoutRow], anchors: &[f32]) -> DetectedTable {
        let to_cells = |row: &LayoutRow| {
            let mut cells = vec![None::<String>; anchors.len()];
            for cell in &row.cells {
                let column = self.column_for(cell.x0, anchors);
                if let Some(existing) = cells[column].as_mut() {
                    existing.push(' ');
                    existing.push_str(&cell.text);
                } else {
                    cells[column] = Some(cell.text.clone());
                }
            }
            cells
        };

        let bbox = rows
            .iter()
            .flat_map(|row| row.cells.iter().map(|cell| cell.bbox))
            .reduce(|acc, bbox| acc.union(&bbox));

        DetectedTable {
            headers: to_cells(&rows[0]),
            rows: rows[1..].iter().map(to_cells).collect(),
            bbox,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedTable {
    pub page: u32,
    pub index: usize,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub json_rows: Vec<Map<String, Value>>,
    pub markdown: String,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Default)]
pub struct TableExtraction {
    pub tables: Vec<ExtractedTable>,
    pub failed_pages: Vec<u32>,
    pub warnings: Vec<String>,
}

pub fn extract_tables(document: &SourceDocument, finder: &dyn TableFinder) -> TableExtraction {
    let mut extraction = TableExtraction::default();

    for page in &document.pages {
        let detected = match finder.find_tables(page) {
            Ok(detected) => detected,
            Err(err) => {
                let warning = format!("table extraction failed on page {}: {err:#}", page.number);
                warn!(page = page.number, error = %err, "table extraction failed");
                extraction.failed_pages.push(page.number);
                extraction.warnings.push(warning);
                continue;
            }
        };

        for (index, table) in detected.into_iter().enumerate() {
            if table.rows.is_empty() {
                continue;
            }
            extraction
                .tables
                .push(normalize_table(page.number, index, table));
        }
    }

    info!(tables = extraction.tables.len(), "extracted tables");
    extraction
}

fn normalize_table(page: u32, index: usize, table: DetectedTable) -> ExtractedTable {
    let headers = normalize_headers(&table.headers);
    let rows = table
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| cell.as_deref().map(str::trim).unwrap_or_default().to_string())
                .collect::<Vec<String>>()
        })
        .collect::<Vec<Vec<String>>>();

    let json_rows = rows
        .iter()
        .filter_map(|row| {
            let mut object = Map::new();
            for (column, header) in headers.iter().enumerate() {
                let cell = row.get(column).cloned().unwrap_or_default();
                object.insert(header.clone(), Value::String(cell));
            }
            let has_content = object
                .values()
                .any(|value| value.as_str().map(|text| !text.is_empty()).unwrap_or(false));
            has_content.then_some(object)
        })
        .collect();

    let markdown = table_to_markdown(&headers, &rows);

    ExtractedTable {
        page,
        index,
        headers,
        rows,
        json_rows,
        markdown,
        bbox: table.bbox,
    }
}

fn normalize_headers(raw: &[Option<String>]) -> Vec<String> {
    let mut headers = Vec::<String>::with_capacity(raw.len());
    for (column, header) in raw.iter().enumerate() {
        let base = header
            .as_deref()
            .map(|value| value.split_whitespace().collect::<Vec<&str>>().join(" "))
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("Column_{column}"));

        let mut name = base.clone();
        let mut suffix = 2usize;
        while headers.contains(&name) {
            name = format!("{base}_{suffix}");
            suffix += 1;
        }
        headers.push(name);
    }
    headers
}

pub fn table_to_markdown(headers: &[String], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return String::new();
    }

    let render = |cells: Vec<String>| format!("| {} |", cells.join(" | "));
    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(render(headers.iter().map(|h| markdown_cell(h)).collect()));
    lines.push(render(headers.iter().map(|_| "---".to_string()).collect()));

    for row in rows {
        let cells = (0..headers.len())
            .map(|column| row.get(column).map(|cell| markdown_cell(cell)).unwrap_or_default())
            .collect();
        lines.push(render(cells));
    }

    lines.join("\n")
}

fn markdown_cell(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .replace('|', "\\|")
}
