//! Typed ingestion of document-analysis payloads.
//!
//! The provider's JSON (bare or wrapped in `analyzeResult`) is parsed once into
//! [`RawDocument`]; later stages never look at untyped values.

use crate::geometry::Point;
use crate::models::{FigureId, PageInfo, RawDocument, RawFigure, RawParagraph, Span};
use crate::IngestError;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Wrapped {
        #[serde(rename = "analyzeResult")]
        analyze_result: AnalysisPayload,
    },
    Bare(AnalysisPayload),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AnalysisPayload {
    pages: Vec<PagePayload>,
    paragraphs: Vec<ParagraphPayload>,
    figures: Vec<FigurePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PagePayload {
    page_number: u32,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
    #[serde(default)]
    unit: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphPayload {
    content: String,
    #[serde(default)]
    bounding_regions: Vec<RegionPayload>,
    #[serde(default)]
    spans: Vec<Span>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FigurePayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    bounding_regions: Vec<RegionPayload>,
    #[serde(default)]
    spans: Vec<Span>,
    #[serde(default)]
    caption: Option<CaptionPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegionPayload {
    page_number: u32,
    #[serde(default)]
    polygon: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct CaptionPayload {
    content: String,
}

/// Parsed document plus the figure ids that were dropped as repeats.
#[derive(Debug, Clone)]
pub struct ParsedAnalysis {
    pub document: RawDocument,
    pub duplicate_figures: Vec<FigureId>,
}

pub fn parse_analysis(json: &str, document_id: &str) -> Result<ParsedAnalysis, IngestError> {
    if document_id.trim().is_empty() {
        return Err(IngestError::InvalidArgument("document id is empty".to_string()));
    }

    let payload = match serde_json::from_str::<Envelope>(json)? {
        Envelope::Wrapped { analyze_result } => analyze_result,
        Envelope::Bare(payload) => payload,
    };

    let pages = payload
        .pages
        .into_iter()
        .map(|page| PageInfo {
            number: page.page_number,
            width: page.width,
            height: page.height,
            unit: page.unit,
        })
        .collect();

    let paragraphs = payload
        .paragraphs
        .into_iter()
        .map(|paragraph| {
            let (page, polygon) = first_region(&paragraph.bounding_regions);
            RawParagraph {
                page,
                text: paragraph.content,
                spans: paragraph.spans,
                polygon,
            }
        })
        .collect();

    let mut seen = HashSet::new();
    let mut figures = Vec::new();
    let mut duplicate_figures = Vec::new();
    for (index, figure) in payload.figures.into_iter().enumerate() {
        let (page, polygon) = first_region(&figure.bounding_regions);
        let id = FigureId::new(figure.id.unwrap_or_else(|| format!("{page}.{}", index + 1)));
        if !seen.insert(id.clone()) {
            warn!(document_id, figure = %id, "duplicate figure id; keeping the first");
            duplicate_figures.push(id);
            continue;
        }
        figures.push(RawFigure {
            id,
            page,
            polygon,
            spans: figure.spans,
            caption: figure
                .caption
                .map(|caption| caption.content)
                .filter(|content| !content.trim().is_empty()),
        });
    }

    Ok(ParsedAnalysis {
        document: RawDocument {
            document_id: document_id.to_string(),
            pages,
            paragraphs,
            figures,
        },
        duplicate_figures,
    })
}

/// Page and polygon of the first bounding region; page 1 with no polygon when
/// the provider omitted it.
fn first_region(regions: &[RegionPayload]) -> (u32, Vec<Point>) {
    match regions.first() {
        Some(region) => (
            region.page_number,
            region
                .polygon
                .chunks_exact(2)
                .map(|pair| Point::new(pair[0], pair[1]))
                .collect(),
        ),
        None => (1, Vec::new()),
    }
}

pub fn discover_analysis_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_json = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Document id for an analysis file: its stem.
pub fn document_id_for(path: &Path) -> Result<String, IngestError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::InvalidArgument(format!("path missing file name: {}", path.display())))
}

pub fn load_analysis_file(path: &Path) -> Result<ParsedAnalysis, IngestError> {
    let json = fs::read_to_string(path)?;
    parse_analysis(&json, &document_id_for(path)?)
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct LoadReport {
    pub documents: Vec<ParsedAnalysis>,
    pub skipped_files: Vec<SkippedFile>,
}

pub fn load_folder_best_effort(folder: &Path) -> Result<LoadReport, IngestError> {
    let files = discover_analysis_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no analysis json files found in {}",
            folder.display()
        )));
    }

    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();
    for path in files {
        match load_analysis_file(&path) {
            Ok(parsed) => documents.push(parsed),
            Err(error) => skipped_files.push(SkippedFile {
                path,
                reason: error.to_string(),
            }),
        }
    }

    info!(
        folder = %folder.display(),
        loaded = documents.len(),
        skipped = skipped_files.len(),
        "analysis files loaded"
    );
    Ok(LoadReport {
        documents,
        skipped_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "analyzeResult": {
            "content": "Leia o texto.\nTEXTO A",
            "pages": [{"pageNumber": 1, "width": 8.5, "height": 11, "unit": "inch"}],
            "paragraphs": [
                {
                    "content": "Leia o texto.",
                    "boundingRegions": [{"pageNumber": 1, "polygon": [1, 1, 7, 1, 7, 1.2, 1, 1.2]}],
                    "spans": [{"offset": 0, "length": 13}]
                },
                {"content": "TEXTO A", "spans": [{"offset": 14, "length": 7}]}
            ],
            "figures": [
                {
                    "id": "1.1",
                    "boundingRegions": [{"pageNumber": 1, "polygon": [1, 2, 4, 2, 4, 4, 1, 4]}],
                    "spans": [{"offset": 22, "length": 3}],
                    "caption": {"content": "TEXTO A"}
                },
                {"id": "1.1", "boundingRegions": [{"pageNumber": 1, "polygon": []}]},
                {"boundingRegions": [{"pageNumber": 2, "polygon": [0, 0, 1, 1]}]}
            ]
        }
    }"#;

    #[test]
    fn wrapped_payload_parses_into_typed_records() -> Result<(), Box<dyn std::error::Error>> {
        let parsed = parse_analysis(SAMPLE, "exam-2024")?;
        let document = parsed.document;

        assert_eq!(document.document_id, "exam-2024");
        assert_eq!(document.pages[0].height, 11.0);
        assert_eq!(document.paragraphs.len(), 2);
        assert_eq!(document.paragraphs[0].polygon.len(), 4);
        assert_eq!(document.paragraphs[1].page, 1);
        assert!(document.paragraphs[1].polygon.is_empty());

        assert_eq!(document.figures.len(), 2);
        assert_eq!(document.figures[0].caption.as_deref(), Some("TEXTO A"));
        assert_eq!(document.figures[1].id, FigureId::new("2.3"));
        assert_eq!(parsed.duplicate_figures, vec![FigureId::new("1.1")]);
        Ok(())
    }

    #[test]
    fn bare_payload_is_accepted() -> Result<(), Box<dyn std::error::Error>> {
        let parsed = parse_analysis(r#"{"paragraphs": [{"content": "oi"}]}"#, "doc")?;
        assert_eq!(parsed.document.paragraphs[0].text, "oi");
        assert!(parsed.document.figures.is_empty());
        Ok(())
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(parse_analysis("{", "doc"), Err(IngestError::Json(_))));
        assert!(matches!(parse_analysis("{}", " "), Err(IngestError::InvalidArgument(_))));
    }

    #[test]
    fn discovery_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("b.json"), "{}")?;
        fs::write(nested.join("a.json"), "{}")?;
        fs::write(dir.path().join("notes.txt"), "x")?;

        let files = discover_analysis_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|pair| pair[0] <= pair[1]));
        Ok(())
    }

    #[test]
    fn best_effort_skips_broken_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("good.json"), SAMPLE)?;
        fs::write(dir.path().join("broken.json"), "{ not json")?;

        let report = load_folder_best_effort(dir.path())?;
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].document.document_id, "good");
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0].path.file_name().and_then(|name| name.to_str()),
            Some("broken.json")
        );
        Ok(())
    }

    #[test]
    fn empty_folder_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        assert!(load_folder_best_effort(dir.path()).is_err());
        Ok(())
    }
}
