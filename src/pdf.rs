// src/pdf.rs

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use lopdf::content::Content;
use lopdf::{Document, Encoding, Object};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::invoice::{ProductTable, TrailingPolicy, VendorLayout};

/// Result of attempting to extract text from a PDF.
#[derive(Debug)]
pub enum PdfContent {
    /// The PDF contains extractable text.
    Text(String),
    /// The PDF appears to be scanned or image-only and needs OCR.
    ScannedImage,
    /// Something went wrong during extraction.
    Error(String),
}

/// Minimum number of non-whitespace characters we expect from a
/// "real" text PDF. Below this threshold we treat it as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Main entry point: takes raw PDF bytes and returns `PdfContent`.
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> PdfContent {
    // --- Phase 1: structural check with lopdf ---
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return PdfContent::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return PdfContent::ScannedImage;
    }

    // --- Phase 2: one line per positioned text run ---
    let text = match extract_cell_lines(&doc) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Content stream walk failed, falling back to pdf-extract");
            match pdf_extract::extract_text_from_mem(pdf_bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "pdf-extract failed, may be scanned or corrupted");
                    return PdfContent::ScannedImage;
                }
            }
        }
    };

    let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
    if meaningful < MIN_TEXT_CHARS {
        info!(chars = meaningful, "Extracted text too short, treating as scanned");
        PdfContent::ScannedImage
    } else {
        info!(chars = meaningful, "Text extracted successfully");
        PdfContent::Text(text)
    }
}

/// Walk every page's content stream and put each positioned text run on its
/// own line. Table cells drawn side by side on one baseline come out as
/// separate lines, which is what the table reconstructor tokenizes.
///
/// A run ends when a text object opens or closes (`BT`/`ET`) or the text
/// position moves (`Td`, `TD`, `Tm`, `T*`, `'`, `"`). Consecutive `Tj`/`TJ`
/// at one position are joined.
fn extract_cell_lines(doc: &Document) -> lopdf::Result<String> {
    let mut text = String::new();

    for page_id in doc.get_pages().into_values() {
        let encodings: BTreeMap<Vec<u8>, Encoding> = doc
            .get_page_fonts(page_id)?
            .into_iter()
            .filter_map(|(name, font)| font.get_font_encoding(doc).ok().map(|enc| (name, enc)))
            .collect();
        let content = Content::decode(&doc.get_page_content(page_id)?)?;

        let mut encoding = None;
        let mut run = String::new();
        for op in &content.operations {
            match op.operator.as_str() {
                "Tf" => {
                    encoding = op
                        .operands
                        .first()
                        .and_then(|name| name.as_name().ok())
                        .and_then(|name| encodings.get(name));
                }
                "BT" | "ET" | "Td" | "TD" | "Tm" | "T*" => end_run(&mut text, &mut run),
                "Tj" | "TJ" => decode_operands(encoding, &op.operands, &mut run),
                "'" | "\"" => {
                    end_run(&mut text, &mut run);
                    decode_operands(encoding, &op.operands, &mut run);
                }
                _ => {}
            }
        }
        end_run(&mut text, &mut run);
    }

    Ok(text)
}

fn end_run(text: &mut String, run: &mut String) {
    let cell = run.trim();
    if !cell.is_empty() {
        text.push_str(cell);
        text.push('\n');
    }
    run.clear();
}

fn decode_operands(encoding: Option<&Encoding>, operands: &[Object], run: &mut String) {
    for operand in operands {
        match operand {
            Object::String(bytes, _) => run.push_str(&decode_bytes(encoding, bytes)),
            Object::Array(items) => {
                for item in items {
                    match item {
                        Object::String(bytes, _) => run.push_str(&decode_bytes(encoding, bytes)),
                        // Large negative kerning inside TJ is a word gap.
                        Object::Integer(k) if *k < -100 => run.push(' '),
                        Object::Real(k) if *k < -100.0 => run.push(' '),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
}

/// Decode with the font's encoding, or as Latin-1 when it is unknown.
fn decode_bytes(encoding: Option<&Encoding>, bytes: &[u8]) -> String {
    encoding
        .and_then(|enc| Document::decode_text(enc, bytes).ok())
        .unwrap_or_else(|| bytes.iter().map(|&b| char::from(b)).collect())
}

/// Heuristic: a page with XObject images but no Font resources is almost
/// certainly a scanned page.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false; // unknown, let text extraction decide
    }

    let mut image_only_pages = 0;

    for object_id in pages.values() {
        let Ok(page_obj) = doc.get_object(*object_id) else {
            continue;
        };
        let Ok(page_dict) = page_obj.as_dict() else {
            continue;
        };

        let resources = page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok());

        let has_entries = |key: &[u8]| {
            resources
                .and_then(|res| res.get(key).ok())
                .and_then(|obj| doc.dereference(obj).ok())
                .and_then(|(_, resolved)| resolved.as_dict().ok())
                .is_some_and(|dict| !dict.is_empty())
        };

        if has_entries(b"XObject") && !has_entries(b"Font") {
            image_only_pages += 1;
        }
    }

    let total = pages.len();
    let ratio = image_only_pages as f64 / total as f64;
    info!(
        total_pages = total,
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );

    // If ≥80% of pages are image-only, treat the whole PDF as scanned
    ratio >= 0.8
}

/// An upload written to the upload directory. The file is deleted when
/// this value is dropped.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        if !self.path().exists() {
            return Err(Error::BadUpload("failed to save the file".to_string()));
        }
        Ok(fs::read(self.path())?)
    }
}

/// Write an upload to a uniquely named file inside `dir`.
pub fn stage_upload(dir: &Path, filename: &str, bytes: &[u8]) -> Result<StagedUpload> {
    if bytes.is_empty() {
        return Err(Error::BadUpload(format!("{filename} is empty")));
    }
    fs::create_dir_all(dir)?;

    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".pdf")
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.flush()?;

    info!(path = %file.path().display(), bytes = bytes.len(), "Upload staged");
    Ok(StagedUpload { file })
}

/// SHA-256 of the raw PDF, hex encoded.
pub fn document_digest(pdf_bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(pdf_bytes))
}

/// Product table extracted from one uploaded invoice.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedInvoice {
    #[serde(serialize_with = "serialize_layout")]
    pub layout: VendorLayout,
    pub filename: String,
    pub digest: String,
    pub discarded: usize,
    pub products: ProductTable,
}

fn serialize_layout<S: serde::Serializer>(
    layout: &VendorLayout,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(layout)
}

/// Stage the upload, pull its text and run the layout's table parser.
/// The staged file is gone by the time this returns, whatever the outcome.
pub fn process_upload(
    upload_dir: &Path,
    filename: &str,
    pdf_bytes: &[u8],
    layout_tag: &str,
    policy: TrailingPolicy,
) -> Result<ExtractedInvoice> {
    let layout: VendorLayout = layout_tag.parse()?;

    let span = tracing::info_span!("pdf", filename = %filename, layout = %layout);
    let _guard = span.enter();

    let staged = stage_upload(upload_dir, filename, pdf_bytes)?;
    let bytes = staged.read()?;

    let text = match extract_text_from_pdf(&bytes) {
        PdfContent::Text(text) => text,
        PdfContent::ScannedImage => {
            return Err(Error::UnreadablePdf(format!(
                "{filename} is scanned / image-only"
            )));
        }
        PdfContent::Error(e) => return Err(Error::UnreadablePdf(e)),
    };

    let parsed = layout.parser().parse(&text, policy)?;
    info!(
        rows = parsed.table.len(),
        discarded = parsed.discarded,
        "Product table reconstructed"
    );

    Ok(ExtractedInvoice {
        layout,
        filename: filename.to_string(),
        digest: document_digest(&bytes),
        discarded: parsed.discarded,
        products: parsed.table,
    })
}

/// Read a PDF from disk and process it as an upload.
pub fn process_file(
    upload_dir: &Path,
    pdf_path: &Path,
    layout_tag: &str,
    policy: TrailingPolicy,
) -> Result<ExtractedInvoice> {
    // Unknown layouts are reported before the file is looked at.
    layout_tag.parse::<VendorLayout>()?;

    let bytes = fs::read(pdf_path).map_err(|e| {
        Error::BadUpload(format!("could not read {}: {e}", pdf_path.display()))
    })?;
    let filename = pdf_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.pdf".to_string());

    process_upload(upload_dir, &filename, &bytes, layout_tag, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::{Stream, dictionary};
    use std::path::PathBuf;

    /// A text run drawn at (x, y).
    struct Cell<'a> {
        x: i64,
        y: i64,
        text: &'a str,
    }

    fn cell(x: i64, y: i64, text: &str) -> Cell<'_> {
        Cell { x, y, text }
    }

    /// One-page PDF with every cell placed through its own text matrix,
    /// several of them sharing a baseline like a printed table.
    fn table_pdf(cells: &[Cell<'_>], extra: Vec<Operation>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 8.into()]),
        ];
        for c in cells {
            operations.push(Operation::new(
                "Tm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), c.x.into(), c.y.into()],
            ));
            operations.push(Operation::new("Tj", vec![Object::string_literal(c.text)]));
        }
        operations.extend(extra);
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    const MALBEC: [&str; 14] = [
        "001", "Perfume Malbec", "3303", "00", "5102", "UN", "2", "89,90", "179,80", "179,80",
        "32,36", "0,00", "18", "0",
    ];

    /// DANFE-like page: header cells on one baseline, one product row on the
    /// next, the tax-office box below.
    fn danfe_cells() -> Vec<Cell<'static>> {
        let mut cells = vec![
            cell(40, 800, "DANFE"),
            cell(40, 780, "VALOR"),
            cell(120, 780, "IPI"),
            cell(160, 780, "ICMS"),
        ];
        cells.extend(MALBEC.iter().enumerate().map(|(i, text)| cell(40 + 38 * i as i64, 760, text)));
        cells.push(cell(40, 700, "RESERVADO AO FISCO"));
        cells
    }

    fn staged_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    #[test]
    fn test_garbage_bytes() {
        let result = extract_text_from_pdf(b"this is not a pdf");
        assert!(matches!(result, PdfContent::Error(_)));
    }

    #[test]
    fn test_cells_on_one_baseline_become_lines() {
        let pdf = table_pdf(&danfe_cells(), vec![]);
        let PdfContent::Text(text) = extract_text_from_pdf(&pdf) else {
            panic!("expected text");
        };
        assert!(text.contains("\nIPI\nICMS\n"));
        assert!(text.contains("\n001\nPerfume Malbec\n3303\n"));
        assert!(text.ends_with("RESERVADO AO FISCO\n"));
    }

    #[test]
    fn test_runs_at_one_position_are_joined() {
        let extra = vec![
            Operation::new("Tm", vec![1.into(), 0.into(), 0.into(), 1.into(), 40.into(), 600.into()]),
            Operation::new("Tj", vec![Object::string_literal("Perfume ")]),
            Operation::new("Tj", vec![Object::string_literal("Malbec")]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Eau"),
                    (-250).into(),
                    Object::string_literal("de"),
                    (-20).into(),
                    Object::string_literal("Toilette"),
                ])],
            ),
            Operation::new("T*", vec![]),
            Operation::new("Tj", vec![Object::string_literal("  ")]),
            Operation::new("'", vec![Object::string_literal("Linha seguinte")]),
        ];
        let pdf = table_pdf(&[cell(40, 800, "Nota fiscal de entrada de mercadorias")], extra);
        let PdfContent::Text(text) = extract_text_from_pdf(&pdf) else {
            panic!("expected text");
        };
        assert_eq!(
            text,
            "Nota fiscal de entrada de mercadorias\nPerfume MalbecEau deToilette\nLinha seguinte\n"
        );
    }

    #[test]
    fn test_invoice_pdf_parses_and_leaves_no_upload() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = table_pdf(&danfe_cells(), vec![]);

        let invoice =
            process_upload(dir.path(), "nota.pdf", &pdf, "boticario", TrailingPolicy::FailFast).unwrap();

        assert_eq!(invoice.layout, VendorLayout::Boticario);
        assert_eq!(invoice.digest, document_digest(&pdf));
        assert_eq!(invoice.discarded, 0);
        assert_eq!(invoice.products.len(), 1);
        let row = &invoice.products.rows()[0];
        assert_eq!(row.values(), MALBEC);
        assert_eq!(row.get("DESCRIÇÃO DOS PRODUTOS/SERVIÇOS"), Some("Perfume Malbec"));
        assert!(staged_files(dir.path()).is_empty());
    }

    #[test]
    fn test_partial_row_in_pdf_fails_and_leaves_no_upload() {
        let dir = tempfile::tempdir().unwrap();
        let mut cells = danfe_cells();
        cells.insert(cells.len() - 1, cell(40, 740, "002"));
        let pdf = table_pdf(&cells, vec![]);

        let err = process_upload(dir.path(), "nota.pdf", &pdf, "boticario", TrailingPolicy::FailFast)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedTable { tokens: 15, width: 14, trailing: 1 }));
        assert!(staged_files(dir.path()).is_empty());
    }

    #[test]
    fn test_unknown_module_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.pdf");
        let err = process_file(dir.path(), &missing, "naturaX", TrailingPolicy::FailFast).unwrap_err();
        assert!(matches!(err, Error::UnknownModule(_)));
    }

    #[test]
    fn test_missing_file_is_bad_upload() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.pdf");
        let err = process_file(dir.path(), &missing, "boticario", TrailingPolicy::FailFast).unwrap_err();
        assert!(matches!(err, Error::BadUpload(_)));
        assert_eq!(err.status().code(), 400);
    }

    #[test]
    fn test_staged_upload_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let staged = stage_upload(dir.path(), "nota.pdf", b"%PDF-1.4").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(staged.read().unwrap(), b"%PDF-1.4");
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn test_upload_cleaned_up_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = process_upload(
            dir.path(),
            "nota.pdf",
            b"not a pdf at all",
            "boticario",
            TrailingPolicy::FailFast,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnreadablePdf(_)));
        assert!(staged_files(dir.path()).is_empty());
    }

    #[test]
    fn test_empty_upload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = stage_upload(dir.path(), "vazio.pdf", b"").unwrap_err();
        assert!(matches!(err, Error::BadUpload(_)));
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(document_digest(b"abc"), document_digest(b"abc"));
        assert_ne!(document_digest(b"abc"), document_digest(b"abd"));
        assert_eq!(document_digest(b"").len(), 64);
    }
}
