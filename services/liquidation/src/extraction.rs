//! Document Extraction Service
//!
//! Orchestrates the image path and the table path of a proforma upload and
//! turns their output into reconciled line items.

use aduana_models::{ImageRef, LineItem};
use aduana_utils::{
    reconcile, AduanaError, AduanaResult, DraftItem, ProformaFormat, ProformaSheetReader,
    ReconciliationReport, RowNormalizer, ScriptsConfig,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::script_runner::{ScriptRunner, TempFile};
use crate::vlm_client::VlmClient;

/// Broad document category, decided from name and content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Image,
    Spreadsheet,
}

/// An uploaded proforma held in memory for the duration of a request.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub filename: String,
    pub content_type: String,
    pub document_name: String,
    pub data: Vec<u8>,
}

impl UploadedDocument {
    pub fn kind(&self) -> DocumentKind {
        if ProformaFormat::detect(&self.filename, Some(&self.content_type)).is_some() {
            return DocumentKind::Spreadsheet;
        }
        let ext = Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if ext == "pdf" || self.content_type == "application/pdf" {
            DocumentKind::Pdf
        } else {
            DocumentKind::Image
        }
    }
}

/// Rows produced by a table extractor
#[derive(Debug, Clone, Default)]
pub struct TableExtraction {
    pub rows: Vec<Value>,
    pub warnings: Vec<String>,
}

/// Image path: product images with tentative classification.
#[async_trait]
pub trait ImageExtractor: Send + Sync {
    async fn extract_images(&self, document: &UploadedDocument) -> AduanaResult<Vec<Value>>;
}

/// Table path: proforma rows.
#[async_trait]
pub trait ProformaExtractor: Send + Sync {
    async fn extract_rows(&self, document: &UploadedDocument) -> AduanaResult<TableExtraction>;
}

/// Image extraction through `prep_liquidacion.py <pdf> <docName>`.
pub struct ScriptImageExtractor {
    runner: ScriptRunner,
    script: String,
}

impl ScriptImageExtractor {
    pub fn new(runner: ScriptRunner, config: &ScriptsConfig) -> Self {
        Self {
            runner,
            script: config.image_extraction_script.clone(),
        }
    }
}

#[async_trait]
impl ImageExtractor for ScriptImageExtractor {
    async fn extract_images(&self, document: &UploadedDocument) -> AduanaResult<Vec<Value>> {
        match document.kind() {
            DocumentKind::Spreadsheet => return Ok(Vec::new()),
            DocumentKind::Image => {
                // The upload itself is the only product image.
                return Ok(vec![serde_json::json!({
                    "id": "img1",
                    "name": document.filename,
                    "b64": BASE64.encode(&document.data),
                })]);
            }
            DocumentKind::Pdf => {}
        }

        let file = TempFile::write(&document.filename, &document.data).await?;
        let output = self
            .runner
            .run_json(&self.script, &[&file.path_str(), &document.document_name])
            .await?;

        if output.get("success").and_then(Value::as_bool) != Some(true) {
            let message = output
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("image extraction failed");
            return Err(AduanaError::external_service(self.script.as_str(), message));
        }

        Ok(output
            .get("images")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

/// Table extraction: spreadsheets are read natively, PDFs and images go
/// through `parser_proforma.py <file> <contentType>`.
pub struct TableProformaExtractor {
    runner: ScriptRunner,
    script: String,
    reader: ProformaSheetReader,
}

impl TableProformaExtractor {
    pub fn new(runner: ScriptRunner, config: &ScriptsConfig) -> Self {
        Self {
            runner,
            script: config.table_extraction_script.clone(),
            reader: ProformaSheetReader::new(),
        }
    }
}

#[async_trait]
impl ProformaExtractor for TableProformaExtractor {
    async fn extract_rows(&self, document: &UploadedDocument) -> AduanaResult<TableExtraction> {
        if let Some(format) = ProformaFormat::detect(&document.filename, Some(&document.content_type)) {
            let parsed = self
                .reader
                .parse_bytes(&document.filename, &document.data, Some(format))
                .map_err(|e| AduanaError::document_processing(format!("{:#}", e)))?;
            return Ok(TableExtraction {
                rows: parsed.rows.into_iter().map(|r| Value::Object(r.into_map())).collect(),
                warnings: parsed.parse_warnings,
            });
        }

        let file = TempFile::write(&document.filename, &document.data).await?;
        let output = self
            .runner
            .run_json(&self.script, &[&file.path_str(), &document.content_type])
            .await?;

        Ok(TableExtraction {
            rows: array_field(&output, "rows"),
            warnings: array_field(&output, "warnings")
                .into_iter()
                .filter_map(|w| w.as_str().map(str::to_string))
                .collect(),
        })
    }
}

/// Vision fallback: the document pages are sent to the VLM, rasterizing
/// PDFs with `pdf_to_images_b64.py <pdf> <pages>`.
pub struct VlmProformaExtractor {
    client: Arc<VlmClient>,
    runner: ScriptRunner,
    rasterize_script: String,
    max_pages: u32,
}

impl VlmProformaExtractor {
    pub fn new(client: Arc<VlmClient>, runner: ScriptRunner, config: &ScriptsConfig) -> Self {
        Self {
            client,
            runner,
            rasterize_script: config.rasterize_script.clone(),
            max_pages: config.max_pages.max(1),
        }
    }

    async fn page_images(&self, document: &UploadedDocument) -> AduanaResult<Vec<String>> {
        match document.kind() {
            DocumentKind::Image => Ok(vec![BASE64.encode(&document.data)]),
            DocumentKind::Pdf => {
                let file = TempFile::write(&document.filename, &document.data).await?;
                let pages = self.max_pages.to_string();
                let output = self
                    .runner
                    .run_json(&self.rasterize_script, &[&file.path_str(), &pages])
                    .await?;
                Ok(array_field(&output, "images")
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .take(self.max_pages as usize)
                    .collect())
            }
            DocumentKind::Spreadsheet => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl ProformaExtractor for VlmProformaExtractor {
    async fn extract_rows(&self, document: &UploadedDocument) -> AduanaResult<TableExtraction> {
        let pages = self.page_images(document).await?;
        if pages.is_empty() {
            return Ok(TableExtraction {
                rows: Vec::new(),
                warnings: vec!["Could not rasterize the document for vision extraction".to_string()],
            });
        }

        let image_urls: Vec<String> = pages
            .iter()
            .filter_map(|b64| ImageRef::inline(b64.as_str()).and_then(|image| image.data_url()))
            .collect();
        let answer = self
            .client
            .chat_json(PROFORMA_SYSTEM_PROMPT, PROFORMA_USER_PROMPT, &image_urls)
            .await?;

        let rows = array_field(&answer, "rows");
        tracing::info!(rows = rows.len(), pages = pages.len(), "Vision extraction finished");
        Ok(TableExtraction {
            rows,
            warnings: Vec::new(),
        })
    }
}

fn array_field(value: &Value, key: &str) -> Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Items and diagnostics produced from one upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeResult {
    pub items: Vec<LineItem>,
    pub report: ReconciliationReport,
    pub warnings: Vec<String>,
    pub rejected_records: usize,
}

/// Intake orchestration over injected extractors
#[derive(Clone)]
pub struct IntakeService {
    images: Arc<dyn ImageExtractor>,
    table: Arc<dyn ProformaExtractor>,
    fallback: Arc<dyn ProformaExtractor>,
    normalizer: RowNormalizer,
}

impl IntakeService {
    pub fn new(
        images: Arc<dyn ImageExtractor>,
        table: Arc<dyn ProformaExtractor>,
        fallback: Arc<dyn ProformaExtractor>,
        normalizer: RowNormalizer,
    ) -> Self {
        Self {
            images,
            table,
            fallback,
            normalizer,
        }
    }

    fn finish(&self, drafts: Vec<DraftItem>) -> Vec<LineItem> {
        drafts
            .into_iter()
            .map(|draft| self.normalizer.finish(draft))
            .collect()
    }

    /// Table rows with the vision fallback. Failures degrade to warnings.
    pub async fn extract_table(&self, document: &UploadedDocument) -> TableExtraction {
        let mut warnings = Vec::new();

        match self.table.extract_rows(document).await {
            Ok(extraction) if !extraction.rows.is_empty() => return extraction,
            Ok(extraction) => {
                warnings.extend(extraction.warnings);
                warnings.push("Table extraction found no rows; using vision fallback".to_string());
            }
            Err(e) => {
                tracing::warn!(error = %e, "Table extraction failed");
                warnings.push(format!("Table extraction failed ({}); using vision fallback", e));
            }
        }

        if document.kind() == DocumentKind::Spreadsheet {
            return TableExtraction {
                rows: Vec::new(),
                warnings,
            };
        }

        match self.fallback.extract_rows(document).await {
            Ok(extraction) => {
                warnings.extend(extraction.warnings);
                TableExtraction {
                    rows: extraction.rows,
                    warnings,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Vision extraction failed");
                warnings.push(format!("Vision extraction failed: {}", e));
                TableExtraction {
                    rows: Vec::new(),
                    warnings,
                }
            }
        }
    }

    /// Normalized table rows only, without images.
    pub async fn parse_proforma(&self, document: &UploadedDocument) -> IntakeResult {
        let table = self.extract_table(document).await;
        let batch = self.normalizer.draft_values(&table.rows);
        let (drafts, report) = reconcile(Vec::new(), batch.items);
        let items = self.finish(drafts);

        let mut warnings = table.warnings;
        warnings.extend(batch.warnings);
        IntakeResult {
            items,
            report,
            warnings,
            rejected_records: batch.rejected,
        }
    }

    /// Run both paths and reconcile. Image-path failure aborts intake.
    pub async fn intake(&self, document: &UploadedDocument) -> AduanaResult<IntakeResult> {
        tracing::info!(
            filename = %document.filename,
            kind = ?document.kind(),
            bytes = document.data.len(),
            "Starting intake"
        );

        let image_values = self.images.extract_images(document).await?;
        let table = self.extract_table(document).await;

        let image_batch = self.normalizer.draft_values(&image_values);
        let text_batch = self.normalizer.draft_values(&table.rows);

        let mut warnings = table.warnings;
        warnings.extend(image_batch.warnings.into_iter().map(|w| format!("Image {}", w)));
        warnings.extend(text_batch.warnings.into_iter().map(|w| format!("Table {}", w)));
        let rejected_records = image_batch.rejected + text_batch.rejected;

        let (drafts, report) = reconcile(image_batch.items, text_batch.items);
        let items = self.finish(drafts);
        warnings.extend(report.warnings.iter().cloned());

        if items.is_empty() {
            return Err(AduanaError::document_processing(
                "No line items could be extracted from the document",
            ));
        }

        tracing::info!(
            items = items.len(),
            paired = report.paired,
            rejected = rejected_records,
            "Intake finished"
        );

        Ok(IntakeResult {
            items,
            report,
            warnings,
            rejected_records,
        })
    }
}

const PROFORMA_SYSTEM_PROMPT: &str = r#"Eres un asistente que extrae los ítems de una PROFORMA o FACTURA PROFORMA.
Devuelve SOLO JSON válido con este shape:
{
  "rows": [
    {
      "nombre_comercial": string | null,
      "descripcion": string | null,
      "modelo": string | null,
      "unidad_de_medida": string | null,
      "cantidad_x_caja": number | null,
      "cajas": number | null,
      "total_unidades": number | null,
      "partida": string | null,
      "precio_unitario_usd": number | null,
      "total_usd": number | null,
      "proveedores": string | null,
      "link_de_la_imagen": string | null
    }
  ]
}
Reglas:
- Ignora cabeceras, subtotales y total general.
- Si faltan datos, deja null.
- Usa números (no strings) para cantidades y precios.
- La columna partida debe ser la partida arancelaria (solo dígitos)."#;

const PROFORMA_USER_PROMPT: &str =
    "Extrae las filas de la proforma según el esquema en español. Responde SOLO JSON válido.";

#[cfg(test)]
mod tests {
    use super::*;
    use aduana_utils::NormalizationConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedImages(AduanaResult<Vec<Value>>);

    #[async_trait]
    impl ImageExtractor for FixedImages {
        async fn extract_images(&self, _document: &UploadedDocument) -> AduanaResult<Vec<Value>> {
            self.0.clone()
        }
    }

    struct FixedRows {
        result: AduanaResult<TableExtraction>,
        calls: AtomicUsize,
    }

    impl FixedRows {
        fn new(result: AduanaResult<TableExtraction>) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProformaExtractor for FixedRows {
        async fn extract_rows(&self, _document: &UploadedDocument) -> AduanaResult<TableExtraction> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn pdf() -> UploadedDocument {
        UploadedDocument {
            filename: "proforma.pdf".into(),
            content_type: "application/pdf".into(),
            document_name: "PI-2291".into(),
            data: b"%PDF-1.4".to_vec(),
        }
    }

    fn service(
        images: AduanaResult<Vec<Value>>,
        table: Arc<FixedRows>,
        fallback: Arc<FixedRows>,
    ) -> IntakeService {
        IntakeService::new(
            Arc::new(FixedImages(images)),
            table,
            fallback,
            RowNormalizer::new(NormalizationConfig::default()),
        )
    }

    #[test]
    fn test_document_kind() {
        let mut doc = pdf();
        assert_eq!(doc.kind(), DocumentKind::Pdf);
        doc.filename = "lista.xlsx".into();
        doc.content_type = "application/octet-stream".into();
        assert_eq!(doc.kind(), DocumentKind::Spreadsheet);
        doc.filename = "foto.jpg".into();
        doc.content_type = "image/jpeg".into();
        assert_eq!(doc.kind(), DocumentKind::Image);
    }

    #[tokio::test]
    async fn test_intake_merges_paths() {
        let images = Ok(vec![json!({
            "id": "img1", "name": "image_001.png", "b64": "iVBORw0KGgo",
            "hs_code": "8518.22", "commercial_name": "Bocina", "confidence": 0.8
        })]);
        let table = FixedRows::new(Ok(TableExtraction {
            rows: vec![json!({ "commercial_name": "ALTAVOZ BLUETOOTH", "qty": "60" })],
            warnings: vec![],
        }));
        let fallback = FixedRows::new(Ok(TableExtraction::default()));

        let result = service(images, table, fallback.clone()).intake(&pdf()).await.unwrap();

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].id, "img1");
        assert_eq!(result.items[0].display_name, "ALTAVOZ BLUETOOTH");
        assert_eq!(result.items[0].tariff_code.as_str(), "851822");
        assert_eq!(result.items[0].quantities.total_units, Some(60.0));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_table_uses_vision_fallback() {
        let table = FixedRows::new(Ok(TableExtraction::default()));
        let fallback = FixedRows::new(Ok(TableExtraction {
            rows: vec![json!({ "nombre_comercial": "TAZA", "cajas": 2, "cantidad_x_caja": 6 })],
            warnings: vec![],
        }));

        let result = service(Ok(vec![]), table, fallback.clone()).intake(&pdf()).await.unwrap();

        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.items[0].quantities.total_units, Some(12.0));
        assert!(result.warnings.iter().any(|w| w.contains("vision fallback")));
    }

    #[tokio::test]
    async fn test_table_failure_degrades_to_warning() {
        let table = FixedRows::new(Err(AduanaError::external_service("parser_proforma.py", "exit code 1")));
        let fallback = FixedRows::new(Err(AduanaError::external_service("vlm", "timeout")));
        let images = Ok(vec![json!({ "id": "img1", "b64": "iVBORw0KGgo" })]);

        let result = service(images, table, fallback).intake(&pdf()).await.unwrap();

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.warnings.len(), 2);
    }

    #[tokio::test]
    async fn test_image_failure_aborts_intake() {
        let table = FixedRows::new(Ok(TableExtraction::default()));
        let fallback = FixedRows::new(Ok(TableExtraction::default()));
        let err = service(
            Err(AduanaError::external_service("prep_liquidacion.py", "no API key")),
            table.clone(),
            fallback,
        )
        .intake(&pdf())
        .await
        .unwrap_err();

        assert_eq!(err.error_code(), "EXTERNAL_SERVICE_ERROR");
        assert_eq!(table.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_nothing_extracted_is_an_error() {
        let table = FixedRows::new(Ok(TableExtraction::default()));
        let fallback = FixedRows::new(Ok(TableExtraction::default()));
        let err = service(Ok(vec![]), table, fallback).intake(&pdf()).await.unwrap_err();
        assert_eq!(err.error_code(), "DOCUMENT_PROCESSING_ERROR");
    }

    #[tokio::test]
    async fn test_native_spreadsheet_rows() {
        let runner = ScriptRunner::new(&aduana_utils::AppConfig::default().scripts);
        let extractor = TableProformaExtractor::new(runner, &aduana_utils::AppConfig::default().scripts);
        let doc = UploadedDocument {
            filename: "pi.csv".into(),
            content_type: "text/csv".into(),
            document_name: "PI".into(),
            data: b"Description,Qty,Unit Price\nCABLE USB,100,0.80\n".to_vec(),
        };

        let extraction = extractor.extract_rows(&doc).await.unwrap();
        assert_eq!(extraction.rows.len(), 1);
        assert_eq!(extraction.rows[0]["commercial_name"], "CABLE USB");
    }
}
