//! Upload Handlers
//!
//! Document intake into a review session, table-only proforma parsing and
//! ad-hoc classification.

use aduana_models::{Classification, ClassificationRequest, FolderId, ImageRef};
use aduana_utils::{
    normalize_folder_id, validate_document_name, validate_file_size, validate_file_type,
    validate_model, AduanaError, AduanaResult, ALLOWED_DOCUMENT_TYPES,
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::extraction::{IntakeResult, UploadedDocument};
use crate::handlers::ApiResult;
use crate::session::{ReviewSession, SessionHandle, SessionView};
use crate::AppState;

/// Fields of an upload form
#[derive(Debug, Default)]
struct UploadForm {
    filename: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
    document_name: Option<String>,
    folder_url: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> AduanaResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AduanaError::validation("file", format!("Failed to read upload: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    form.filename = field.file_name().map(str::to_string);
                    form.content_type = field.content_type().map(str::to_string);
                    form.data = field
                        .bytes()
                        .await
                        .map_err(|e| AduanaError::validation("file", format!("Failed to read file data: {}", e)))?
                        .to_vec();
                }
                "document_name" | "documentName" => {
                    form.document_name = Some(text_field(field).await?);
                }
                "folder_url" | "folderUrl" => {
                    form.folder_url = Some(text_field(field).await?);
                }
                other => tracing::debug!(field = other, "Ignoring upload field"),
            }
        }

        Ok(form)
    }

    fn document(self, max_size: usize) -> AduanaResult<(UploadedDocument, Option<String>)> {
        let filename = self
            .filename
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| AduanaError::validation("file", "No file provided"))?;
        validate_file_type(&filename, ALLOWED_DOCUMENT_TYPES)?;
        validate_file_size(self.data.len() as u64, max_size as u64)?;

        let document_name = match self.document_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => validate_document_name(name)?,
            _ => validate_document_name(file_stem(&filename))?,
        };

        let content_type = self
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string());

        Ok((
            UploadedDocument {
                filename,
                content_type,
                document_name,
                data: self.data,
            },
            self.folder_url,
        ))
    }
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> AduanaResult<String> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map(|text| text.trim().to_string())
        .map_err(|e| AduanaError::validation(name, e.to_string()))
}

fn file_stem(filename: &str) -> &str {
    std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}

fn optional_folder(folder_url: Option<&str>) -> AduanaResult<Option<FolderId>> {
    match folder_url.map(str::trim).filter(|f| !f.is_empty()) {
        Some(folder_url) => normalize_folder_id(folder_url).map(Some),
        None => Ok(None),
    }
}

/// Intake response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeResponse {
    pub session: SessionView,
    pub rejected_records: usize,
}

/// Extract a document and open a review session
///
/// POST /api/v1/intake
pub async fn intake_document(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<IntakeResponse>)> {
    let form = UploadForm::read(multipart).await?;
    let (document, folder_url) = form.document(state.config.server.max_request_size)?;
    let folder_id = optional_folder(folder_url.as_deref())?;

    let result = state.intake.intake(&document).await?;
    state
        .metrics
        .record_intake(result.items.len(), result.rejected_records);

    let mut session = ReviewSession::new(
        document.document_name.clone(),
        result.items,
        state.config.normalization.tariff_code_max_digits,
    )
    .with_report(result.report, result.warnings);
    if let Some(folder_id) = folder_id {
        session = session.with_folder(folder_id);
    }

    let handle = SessionHandle::new(session, state.classifier.clone(), state.publisher.clone());
    let view = handle.view().await;
    let session_id = state.sessions.insert(handle).await;
    state.metrics.active_sessions.set(state.sessions.len().await as i64);

    tracing::info!(
        %session_id,
        document = %view.document_name,
        items = view.items.len(),
        "Review session opened"
    );

    Ok((
        StatusCode::CREATED,
        Json(IntakeResponse {
            session: view,
            rejected_records: result.rejected_records,
        }),
    ))
}

/// Table rows of a proforma, without images or a session
///
/// POST /api/v1/proforma/parse
pub async fn parse_proforma(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<IntakeResult>> {
    let form = UploadForm::read(multipart).await?;
    let (document, _) = form.document(state.config.server.max_request_size)?;

    let result = state.intake.parse_proforma(&document).await;
    state
        .metrics
        .record_intake(result.items.len(), result.rejected_records);
    Ok(Json(result))
}

/// Ad-hoc classification request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    pub image_b64: Option<String>,
    #[validate(url)]
    pub image_url: Option<String>,
    #[validate(length(max = 200))]
    pub name: Option<String>,
}

/// Classify one image. An unreadable model reply comes back as an empty
/// classification; only service and configuration failures are errors.
///
/// POST /api/v1/classify
pub async fn classify_image(
    State(state): State<AppState>,
    Json(body): Json<ClassifyRequest>,
) -> ApiResult<Json<Classification>> {
    validate_model(&body)?;

    let image = ImageRef::new(body.image_b64, body.image_url)
        .ok_or_else(|| AduanaError::validation("image", "imageB64 or imageUrl is required"))?;
    let request = ClassificationRequest {
        image,
        name_hint: body.name.filter(|n| !n.trim().is_empty()),
    };

    let classification = state.classifier.classify(&request).await?;
    Ok(Json(classification))
}
