//! Publish Adapter
//!
//! Flattens reviewed line items into the row layout of the spreadsheet
//! writer and interprets its result.

use aduana_models::{LineItem, PublishReceipt, PublishRequest};
use aduana_utils::{AduanaError, AduanaResult, ScriptsConfig};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::script_runner::{ScriptRunner, TempFile};

/// Spreadsheet/drive writer collaborator.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> AduanaResult<PublishReceipt>;
}

/// One row as consumed by the writer script.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishItem {
    pub name: String,
    pub b64: Option<String>,
    pub hs_code: String,
    pub commercial_name: String,
    pub confidence: Option<f64>,
    pub reason: String,
    #[serde(rename = "linkCotizador")]
    pub link_cotizador: String,
    pub nombre_comercial: String,
    pub descripcion: String,
    pub unidad_de_medida: String,
    pub cantidad_x_caja: Option<f64>,
    pub cajas: Option<f64>,
    pub total_unidades: Option<f64>,
    pub partida: String,
    pub precio_unitario_usd: Option<f64>,
    pub total_usd: Option<f64>,
    pub link_de_la_imagen: String,
    pub proveedores: String,
    pub modelo: String,
}

impl PublishItem {
    /// `position` is zero-based and only used to name images without a
    /// file name.
    pub fn from_item(position: usize, item: &LineItem) -> Self {
        let image = item.image.as_ref();
        let name = image
            .and_then(|i| i.name())
            .map(str::to_string)
            .unwrap_or_else(|| format!("image_{:03}.png", position + 1));

        Self {
            name,
            b64: image.and_then(|i| i.inline_b64()).map(str::to_string),
            hs_code: item.tariff_code.to_string(),
            commercial_name: item.display_name.clone(),
            confidence: item.classification_confidence,
            reason: item.classification_reason.clone(),
            link_cotizador: item.text.quote_link.clone(),
            nombre_comercial: item.display_name.clone(),
            descripcion: item.text.description.clone(),
            unidad_de_medida: item.text.unit_of_measure.clone(),
            cantidad_x_caja: item.quantities.per_package,
            cajas: item.quantities.package_count,
            total_unidades: item.quantities.total_units,
            partida: item.tariff_code.to_string(),
            precio_unitario_usd: item.quantities.unit_price,
            total_usd: item.quantities.total_price,
            link_de_la_imagen: image.and_then(|i| i.url()).unwrap_or_default().to_string(),
            proveedores: item.text.supplier.clone(),
            modelo: item.text.model.clone(),
        }
    }
}

/// Payload file handed to the writer script.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishPayload<'a> {
    document_name: &'a str,
    folder_id: &'a str,
    items: Vec<PublishItem>,
}

pub fn build_payload(request: &PublishRequest) -> AduanaResult<Vec<u8>> {
    let payload = PublishPayload {
        document_name: &request.document_name,
        folder_id: request.folder_id.as_str(),
        items: request
            .items
            .iter()
            .enumerate()
            .map(|(position, item)| PublishItem::from_item(position, item))
            .collect(),
    };
    serde_json::to_vec(&payload).map_err(|e| AduanaError::internal(e.to_string()))
}

/// Read the writer's `{success, sheetUrl, rows}` answer. Anything without
/// `success: true` is a failed publish.
pub fn interpret_publish_output(output: &Value, service: &str) -> AduanaResult<PublishReceipt> {
    if output.get("success").and_then(Value::as_bool) != Some(true) {
        let message = output
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("publish failed without an error message");
        return Err(AduanaError::external_service(service, message));
    }

    Ok(PublishReceipt {
        sheet_url: output
            .get("sheetUrl")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        rows_written: output
            .get("rows")
            .and_then(Value::as_u64)
            .map(|rows| rows as usize)
            .unwrap_or_default(),
    })
}

/// Publisher running `commit_liquidacion.py <payload.json> <template>`.
pub struct ScriptPublisher {
    runner: ScriptRunner,
    script: String,
}

impl ScriptPublisher {
    pub fn new(runner: ScriptRunner, config: &ScriptsConfig) -> Self {
        Self {
            runner,
            script: config.publish_script.clone(),
        }
    }
}

#[async_trait]
impl Publisher for ScriptPublisher {
    async fn publish(&self, request: &PublishRequest) -> AduanaResult<PublishReceipt> {
        let payload = build_payload(request)?;
        let file = TempFile::write("commit.json", &payload).await?;

        tracing::info!(
            document = %request.document_name,
            folder_id = %request.folder_id,
            template = %request.template,
            items = request.items.len(),
            "Publishing liquidation"
        );

        let output = self
            .runner
            .run_json(&self.script, &[&file.path_str(), request.template.key()])
            .await?;
        interpret_publish_output(&output, &self.script)
    }
}
