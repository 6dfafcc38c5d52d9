//! Proforma Sheet Reader
//!
//! Reads proforma tables from CSV and Excel files into raw records keyed by
//! the table-path column names.

use anyhow::{Context, Result};
use aduana_models::{keys, RawRecord};
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

/// Header rows are searched for within this many leading rows.
const HEADER_SCAN_ROWS: usize = 20;

/// Supported spreadsheet formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProformaFormat {
    Csv,
    Xlsx,
    Xls,
}

impl ProformaFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            _ => None,
        }
    }

    /// Detect format from content type header
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "text/csv" | "application/csv" => Some(Self::Csv),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some(Self::Xlsx),
            "application/vnd.ms-excel" => Some(Self::Xls),
            _ => None,
        }
    }

    pub fn detect(filename: &str, content_type: Option<&str>) -> Option<Self> {
        Self::from_extension(Path::new(filename))
            .or_else(|| content_type.and_then(Self::from_content_type))
    }
}

/// Complete parsed proforma table
#[derive(Debug, Clone)]
pub struct ParsedProforma {
    pub id: Uuid,
    pub filename: String,
    pub format: ProformaFormat,
    pub rows: Vec<RawRecord>,
    pub column_headers: Vec<String>,
    pub total_rows: usize,
    pub parse_warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProformaSheetReader;

impl ProformaSheetReader {
    pub fn new() -> Self {
        Self
    }

    /// Parse a proforma file from bytes
    pub fn parse_bytes(
        &self,
        filename: &str,
        data: &[u8],
        format: Option<ProformaFormat>,
    ) -> Result<ParsedProforma> {
        let format = format
            .or_else(|| ProformaFormat::from_extension(Path::new(filename)))
            .context("Could not determine spreadsheet format")?;

        let (grid, warnings) = match format {
            ProformaFormat::Csv => self.read_csv(data)?,
            ProformaFormat::Xlsx => {
                let workbook: calamine::Xlsx<_> =
                    calamine::open_workbook_from_rs(std::io::Cursor::new(data))
                        .context("Failed to open Excel workbook")?;
                (self.read_workbook(workbook)?, Vec::new())
            }
            ProformaFormat::Xls => {
                let workbook: calamine::Xls<_> =
                    calamine::open_workbook_from_rs(std::io::Cursor::new(data))
                        .context("Failed to open Excel workbook")?;
                (self.read_workbook(workbook)?, Vec::new())
            }
        };

        Ok(self.build(filename, format, grid, warnings))
    }

    fn read_csv(&self, data: &[u8]) -> Result<(Vec<Vec<String>>, Vec<String>)> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(data);

        let mut grid = Vec::new();
        let mut warnings = Vec::new();

        for (idx, result) in reader.records().enumerate() {
            match result {
                Ok(record) => grid.push(record.iter().map(|v| v.trim().to_string()).collect()),
                Err(e) => warnings.push(format!("Row {}: Parse error - {}", idx + 1, e)),
            }
        }

        if grid.is_empty() {
            anyhow::bail!("CSV file contains no rows");
        }
        Ok((grid, warnings))
    }

    /// Read the sheet with the most columns, which is usually the item table.
    fn read_workbook<RS, R>(&self, mut workbook: R) -> Result<Vec<Vec<String>>>
    where
        RS: std::io::Read + std::io::Seek,
        R: calamine::Reader<RS>,
    {
        use calamine::DataType;

        let mut best: Option<calamine::Range<DataType>> = None;
        for sheet_name in workbook.sheet_names().to_owned() {
            let range = match workbook.worksheet_range(&sheet_name) {
                Some(Ok(range)) => range,
                Some(Err(e)) => {
                    tracing::debug!(sheet = %sheet_name, error = ?e, "Skipping unreadable sheet");
                    continue;
                }
                None => continue,
            };
            if best.as_ref().map_or(true, |b| range.width() > b.width()) {
                best = Some(range);
            }
        }

        let range = best.context("No readable sheets found in workbook")?;
        Ok(range
            .rows()
            .map(|row| row.iter().map(|cell: &DataType| cell.to_string().trim().to_string()).collect())
            .collect())
    }

    fn build(
        &self,
        filename: &str,
        format: ProformaFormat,
        grid: Vec<Vec<String>>,
        mut warnings: Vec<String>,
    ) -> ParsedProforma {
        let header_idx = self.find_header_row(&grid);
        let headers: Vec<String> = grid
            .get(header_idx)
            .map(|row| row.iter().map(|h| column_key(h)).collect())
            .unwrap_or_default();

        if !headers.iter().any(|h| is_table_column(h)) {
            warnings.push("No recognizable proforma headers found".to_string());
        }

        let mut rows: Vec<RawRecord> = grid
            .iter()
            .skip(header_idx + 1)
            .filter_map(|cells| {
                let mut record = RawRecord::new();
                for (header, value) in headers.iter().zip(cells) {
                    if header.is_empty() || value.is_empty() || record.contains_key(header) {
                        continue;
                    }
                    record.insert(header.clone(), value.clone());
                }
                let has_content = record.as_map().keys().any(|k| k != keys::ITEM_NUMBER);
                has_content.then_some(record)
            })
            .collect();

        fill_item_numbers(&mut rows);

        ParsedProforma {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            format,
            total_rows: rows.len(),
            rows,
            column_headers: headers,
            parse_warnings: warnings,
        }
    }

    /// First row with at least two recognizable headers, else the first
    /// non-empty row.
    fn find_header_row(&self, grid: &[Vec<String>]) -> usize {
        let scan = grid.iter().take(HEADER_SCAN_ROWS).enumerate();
        for (idx, row) in scan {
            let recognized = row
                .iter()
                .filter(|cell| is_table_column(&column_key(cell)))
                .count();
            if recognized >= 2 {
                return idx;
            }
        }
        grid.iter()
            .position(|row| row.iter().any(|cell| !cell.is_empty()))
            .unwrap_or(0)
    }
}

const TABLE_COLUMNS: &[&str] = &[
    "item_no",
    "commercial_name",
    "model",
    "color",
    "size",
    "qty",
    "package",
    "unit_price",
    "total_amount",
    "hs_code",
    "picture_url",
    "notes",
];

fn is_table_column(key: &str) -> bool {
    TABLE_COLUMNS.contains(&key)
}

/// Map a header cell to its table-path column, falling back to a
/// snake_case form of the header.
fn column_key(header: &str) -> String {
    let name = header.trim().to_lowercase();
    let mapped = match name.as_str() {
        "item" | "no" | "no." | "item no" | "item no." => Some("item_no"),
        "description" | "item description" | "product" | "descripcion" | "descripción" => {
            Some("commercial_name")
        }
        "model" | "modelo" => Some("model"),
        "color" => Some("color"),
        "size" | "talla" => Some("size"),
        "qty" | "quantity" | "cantidad" => Some("qty"),
        "package" | "packages" | "ctns" | "cartons" => Some("package"),
        "unit price" | "unit price (usd)" | "price" | "usd" | "precio unitario" => Some("unit_price"),
        "amount" | "total" | "importe" => Some("total_amount"),
        "hs code" | "hs" | "partida" => Some("hs_code"),
        "picture" | "photo" | "image" | "foto" => Some("picture_url"),
        "remark" | "note" | "notes" | "remarks" => Some("notes"),
        _ => None,
    };
    if let Some(mapped) = mapped {
        return mapped.to_string();
    }

    if name.contains("hs") && name.contains("code") {
        return "hs_code".to_string();
    }
    if name.contains("unit") && name.contains("price") {
        return "unit_price".to_string();
    }
    if name.contains("amount") || (name.contains("total") && !name.contains("unit")) {
        return "total_amount".to_string();
    }
    if name.contains("qty") || name.contains("quantity") {
        return "qty".to_string();
    }
    if name.contains("desc") {
        return "commercial_name".to_string();
    }

    name.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Number rows lacking an item number, skipping numbers already in use.
fn fill_item_numbers(rows: &mut [RawRecord]) {
    let used: HashSet<u64> = rows
        .iter()
        .filter_map(|row| row.get(keys::ITEM_NUMBER)?.as_str()?.parse().ok())
        .collect();

    let mut next = (1u64..).filter(|n| !used.contains(n));
    for row in rows.iter_mut().filter(|row| !row.contains_key(keys::ITEM_NUMBER)) {
        if let Some(n) = next.next() {
            row.insert(keys::ITEM_NUMBER, n.to_string());
        }
    }
}
