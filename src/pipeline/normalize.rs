//! Format normalizer: turns an uploaded or downloaded payload into exactly one
//! [`CanonicalRecord`], or fails before anything touches storage.
//!
//! Accepted shapes:
//! - JSON object (a single record), optionally wrapped as `{"data": {...}}`
//! - JSON array of objects (first element wins)
//! - CSV text with a header row, optionally preceded by title lines

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::models::{CanonicalRecord, PlantId, PlantMetrics};

// ---

/// Declared format of an incoming payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Json,
}

/// Payload body as received: raw text or an already-decoded JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Structured(Value),
}

/// Everything the normalizer needs: the body, its format and caller context.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    // ---
    pub format: SourceFormat,
    pub body: Payload,
    /// Injected when the source rows do not carry a plant id.
    pub plant_id: Option<PlantId>,
    /// Zero-based line index of the CSV header (exports put a title line first).
    pub header_row: usize,
}

impl RawPayload {
    // ---
    pub fn new(format: SourceFormat, body: Payload, plant_id: Option<PlantId>) -> Self {
        Self {
            format,
            body,
            plant_id,
            header_row: 0,
        }
    }
}

type Row = Map<String, Value>;

/// Normalize a payload into one canonical record.
///
/// Errors:
/// - `MalformedInput` for empty/unparsable bodies, bad cells or a missing plant id
/// - `EmptyDataset` for a well-formed source with no data rows
pub fn normalize(raw: &RawPayload) -> Result<CanonicalRecord> {
    // ---
    let rows = match (raw.format, &raw.body) {
        (SourceFormat::Json, Payload::Structured(value)) => json_rows(value.clone())?,
        (SourceFormat::Json, Payload::Text(text)) => json_rows(parse_json_text(text)?)?,
        (SourceFormat::Csv, Payload::Text(text)) => csv_rows(text, raw.header_row)?,
        (SourceFormat::Csv, Payload::Structured(Value::String(text))) => {
            csv_rows(text, raw.header_row)?
        }
        (SourceFormat::Csv, Payload::Structured(_)) => {
            return Err(PipelineError::MalformedInput(
                "csv payload must be text".to_string(),
            ))
        }
    };

    let mut rows = rows.into_iter();
    let first = rows.next().ok_or(PipelineError::EmptyDataset)?;
    let ignored = rows.count();
    if ignored > 0 {
        warn!(ignored, "Payload carries more than one data row; using the first");
    }

    record_from_row(&first, raw.plant_id)
}

fn parse_json_text(text: &str) -> Result<Value> {
    // ---
    if text.trim().is_empty() {
        return Err(PipelineError::MalformedInput("payload is empty".to_string()));
    }
    serde_json::from_str(text)
        .map_err(|e| PipelineError::MalformedInput(format!("invalid json: {e}")))
}

fn json_rows(value: Value) -> Result<Vec<Row>> {
    // ---
    match value {
        Value::Object(mut map) => {
            // API clients send {"data": {...}}
            let enveloped = map.len() == 1
                && matches!(map.get("data"), Some(Value::Object(_) | Value::Array(_)));
            if enveloped {
                if let Some(inner) = map.remove("data") {
                    return json_rows(inner);
                }
            }
            Ok(vec![map])
        }
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(PipelineError::MalformedInput(format!(
                    "element {i} is not an object: {other}"
                ))),
            })
            .collect(),
        Value::Null => Err(PipelineError::MalformedInput("payload is null".to_string())),
        other => Err(PipelineError::MalformedInput(format!(
            "expected an object or array, got {other}"
        ))),
    }
}

fn csv_rows(text: &str, header_row: usize) -> Result<Vec<Row>> {
    // ---
    if text.trim().is_empty() {
        return Err(PipelineError::MalformedInput("payload is empty".to_string()));
    }

    let mut lines = text.lines().skip(header_row);
    let header = lines
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| {
            PipelineError::MalformedInput(format!("no header row at line {header_row}"))
        })?;
    let columns = split_csv_line(header)?;

    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let cells = split_csv_line(line)?;
        if cells.len() > columns.len() {
            return Err(PipelineError::MalformedInput(format!(
                "row {} has {} cells but the header has {}",
                i + 1,
                cells.len(),
                columns.len()
            )));
        }
        let row: Row = columns
            .iter()
            .zip(cells.into_iter().chain(std::iter::repeat(String::new())))
            .map(|(c, v)| (c.clone(), Value::String(v)))
            .collect();
        rows.push(row);
    }

    debug!(columns = columns.len(), rows = rows.len(), "Parsed csv payload");
    Ok(rows)
}

/// Split one CSV line, honouring double-quoted cells and `""` escapes.
fn split_csv_line(line: &str) -> Result<Vec<String>> {
    // ---
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if cell.trim().is_empty() => {
                cell.clear();
                in_quotes = true;
            }
            (',', false) => cells.push(std::mem::take(&mut cell).trim().to_string()),
            (c, _) => cell.push(c),
        }
    }
    if in_quotes {
        return Err(PipelineError::MalformedInput(format!(
            "unterminated quote in line: {line}"
        )));
    }
    cells.push(cell.trim().to_string());
    Ok(cells)
}

/// Map a source header onto a canonical field name.
///
/// `Specific Energy (kWh/kWp)` becomes `specific_energy_kwh_per_kwp`.
pub fn canonical_field_name(raw: &str) -> String {
    // ---
    let spaced = raw.trim().to_lowercase().replace('/', " per ");
    let mut out = String::with_capacity(spaced.len());
    for c in spaced.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

fn record_from_row(row: &Row, context_plant_id: Option<PlantId>) -> Result<CanonicalRecord> {
    // ---
    let mut metrics = PlantMetrics::default();
    let mut source_plant_id = None;
    let mut read_date = None;

    for (key, value) in row {
        let field = canonical_field_name(key);
        match field.as_str() {
            "plant_id" => source_plant_id = parse_plant_id(value)?,
            "read_date" => read_date = parse_date(value)?,
            "total_string_capacity_kwp" => {
                metrics.total_string_capacity_kwp = parse_number(&field, value)?
            }
            "yield_kwh" => metrics.yield_kwh = parse_number(&field, value)?,
            "total_yield_kwh" => metrics.total_yield_kwh = parse_number(&field, value)?,
            "specific_energy_kwh_per_kwp" => {
                metrics.specific_energy_kwh_per_kwp = parse_number(&field, value)?
            }
            "peak_ac_power_kw" => metrics.peak_ac_power_kw = parse_number(&field, value)?,
            "grid_connection_duration_h" => {
                metrics.grid_connection_duration_h = parse_number(&field, value)?
            }
            // load_date is always the ingestion day
            "load_date" => {}
            _ => debug!(field = %key, "Ignoring unknown field"),
        }
    }

    let plant_id = match (source_plant_id, context_plant_id) {
        (Some(source), Some(context)) if source != context => {
            warn!(
                source,
                context,
                "Source plant id differs from caller context; keeping source"
            );
            source
        }
        (Some(id), _) | (None, Some(id)) => id,
        (None, None) => {
            return Err(PipelineError::MalformedInput(
                "plant_id missing from payload and request".to_string(),
            ))
        }
    };

    // A row without any metric would supersede a real reading with nothing
    if metrics.is_empty() {
        return Err(PipelineError::MalformedInput(format!(
            "row for plant {plant_id} carries no metric values"
        )));
    }

    Ok(CanonicalRecord {
        plant_id,
        metrics,
        read_date,
    })
}

fn blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn parse_number(field: &str, value: &Value) -> Result<Option<f64>> {
    // ---
    if blank(value) {
        return Ok(None);
    }
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    };
    parsed.map(Some).ok_or_else(|| {
        PipelineError::MalformedInput(format!("{field} is not numeric: {value}"))
    })
}

fn parse_plant_id(value: &Value) -> Result<Option<PlantId>> {
    // ---
    if blank(value) {
        return Ok(None);
    }
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<PlantId>().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| PipelineError::MalformedInput(format!("invalid plant_id: {value}")))
}

fn parse_date(value: &Value) -> Result<Option<NaiveDate>> {
    // ---
    if blank(value) {
        return Ok(None);
    }
    let text = value.as_str().map(str::trim).unwrap_or_default();
    // Accept timestamps by keeping the date part
    text.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(Some)
        .ok_or_else(|| PipelineError::MalformedInput(format!("invalid read_date: {value}")))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    const EXAMPLE_CSV: &str = "total_string_capacity_kwp,yield_kwh,total_yield_kwh,\
                               specific_energy_kwh_per_kwp,peak_ac_power_kw,\
                               grid_connection_duration_h,read_date\n\
                               120.5,360,8500,4.2,78.3,23.5,2025-05-23\n";

    fn csv(text: &str, plant_id: Option<PlantId>) -> RawPayload {
        RawPayload::new(SourceFormat::Csv, Payload::Text(text.to_string()), plant_id)
    }

    fn json(value: Value, plant_id: Option<PlantId>) -> RawPayload {
        RawPayload::new(SourceFormat::Json, Payload::Structured(value), plant_id)
    }

    #[test]
    fn test_csv_with_injected_plant_id() {
        // ---
        let record = normalize(&csv(EXAMPLE_CSV, Some(7))).unwrap();
        assert_eq!(record.plant_id, 7);
        assert_eq!(record.metrics.yield_kwh, Some(360.0));
        assert_eq!(record.metrics.peak_ac_power_kw, Some(78.3));
        assert_eq!(record.metrics.grid_connection_duration_h, Some(23.5));
        assert_eq!(record.read_date, NaiveDate::from_ymd_opt(2025, 5, 23));
    }

    #[test]
    fn test_json_envelope_is_unwrapped() {
        // ---
        let payload = json(
            json!({"data": {"yield_kwh": 360, "specific_energy_kwh_per_kwp": 4.2}}),
            Some(3),
        );
        let record = normalize(&payload).unwrap();
        assert_eq!(record.plant_id, 3);
        assert_eq!(record.metrics.yield_kwh, Some(360.0));
        assert_eq!(record.metrics.specific_energy_kwh_per_kwp, Some(4.2));
        assert_eq!(record.read_date, None);
    }

    #[test]
    fn test_json_text_array_uses_first_row() {
        // ---
        let text = r#"[{"plant_id": "9", "yield_kwh": "1.5"}, {"plant_id": 9, "yield_kwh": 2}]"#;
        let payload = RawPayload::new(SourceFormat::Json, Payload::Text(text.into()), None);
        let record = normalize(&payload).unwrap();
        assert_eq!(record.plant_id, 9);
        assert_eq!(record.metrics.yield_kwh, Some(1.5));
    }

    #[test]
    fn test_empty_array_is_empty_dataset() {
        // ---
        assert_eq!(
            normalize(&json(json!([]), Some(1))),
            Err(PipelineError::EmptyDataset)
        );
    }

    #[test]
    fn test_header_only_csv_is_empty_dataset() {
        // ---
        let err = normalize(&csv("yield_kwh,read_date\n\n", Some(1))).unwrap_err();
        assert_eq!(err, PipelineError::EmptyDataset);
    }

    #[test]
    fn test_unparsable_input_is_malformed() {
        // ---
        let garbage =
            RawPayload::new(SourceFormat::Json, Payload::Text("{not json".into()), Some(1));
        assert!(matches!(
            normalize(&garbage),
            Err(PipelineError::MalformedInput(_))
        ));

        let blank = csv("   ", Some(1));
        assert!(matches!(normalize(&blank), Err(PipelineError::MalformedInput(_))));

        let scalar = json(json!(42), Some(1));
        assert!(matches!(normalize(&scalar), Err(PipelineError::MalformedInput(_))));
    }

    #[test]
    fn test_row_without_metrics_is_malformed() {
        // ---
        for value in [json!({}), json!({"data": {}}), json!({"plant_id": 3, "yield_kwh": ""})] {
            let err = normalize(&json(value, Some(3))).unwrap_err();
            assert!(matches!(err, PipelineError::MalformedInput(_)), "{err:?}");
        }

        let text = RawPayload::new(SourceFormat::Json, Payload::Text("{}".into()), Some(3));
        assert!(matches!(normalize(&text), Err(PipelineError::MalformedInput(_))));

        let unknown_headers = csv("foo,bar\n1,2\n", Some(3));
        assert!(matches!(
            normalize(&unknown_headers),
            Err(PipelineError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_non_numeric_metric_is_malformed() {
        // ---
        let err = normalize(&json(json!({"yield_kwh": "lots"}), Some(1))).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput(_)));
    }

    #[test]
    fn test_missing_plant_id_is_malformed() {
        // ---
        let err = normalize(&json(json!({"yield_kwh": 1}), None)).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput(_)));
    }

    #[test]
    fn test_source_plant_id_wins() {
        // ---
        let record = normalize(&json(json!({"plant_id": 4, "yield_kwh": 1}), Some(5))).unwrap();
        assert_eq!(record.plant_id, 4);
    }

    #[test]
    fn test_report_export_headers() {
        // ---
        let text = "Inverter Report 2025-05-23\n\
                    Plant ID,Yield (kWh),Specific Energy (kWh/kWp),Peak AC Power (kW),Read Date\n\
                    12,\"1,020.5\",4.1,78,2025-05-23 00:00:00\n";
        let mut payload = csv(text, None);
        payload.header_row = 1;

        // Thousands separators are not numbers
        assert!(matches!(normalize(&payload), Err(PipelineError::MalformedInput(_))));

        let text = text.replace("\"1,020.5\"", "1020.5");
        payload.body = Payload::Text(text);
        let record = normalize(&payload).unwrap();
        assert_eq!(record.plant_id, 12);
        assert_eq!(record.metrics.yield_kwh, Some(1020.5));
        assert_eq!(record.metrics.specific_energy_kwh_per_kwp, Some(4.1));
        assert_eq!(record.metrics.peak_ac_power_kw, Some(78.0));
        assert_eq!(record.read_date, NaiveDate::from_ymd_opt(2025, 5, 23));
    }

    #[test]
    fn test_canonical_field_name() {
        // ---
        assert_eq!(canonical_field_name(" Yield (kWh) "), "yield_kwh");
        assert_eq!(
            canonical_field_name("Specific Energy (kWh/kWp)"),
            "specific_energy_kwh_per_kwp"
        );
        assert_eq!(
            canonical_field_name("grid_connection_duration_h"),
            "grid_connection_duration_h"
        );
    }

    #[test]
    fn test_quoted_cells() {
        // ---
        let cells = split_csv_line(r#"a,"b,c","say ""hi""",  d "#).unwrap();
        assert_eq!(cells, vec!["a", "b,c", "say \"hi\"", "d"]);
        assert!(split_csv_line(r#"a,"open"#).is_err());
    }
}
