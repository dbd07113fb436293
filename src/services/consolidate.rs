//! Consolidation and cleaning of the per-year source CSVs.
//!
//! The published files vary in encoding (UTF-8 with BOM vs Latin-1),
//! delimiter (`,` vs `;`) and header accents, and carry Brazilian monetary
//! formatting (`R$ 1.234,56`). This stage normalizes all of that into
//! [`TransactionRecord`]s and fails fast when the required columns are
//! missing — a wrong aggregate is worse than no aggregate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::services::geocoder::{strip_accents, title_case};
use crate::types::{GeocodedRecord, Precision, TransactionRecord};

/// Read, clean and concatenate all annual CSVs.
///
/// Files that cannot be read at all are logged and skipped; zero readable
/// files is fatal. A readable file with a short schema is fatal — the
/// pipeline never aggregates silently wrong columns.
pub fn consolidate(paths: &[PathBuf]) -> Result<Vec<TransactionRecord>> {
    if paths.is_empty() {
        return Err(PipelineError::NoInput(
            "no annual CSV files supplied — run the download stage first".into(),
        ));
    }

    let mut records = Vec::new();
    let mut any_loaded = false;

    for path in paths {
        let text = match read_with_encoding_fallback(path) {
            Ok(text) => text,
            Err(e) => {
                error!(file = %path.display(), error = %e, "failed to read annual CSV");
                continue;
            }
        };
        let parsed = parse_annual_csv(&text, path)?;
        info!(file = %path.display(), rows = parsed.len(), "annual CSV consolidated");
        any_loaded = true;
        records.extend(parsed);
    }

    if !any_loaded {
        return Err(PipelineError::NoInput(
            "none of the annual CSVs could be read".into(),
        ));
    }

    info!(total = records.len(), "consolidation finished");
    Ok(records)
}

/// Decode UTF-8 (stripping a BOM) and fall back to Latin-1. Latin-1 maps
/// every byte to the code point of the same value, so the fallback never
/// fails — it can only mis-render genuinely broken input.
fn read_with_encoding_fallback(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    };
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

/// Detect the delimiter from the header line: whichever of `;` and `,`
/// occurs more often wins.
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Column roles detected by fragment match on accent-stripped uppercase
/// headers, mirroring how the source schema drifts between years.
struct ColumnMap {
    neighborhood: usize,
    street: usize,
    value: usize,
    assessed: Option<usize>,
    count: usize,
    year: usize,
    month: Option<usize>,
    lot_area: Option<usize>,
    built_area: Option<usize>,
    private_area: Option<usize>,
    property_type: Option<usize>,
    legal_nature: Option<usize>,
}

fn detect_columns(headers: &[String], path: &Path) -> Result<ColumnMap> {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| strip_accents(h).trim().to_uppercase())
        .collect();

    let find = |fragments: &[&str]| -> Option<usize> {
        normalized
            .iter()
            .position(|h| fragments.iter().all(|f| h.contains(f)))
    };

    let neighborhood = find(&["BAIRRO"]);
    let street = find(&["NOME DO LOGRADOURO"]).or_else(|| find(&["LOGRADOURO"]));
    let value = find(&["VALOR DA TRANSA"]).or_else(|| find(&["VALOR DE AVALIA"]));
    let count = find(&["QUANTIDADE"]);
    let year = find(&["ANO", "PAGAMENTO"]).or_else(|| find(&["ANO"]));

    let mut missing = Vec::new();
    if neighborhood.is_none() {
        missing.push("BAIRRO".to_string());
    }
    if street.is_none() {
        missing.push("NOME DO LOGRADOURO".to_string());
    }
    if value.is_none() {
        missing.push("VALOR DA TRANSAÇÃO".to_string());
    }
    if count.is_none() {
        missing.push("QUANTIDADE DE TRANSAÇÕES".to_string());
    }
    if year.is_none() {
        missing.push("ANO DO PAGAMENTO".to_string());
    }
    if !missing.is_empty() {
        error!(file = %path.display(), ?missing, "annual CSV schema is invalid");
        return Err(PipelineError::InvalidSchema {
            missing,
            found: headers.to_vec(),
        });
    }

    Ok(ColumnMap {
        neighborhood: neighborhood.unwrap_or_default(),
        street: street.unwrap_or_default(),
        value: value.unwrap_or_default(),
        assessed: find(&["VALOR DE AVALIA"]),
        count: count.unwrap_or_default(),
        year: year.unwrap_or_default(),
        month: find(&["MES", "PAGAMENTO"]).or_else(|| find(&["MES"])),
        lot_area: find(&["AREA", "TERRENO"]),
        built_area: find(&["AREA", "CONSTRU"]),
        private_area: find(&["AREA", "PRIVATIVA"]),
        property_type: find(&["TIPO"]),
        legal_nature: find(&["NATUREZA"]),
    })
}

fn parse_annual_csv(text: &str, path: &Path) -> Result<Vec<TransactionRecord>> {
    let delimiter = sniff_delimiter(text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let columns = detect_columns(&headers, path)?;

    let mut records = Vec::new();
    let mut dropped = 0usize;

    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable row");
                dropped += 1;
                continue;
            }
        };

        let get = |i: usize| row.get(i).unwrap_or("").trim();
        let get_opt = |i: Option<usize>| i.map(|i| get(i)).unwrap_or("");

        let year = match parse_numeric(get(columns.year)) {
            Some(y) if (1900.0..2200.0).contains(&y) => y as i32,
            _ => {
                dropped += 1;
                continue; // a row without a year cannot be placed in time
            }
        };
        let month = columns
            .month
            .and_then(|i| parse_numeric(get(i)))
            .map(|m| m as u32)
            .filter(|m| (1..=12).contains(m));

        let neighborhood = title_case(get(columns.neighborhood));
        let street = title_case(get(columns.street));
        if neighborhood.is_empty() && street.is_empty() {
            dropped += 1;
            continue;
        }

        let transaction_count = parse_numeric(get(columns.count))
            .filter(|c| *c >= 0.0)
            .map(|c| c as u32)
            .unwrap_or(0);

        records.push(TransactionRecord {
            neighborhood,
            street,
            lot_area: columns.lot_area.and_then(|i| parse_numeric(get(i))),
            built_area: columns.built_area.and_then(|i| parse_numeric(get(i))),
            private_area: columns.private_area.and_then(|i| parse_numeric(get(i))),
            assessed_value: columns.assessed.and_then(|i| parse_numeric(get(i))),
            transaction_value: parse_numeric(get(columns.value)),
            transaction_count,
            property_type: get_opt(columns.property_type).to_string(),
            legal_nature: get_opt(columns.legal_nature).to_string(),
            year,
            month,
        });
    }

    if dropped > 0 {
        warn!(file = %path.display(), dropped, "rows dropped during consolidation");
    }
    Ok(records)
}

/// Strip Brazilian monetary formatting and coerce to a number. Failures are
/// `None` — never a sentinel zero.
fn parse_numeric(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .replace("R$", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Write the consolidated table; the geocode stage reads it back.
pub fn write_consolidated(records: &[TransactionRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!(file = %path.display(), rows = records.len(), "consolidated table written");
    Ok(())
}

pub fn read_consolidated(path: &Path) -> Result<Vec<TransactionRecord>> {
    if !path.exists() {
        return Err(PipelineError::InputNotFound(
            path.to_path_buf(),
            "run the consolidate stage first".into(),
        ));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// Flat row for the geocoded table. The nested [`GeocodedRecord`] cannot be
/// serialized by the CSV writer directly, so coordinates ride alongside the
/// transaction fields.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct GeocodedRow {
    neighborhood: String,
    street: String,
    lot_area: Option<f64>,
    built_area: Option<f64>,
    private_area: Option<f64>,
    assessed_value: Option<f64>,
    transaction_value: Option<f64>,
    transaction_count: u32,
    property_type: String,
    legal_nature: String,
    year: i32,
    month: Option<u32>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    precision: Option<Precision>,
}

impl From<GeocodedRecord> for GeocodedRow {
    fn from(geocoded: GeocodedRecord) -> Self {
        let r = geocoded.record;
        Self {
            neighborhood: r.neighborhood,
            street: r.street,
            lot_area: r.lot_area,
            built_area: r.built_area,
            private_area: r.private_area,
            assessed_value: r.assessed_value,
            transaction_value: r.transaction_value,
            transaction_count: r.transaction_count,
            property_type: r.property_type,
            legal_nature: r.legal_nature,
            year: r.year,
            month: r.month,
            latitude: geocoded.latitude,
            longitude: geocoded.longitude,
            precision: geocoded.precision,
        }
    }
}

impl From<GeocodedRow> for GeocodedRecord {
    fn from(row: GeocodedRow) -> Self {
        Self {
            record: TransactionRecord {
                neighborhood: row.neighborhood,
                street: row.street,
                lot_area: row.lot_area,
                built_area: row.built_area,
                private_area: row.private_area,
                assessed_value: row.assessed_value,
                transaction_value: row.transaction_value,
                transaction_count: row.transaction_count,
                property_type: row.property_type,
                legal_nature: row.legal_nature,
                year: row.year,
                month: row.month,
            },
            latitude: row.latitude,
            longitude: row.longitude,
            precision: row.precision,
        }
    }
}

/// Write the geocoded table; the insights stage reads it back.
pub fn write_geocoded(records: Vec<GeocodedRecord>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    let mut rows = 0usize;
    for record in records {
        writer.serialize(GeocodedRow::from(record))?;
        rows += 1;
    }
    writer.flush()?;
    info!(file = %path.display(), rows, "geocoded table written");
    Ok(())
}

pub fn read_geocoded(path: &Path) -> Result<Vec<GeocodedRecord>> {
    if !path.exists() {
        return Err(PipelineError::InputNotFound(
            path.to_path_buf(),
            "run the geocode stage first".into(),
        ));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize::<GeocodedRow>() {
        records.push(GeocodedRecord::from(row?));
    }
    Ok(records)
}

/// Quick distribution summary used by the CLI after consolidation.
pub fn neighborhood_counts(records: &[TransactionRecord]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for record in records {
        *counts.entry(record.neighborhood.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
BAIRRO;NOME DO LOGRADOURO;VALOR DA TRANSAÇÃO;QUANTIDADE DE TRANSAÇÕES;ANO DO PAGAMENTO DO ITBI;MÊS DO PAGAMENTO
icaraí;rua gavião peixoto;R$ 1.234,56;3;2023;5
CENTRO;av. amaral peixoto;2.000.000,00;10;2023;6
Centro;Rua X;não informado;2;2023;7
";

    #[test]
    fn monetary_strings_are_cleaned() {
        assert_eq!(parse_numeric("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_numeric("2.000.000,00"), Some(2_000_000.0));
        assert_eq!(parse_numeric("850000"), Some(850_000.0));
        assert_eq!(parse_numeric("não informado"), None);
        assert_eq!(parse_numeric(""), None);
    }

    #[test]
    fn sample_rows_parse_with_title_case_and_coerced_values() {
        let records = parse_annual_csv(SAMPLE, Path::new("sample.csv")).unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].neighborhood, "Icaraí");
        assert_eq!(records[0].street, "Rua Gavião Peixoto");
        assert_eq!(records[0].transaction_value, Some(1234.56));
        assert_eq!(records[0].transaction_count, 3);
        assert_eq!(records[0].year, 2023);
        assert_eq!(records[0].month, Some(5));

        // Unparseable value stays absent instead of becoming zero.
        assert_eq!(records[2].transaction_value, None);
        assert_eq!(records[2].transaction_count, 2);
    }

    #[test]
    fn comma_delimited_input_is_sniffed() {
        let text = "\
BAIRRO,NOME DO LOGRADOURO,VALOR DA TRANSAÇÃO,QUANTIDADE,ANO
Icaraí,Rua A,100000,2,2024
";
        let records = parse_annual_csv(text, Path::new("sample.csv")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].transaction_value, Some(100_000.0));
        assert_eq!(records[0].month, None);
    }

    #[test]
    fn missing_required_columns_fail_fast() {
        let text = "BAIRRO;VALOR DA TRANSAÇÃO\nIcaraí;100\n";
        let err = parse_annual_csv(text, Path::new("bad.csv")).unwrap_err();
        match err {
            PipelineError::InvalidSchema { missing, .. } => {
                assert!(missing.iter().any(|m| m.contains("LOGRADOURO")));
                assert!(missing.iter().any(|m| m.contains("QUANTIDADE")));
                assert!(missing.iter().any(|m| m.contains("ANO")));
            }
            other => panic!("expected InvalidSchema, got {other:?}"),
        }
    }

    #[test]
    fn accented_headers_match_after_stripping() {
        let text = "\
BAIRRO;NOME DO LOGRADOURO;VALOR DA TRANSACAO;QUANTIDADE;ANO;ÁREA DO TERRENO
Icaraí;Rua A;100000;2;2024;250,5
";
        let records = parse_annual_csv(text, Path::new("sample.csv")).unwrap();
        assert_eq!(records[0].lot_area, Some(250.5));
    }

    #[test]
    fn consolidated_table_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("consolidado.csv");
        let records = parse_annual_csv(SAMPLE, Path::new("sample.csv")).unwrap();

        write_consolidated(&records, &path).unwrap();
        let reread = read_consolidated(&path).unwrap();
        assert_eq!(records, reread);
    }

    #[test]
    fn geocoded_table_round_trips_with_unresolved_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("consolidado_geo.csv");
        let records = parse_annual_csv(SAMPLE, Path::new("sample.csv")).unwrap();

        let geocoded = vec![
            GeocodedRecord {
                record: records[0].clone(),
                latitude: Some(-22.9043),
                longitude: Some(-43.1199),
                precision: Some(Precision::Address),
            },
            GeocodedRecord::unresolved(records[1].clone()),
        ];

        write_geocoded(geocoded.clone(), &path).unwrap();
        let reread = read_geocoded(&path).unwrap();
        assert_eq!(geocoded, reread);
    }
}
