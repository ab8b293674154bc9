use std::cmp::Ordering;
use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use chrono::NaiveTime;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};
use crate::headers::{locate_header_row, Field, HeaderMap, HEADER_SCAN_ROWS};
use crate::hyperlink::{parse_coordinate_pair, resolve_cell};
use crate::records::RawRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpreadsheetKind {
    Csv,
    Excel,
}

impl SpreadsheetKind {
    pub fn detect(file_name: &str) -> AppResult<Self> {
        let extension = Path::new(file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => Ok(SpreadsheetKind::Csv),
            "xls" | "xlsx" | "xlsm" | "ods" => Ok(SpreadsheetKind::Excel),
            _ => Err(AppError::Format(file_name.to_string())),
        }
    }
}

/// A spreadsheet read fully into memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| AppError::Format(path.display().to_string()))?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Self { name, bytes })
    }

    pub fn kind(&self) -> AppResult<SpreadsheetKind> {
        SpreadsheetKind::detect(&self.name)
    }
}

pub async fn ingest(file: &UploadedFile) -> AppResult<Vec<RawRow>> {
    match file.kind()? {
        SpreadsheetKind::Csv => ingest_csv(file).await,
        SpreadsheetKind::Excel => ingest_excel(file).await,
    }
}

pub async fn ingest_csv(file: &UploadedFile) -> AppResult<Vec<RawRow>> {
    expect_kind(file, SpreadsheetKind::Csv)?;
    let grid = read_csv_grid(&file.bytes)?;
    finish(file, rows_from_grid(&grid))
}

pub async fn ingest_excel(file: &UploadedFile) -> AppResult<Vec<RawRow>> {
    expect_kind(file, SpreadsheetKind::Excel)?;
    let grid = read_excel_grid(&file.bytes)?;
    finish(file, rows_from_grid(&grid))
}

fn expect_kind(file: &UploadedFile, expected: SpreadsheetKind) -> AppResult<()> {
    if file.kind()? == expected {
        Ok(())
    } else {
        Err(AppError::Format(file.name.clone()))
    }
}

fn finish(file: &UploadedFile, rows: Vec<RawRow>) -> AppResult<Vec<RawRow>> {
    if rows.is_empty() {
        return Err(AppError::EmptyFile(file.name.clone()));
    }
    info!(file = %file.name, rows = rows.len(), "spreadsheet ingested");
    Ok(rows)
}

fn read_csv_grid(bytes: &[u8]) -> AppResult<Vec<Vec<String>>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(sniff_delimiter(bytes))
        .from_reader(bytes);

    let mut grid = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        let cells = record
            .iter()
            .map(|cell| String::from_utf8_lossy(cell).trim().to_string())
            .collect();
        grid.push(cells);
    }
    Ok(grid)
}

/// Spreadsheet exports in pt-BR locales default to `;`.
///
/// Each of the leading non-empty lines votes for the separator it uses most,
/// so a title row without separators does not decide the outcome.
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let (mut semicolon_votes, mut comma_votes) = (0_usize, 0_usize);
    let (mut semicolons, mut commas) = (0_usize, 0_usize);
    for line in bytes
        .split(|b| *b == b'\n')
        .filter(|line| line.iter().any(|b| !b.is_ascii_whitespace()))
        .take(HEADER_SCAN_ROWS)
    {
        let line_semicolons = line.iter().filter(|b| **b == b';').count();
        let line_commas = line.iter().filter(|b| **b == b',').count();
        semicolons += line_semicolons;
        commas += line_commas;
        match line_semicolons.cmp(&line_commas) {
            Ordering::Greater => semicolon_votes += 1,
            Ordering::Less => comma_votes += 1,
            Ordering::Equal => {}
        }
    }
    if semicolon_votes > comma_votes || (semicolon_votes == comma_votes && semicolons > commas) {
        b';'
    } else {
        b','
    }
}

fn read_excel_grid(bytes: &[u8]) -> AppResult<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let Some(sheet) = workbook.sheet_names().first().cloned() else {
        return Ok(Vec::new());
    };
    let values = workbook.worksheet_range(&sheet)?;
    let formulas = match workbook.worksheet_formula(&sheet) {
        Ok(range) => Some(range),
        Err(err) => {
            debug!(?err, sheet, "workbook formulas unavailable");
            None
        }
    };
    Ok(excel_grid(&values, formulas.as_ref()))
}

fn excel_grid(values: &Range<Data>, formulas: Option<&Range<String>>) -> Vec<Vec<String>> {
    let (start_row, start_col) = values.start().unwrap_or((0, 0));
    values
        .rows()
        .enumerate()
        .map(|(row_offset, row)| {
            row.iter()
                .enumerate()
                .map(|(col_offset, cell)| {
                    let position = (start_row + row_offset as u32, start_col + col_offset as u32);
                    hyperlink_formula(formulas, position).unwrap_or_else(|| cell_to_string(cell))
                })
                .collect()
        })
        .collect()
}

/// Cached values drop the link target of `HYPERLINK` cells; prefer the formula
/// text when it carries a literal link. Formulas built from cell references
/// keep the cached value.
fn hyperlink_formula(formulas: Option<&Range<String>>, position: (u32, u32)) -> Option<String> {
    let formula = formulas?.get_value(position)?.trim();
    let body = formula.strip_prefix('=').unwrap_or(formula);
    if !body.to_ascii_uppercase().starts_with("HYPERLINK") {
        return None;
    }
    let formula = format!("={body}");
    resolve_cell(&formula).link.is_some().then_some(formula)
}

pub(crate) fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(value) => value.trim().to_string(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        Data::Float(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(value) => match value.as_datetime() {
            Some(stamp) if stamp.time() == NaiveTime::MIN => stamp.format("%Y-%m-%d").to_string(),
            Some(stamp) => stamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => value.as_f64().to_string(),
        },
        Data::DateTimeIso(value) | Data::DurationIso(value) => value.clone(),
        _ => String::new(),
    }
}

/// Maps a raw cell grid (header row somewhere near the top) to normalized rows.
pub fn rows_from_grid(grid: &[Vec<String>]) -> Vec<RawRow> {
    if grid.is_empty() {
        return Vec::new();
    }
    let header_index = locate_header_row(grid);
    let headers = HeaderMap::from_headers(&grid[header_index]);
    if !headers.has(Field::CompanyName) && !headers.has(Field::Address) {
        debug!(
            header_index,
            "no company or address column recognized; rows will rely on remaining columns"
        );
    }

    let mut rows = Vec::new();
    let mut skipped = 0_usize;
    for cells in &grid[header_index + 1..] {
        match map_row(&headers, cells) {
            Some(row) => rows.push(row),
            None => skipped += 1,
        }
    }
    debug!(accepted = rows.len(), skipped, "spreadsheet rows mapped");
    rows
}

fn map_row(headers: &HeaderMap, cells: &[String]) -> Option<RawRow> {
    let text = |field: Field| headers.value(cells, field).map(str::to_string);

    let resolved = resolve_cell(headers.value(cells, Field::Address).unwrap_or_default());
    let postal_code = text(Field::PostalCode);
    let city = text(Field::City);
    let state = text(Field::State);

    let mut address = resolved.address.clone();
    if address.is_empty() {
        address = [
            text(Field::Street),
            text(Field::Number),
            text(Field::District),
            city.clone(),
            state.clone(),
            postal_code.clone(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");
    } else if let Some(postal) = &postal_code {
        if !address.to_lowercase().contains(&postal.to_lowercase()) {
            address = format!("{address}, {postal}");
        }
    }

    let mut map_link = resolved.link.clone();
    let mut coordinates = resolved.lat.zip(resolved.lng);
    if let Some(explicit) = headers.value(cells, Field::MapLink) {
        if let Some(pair) = parse_coordinate_pair(explicit) {
            coordinates = Some(pair);
        } else {
            let link_data = resolve_cell(explicit);
            if link_data.link.is_some() {
                map_link = link_data.link.clone();
            }
            if let Some(pair) = link_data.lat.zip(link_data.lng) {
                coordinates = Some(pair);
            }
        }
    }

    let row = RawRow {
        company_name: text(Field::CompanyName).unwrap_or_default(),
        owner_name: text(Field::OwnerName).unwrap_or_default(),
        phone: text(Field::Phone).unwrap_or_default(),
        address,
        map_link,
        explicit_lat: coordinates.map(|(lat, _)| lat),
        explicit_lng: coordinates.map(|(_, lng)| lng),
        tax_id: text(Field::TaxId),
        city,
        state,
        postal_code,
    };

    if row.is_blank() {
        None
    } else {
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use calamine::{ExcelDateTime, ExcelDateTimeType};
    use tempfile::tempdir;

    use super::*;

    const SAMPLE_CSV: &str = "Relatório de clientes;;;;\n\
Razão Social;Responsável;Telefone;Endereço;CEP;Link\n\
Auto Som Centro;Maria;85 3222-0000;=HYPERLINK(\"https://www.google.com/maps/@-3.73,-38.52,17z\",\"Rua Barão, 100, Fortaleza - CE\");60115-170;\n\
Pneus Sul;João;51 3000-1111;Av. Ipiranga, 500;;https://www.google.com/maps?q=-30.03,-51.22\n\
;;;;;\n\
;;;;;\n";

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    #[tokio::test]
    async fn parses_semicolon_csv_with_hyperlinks() {
        let file = UploadedFile::new("clientes.csv", SAMPLE_CSV.as_bytes().to_vec());
        let rows = ingest(&file).await.unwrap();
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.company_name, "Auto Som Centro");
        assert_eq!(first.owner_name, "Maria");
        assert_eq!(first.address, "Rua Barão, 100, Fortaleza - CE, 60115-170");
        assert_eq!(first.explicit_lat, Some(-3.73));
        assert_eq!(first.explicit_lng, Some(-38.52));
        assert!(first.map_link.as_deref().unwrap().contains("google.com/maps"));
        assert_eq!(first.postal_code.as_deref(), Some("60115-170"));

        let second = &rows[1];
        assert_eq!(second.address, "Av. Ipiranga, 500");
        assert_eq!(second.explicit_lat, Some(-30.03));
        assert_eq!(
            second.map_link.as_deref(),
            Some("https://www.google.com/maps?q=-30.03,-51.22")
        );
    }

    #[tokio::test]
    async fn explicit_link_column_overrides_address_link() {
        let csv = "Cliente,Endereço,Coordenadas\n\
Loja A,\"=HYPERLINK(\"\"https://www.google.com/maps/@-1.0,-2.0,10z\"\",\"\"Rua X, 1\"\")\",\"-23.5, -46.6\"\n";
        let file = UploadedFile::new("clientes.csv", csv.as_bytes().to_vec());
        let rows = ingest_csv(&file).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, "Rua X, 1");
        assert_eq!(rows[0].explicit_lat, Some(-23.5));
        assert_eq!(rows[0].explicit_lng, Some(-46.6));
    }

    #[tokio::test]
    async fn title_row_does_not_decide_the_delimiter() {
        let csv = "Relatório de clientes\nRazão Social;Endereço\nAcme;Rua A, 10\nBeta;Rua B, 20, Centro\n";
        let file = UploadedFile::new("clientes.csv", csv.as_bytes().to_vec());
        let rows = ingest_csv(&file).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].company_name, "Acme");
        assert_eq!(rows[0].address, "Rua A, 10");
        assert_eq!(rows[1].address, "Rua B, 20, Centro");

        assert_eq!(sniff_delimiter(b"Cliente,Endereco\nLoja,\"Rua X; 1\"\n"), b',');
    }

    #[tokio::test]
    async fn reingesting_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("carteira.csv");
        std::fs::write(&path, SAMPLE_CSV).unwrap();

        let first = ingest(&UploadedFile::from_path(&path).await.unwrap())
            .await
            .unwrap();
        let second = ingest(&UploadedFile::from_path(&path).await.unwrap())
            .await
            .unwrap();
        assert_eq!(first, second);
        let prints: Vec<_> = first.iter().map(RawRow::fingerprint).collect();
        let again: Vec<_> = second.iter().map(RawRow::fingerprint).collect();
        assert_eq!(prints, again);
    }

    #[tokio::test]
    async fn rejects_unknown_extensions() {
        let file = UploadedFile::new("clientes.pdf", b"%PDF".to_vec());
        assert!(matches!(ingest(&file).await, Err(AppError::Format(_))));

        let mislabeled = UploadedFile::new("clientes.xlsx", SAMPLE_CSV.as_bytes().to_vec());
        assert!(matches!(
            ingest_csv(&mislabeled).await,
            Err(AppError::Format(_))
        ));
    }

    #[tokio::test]
    async fn empty_sheet_is_an_error() {
        let file = UploadedFile::new("vazio.csv", b"Cliente;Endereco\n;\n;\n".to_vec());
        assert!(matches!(ingest(&file).await, Err(AppError::EmptyFile(_))));
    }

    #[tokio::test]
    async fn garbage_workbook_surfaces_excel_error() {
        let file = UploadedFile::new("clientes.xls", b"not a workbook".to_vec());
        assert!(matches!(ingest_excel(&file).await, Err(AppError::Excel(_))));
    }

    #[test]
    fn composes_address_from_parts() {
        let rows = rows_from_grid(&grid(&[
            &["Empresa", "Rua", "Número", "Bairro", "Cidade", "UF", "CNPJ"],
            &["Vidros Norte", "Rua B", "22", "Centro", "Belém", "PA", ""],
            &["", "", "", "", "", "", "12.345.678/0001-90"],
            &["", "", "", "", "", "", ""],
        ]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].address, "Rua B, 22, Centro, Belém, PA");
        assert_eq!(rows[0].state.as_deref(), Some("PA"));
        assert_eq!(rows[1].tax_id.as_deref(), Some("12.345.678/0001-90"));
        assert!(rows[1].address.is_empty());
    }

    #[test]
    fn excel_cells_render_as_text() {
        assert_eq!(cell_to_string(&Data::Float(60115170.0)), "60115170");
        assert_eq!(cell_to_string(&Data::Float(-3.5)), "-3.5");
        assert_eq!(cell_to_string(&Data::String("  Loja ".into())), "Loja");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn excel_dates_render_as_iso_text() {
        let date = ExcelDateTime::new(45_000.0, ExcelDateTimeType::DateTime, false);
        assert_eq!(cell_to_string(&Data::DateTime(date)), "2023-03-15");
    }

    #[test]
    fn referenced_hyperlink_formulas_keep_cached_values() {
        let mut values: Range<Data> = Range::new((0, 0), (1, 1));
        values.set_value((0, 0), Data::String("Cliente".into()));
        values.set_value((0, 1), Data::String("Endereço".into()));
        values.set_value((1, 0), Data::String("Loja Azul".into()));
        values.set_value((1, 1), Data::String("Rua Azul, 9".into()));

        let mut formulas: Range<String> = Range::new((0, 0), (1, 1));
        formulas.set_value((1, 1), "HYPERLINK(Z2,Y2)".into());

        let rows = rows_from_grid(&excel_grid(&values, Some(&formulas)));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, "Rua Azul, 9");
        assert!(rows[0].map_link.is_none());

        formulas.set_value((1, 1), "HYPERLINK(\"https://maps.example/\"&A2,\"Rua Azul, 9\")".into());
        let rows = rows_from_grid(&excel_grid(&values, Some(&formulas)));
        assert_eq!(rows[0].address, "Rua Azul, 9");
    }

    #[test]
    fn excel_hyperlink_formulas_replace_cached_labels() {
        let mut values: Range<Data> = Range::new((0, 0), (1, 1));
        values.set_value((0, 0), Data::String("Cliente".into()));
        values.set_value((0, 1), Data::String("Endereço".into()));
        values.set_value((1, 0), Data::String("Loja Azul".into()));
        values.set_value((1, 1), Data::String("Rua Azul, 9".into()));

        let mut formulas: Range<String> = Range::new((0, 0), (1, 1));
        formulas.set_value(
            (1, 1),
            "HYPERLINK(\"https://www.google.com/maps/@-8.05,-34.9,15z\",\"Rua Azul, 9\")".into(),
        );

        let grid = excel_grid(&values, Some(&formulas));
        let rows = rows_from_grid(&grid);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address, "Rua Azul, 9");
        assert_eq!(rows[0].explicit_lat, Some(-8.05));
        assert!(rows[0].map_link.is_some());
    }
}
