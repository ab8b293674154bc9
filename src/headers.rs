//! Column header normalization.
//!
//! Spreadsheets arrive with headers in whatever language and casing the
//! uploader used ("Razão Social", "CLIENTE", "Company"). Headers are folded to
//! a lowercase, accent-free key and matched against a fixed synonym table.

use std::collections::HashMap;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// How many leading rows are scanned when looking for the header row.
pub const HEADER_SCAN_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    CompanyName,
    OwnerName,
    Phone,
    Address,
    Street,
    Number,
    District,
    City,
    State,
    PostalCode,
    TaxId,
    MapLink,
}

/// Synonyms per field, most preferred first.
const SYNONYMS: &[(Field, &[&str])] = &[
    (
        Field::CompanyName,
        &[
            "razao social",
            "cliente",
            "nome fantasia",
            "fantasia",
            "empresa",
            "nome comercial",
            "nome cliente",
            "parceiro",
            "loja",
            "company",
            "company name",
            "business",
            "nome",
        ],
    ),
    (
        Field::OwnerName,
        &[
            "responsavel",
            "nome do proprietario",
            "proprietario",
            "dono",
            "contato principal",
            "socio",
            "owner",
            "owner name",
        ],
    ),
    (
        Field::Phone,
        &[
            "telefone comercial",
            "contato",
            "telefone",
            "celular",
            "whatsapp",
            "tel",
            "fone",
            "phone",
        ],
    ),
    (
        Field::Address,
        &[
            "endereco",
            "endereco comercial",
            "endereco completo",
            "localizacao",
            "endereco cobranca",
            "end",
            "address",
            "link google maps",
        ],
    ),
    (Field::Street, &["rua", "logradouro", "street"]),
    (Field::Number, &["numero", "num", "number"]),
    (Field::District, &["bairro", "distrito", "district"]),
    (Field::City, &["nome da cidade", "cidade", "municipio", "city"]),
    (Field::State, &["estado", "uf", "state"]),
    (Field::PostalCode, &["cep", "codigo postal", "zip", "postal code"]),
    (Field::TaxId, &["cnpj", "taxid", "tax id", "inscricao", "cpf/cnpj"]),
    (
        Field::MapLink,
        &[
            "link",
            "mapa",
            "google maps",
            "url",
            "maps",
            "coordenadas",
            "geolocalizacao",
        ],
    ),
];

/// Casefolds, strips diacritics and collapses whitespace.
pub fn normalize_header(header: &str) -> String {
    let folded = fold_accents(header).to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn fold_accents(value: &str) -> String {
    value.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

impl Field {
    /// Resolves a header to a field and the synonym's preference rank.
    pub fn from_header(header: &str) -> Option<(Self, usize)> {
        let key = normalize_header(header);
        if key.is_empty() {
            return None;
        }
        SYNONYMS.iter().find_map(|(field, names)| {
            names
                .iter()
                .position(|name| *name == key)
                .map(|rank| (*field, rank))
        })
    }
}

/// Column positions per field, ordered by synonym preference.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    columns: HashMap<Field, Vec<usize>>,
}

impl HeaderMap {
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Self {
        let mut ranked: HashMap<Field, Vec<(usize, usize)>> = HashMap::new();
        for (index, header) in headers.iter().enumerate() {
            if let Some((field, rank)) = Field::from_header(header.as_ref()) {
                ranked.entry(field).or_default().push((rank, index));
            }
        }

        let columns = ranked
            .into_iter()
            .map(|(field, mut entries)| {
                entries.sort();
                (field, entries.into_iter().map(|(_, index)| index).collect())
            })
            .collect();
        Self { columns }
    }

    pub fn recognized(&self) -> usize {
        self.columns.values().map(Vec::len).sum()
    }

    pub fn has(&self, field: Field) -> bool {
        self.columns.contains_key(&field)
    }

    /// First non-blank value among the field's columns.
    pub fn value<'a, S: AsRef<str>>(&self, row: &'a [S], field: Field) -> Option<&'a str> {
        self.columns.get(&field)?.iter().find_map(|index| {
            row.get(*index)
                .map(|cell| cell.as_ref().trim())
                .filter(|cell| !cell.is_empty())
        })
    }
}

/// Picks the first row (within the scan window) that names at least one known column.
pub fn locate_header_row<S: AsRef<str>>(rows: &[Vec<S>]) -> usize {
    rows.iter()
        .take(HEADER_SCAN_ROWS)
        .position(|row| HeaderMap::from_headers(row).recognized() > 0)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_case() {
        assert_eq!(normalize_header("  Razão   Social "), "razao social");
        assert_eq!(normalize_header("ENDEREÇO"), "endereco");
        assert_eq!(normalize_header("Município"), "municipio");
    }

    #[test]
    fn resolves_multilingual_synonyms() {
        assert_eq!(
            Field::from_header("Razão Social").map(|(f, _)| f),
            Some(Field::CompanyName)
        );
        assert_eq!(
            Field::from_header("Cliente").map(|(f, _)| f),
            Some(Field::CompanyName)
        );
        assert_eq!(
            Field::from_header("EMPRESA").map(|(f, _)| f),
            Some(Field::CompanyName)
        );
        assert_eq!(Field::from_header("CNPJ").map(|(f, _)| f), Some(Field::TaxId));
        assert_eq!(Field::from_header("Observações"), None);
        assert_eq!(Field::from_header(""), None);
    }

    #[test]
    fn prefers_higher_ranked_synonym_with_value() {
        let headers = ["Empresa", "Razão Social", "Notas"];
        let map = HeaderMap::from_headers(&headers);
        assert_eq!(map.recognized(), 2);

        let row = ["Fantasia Ltda", "Oficial SA", "x"];
        assert_eq!(map.value(&row, Field::CompanyName), Some("Oficial SA"));

        let partial = ["Fantasia Ltda", "  ", "x"];
        assert_eq!(map.value(&partial, Field::CompanyName), Some("Fantasia Ltda"));
        assert_eq!(map.value(&partial, Field::Address), None);
    }

    #[test]
    fn finds_header_below_title_rows() {
        let rows = vec![
            vec!["Relatório de clientes".to_string(), String::new()],
            vec![String::new(), String::new()],
            vec!["Cliente".to_string(), "Endereço".to_string()],
        ];
        assert_eq!(locate_header_row(&rows), 2);

        let unknown = vec![vec!["a".to_string()], vec!["b".to_string()]];
        assert_eq!(locate_header_row(&unknown), 0);
    }
}
