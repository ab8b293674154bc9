//! Public company-registry lookup by 14-digit tax id (CNPJ).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::records::RawRow;

const TAX_ID_PATH: &str = "/api/cnpj/v1";
const TAX_ID_DIGITS: usize = 14;

/// Registry entry as published by the lookup service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    #[serde(rename = "cnpj", default)]
    pub tax_id: String,
    #[serde(rename = "razao_social", default)]
    pub legal_name: Option<String>,
    #[serde(rename = "nome_fantasia", default)]
    pub trade_name: Option<String>,
    #[serde(rename = "logradouro", default)]
    pub street: Option<String>,
    #[serde(rename = "numero", default)]
    pub number: Option<String>,
    #[serde(rename = "complemento", default)]
    pub complement: Option<String>,
    #[serde(rename = "bairro", default)]
    pub district: Option<String>,
    #[serde(rename = "cep", default)]
    pub postal_code: Option<String>,
    #[serde(rename = "municipio", default)]
    pub city: Option<String>,
    #[serde(rename = "uf", default)]
    pub state: Option<String>,
    #[serde(rename = "ddd_telefone_1", default)]
    pub phone: Option<String>,
}

impl RegistryRecord {
    pub fn company_name(&self) -> Option<&str> {
        filled(&self.trade_name).or_else(|| filled(&self.legal_name))
    }

    /// `"street, number - complement, district, city - state"`; `None` without a street.
    pub fn full_address(&self) -> Option<String> {
        let street = filled(&self.street)?;
        let mut address = street.to_string();
        if let Some(number) = filled(&self.number) {
            address.push_str(&format!(", {number}"));
        }
        if let Some(complement) = filled(&self.complement) {
            address.push_str(&format!(" - {complement}"));
        }
        if let Some(district) = filled(&self.district) {
            address.push_str(&format!(", {district}"));
        }
        match (filled(&self.city), self.state_code()) {
            (Some(city), Some(state)) => address.push_str(&format!(", {city} - {state}")),
            (Some(city), None) => address.push_str(&format!(", {city}")),
            (None, Some(state)) => address.push_str(&format!(", {state}")),
            (None, None) => {}
        }
        Some(address)
    }

    pub fn city(&self) -> Option<&str> {
        filled(&self.city)
    }

    pub fn state_code(&self) -> Option<String> {
        filled(&self.state).map(str::to_uppercase)
    }

    /// Registry data replaces the spreadsheet's company, address, phone and
    /// locality fields; anything the registry leaves blank is kept.
    pub fn overlay(&self, row: &mut RawRow) {
        if let Some(name) = self.company_name() {
            row.company_name = name.to_string();
        }
        if let Some(address) = self.full_address() {
            row.address = address;
        }
        if let Some(phone) = filled(&self.phone) {
            row.phone = phone.to_string();
        }
        if let Some(postal_code) = filled(&self.postal_code) {
            row.postal_code = Some(postal_code.to_string());
        }
        if let Some(city) = self.city() {
            row.city = Some(city.to_string());
        }
        if let Some(state) = self.state_code() {
            row.state = Some(state);
        }
    }
}

fn filled(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

/// Digits of a tax id when it has exactly the 14 a company id carries.
pub fn company_tax_id(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (digits.len() == TAX_ID_DIGITS).then_some(digits)
}

/// `None` means "nothing known", including transport failures.
#[async_trait]
pub trait TaxIdLookup: Send + Sync {
    async fn lookup(&self, tax_id: &str) -> Option<RegistryRecord>;
}

pub struct HttpTaxIdLookup {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTaxIdLookup {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        Self::with_base_url(
            &config.tax_id_api_base,
            Duration::from_millis(config.tax_id_timeout_ms),
        )
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}{TAX_ID_PATH}", base_url.trim_end_matches('/')),
        })
    }

    async fn request(&self, digits: &str) -> AppResult<RegistryRecord> {
        let response = self
            .http
            .get(format!("{}/{digits}", self.endpoint))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TaxIdLookup for HttpTaxIdLookup {
    async fn lookup(&self, tax_id: &str) -> Option<RegistryRecord> {
        let Some(digits) = company_tax_id(tax_id) else {
            debug!("tax id lookup skipped: not a 14-digit company id");
            return None;
        };
        match self.request(&digits).await {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(%err, "tax id lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use httptest::matchers::request;
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};
    use serde_json::json;

    use super::*;

    fn lookup(server: &Server) -> HttpTaxIdLookup {
        HttpTaxIdLookup::with_base_url(&server.url_str(""), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn fetches_registry_record_by_digits() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::path("/api/cnpj/v1/12345678000190")).respond_with(
                json_encoded(json!({
                    "cnpj": "12345678000190",
                    "razao_social": "AUTO SOM CENTRO LTDA",
                    "nome_fantasia": "",
                    "logradouro": "RUA BARAO",
                    "numero": "100",
                    "complemento": null,
                    "bairro": "CENTRO",
                    "cep": "60115170",
                    "municipio": "FORTALEZA",
                    "uf": "ce",
                    "ddd_telefone_1": "8532220000",
                    "capital_social": 10000
                })),
            ),
        );

        let record = lookup(&server)
            .lookup("12.345.678/0001-90")
            .await
            .expect("registry record");
        assert_eq!(record.company_name(), Some("AUTO SOM CENTRO LTDA"));
        assert_eq!(
            record.full_address().as_deref(),
            Some("RUA BARAO, 100, CENTRO, FORTALEZA - CE")
        );
        assert_eq!(record.state_code().as_deref(), Some("CE"));
    }

    #[tokio::test]
    async fn failures_and_short_ids_are_none() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::path("/api/cnpj/v1/00000000000000"))
                .respond_with(status_code(404)),
        );
        let client = lookup(&server);
        assert!(client.lookup("00.000.000/0000-00").await.is_none());
        assert!(client.lookup("123.456.789-09").await.is_none());
    }

    #[test]
    fn overlay_keeps_what_the_registry_lacks() {
        let record = RegistryRecord {
            trade_name: Some("Som Centro".into()),
            city: Some("Fortaleza".into()),
            state: Some("ce".into()),
            ..RegistryRecord::default()
        };
        let mut row = RawRow {
            company_name: "Planilha".into(),
            address: "Rua A, 10".into(),
            phone: "85 3000-0000".into(),
            ..RawRow::default()
        };
        record.overlay(&mut row);
        assert_eq!(row.company_name, "Som Centro");
        assert_eq!(row.address, "Rua A, 10");
        assert_eq!(row.phone, "85 3000-0000");
        assert_eq!(row.state.as_deref(), Some("CE"));
        assert_eq!(row.city.as_deref(), Some("Fortaleza"));
    }
}
