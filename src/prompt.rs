use std::fmt::Write as _;

use crate::records::{RawRow, OTHER_CATEGORY};

/// Builds the locate-and-classify instruction for one row.
///
/// With a tax id the search is anchored on the registered business; otherwise
/// on the address text. The reply contract is a single JSON object.
pub fn build_prompt(row: &RawRow, vocabulary: &[String]) -> String {
    let company = row.display_company();
    let address = row.address.trim();
    let mut prompt = String::from("Act as a logistics and business data analyst.\n\nTASK:\n");

    match row.tax_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        Some(tax_id) => {
            let _ = writeln!(
                prompt,
                "1. Search Google Maps for the business registered under tax id {tax_id} (\"{company}\")."
            );
            if !address.is_empty() {
                let _ = writeln!(prompt, "   Its registered address is \"{address}\".");
            }
        }
        None => {
            let _ = writeln!(
                prompt,
                "1. Search Google Maps for the business \"{company}\" located EXACTLY at \"{address}\"."
            );
        }
    }
    prompt.push_str("2. If it is not found at that exact spot, look in the immediate surroundings.\n");
    prompt.push_str(
        "3. Find the exact location (latitude/longitude), the official formatted address, the official phone and the website.\n",
    );
    let _ = writeln!(
        prompt,
        "4. Classify the business into one of: {}.",
        category_options(vocabulary)
    );

    let city = row.city.as_deref().map(str::trim).filter(|c| !c.is_empty());
    if let Some(city) = city {
        let _ = write!(prompt, "\nLOCATION HINT: city {city}");
        if let Some(state) = row.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let _ = write!(prompt, ", state {state}");
        }
        prompt.push('\n');
    }

    prompt.push_str(
        r#"
Return ONLY one valid JSON object with what you found:
{
  "category": "chosen category",
  "region": "North" | "Northeast" | "Central-West" | "Southeast" | "South" | "Undefined",
  "state": "two-letter state code",
  "city": "city name",
  "lat": number,
  "lng": number,
  "cleanAddress": "official full address",
  "phone": "phone or null",
  "website": "website or null"
}
"#,
    );
    prompt
}

fn category_options(vocabulary: &[String]) -> String {
    vocabulary
        .iter()
        .map(|category| category.trim())
        .filter(|category| !category.is_empty() && *category != OTHER_CATEGORY)
        .chain(std::iter::once(OTHER_CATEGORY))
        .map(|category| format!("\"{category}\""))
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocabulary() -> Vec<String> {
        vec!["Car Audio".into(), "Workshop".into(), "Other".into()]
    }

    #[test]
    fn anchors_on_address_without_tax_id() {
        let row = RawRow {
            company_name: "Som & Cia".into(),
            address: "Rua A, 10".into(),
            city: Some("Recife".into()),
            state: Some("PE".into()),
            ..RawRow::default()
        };
        let prompt = build_prompt(&row, &vocabulary());
        assert!(prompt.contains("\"Som & Cia\" located EXACTLY at \"Rua A, 10\""));
        assert!(prompt.contains("\"Car Audio\" | \"Workshop\" | \"Other\"."));
        assert_eq!(prompt.matches("\"Other\"").count(), 1);
        assert!(prompt.contains("city Recife, state PE"));
        assert!(prompt.contains("\"cleanAddress\""));
    }

    #[test]
    fn prefers_tax_id_context() {
        let row = RawRow {
            company_name: "Som & Cia".into(),
            address: "Rua A, 10".into(),
            tax_id: Some("12.345.678/0001-90".into()),
            ..RawRow::default()
        };
        let prompt = build_prompt(&row, &[]);
        assert!(prompt.contains("tax id 12.345.678/0001-90"));
        assert!(!prompt.contains("EXACTLY"));
        assert!(prompt.contains("one of: \"Other\"."));
    }
}
