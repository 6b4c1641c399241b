//! Quality alerts over AI extraction results.
//!
//! Alerts are informational only. They are attached to responses and dashboard
//! aggregations and never block processing.

mod summary;

pub use summary::AuditSummary;

use serde_json::{Map, Value};

pub const ALERT_EMPTY_RESPONSE: &str = "Resposta da IA vazia";
pub const ALERT_TEXT_HAS_ND: &str = "Contém campos não encontrados (ND)";
pub const ALERT_TEXT_TOO_SHORT: &str = "Resposta suspeitosamente curta";
pub const ALERT_LOW_QUALITY: &str = "IA detectou imagem de baixa qualidade/ilegível";
pub const ALERT_UNCERTAIN: &str = "IA expressou incerteza sobre os dados extraídos";

const MIN_TEXT_CHARS: usize = 10;
const NOT_FOUND_MARKERS: [&str; 3] = ["ND", "N/D", "Não encontrado"];
const ZERO_STRINGS: [&str; 3] = ["0", "0,00", "0.00"];
const MONEY_KEY_FRAGMENTS: [&str; 2] = ["valor", "total"];
const LOW_QUALITY_PHRASES: [&str; 3] = ["borrada", "ilegível", "baixa qualidade"];
const UNCERTAINTY_PHRASES: [&str; 3] = ["incerto", "provável", "possível erro"];

/// Same as [`detect_alerts`], treating `None` as an empty response.
pub fn detect_alerts_opt(analysis: Option<&Value>) -> Vec<String> {
    match analysis {
        Some(value) => detect_alerts(value),
        None => vec![ALERT_EMPTY_RESPONSE.to_string()],
    }
}

/// Returns the de-duplicated alerts for one AI response.
///
/// Field alerts come first in walk order, followed by at most one alert per
/// phrase group found anywhere in the serialized document.
pub fn detect_alerts(analysis: &Value) -> Vec<String> {
    if is_empty_response(analysis) {
        return vec![ALERT_EMPTY_RESPONSE.to_string()];
    }

    let mut alerts = AlertList::default();

    if let Value::String(text) = analysis {
        if text.contains("ND") {
            alerts.push(ALERT_TEXT_HAS_ND.to_string());
        }
        if text.chars().count() < MIN_TEXT_CHARS {
            alerts.push(ALERT_TEXT_TOO_SHORT.to_string());
        }
        return alerts.into_vec();
    }

    if let Value::Object(fields) = analysis {
        walk_fields(fields, &mut alerts);
    }

    let serialized = analysis.to_string().to_lowercase();
    if contains_any(&serialized, &LOW_QUALITY_PHRASES) {
        alerts.push(ALERT_LOW_QUALITY.to_string());
    }
    if contains_any(&serialized, &UNCERTAINTY_PHRASES) {
        alerts.push(ALERT_UNCERTAIN.to_string());
    }

    alerts.into_vec()
}

/// Mirrors the falsy values a JSON client would treat as "no answer".
fn is_empty_response(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn walk_fields(fields: &Map<String, Value>, alerts: &mut AlertList) {
    for (key, value) in fields {
        if let Value::Object(nested) = value {
            walk_fields(nested, alerts);
            continue;
        }

        if is_not_found_marker(value) {
            alerts.push(format!("Campo \"{key}\" não encontrado"));
        }

        if is_money_key(key) && is_zero(value) {
            alerts.push(format!("Campo \"{key}\" está com valor zero"));
        }
    }
}

fn is_not_found_marker(value: &Value) -> bool {
    matches!(value, Value::String(s) if NOT_FOUND_MARKERS.contains(&s.as_str()))
}

fn is_money_key(key: &str) -> bool {
    let key = key.to_lowercase();
    MONEY_KEY_FRAGMENTS
        .iter()
        .any(|fragment| key.contains(fragment))
}

// Zero-valued sub-fields such as `valor_desconto` are flagged too.
fn is_zero(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => ZERO_STRINGS.contains(&s.as_str()),
        _ => false,
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Insertion-ordered list that drops exact duplicates.
#[derive(Default)]
struct AlertList {
    items: Vec<String>,
}

impl AlertList {
    fn push(&mut self, alert: String) {
        if !self.items.contains(&alert) {
            self.items.push(alert);
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_absent_and_falsy_responses() {
        assert_eq!(detect_alerts(&Value::Null), vec![ALERT_EMPTY_RESPONSE]);
        assert_eq!(detect_alerts(&json!("")), vec![ALERT_EMPTY_RESPONSE]);
        assert_eq!(detect_alerts(&json!(false)), vec![ALERT_EMPTY_RESPONSE]);
        assert_eq!(detect_alerts(&json!(0)), vec![ALERT_EMPTY_RESPONSE]);
        assert_eq!(detect_alerts_opt(None), vec![ALERT_EMPTY_RESPONSE]);
    }

    #[test]
    fn test_raw_text_responses() {
        let alerts = detect_alerts(&json!("Valor: ND"));
        assert!(alerts.contains(&ALERT_TEXT_HAS_ND.to_string()));
        assert!(alerts.contains(&ALERT_TEXT_TOO_SHORT.to_string()));

        let alerts = detect_alerts(&json!("Fornecedor ACME, total 150,00"));
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_raw_text_skips_phrase_scan() {
        let alerts = detect_alerts(&json!("imagem borrada, valor incerto"));
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_not_found_markers() {
        let alerts = detect_alerts(&json!({"cpf": "ND"}));
        assert_eq!(alerts, vec!["Campo \"cpf\" não encontrado"]);

        let alerts = detect_alerts(&json!({"cnpj": "N/D", "data": "Não encontrado"}));
        assert!(alerts.contains(&"Campo \"cnpj\" não encontrado".to_string()));
        assert!(alerts.contains(&"Campo \"data\" não encontrado".to_string()));

        // Exact match only.
        assert!(detect_alerts(&json!({"cpf": "nd"})).is_empty());
        assert!(detect_alerts(&json!({"cpf": "ND "})).is_empty());
    }

    #[test]
    fn test_zero_values_on_money_keys() {
        let alerts = detect_alerts(&json!({"valor_total": 0}));
        assert_eq!(alerts, vec!["Campo \"valor_total\" está com valor zero"]);

        for zero in [json!(0.0), json!("0"), json!("0,00"), json!("0.00")] {
            let alerts = detect_alerts(&json!({ "Total": zero }));
            assert_eq!(alerts, vec!["Campo \"Total\" está com valor zero"]);
        }

        assert!(detect_alerts(&json!({"quantidade": 0})).is_empty());
        assert!(detect_alerts(&json!({"valor": "0,01"})).is_empty());
    }

    #[test]
    fn test_zero_heuristic_flags_legitimate_zero_subfields() {
        let alerts = detect_alerts(&json!({"valor_desconto": "0,00", "valor": 10}));
        assert_eq!(alerts, vec!["Campo \"valor_desconto\" está com valor zero"]);
    }

    #[test]
    fn test_nested_objects_are_walked() {
        let alerts = detect_alerts(&json!({"a": {"b": {"c": "ND"}}}));
        assert_eq!(alerts, vec!["Campo \"c\" não encontrado"]);
    }

    #[test]
    fn test_arrays_are_not_walked() {
        let alerts = detect_alerts(&json!({"itens": [{"valor": 0}, "ND"]}));
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_phrase_groups_emit_once() {
        let alerts = detect_alerts(&json!({"obs": "borrada e borrada"}));
        assert_eq!(alerts, vec![ALERT_LOW_QUALITY]);

        let alerts = detect_alerts(&json!({"obs": "Imagem ILEGÍVEL", "nota": "valor provável"}));
        assert_eq!(alerts, vec![ALERT_LOW_QUALITY, ALERT_UNCERTAIN]);
    }

    #[test]
    fn test_phrases_match_keys_too() {
        let alerts = detect_alerts(&json!({"possível erro": true}));
        assert_eq!(alerts, vec![ALERT_UNCERTAIN]);
    }

    #[test]
    fn test_field_alerts_precede_phrase_alerts_and_dedupe() {
        let alerts = detect_alerts(&json!({
            "emitente": {"cpf": "ND"},
            "pagador": {"cpf": "ND"},
            "obs": "baixa qualidade"
        }));
        assert_eq!(
            alerts,
            vec!["Campo \"cpf\" não encontrado", ALERT_LOW_QUALITY]
        );
    }

    #[test]
    fn test_clean_input_has_no_alerts() {
        assert!(detect_alerts(&json!({"nome": "ok", "valor": 1500.5})).is_empty());
    }

    #[test]
    fn test_idempotent() {
        let input = json!({"valor": "0", "obs": "incerto"});
        assert_eq!(detect_alerts(&input), detect_alerts(&input));
    }
}
