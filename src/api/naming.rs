//! File renaming from extracted fields.

use serde_json::{Map, Value};

const DATE_KEYS: [&str; 5] = ["data", "data_emissao", "date", "vencimento", "data_pagamento"];
const PARTY_KEYS: [&str; 6] = [
    "fornecedor",
    "emitente",
    "beneficiario",
    "estabelecimento",
    "razao_social",
    "nome",
];
const AMOUNT_KEYS: [&str; 3] = ["valor_total", "valor", "total"];
const MAX_PART_CHARS: usize = 40;

/// Builds `<date>_<party>_<amount>.<ext>` from whichever of those fields the AI found.
/// Returns `None` when the analysis is not an object or none of the fields is usable.
pub fn suggest_file_name(analysis: &Value, original_name: &str) -> Option<String> {
    let Value::Object(fields) = analysis else {
        return None;
    };

    let parts: Vec<String> = [&DATE_KEYS[..], &PARTY_KEYS[..], &AMOUNT_KEYS[..]]
        .iter()
        .filter_map(|keys| find_field(fields, keys))
        .map(|raw| sanitize_part(&raw))
        .filter(|part| !part.is_empty())
        .collect();

    if parts.is_empty() {
        return None;
    }

    let stem = parts.join("_");
    match extension(original_name) {
        Some(ext) => Some(format!("{stem}.{ext}")),
        None => Some(stem),
    }
}

fn find_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        let found = fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| usable_text(v));
        if found.is_some() {
            return found;
        }
    }

    fields.values().find_map(|value| match value {
        Value::Object(nested) => find_field(nested, keys),
        _ => None,
    })
}

fn usable_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    match text.as_str() {
        "" | "ND" | "N/D" | "Não encontrado" => None,
        _ => Some(text),
    }
}

fn sanitize_part(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars().map(fold_accent) {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let clipped: String = out.trim_matches('_').chars().take(MAX_PART_CHARS).collect();
    clipped.trim_end_matches('_').to_string()
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        '/' => '-',
        other => other,
    }
}

fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
