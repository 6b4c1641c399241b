use std::sync::LazyLock;

use crate::config::AnalysisConfig;

static MAGIC_BYTES: LazyLock<Vec<(&'static [u8], &'static str)>> = LazyLock::new(|| {
    vec![
        (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
        (&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A], "image/png"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"II*\x00", "image/tiff"),
        (b"MM\x00*", "image/tiff"),
        (b"%PDF-", "application/pdf"),
    ]
});

#[derive(Debug, Clone)]
pub struct FileValidationConfig {
    pub max_size: usize,
    pub allowed_types: Vec<String>,
    pub warn_on_active_pdf: bool,
}

impl Default for FileValidationConfig {
    fn default() -> Self {
        Self::from_analysis(&AnalysisConfig::default())
    }
}

impl FileValidationConfig {
    pub fn from_analysis(config: &AnalysisConfig) -> Self {
        Self {
            max_size: config.max_upload_bytes,
            allowed_types: config.allowed_types.clone(),
            warn_on_active_pdf: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileValidationResult {
    pub is_valid: bool,
    pub detected_type: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FileValidationResult {
    pub fn error_message(&self) -> String {
        self.errors.join("; ")
    }
}

/// Checks an uploaded document: size, detected type and allow-list.
///
/// The detected type wins over the client's `Content-Type`; a mismatch is only a warning.
pub fn validate_file_upload(
    filename: &str,
    content_type: &str,
    data: &[u8],
    config: &FileValidationConfig,
) -> FileValidationResult {
    let mut result = FileValidationResult {
        is_valid: true,
        detected_type: None,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    if data.is_empty() {
        result.is_valid = false;
        result.errors.push(format!("Arquivo {filename} está vazio"));
        return result;
    }

    if data.len() > config.max_size {
        result.is_valid = false;
        result.errors.push(format!(
            "Arquivo com {} bytes excede o limite de {} bytes",
            data.len(),
            config.max_size
        ));
    }

    match detect_file_type(data) {
        Some(detected) => {
            if !config.allowed_types.iter().any(|t| t == detected) {
                result.is_valid = false;
                result.errors.push(format!(
                    "Tipo de arquivo '{detected}' não é aceito (use imagem ou PDF)"
                ));
            }

            if !content_type.is_empty()
                && content_type != detected
                && !content_type.starts_with("application/octet-stream")
            {
                result.warnings.push(format!(
                    "Content-Type '{content_type}' difere do tipo detectado '{detected}'"
                ));
            }

            result.detected_type = Some(detected.to_string());
        }
        None => {
            result.is_valid = false;
            result
                .errors
                .push("Formato de arquivo não reconhecido (use imagem ou PDF)".into());
        }
    }

    if config.warn_on_active_pdf
        && result.detected_type.as_deref() == Some("application/pdf")
        && has_active_pdf_content(data)
    {
        result.warnings.push(
            "PDF contém JavaScript, ações ou arquivos embutidos".into(),
        );
    }

    result
}

pub fn detect_file_type(data: &[u8]) -> Option<&'static str> {
    for (magic, mime_type) in MAGIC_BYTES.iter() {
        if data.starts_with(magic) {
            return Some(*mime_type);
        }
    }

    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    None
}

fn has_active_pdf_content(data: &[u8]) -> bool {
    let text_content = String::from_utf8_lossy(data);
    let lower = text_content.to_lowercase();

    lower.contains("/javascript")
        || lower.contains("/launch")
        || lower.contains("/embeddedfile")
}
