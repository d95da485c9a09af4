//! Input validation module

use crate::models::AttachmentKind;
use thiserror::Error;

/// Maximum size of the identity document
pub const MAX_IDENTITY_DOCUMENT_BYTES: usize = 5 * 1024 * 1024;

/// Maximum size of each supporting document
pub const MAX_SUPPORTING_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

/// Supporting documents allowed next to the identity document
pub const MAX_SUPPORTING_DOCUMENTS: usize = 5;

const IDENTITY_TYPES: &[(&str, &[&str])] = &[
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/png", &["png"]),
    ("application/pdf", &["pdf"]),
];

const SUPPORTING_TYPES: &[(&str, &[&str])] = &[
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/png", &["png"]),
    ("application/pdf", &["pdf"]),
    ("application/msword", &["doc"]),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        &["docx"],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' is too long (max {max} characters)")]
    TooLong { field: String, max: usize },

    #[error("Field '{field}' is invalid: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Unknown service '{service}'")]
    UnknownService { service: String },

    #[error("An identity document is required")]
    MissingIdentityDocument,

    #[error("Too many supporting documents (max {max})")]
    TooManyAttachments { max: usize },

    #[error("Invalid file type: {mime_type}")]
    InvalidFileType { mime_type: String },

    #[error("File too large (max {max_mb} MB)")]
    FileTooLarge { max_mb: usize },
}

impl ValidationError {
    pub fn required(field: &str) -> Self {
        ValidationError::Required {
            field: field.to_string(),
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the offending input field, reported back to the client.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::Invalid { field, .. } => field,
            ValidationError::UnknownService { .. } => "service",
            ValidationError::MissingIdentityDocument
            | ValidationError::TooManyAttachments { .. }
            | ValidationError::InvalidFileType { .. }
            | ValidationError::FileTooLarge { .. } => "documents",
        }
    }
}

impl From<validator::ValidationErrors> for ValidationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field_errors = errors.field_errors();
        let mut fields: Vec<&str> = field_errors.keys().copied().collect();
        fields.sort_unstable();

        match fields.first() {
            Some(field) => ValidationError::invalid(field, "failed validation"),
            None => ValidationError::invalid("input", "failed validation"),
        }
    }
}

/// Require a non-blank value no longer than `max` characters
pub fn validate_text(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::required(field));
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

/// Detect a file's MIME type from its leading bytes
pub fn detect_mime_type(data: &[u8]) -> Option<&'static str> {
    infer::get(data).map(|kind| kind.mime_type())
}

/// Check an uploaded document against the policy for its kind.
///
/// The type must be detected from the file contents, and the file name must
/// carry an extension belonging to that type. Returns the accepted MIME type.
pub fn validate_attachment(
    kind: AttachmentKind,
    filename: &str,
    detected_mime: Option<&str>,
    size: usize,
) -> Result<&'static str, ValidationError> {
    let (allowed, max_bytes) = match kind {
        AttachmentKind::Identity => (IDENTITY_TYPES, MAX_IDENTITY_DOCUMENT_BYTES),
        AttachmentKind::Supporting => (SUPPORTING_TYPES, MAX_SUPPORTING_DOCUMENT_BYTES),
    };

    if size == 0 {
        return Err(ValidationError::invalid("documents", "file is empty"));
    }
    if size > max_bytes {
        return Err(ValidationError::FileTooLarge {
            max_mb: max_bytes / (1024 * 1024),
        });
    }

    let detected = detected_mime.unwrap_or("unknown");
    let (mime, extensions) = allowed
        .iter()
        .find(|(mime, _)| *mime == detected)
        .ok_or_else(|| ValidationError::InvalidFileType {
            mime_type: detected.to_string(),
        })?;

    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !extensions.contains(&extension.as_str()) {
        return Err(ValidationError::InvalidFileType {
            mime_type: format!("{} does not match extension '.{}'", mime, extension),
        });
    }

    Ok(mime)
}

/// Reduce an uploaded file name to a safe basename for storage
pub fn sanitize_filename(filename: &str) -> String {
    let basename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let sanitized: String = basename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.trim_start_matches('.').trim_matches('_');
    if sanitized.is_empty() {
        "document".to_string()
    } else {
        sanitized.chars().take(120).collect()
    }
}
