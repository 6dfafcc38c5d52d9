use crate::error::{AduanaError, AduanaResult};
use aduana_models::{FolderId, PublishTemplate};
use validator::{Validate, ValidationErrors};

/// Upload extensions accepted by intake.
pub const ALLOWED_DOCUMENT_TYPES: &[&str] = &["pdf", "png", "jpg", "jpeg", "webp", "xlsx", "xls", "csv"];

pub fn validate_model<T: Validate>(model: &T) -> AduanaResult<()> {
    match model.validate() {
        Ok(()) => Ok(()),
        Err(errors) => {
            let error_messages = format_validation_errors(&errors);
            Err(AduanaError::validation("model", error_messages))
        }
    }
}

pub fn format_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();

    for (field, field_errors) in errors.field_errors() {
        for error in field_errors {
            let message = match (&error.message, &error.code) {
                (Some(message), _) => format!("{}: {}", field, message),
                (None, std::borrow::Cow::Borrowed("length")) => {
                    format!("Length validation failed for field '{}'", field)
                }
                (None, std::borrow::Cow::Borrowed("range")) => {
                    format!("Value out of range for field '{}'", field)
                }
                (None, std::borrow::Cow::Borrowed("required")) => {
                    format!("Field '{}' is required", field)
                }
                (None, code) => format!("Validation failed for field '{}': {}", field, code),
            };
            messages.push(message);
        }
    }

    messages.sort();
    messages.join(", ")
}

/// Normalize a drive folder reference (raw id, sharing URL or `?id=` URL)
/// to its canonical id.
pub fn normalize_folder_id(input: &str) -> AduanaResult<FolderId> {
    if input.trim().is_empty() {
        return Err(AduanaError::validation(
            "folder_url",
            "Drive folder URL or ID is required",
        ));
    }

    FolderId::parse(input).ok_or_else(|| {
        AduanaError::validation(
            "folder_url",
            format!(
                "Unrecognized drive folder '{}'. Use a folder sharing URL or a folder ID",
                input.trim()
            ),
        )
    })
}

pub fn validate_document_name(name: &str) -> AduanaResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AduanaError::validation("document_name", "Document name is required"));
    }
    if name.chars().count() > 200 {
        return Err(AduanaError::validation(
            "document_name",
            "Document name must be at most 200 characters",
        ));
    }
    Ok(name.to_string())
}

pub fn parse_template(key: &str) -> AduanaResult<PublishTemplate> {
    PublishTemplate::from_key(key).ok_or_else(|| {
        AduanaError::validation(
            "template",
            format!("Unknown template '{}'. Expected 'aereo' or 'maritimo'", key.trim()),
        )
    })
}

pub fn validate_file_type(file_name: &str, allowed_types: &[&str]) -> AduanaResult<()> {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("");

    if !allowed_types.contains(&extension.to_lowercase().as_str()) {
        return Err(AduanaError::validation(
            "file_type",
            format!("File type '{}' not allowed. Allowed types: {}", extension, allowed_types.join(", ")),
        ));
    }

    Ok(())
}

pub fn validate_file_size(file_size: u64, max_size: u64) -> AduanaResult<()> {
    if file_size == 0 {
        return Err(AduanaError::validation("file_size", "Uploaded file is empty"));
    }
    if file_size > max_size {
        return Err(AduanaError::validation(
            "file_size",
            format!("File size {} bytes exceeds maximum allowed size {} bytes", file_size, max_size),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folder_id() {
        assert_eq!(
            normalize_folder_id("https://drive.example.com/drive/folders/ABC123?extra=1")
                .unwrap()
                .as_str(),
            "ABC123"
        );
        assert_eq!(normalize_folder_id("ABC123XYZ01").unwrap().as_str(), "ABC123XYZ01");

        let err = normalize_folder_id("not a url").unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(normalize_folder_id("   ").is_err());
    }

    #[test]
    fn test_validate_document_name() {
        assert_eq!(validate_document_name("  Proforma 2291 ").unwrap(), "Proforma 2291");
        assert!(validate_document_name("").is_err());
        assert!(validate_document_name(&"x".repeat(201)).is_err());
    }

    #[test]
    fn test_parse_template() {
        assert_eq!(parse_template("aereo").unwrap(), PublishTemplate::Aereo);
        assert!(parse_template("courier").is_err());
    }

    #[test]
    fn test_validate_file_type() {
        assert!(validate_file_type("proforma.PDF", ALLOWED_DOCUMENT_TYPES).is_ok());
        assert!(validate_file_type("lista.xlsx", ALLOWED_DOCUMENT_TYPES).is_ok());
        assert!(validate_file_type("notes.txt", ALLOWED_DOCUMENT_TYPES).is_err());
    }

    #[test]
    fn test_validate_file_size() {
        assert!(validate_file_size(10, 100).is_ok());
        assert!(validate_file_size(0, 100).is_err());
        assert!(validate_file_size(101, 100).is_err());
    }
}
