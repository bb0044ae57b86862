use super::error::MultipartError;
use std::collections::HashMap;

/// Boundaries longer than this are rejected (RFC 2046 §5.1.1).
pub const MAX_BOUNDARY_LENGTH: usize = 70;

/// A media type split into its components, e.g.
/// `multipart/related; type="application/dicom"; boundary=abc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaType {
    pub main_type: String,
    pub sub_type: String,
    pub suffix: String,
    pub params: HashMap<String, String>,
}

impl MediaType {
    /// Lenient parser: type names and parameter keys are lower-cased,
    /// parameter values keep their case and lose surrounding quotes.
    pub fn parse(value: &str) -> Self {
        if value.trim().is_empty() {
            return Self::default();
        }

        let mut parts = value.split(';');
        let full_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let full_type = if full_type == "*" {
            "*/*".to_string()
        } else {
            full_type
        };

        let params = parts
            .filter(|item| !item.is_empty())
            .map(|item| {
                let (key, value) = item.split_once('=').unwrap_or((item, ""));
                (
                    key.trim().to_ascii_lowercase(),
                    value.trim_matches(|c| c == ' ' || c == '"').to_string(),
                )
            })
            .collect();

        let (main_type, sub_type) = full_type
            .split_once('/')
            .map(|(m, s)| (m.to_string(), s.to_string()))
            .unwrap_or((full_type.clone(), String::new()));
        let (sub_type, suffix) = sub_type
            .split_once('+')
            .map(|(s, x)| (s.to_string(), x.to_string()))
            .unwrap_or((sub_type.clone(), String::new()));

        Self {
            main_type,
            sub_type,
            suffix,
            params,
        }
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Extracts the boundary token of a `multipart/*` content type.
pub fn boundary_from_content_type(content_type: &str) -> Result<String, MultipartError> {
    let media = MediaType::parse(content_type);
    if media.main_type != "multipart" {
        return Err(MultipartError::NotMultipart(content_type.to_string()));
    }

    let boundary = media
        .param("boundary")
        .filter(|b| !b.is_empty())
        .ok_or_else(|| MultipartError::MissingBoundary(content_type.to_string()))?;

    if boundary.len() > MAX_BOUNDARY_LENGTH {
        return Err(MultipartError::BoundaryTooLong(boundary.to_string()));
    }

    Ok(boundary.to_string())
}
