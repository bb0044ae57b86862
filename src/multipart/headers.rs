//! RFC 2822 style header blocks.

use super::error::MultipartError;

pub const CONTENT_TYPE: &str = "CONTENT-TYPE";
pub const CONTENT_LENGTH: &str = "CONTENT-LENGTH";
pub const CONTENT_ENCODING: &str = "CONTENT-ENCODING";
pub const CONTENT_TRANSFER_ENCODING: &str = "CONTENT-TRANSFER-ENCODING";
pub const CONNECTION: &str = "CONNECTION";

/// Default upper bound for one logical header, continuation lines included.
pub const DEFAULT_MAX_FIELD_SIZE: usize = 8190;

/// Ordered, multi-valued header collection with case-insensitive names.
///
/// Names are stored upper-cased; lookups normalize the same way, so
/// `get("content-type")` and `get("Content-Type")` are equivalent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartHeaders {
    entries: Vec<(String, String)>,
}

impl PartHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_ascii_uppercase(), value.into()));
    }

    /// First value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let key = name.to_ascii_uppercase();
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for PartHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = PartHeaders::new();
        for (k, v) in iter {
            headers.add(k.as_ref(), v);
        }
        headers
    }
}

/// Result of parsing one header block.
#[derive(Debug, Clone)]
pub struct ParsedHeaders {
    pub headers: PartHeaders,
    /// `Some(true)` for `Connection: close`, `Some(false)` for keep-alive.
    pub close_connection: Option<bool>,
    /// `gzip` or `deflate` when the block declares one of them.
    pub content_encoding: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HeaderParser {
    max_field_size: usize,
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FIELD_SIZE)
    }
}

impl HeaderParser {
    pub fn new(max_field_size: usize) -> Self {
        Self { max_field_size }
    }

    pub fn max_field_size(&self) -> usize {
        self.max_field_size
    }

    /// Parses a header block given as individual lines without their line
    /// terminators. Parsing stops at the first empty line.
    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> Result<ParsedHeaders, MultipartError> {
        let mut headers = PartHeaders::new();
        let mut close_connection = None;
        let mut content_encoding = None;

        let mut idx = 0;
        while let Some(line) = lines.get(idx).map(|l| l.as_ref()) {
            if line.is_empty() {
                break;
            }

            let (name, first) = line
                .split_once(':')
                .ok_or_else(|| MultipartError::InvalidHeader(line.to_string()))?;
            let name = name.trim_matches(|c| c == ' ' || c == '\t');
            if name.is_empty() || name.chars().any(is_forbidden_name_char) {
                return Err(MultipartError::InvalidHeader(name.to_string()));
            }

            let mut length = line.len();
            let mut segments = vec![first];
            idx += 1;

            while let Some(next) = lines.get(idx).map(|l| l.as_ref()) {
                if !next.starts_with([' ', '\t']) {
                    break;
                }
                length += next.len();
                if length > self.max_field_size {
                    return Err(MultipartError::LineTooLong {
                        limit: self.max_field_size,
                    });
                }
                segments.push(next);
                idx += 1;
            }
            if length > self.max_field_size {
                return Err(MultipartError::LineTooLong {
                    limit: self.max_field_size,
                });
            }

            let value = segments.join("\r\n");
            let value = value.trim();

            if name.eq_ignore_ascii_case(CONNECTION) {
                match value.to_ascii_lowercase().as_str() {
                    "close" => close_connection = Some(true),
                    "keep-alive" => close_connection = Some(false),
                    _ => {}
                }
            } else if name.eq_ignore_ascii_case(CONTENT_ENCODING) {
                let enc = value.to_ascii_lowercase();
                if enc == "gzip" || enc == "deflate" {
                    content_encoding = Some(enc);
                }
            }

            headers.add(name, value);
        }

        Ok(ParsedHeaders {
            headers,
            close_connection,
            content_encoding,
        })
    }
}

fn is_forbidden_name_char(c: char) -> bool {
    c.is_ascii_control()
        || matches!(
            c,
            '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '[' | ']' | '=' | '{' | '}'
                | ' ' | '\t' | '\\' | '"'
        )
}
