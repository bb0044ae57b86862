//! Streaming `multipart/*` reader.
//!
//! The reader walks the body strictly forward. [`MultipartReader::next_part`]
//! hands out a [`BodyPart`] that borrows the reader, so only one part can be
//! alive at a time; asking for the next part drains whatever the caller left
//! unread in the previous one.

use super::decode::{DEFAULT_DECODED_LIMIT, decode_part};
use super::error::MultipartError;
use super::headers::{CONTENT_LENGTH, CONTENT_TYPE, HeaderParser, PartHeaders};
use super::mime::{MediaType, boundary_from_content_type};
use std::collections::VecDeque;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Chunk size used when a part declares its length.
pub const CHUNK_SIZE: usize = 8192;

#[derive(Debug)]
struct PartState {
    length: Option<u64>,
    read_bytes: u64,
    at_eof: bool,
}

pub struct MultipartReader<R> {
    stream: R,
    token: String,
    /// `--` followed by the token.
    delimiter: Vec<u8>,
    header_parser: HeaderParser,
    /// Largest decoded payload of one part.
    decoded_limit: usize,
    /// Lookahead lines already pulled from the stream.
    unread: VecDeque<Vec<u8>>,
    first_line: bool,
    at_eof: bool,
    part: Option<PartState>,
}

impl<R> MultipartReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Builds a reader from the transport's `Content-Type` value.
    pub fn new(content_type: &str, stream: R) -> Result<Self, MultipartError> {
        let token = boundary_from_content_type(content_type)?;
        Ok(Self::with_boundary(token, stream))
    }

    pub fn with_boundary(token: impl Into<String>, stream: R) -> Self {
        let token = token.into();
        let mut delimiter = b"--".to_vec();
        delimiter.extend_from_slice(token.as_bytes());
        Self {
            stream,
            token,
            delimiter,
            header_parser: HeaderParser::default(),
            decoded_limit: DEFAULT_DECODED_LIMIT,
            unread: VecDeque::new(),
            first_line: true,
            at_eof: false,
            part: None,
        }
    }

    pub fn with_header_parser(mut self, parser: HeaderParser) -> Self {
        self.header_parser = parser;
        self
    }

    pub fn with_decoded_limit(mut self, limit: usize) -> Self {
        self.decoded_limit = limit;
        self
    }

    pub fn boundary(&self) -> &str {
        &self.token
    }

    /// True once the closing boundary has been read.
    pub fn at_eof(&self) -> bool {
        self.at_eof
    }

    /// Emits the next body part, or `None` after the closing boundary.
    pub async fn next_part(&mut self) -> Result<Option<BodyPart<'_, R>>, MultipartError> {
        if self.at_eof {
            return Ok(None);
        }
        self.release_current().await?;
        self.read_boundary().await?;
        if self.at_eof {
            return Ok(None);
        }

        let headers = self.read_headers().await?;
        let length = headers
            .get(CONTENT_LENGTH)
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .map_err(|_| MultipartError::InvalidHeader(format!("Content-Length: {}", v)))
            })
            .transpose()?;

        self.part = Some(PartState {
            length,
            read_bytes: 0,
            at_eof: false,
        });
        Ok(Some(BodyPart {
            reader: self,
            headers,
        }))
    }

    async fn read_raw_line(&mut self) -> Result<Vec<u8>, MultipartError> {
        let mut line = Vec::new();
        self.stream.read_until(b'\n', &mut line).await?;
        Ok(line)
    }

    async fn next_line(&mut self) -> Result<Vec<u8>, MultipartError> {
        match self.unread.pop_front() {
            Some(line) => Ok(line),
            None => self.read_raw_line().await,
        }
    }

    /// Like `next_line`, but stops after `max` bytes; the caller sees a line
    /// without its `\n` terminator when the bound was hit.
    async fn next_line_bounded(&mut self, max: usize) -> Result<Vec<u8>, MultipartError> {
        if let Some(line) = self.unread.pop_front() {
            return Ok(line);
        }
        let mut line = Vec::new();
        (&mut self.stream)
            .take(max as u64)
            .read_until(b'\n', &mut line)
            .await?;
        Ok(line)
    }

    /// Bound for framing lines: the header field limit plus CRLF.
    fn line_bound(&self) -> usize {
        self.header_parser.max_field_size() + 3
    }

    fn is_delimiter(&self, line: &[u8]) -> bool {
        let line = line.trim_ascii_end();
        line == self.delimiter.as_slice() || self.is_close_delimiter(line)
    }

    fn is_close_delimiter(&self, line: &[u8]) -> bool {
        line.len() == self.delimiter.len() + 2
            && line.starts_with(&self.delimiter)
            && line.ends_with(b"--")
    }

    async fn read_boundary(&mut self) -> Result<(), MultipartError> {
        let bound = self.line_bound();
        let mut line = self.next_line_bounded(bound).await?;
        if self.first_line {
            self.first_line = false;
            while line == b"\r\n" || line == b"\n" {
                line = self.next_line_bounded(bound).await?;
            }
        }
        if line.is_empty() {
            return Err(MultipartError::UnexpectedEof);
        }

        let chunk = line.trim_ascii_end();
        if chunk == self.delimiter.as_slice() {
            Ok(())
        } else if self.is_close_delimiter(chunk) {
            self.at_eof = true;
            Ok(())
        } else {
            Err(MultipartError::InvalidBoundary {
                found: String::from_utf8_lossy(chunk).into_owned(),
                expected: String::from_utf8_lossy(&self.delimiter).into_owned(),
            })
        }
    }

    async fn read_headers(&mut self) -> Result<PartHeaders, MultipartError> {
        let limit = self.header_parser.max_field_size();
        let bound = self.line_bound();
        let mut lines = Vec::new();
        loop {
            let raw = self.next_line_bounded(bound).await?;
            if raw.is_empty() {
                return Err(MultipartError::UnexpectedEof);
            }
            if raw.len() > limit + 2 {
                return Err(MultipartError::LineTooLong { limit });
            }
            let line = String::from_utf8(strip_line_end(&raw).to_vec())
                .map_err(|_| MultipartError::InvalidHeader("header is not valid UTF-8".into()))?;
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }
        Ok(self.header_parser.parse(&lines)?.headers)
    }

    fn part_at_eof(&self) -> bool {
        self.part.as_ref().is_none_or(|p| p.at_eof)
    }

    async fn part_read_chunk(&mut self, size: usize) -> Result<Vec<u8>, MultipartError> {
        let (length, read_bytes) = match &self.part {
            Some(p) if !p.at_eof => (
                p.length.ok_or_else(|| {
                    MultipartError::MalformedBody("Content-Length required for chunked read".into())
                })?,
                p.read_bytes,
            ),
            _ => return Ok(Vec::new()),
        };

        let want = (size as u64).min(length - read_bytes) as usize;
        let mut chunk = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self.stream.read(&mut chunk[filled..]).await?;
            if n == 0 {
                return Err(MultipartError::UnexpectedEof);
            }
            filled += n;
        }

        let done = read_bytes + want as u64 == length;
        if let Some(p) = self.part.as_mut() {
            p.read_bytes += want as u64;
            p.at_eof = done;
        }
        if done {
            let tail = self.read_raw_line().await?;
            if tail != b"\r\n" {
                return Err(MultipartError::MalformedBody(
                    "part data is not followed by CRLF".into(),
                ));
            }
        }
        Ok(chunk)
    }

    async fn part_read_line(&mut self) -> Result<Vec<u8>, MultipartError> {
        if self.part_at_eof() {
            return Ok(Vec::new());
        }

        let mut line = self.next_line().await?;
        if line.is_empty() {
            return Err(MultipartError::UnexpectedEof);
        }
        if self.is_delimiter(&line) {
            if let Some(p) = self.part.as_mut() {
                p.at_eof = true;
            }
            self.unread.push_front(line);
            return Ok(Vec::new());
        }

        let next = self.next_line().await?;
        if self.is_delimiter(&next) {
            // the CRLF before a delimiter belongs to the delimiter
            if line.ends_with(b"\r\n") {
                line.truncate(line.len() - 2);
            } else if line.ends_with(b"\n") {
                line.truncate(line.len() - 1);
            }
        }
        self.unread.push_back(next);
        Ok(line)
    }

    async fn part_read_all(&mut self) -> Result<Vec<u8>, MultipartError> {
        let chunked = self.part.as_ref().is_some_and(|p| p.length.is_some());
        let mut data = Vec::new();
        while !self.part_at_eof() {
            let piece = if chunked {
                self.part_read_chunk(CHUNK_SIZE).await?
            } else {
                self.part_read_line().await?
            };
            data.extend_from_slice(&piece);
        }
        Ok(data)
    }

    async fn release_current(&mut self) -> Result<(), MultipartError> {
        if !self.part_at_eof() {
            self.part_read_all().await?;
        }
        self.part = None;
        Ok(())
    }
}

fn strip_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// One part of a multipart body. Dropping it without reading is fine; the
/// reader skips the rest on the next [`MultipartReader::next_part`] call.
pub struct BodyPart<'a, R> {
    reader: &'a mut MultipartReader<R>,
    headers: PartHeaders,
}

impl<R> BodyPart<'_, R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn headers(&self) -> &PartHeaders {
        &self.headers
    }

    pub fn boundary(&self) -> &str {
        self.reader.boundary()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)
    }

    /// `charset` parameter of the part's content type.
    pub fn charset(&self) -> Option<String> {
        let media = MediaType::parse(self.content_type()?);
        media.param("charset").map(str::to_string)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.reader.part.as_ref().and_then(|p| p.length)
    }

    pub fn at_eof(&self) -> bool {
        self.reader.part_at_eof()
    }

    /// Next chunk of a part that declared its `Content-Length`.
    pub async fn read_chunk(&mut self, size: usize) -> Result<Option<Vec<u8>>, MultipartError> {
        if self.at_eof() {
            return Ok(None);
        }
        self.reader.part_read_chunk(size).await.map(Some)
    }

    /// Next line of the part; the line terminator is kept except right before
    /// the delimiter.
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>, MultipartError> {
        if self.at_eof() {
            return Ok(None);
        }
        self.reader.part_read_line().await.map(Some)
    }

    /// Remaining raw bytes of the part.
    pub async fn read(&mut self) -> Result<Vec<u8>, MultipartError> {
        self.reader.part_read_all().await
    }

    /// Remaining bytes with transfer and content encodings undone.
    pub async fn read_decoded(&mut self) -> Result<Vec<u8>, MultipartError> {
        let data = self.read().await?;
        decode_part(&self.headers, data, self.reader.decoded_limit)
    }

    /// Reads the rest of the part to the void.
    pub async fn release(&mut self) -> Result<(), MultipartError> {
        self.reader.part_read_all().await.map(|_| ())
    }
}
