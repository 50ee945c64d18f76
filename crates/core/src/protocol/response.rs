use std::io::{BufRead, Read};

use crate::error::{ParseErrorKind, StreamError};

/// Status line plus headers.
const MAX_HEAD_SIZE: usize = 8 * 1024;
/// Publishing responses carry at most a short description.
const MAX_BODY_SIZE: usize = 64 * 1024;

/// A parsed RTSP response (RFC 2326 §7).
///
/// ```text
/// RTSP-Version SP Status-Code SP Reason-Phrase CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug)]
pub struct RtspResponse {
    pub version: String,
    pub status_code: u16,
    pub reason: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RtspResponse {
    /// Parse the status line and headers of a response.
    ///
    /// The body, if any, is not part of `raw`; see [`read_from`](Self::read_from).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(StreamError::Parse {
                kind: ParseErrorKind::EmptyResponse,
            })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let status_code = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|_| version.starts_with("RTSP/"))
            .ok_or(StreamError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            })?;
        let reason = parts.next().unwrap_or_default().trim().to_string();

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(StreamError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspResponse {
            version: version.to_string(),
            status_code,
            reason,
            headers,
            body: String::new(),
        })
    }

    /// Read one complete response, including a `Content-Length` body.
    pub fn read_from<R: BufRead>(reader: &mut R) -> crate::error::Result<Self> {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            let budget = (MAX_HEAD_SIZE - head.len()) as u64 + 1;
            let read = (&mut *reader).take(budget).read_line(&mut line)?;
            if head.len() + line.len() > MAX_HEAD_SIZE {
                return Err(too_large());
            }
            if read == 0 {
                if head.is_empty() {
                    return Err(StreamError::Io(std::io::ErrorKind::UnexpectedEof.into()));
                }
                break;
            }
            // Skip stray blank lines between messages.
            if head.is_empty() && line.trim().is_empty() {
                continue;
            }
            head.push_str(&line);
            if line == "\r\n" || line == "\n" {
                break;
            }
        }

        let mut response = Self::parse(&head)?;
        if let Some(len) = response.content_length()
            && len > 0
        {
            if len > MAX_BODY_SIZE {
                return Err(too_large());
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;
            response.body = String::from_utf8_lossy(&body).into_owned();
        }
        Ok(response)
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The echoed CSeq, pairing this response with its request (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<u32> {
        self.get_header("CSeq").and_then(|v| v.parse().ok())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.get_header("Content-Length")
            .and_then(|v| v.parse().ok())
    }

    /// Session id without the `;timeout=` suffix.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

fn too_large() -> StreamError {
    StreamError::Parse {
        kind: ParseErrorKind::TooLarge,
    }
}
