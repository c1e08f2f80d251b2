//! Reader for the header block a switch sends when it opens a FastAGI
//! connection: `key: value` lines ended by an empty line.
use crate::error::ProtocolParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest header line accepted, terminator included.
pub const MAX_HEADER_LINE: usize = 8192;

static HEADER_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^:]+): ?(.*)$").unwrap());

pub fn parse_header_line(line: &str) -> Result<(String, String), ProtocolParseError> {
    let captures = HEADER_LINE
        .captures(line)
        .ok_or_else(|| ProtocolParseError::MalformedLine(line.to_string()))?;
    Ok((captures[1].to_string(), captures[2].to_string()))
}

/// Reads header lines in wire order, stopping at the blank terminator line.
pub async fn read_header_block<R>(reader: &mut R) -> Result<Vec<(String, String)>, ProtocolParseError>
where
    R: AsyncBufRead + Unpin,
{
    let mut pairs = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let read = (&mut *reader)
            .take(MAX_HEADER_LINE as u64)
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Err(ProtocolParseError::UnexpectedEof);
        }
        if read == MAX_HEADER_LINE && !line.ends_with('\n') {
            return Err(ProtocolParseError::LineTooLong(MAX_HEADER_LINE));
        }
        let content = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
        if content.is_empty() {
            return Ok(pairs);
        }
        pairs.push(parse_header_line(content)?);
    }
}

/// Later duplicates overwrite earlier ones.
pub fn fold_headers(pairs: Vec<(String, String)>) -> HashMap<String, String> {
    pairs.into_iter().collect()
}

pub async fn read_headers<R>(reader: &mut R) -> Result<HashMap<String, String>, ProtocolParseError>
where
    R: AsyncBufRead + Unpin,
{
    Ok(fold_headers(read_header_block(reader).await?))
}
