//! Best-effort decoding of JSON payloads with stray quotes.
//!
//! Query exports occasionally carry a raw `"` inside a string value, which
//! closes the string early and leaves the decoder staring at text where it
//! expected a delimiter. The repair loop escapes the nearest unescaped quote
//! before each failure position and retries until the text decodes or stops
//! making progress.
//!
//! This is deliberately narrow: missing brackets, trailing commas and other
//! structural damage are not patched and end in [`RepairError::Unrepairable`].

use serde::de::DeserializeOwned;
use serde_json::error::Category;
use tracing::debug;

/// Errors from decoding a JSON payload.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// The repair strategy ran out of moves.
    #[error("unrepairable JSON at byte {offset}: {message}")]
    Unrepairable { offset: usize, message: String },
    /// The text is valid JSON but does not fit the requested type.
    #[error("JSON does not match the expected type: {0}")]
    Data(#[source] serde_json::Error),
    /// The decoded value is not an array of row objects.
    #[error("dataset must be an array of objects: {0}")]
    Shape(String),
}

/// Decode `text`, escaping stray quotes until the decode succeeds.
///
/// Well-formed input is decoded exactly as `serde_json::from_str` would. Each
/// repair step must move the reported failure offset strictly forward;
/// otherwise the input is rejected instead of looping.
pub fn repair_parse<T: DeserializeOwned>(text: &str) -> Result<T, RepairError> {
    let mut candidate = text.to_string();
    let mut last_offset: Option<usize> = None;
    let mut repairs = 0usize;

    loop {
        let err = match serde_json::from_str::<T>(&candidate) {
            Ok(value) => {
                if repairs > 0 {
                    debug!(repairs, "decoded JSON after escaping stray quotes");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !matches!(err.classify(), Category::Syntax | Category::Eof) {
            return Err(RepairError::Data(err));
        }

        let offset = error_offset(&candidate, err.line(), err.column());
        if let Some(previous) = last_offset {
            if offset <= previous {
                return Err(RepairError::Unrepairable {
                    offset,
                    message: format!("no progress after {repairs} repairs: {err}"),
                });
            }
        }

        let Some(quote) = last_unescaped_quote(candidate.as_bytes(), offset) else {
            return Err(RepairError::Unrepairable {
                offset,
                message: err.to_string(),
            });
        };

        debug!(offset, quote, "escaping stray quote");
        candidate.insert(quote, '\\');
        last_offset = Some(offset);
        repairs += 1;
    }
}

/// Byte offset of the character serde_json reported at `line`:`column`.
///
/// Both are one-based and the column counts bytes from the start of the line.
fn error_offset(text: &str, line: usize, column: usize) -> usize {
    let bytes = text.as_bytes();
    let line_start = if line <= 1 {
        0
    } else {
        bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .nth(line - 2)
            .map(|(i, _)| i + 1)
            .unwrap_or(bytes.len())
    };
    (line_start + column.saturating_sub(1)).min(bytes.len())
}

/// Index of the closest `"` strictly before `before` that is not itself escaped.
fn last_unescaped_quote(bytes: &[u8], before: usize) -> Option<usize> {
    (0..before.min(bytes.len()))
        .rev()
        .find(|&i| bytes[i] == b'"' && !is_escaped(bytes, i))
}

fn is_escaped(bytes: &[u8], idx: usize) -> bool {
    let backslashes = bytes[..idx]
        .iter()
        .rev()
        .take_while(|b| **b == b'\\')
        .count();
    backslashes % 2 == 1
}
