//! Result marker used by the hosted codec
//!
//! Every raw result of the hosted codec starts with one marker byte:
//! `0` means the rest is a UTF-8 error message, `1` means the rest is the
//! payload. Any other marker is a protocol violation.

use thiserror::Error;

const MARKER_ERR: u8 = 0;
const MARKER_OK: u8 = 1;

/// Failure carried by a marked result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkedError {
    /// The result buffer was empty
    #[error("empty result buffer")]
    Empty,

    /// The codec reported an error
    #[error("{0}")]
    Reported(String),
}

/// Split a marked result into its payload or reported error
///
/// # Panics
///
/// Panics if the marker is neither `0` nor `1`; the producer broke the
/// protocol and nothing after the marker can be trusted.
pub fn unwrap_marked(bytes: &[u8]) -> Result<&[u8], MarkedError> {
    let (marker, rest) = bytes.split_first().ok_or(MarkedError::Empty)?;
    match *marker {
        MARKER_OK => Ok(rest),
        MARKER_ERR => Err(MarkedError::Reported(
            String::from_utf8_lossy(rest).into_owned(),
        )),
        other => panic!("invalid result marker {other}"),
    }
}

/// Prefix a payload with the success marker
pub fn mark_ok(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(MARKER_OK);
    out.extend_from_slice(payload);
    out
}

/// Prefix an error message with the error marker
pub fn mark_err(message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 1);
    out.push(MARKER_ERR);
    out.extend_from_slice(message.as_bytes());
    out
}
