//! Extraction of hashrate samples from miner stdout.

use thiserror::Error;

/// Marker identifying the miner's periodic total-speed report.
pub const SPEED_MARKER: &str = "Total Speed: ";

const SPEED_LINE_FIELDS: usize = 13;
const SPEED_FIELD_INDEX: usize = 4;
const MEGAHASH: f64 = 1e6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("invalid hashrate {field:?}: {reason}")]
    InvalidNumber { field: String, reason: String },
}

/// Parse one line of miner output.
///
/// Returns `None` for lines that are not speed reports, and the hashrate in
/// H/s for well-formed reports such as
/// `ETH - Total Speed: 29.977 Mh/s, Total Shares: 0, Rejected: 0, Time: 00:00`.
pub fn parse_hashrate(line: &str) -> Option<Result<f64, ParseError>> {
    if !line.contains(SPEED_MARKER) {
        return None;
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != SPEED_LINE_FIELDS {
        return Some(Err(ParseError::FieldCount {
            expected: SPEED_LINE_FIELDS,
            actual: fields.len(),
        }));
    }

    let field = fields[SPEED_FIELD_INDEX];
    let parsed = field
        .parse::<f64>()
        .map_err(|e| ParseError::InvalidNumber {
            field: field.to_string(),
            reason: e.to_string(),
        })
        .and_then(|mh| {
            if mh.is_finite() && mh >= 0.0 {
                Ok(mh * MEGAHASH)
            } else {
                Err(ParseError::InvalidNumber {
                    field: field.to_string(),
                    reason: "not a finite non-negative number".to_string(),
                })
            }
        });

    Some(parsed)
}
