//! Line-oriented wire codec.
//!
//! Every message is plain text: whitespace-separated numeric fields, one
//! logical record per fixed or self-declared number of lines.
//!
//! | Message | Direction | Layout |
//! |---|---|---|
//! | Observation | producer → modeling | count line `N`, then `N` × (index line, reading line); `N = 0` means "not seen" |
//! | Fused state | modeling → mission | one line, `STATE_LEN` values in enumeration order |
//! | Command | mission → control | one opaque line |
//!
//! An observation index line holds one or more `a b c` triples.  Each triple
//! is an alternative interpretation of the same readings (more than one makes
//! the record ambiguous):
//!
//! ```text
//! 1
//! 12 13 -2
//! 0.05 0 4.2
//! ```

use std::fmt::Write as _;

use triton_estimation::{Assignment, Matrix, Observation, Readings};
use triton_types::{STATE_LEN, TritonError};

/// Largest record count a reader accepts in one observation message.
pub const MAX_RECORDS_PER_MESSAGE: usize = 64;

/// Parse the count line of an observation message.  The limit
/// [`MAX_RECORDS_PER_MESSAGE`] is enforced by the reader, which has to drain
/// the declared lines first.
pub fn decode_count(line: &str) -> Result<usize, TritonError> {
    let mut fields = line.split_whitespace();
    let count = match (fields.next(), fields.next()) {
        (Some(field), None) => field
            .parse::<usize>()
            .map_err(|e| TritonError::CorruptData(format!("bad record count `{field}`: {e}")))?,
        _ => {
            return Err(TritonError::CorruptData(format!(
                "expected a single record count, got `{line}`"
            )));
        }
    };
    Ok(count)
}

/// Decode one two-line observation record.
pub fn decode_record(index_line: &str, reading_line: &str) -> Result<Observation, TritonError> {
    let indices = parse_fields::<i64>(index_line, "index")?;
    if indices.is_empty() || indices.len() % 3 != 0 {
        return Err(TritonError::CorruptData(format!(
            "index line must hold whole `a b c` triples, got `{index_line}`"
        )));
    }
    let assignments = indices
        .chunks_exact(3)
        .map(|t| Assignment::from_triple(t[0], t[1], t[2]))
        .collect::<Result<Vec<_>, _>>()?;

    let readings = parse_fields::<f32>(reading_line, "reading")?;
    let [first, second, third] = readings[..] else {
        return Err(TritonError::CorruptData(format!(
            "reading line must hold exactly three values, got `{reading_line}`"
        )));
    };

    Observation::ambiguous(assignments, Readings::new(first, second, third))
}

/// Encode a whole observation message.  An empty slice, or one holding only
/// [`Observation::NotSeen`], becomes the `0` sentinel.
pub fn encode_observations(observations: &[Observation]) -> String {
    let seen: Vec<_> = observations
        .iter()
        .filter_map(|o| match o {
            Observation::Seen {
                assignments,
                readings,
            } => Some((assignments, readings)),
            Observation::NotSeen => None,
        })
        .collect();

    let mut out = format!("{}\n", seen.len());
    for (assignments, readings) in seen {
        let triples: Vec<String> = assignments
            .iter()
            .map(|a| {
                let (x, y, c) = a.to_triple();
                format!("{x} {y} {c}")
            })
            .collect();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{}", triples.join(" "));
        let _ = writeln!(
            out,
            "{} {} {}",
            readings.first, readings.second, readings.third
        );
    }
    out
}

/// Encode a fused-state vector as one newline-terminated line.
pub fn encode_fused_state(state: &Matrix) -> Result<String, TritonError> {
    if state.len() != STATE_LEN {
        return Err(TritonError::ShapeMismatch {
            left: (STATE_LEN, 1),
            right: state.shape(),
        });
    }
    let fields: Vec<String> = state.as_slice().iter().map(f32::to_string).collect();
    Ok(format!("{}\n", fields.join(" ")))
}

/// Decode a fused-state line into a `STATE_LEN × 1` vector.
pub fn decode_fused_state(line: &str) -> Result<Matrix, TritonError> {
    let values = parse_fields::<f32>(line, "state")?;
    if values.len() != STATE_LEN {
        return Err(TritonError::CorruptData(format!(
            "fused state holds {} values, expected {STATE_LEN}",
            values.len()
        )));
    }
    Ok(Matrix::from(values))
}

/// One opaque mission → control command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    /// Build a command.  Embedded line breaks would split the record, so
    /// they are rejected.
    pub fn new(text: impl Into<String>) -> Result<Self, TritonError> {
        let text = text.into();
        if text.contains(['\n', '\r']) {
            return Err(TritonError::CorruptData(
                "command must fit on a single line".to_string(),
            ));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn parse_fields<T>(line: &str, what: &str) -> Result<Vec<T>, TritonError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    line.split_whitespace()
        .map(|field| {
            field
                .parse::<T>()
                .map_err(|e| TritonError::CorruptData(format!("bad {what} field `{field}`: {e}")))
        })
        .collect()
}
