use std::{str::FromStr, time::Duration};

use cld::ClDuration;

pub mod logging;
pub mod test_utils;

#[derive(Clone, Debug, thiserror::Error)]
#[error("failed to parse duration: {reason}")]
pub struct ParseDurationError {
    reason: String,
}

/// Parse a [`Duration`] from a human-readable string like `7s`, `500ms` or `1m`.
pub fn parse_duration(s: &str) -> Result<Duration, ParseDurationError> {
    ClDuration::from_str(s)
        .map(Duration::from)
        .map_err(|err| ParseDurationError {
            reason: err.to_string(),
        })
}
