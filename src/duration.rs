/// Parses `H:M:S` duration text into whole seconds.
///
/// Missing trailing parts count as zero and tokens that are not non-negative
/// numbers also count as zero, so this never fails.
pub fn parse_duration(text: &str) -> i64 {
    let text = text.trim();
    if text.is_empty() {
        return 0;
    }

    let mut parts = text.split(':').map(parse_part);
    let hours = parts.next().unwrap_or(0);
    let minutes = parts.next().unwrap_or(0);
    let seconds = parts.next().unwrap_or(0);

    hours
        .saturating_mul(3600)
        .saturating_add(minutes.saturating_mul(60))
        .saturating_add(seconds)
}

/// Postgres may render fractional seconds (`00:00:30.5`); those are floored.
fn parse_part(token: &str) -> i64 {
    match token.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value.floor() as i64,
        _ => 0,
    }
}

/// Formats seconds as zero-padded `HH:MM:SS`; negative input clamps to zero.
pub fn format_duration(seconds: i64) -> String {
    let total = seconds.max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// Float variant for averages; fractional seconds are floored.
pub fn format_duration_secs(seconds: f64) -> String {
    if !seconds.is_finite() {
        return format_duration(0);
    }
    format_duration(seconds.floor() as i64)
}
