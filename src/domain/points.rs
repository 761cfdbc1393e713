use std::fmt;

use serde::Serializer;

/// Points are represented as integer hundredths to avoid floating-point drift.
/// 729.98 points = 72998.
pub type Points = i64;

/// Format points as a human-readable decimal string.
/// Example: 72998 -> "729.98", -1234 -> "-12.34"
pub fn format_points(points: Points) -> String {
    let sign = if points < 0 { "-" } else { "" };
    let abs_points = points.abs();
    let whole = abs_points / 100;
    let remainder = abs_points % 100;
    format!("{}{}.{:02}", sign, whole, remainder)
}

/// Parse a decimal string into points.
/// Example: "729.98" -> 72998, "12.5" -> 1250, "100" -> 10000
pub fn parse_points(input: &str) -> Result<Points, ParsePointsError> {
    let input = input.trim();
    let negative = input.starts_with('-');
    let input = input.trim_start_matches('-');

    let parts: Vec<&str> = input.split('.').collect();
    match parts.len() {
        1 => {
            let whole: i64 = parts[0]
                .parse()
                .map_err(|_| ParsePointsError::InvalidFormat)?;
            let points = whole
                .checked_mul(100)
                .ok_or(ParsePointsError::OutOfRange)?;
            Ok(if negative { -points } else { points })
        }
        2 => {
            let whole: i64 = if parts[0].is_empty() {
                0
            } else {
                parts[0]
                    .parse()
                    .map_err(|_| ParsePointsError::InvalidFormat)?
            };

            // Pad or truncate the fractional part to two digits
            let fraction = parts[1];
            if !fraction.chars().all(|c| c.is_ascii_digit()) {
                return Err(ParsePointsError::InvalidFormat);
            }
            let hundredths: i64 = match fraction.len() {
                0 => 0,
                1 => {
                    fraction
                        .parse::<i64>()
                        .map_err(|_| ParsePointsError::InvalidFormat)?
                        * 10
                }
                _ => fraction[..2]
                    .parse()
                    .map_err(|_| ParsePointsError::InvalidFormat)?,
            };

            let points = whole
                .checked_mul(100)
                .and_then(|p| p.checked_add(hundredths))
                .ok_or(ParsePointsError::OutOfRange)?;
            Ok(if negative { -points } else { points })
        }
        _ => Err(ParsePointsError::InvalidFormat),
    }
}

/// Largest single accrual the ledger accepts: one billion points.
pub const MAX_ACCRUAL: Points = 100_000_000_000;

/// Convert an accrual reported as a JSON number into points, rounding to the
/// nearest hundredth. Zero or negative inputs yield zero; `None` when the value
/// is not finite or exceeds [`MAX_ACCRUAL`].
pub fn points_from_f64(value: f64) -> Option<Points> {
    if !value.is_finite() {
        return None;
    }
    if value <= 0.0 {
        return Some(0);
    }
    let hundredths = (value * 100.0).round();
    if hundredths > MAX_ACCRUAL as f64 {
        return None;
    }
    Some(hundredths as Points)
}

/// Convert points back into a decimal number for JSON output.
pub fn points_to_f64(points: Points) -> f64 {
    points as f64 / 100.0
}

/// serde helper: serialize points as a decimal number (`72998` -> `729.98`).
pub fn serialize_points<S: Serializer>(points: &Points, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(points_to_f64(*points))
}

/// serde helper for optional points.
pub fn serialize_optional_points<S: Serializer>(
    points: &Option<Points>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match points {
        Some(p) => serializer.serialize_some(&points_to_f64(*p)),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsePointsError {
    InvalidFormat,
    OutOfRange,
}

impl fmt::Display for ParsePointsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsePointsError::InvalidFormat => write!(f, "invalid points format"),
            ParsePointsError::OutOfRange => write!(f, "points value out of range"),
        }
    }
}

impl std::error::Error for ParsePointsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_points() {
        assert_eq!(format_points(72998), "729.98");
        assert_eq!(format_points(50000), "500.00");
        assert_eq!(format_points(1), "0.01");
        assert_eq!(format_points(0), "0.00");
        assert_eq!(format_points(-20000), "-200.00");
    }

    #[test]
    fn test_parse_points() {
        assert_eq!(parse_points("729.98"), Ok(72998));
        assert_eq!(parse_points("500"), Ok(50000));
        assert_eq!(parse_points("751.5"), Ok(75150));
        assert_eq!(parse_points(".50"), Ok(50));
        assert_eq!(parse_points("-3"), Ok(-300));
        assert_eq!(parse_points("10.999"), Ok(1099)); // Truncates
    }

    #[test]
    fn test_parse_points_invalid() {
        assert!(parse_points("abc").is_err());
        assert!(parse_points("1.2.3").is_err());
        assert!(parse_points("1.-5").is_err());
        assert_eq!(
            parse_points("99999999999999999999"),
            Err(ParsePointsError::InvalidFormat)
        );
        assert_eq!(
            parse_points("999999999999999999"),
            Err(ParsePointsError::OutOfRange)
        );
    }

    #[test]
    fn test_points_from_f64_rounds_to_hundredths() {
        assert_eq!(points_from_f64(500.0), Some(50000));
        assert_eq!(points_from_f64(729.98), Some(72998));
        assert_eq!(points_from_f64(0.001), Some(0));
        assert_eq!(points_from_f64(-1.0), Some(0));
    }

    #[test]
    fn test_points_from_f64_rejects_out_of_range() {
        assert_eq!(points_from_f64(1_000_000_000.0), Some(MAX_ACCRUAL));
        assert_eq!(points_from_f64(1_000_000_000.01), None);
        assert_eq!(points_from_f64(1e17), None);
        assert_eq!(points_from_f64(f64::NAN), None);
        assert_eq!(points_from_f64(f64::INFINITY), None);
    }

    #[test]
    fn test_serialize_points_as_decimal() {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(serialize_with = "serialize_points")]
            sum: Points,
        }

        let json = serde_json::to_string(&Wrapper { sum: 75150 }).unwrap();
        assert_eq!(json, r#"{"sum":751.5}"#);
    }
}
