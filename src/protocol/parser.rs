//! Weight line parsing.
//!
//! Scale output is free-form: `"+  123.4 g"`, `"  45.67 kg"`, `"NET"`,
//! `"OVERLOAD"`. Parsing never fails; text without a number yields a
//! reading with no value.

use crate::types::{DEFAULT_UNIT, WeightReading};

/// Parses a decoded line into a [`WeightReading`].
///
/// The first whitespace-separated token that parses as a finite signed
/// number (after dropping leading `+` signs) becomes the value, and the
/// token right after it, if any, becomes the unit.
#[must_use]
pub fn parse_weight(text: &str) -> WeightReading {
    let (value, unit) = scan_tokens(text);
    WeightReading::new(text, value, unit.unwrap_or(DEFAULT_UNIT))
}

fn scan_tokens(text: &str) -> (Option<f64>, Option<&str>) {
    let mut tokens = text.split_whitespace();

    while let Some(token) = tokens.next() {
        if let Some(value) = parse_number(token) {
            return (Some(value), tokens.next());
        }
    }
    (None, None)
}

fn parse_number(token: &str) -> Option<f64> {
    token
        .replace('+', "")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signed_grams() {
        let reading = parse_weight("+  123.4 g");
        assert_eq!(reading.value, Some(123.4));
        assert_eq!(reading.unit, "g");
        assert_eq!(reading.raw, "+  123.4 g");
    }

    #[test]
    fn test_parse_kilograms() {
        let reading = parse_weight("  45.67 kg");
        assert_eq!(reading.value, Some(45.67));
        assert_eq!(reading.unit, "kg");
    }

    #[test]
    fn test_parse_negative() {
        let reading = parse_weight("-0.35 g");
        assert_eq!(reading.value, Some(-0.35));

        // A sign separated from its digits is a token of its own.
        let reading = parse_weight("-   0.35 g");
        assert_eq!(reading.value, Some(0.35));
        assert_eq!(reading.unit, "g");
    }

    #[test]
    fn test_plus_signs_ignored_anywhere() {
        let reading = parse_weight("12.5+ g");
        assert_eq!(reading.value, Some(12.5));
        assert_eq!(reading.unit, "g");

        assert_eq!(parse_weight("+12+.0 kg").value, Some(12.0));
        assert_eq!(parse_weight("+ g").value, None);
    }

    #[test]
    fn test_parse_overload() {
        let reading = parse_weight("OVERLOAD");
        assert_eq!(reading.value, None);
        assert_eq!(reading.unit, "g");
        assert_eq!(reading.raw, "OVERLOAD");
    }

    #[test]
    fn test_parse_skips_leading_label() {
        let reading = parse_weight("NET +  12.0 g");
        assert_eq!(reading.value, Some(12.0));
        assert_eq!(reading.unit, "g");

        let reading = parse_weight("G     1.25 ct");
        assert_eq!(reading.value, Some(1.25));
        assert_eq!(reading.unit, "ct");
    }

    #[test]
    fn test_parse_number_without_unit() {
        let reading = parse_weight("+  7.5");
        assert_eq!(reading.value, Some(7.5));
        assert_eq!(reading.unit, "g");
    }

    #[test]
    fn test_parse_rejects_non_finite() {
        let reading = parse_weight("nan g");
        assert_eq!(reading.value, None);

        let reading = parse_weight("inf 3.0 g");
        assert_eq!(reading.value, Some(3.0));
        assert_eq!(reading.unit, "g");
    }

    #[test]
    fn test_parse_empty() {
        let reading = parse_weight("");
        assert_eq!(reading.value, None);
        assert_eq!(reading.unit, "g");
    }
}
