//! Bounds-checked coercion of user-supplied sampling scalars.
//!
//! Form inputs arrive as free text. A value that does not parse, or parses to
//! something outside the allowed range, is a policy violation resolved by
//! falling back to the documented default; callers never see an error.

use std::str::FromStr;

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CastError {
    #[error("not a valid value: {0:?}")]
    Invalid(String),
    #[error("outside the allowed range: {0:?}")]
    OutOfRange(String),
}

/// Parse `raw` and check it against the inclusive `[min, max]` range.
///
/// NaN never lies inside a range, so float inputs like `"nan"` are rejected.
pub fn try_cast<T>(raw: &str, min: T, max: T) -> Result<T, CastError>
where
    T: FromStr + PartialOrd,
{
    let trimmed = raw.trim();
    let value: T = trimmed
        .parse()
        .map_err(|_| CastError::Invalid(trimmed.to_string()))?;
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(CastError::OutOfRange(trimmed.to_string()))
    }
}

/// Like [`try_cast`] but substitutes `default` for any failure.
pub fn cast<T>(raw: &str, min: T, max: T, default: T) -> T
where
    T: FromStr + PartialOrd,
{
    match try_cast(raw, min, max) {
        Ok(value) => value,
        Err(err) => {
            debug!(%err, "using default for sampling parameter");
            default
        }
    }
}

/// [`cast`] for inputs that may be missing altogether.
pub fn cast_opt<T>(raw: Option<&str>, min: T, max: T, default: T) -> T
where
    T: FromStr + PartialOrd,
{
    match raw {
        Some(raw) => cast(raw, min, max, default),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_range_values_pass_through() {
        assert_eq!(cast("0.5", 0.0_f32, 1.0, 0.2), 0.5);
        assert_eq!(cast(" 7 ", 1_u32, 40, 40), 7);
        assert_eq!(cast("1", 0.0_f32, 1.0, 0.2), 1.0);
    }

    #[test]
    fn out_of_range_falls_back() {
        assert_eq!(cast("5", 0.0_f32, 1.0, 0.2), 0.2);
        assert_eq!(cast("0", 1_u32, 40, 40), 40);
        assert_eq!(cast("-0.1", 0.0_f32, 1.0, 0.8), 0.8);
    }

    #[test]
    fn invalid_values_fall_back() {
        assert_eq!(cast("abc", 1_u32, 40, 40), 40);
        assert_eq!(cast("", 1_u32, 1024, 1024), 1024);
        assert_eq!(cast("2.5", 1_u32, 40, 40), 40);
        assert_eq!(cast("nan", 0.0_f32, 1.0, 0.2), 0.2);
    }

    #[test]
    fn try_cast_distinguishes_failures() {
        assert_eq!(
            try_cast("x", 0_u32, 1),
            Err(CastError::Invalid("x".to_string()))
        );
        assert_eq!(
            try_cast("9", 0_u32, 1),
            Err(CastError::OutOfRange("9".to_string()))
        );
    }

    #[test]
    fn missing_values_use_default() {
        assert_eq!(cast_opt(None, 0.0_f32, 1.0, 0.8), 0.8);
        assert_eq!(cast_opt(Some("0.3"), 0.0_f32, 1.0, 0.8), 0.3);
    }
}
