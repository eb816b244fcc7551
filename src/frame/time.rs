//! SOC + FRACSEC time tagging, per §4.2: `soc` is whole seconds since the UNIX epoch, `frac_sec`
//! is the fraction of that second expressed as a count out of `time_base`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::CodecError;

/// Split a UTC instant into `(soc, frac_sec)` against the given `time_base`.
///
/// `time_base == 0` is a fatal configuration error (Open Question (b) in the design notes), not a
/// division that saturates or panics.
pub fn encode(instant: SystemTime, time_base: u32) -> Result<(u32, u32), CodecError> {
    if time_base == 0 {
        return Err(CodecError::FieldRange { field: "time_base" });
    }

    let since_epoch = instant
        .duration_since(UNIX_EPOCH)
        .map_err(|_| CodecError::FieldRange { field: "soc" })?;

    let soc = u32::try_from(since_epoch.as_secs()).map_err(|_| CodecError::FieldRange {
        field: "soc",
    })?;

    let fraction = since_epoch.subsec_nanos() as f64 / 1_000_000_000.0;
    let frac_sec = (fraction * f64::from(time_base)).round() as u32;

    // Rounding can push frac_sec up to time_base exactly; fold that back into the next second.
    if frac_sec >= time_base {
        return Ok((soc + 1, 0));
    }

    Ok((soc, frac_sec))
}

/// Reconstruct a UTC instant from `(soc, frac_sec, time_base)`.
pub fn decode(soc: u32, frac_sec: u32, time_base: u32) -> Result<SystemTime, CodecError> {
    if time_base == 0 {
        return Err(CodecError::FieldRange { field: "time_base" });
    }

    if frac_sec >= time_base {
        return Err(CodecError::FieldRange { field: "frac_sec" });
    }

    let fraction = f64::from(frac_sec) / f64::from(time_base);
    let nanos = (fraction * 1_000_000_000.0).round() as u32;

    Ok(UNIX_EPOCH + Duration::new(u64::from(soc), nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_base_zero_is_fatal() {
        assert_eq!(
            encode(UNIX_EPOCH, 0),
            Err(CodecError::FieldRange { field: "time_base" })
        );
        assert_eq!(
            decode(0, 0, 0),
            Err(CodecError::FieldRange { field: "time_base" })
        );
    }

    #[test]
    fn frac_sec_must_be_less_than_time_base() {
        assert_eq!(
            decode(0, 1_000_000, 1_000_000),
            Err(CodecError::FieldRange { field: "frac_sec" })
        );
    }

    #[test]
    fn round_trips_whole_seconds() {
        let instant = UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        let (soc, frac_sec) = encode(instant, 1_000_000).unwrap();

        assert_eq!(soc, 1_000_000_000);
        assert_eq!(frac_sec, 0);

        let back = decode(soc, frac_sec, 1_000_000).unwrap();
        assert_eq!(back, instant);
    }

    #[test]
    fn round_trips_fractional_seconds() {
        let instant = UNIX_EPOCH + Duration::new(1_000_000_000, 500_000_000);
        let (soc, frac_sec) = encode(instant, 1_000_000).unwrap();

        assert_eq!(soc, 1_000_000_000);
        assert_eq!(frac_sec, 500_000);

        let back = decode(soc, frac_sec, 1_000_000).unwrap();
        assert_eq!(back, instant);
    }
}
