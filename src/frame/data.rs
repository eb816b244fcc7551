//! Data frame: one measurement record per configured station, laid out according to that
//! station's [`FormatFlags`](crate::frame::configuration::FormatFlags).

use bitflags::bitflags;

use crate::error::CodecError;
use crate::frame::configuration::{ConfigurationFrame, FormatFlags, StationConfig};

bitflags! {
    /// The per-station `stat` word (§3). Trigger reason and time-quality occupy multi-bit
    /// sub-fields, exposed separately via [`StatWord::trigger_reason`]/[`StatWord::time_quality`]
    /// rather than as flags.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct StatWord: u16 {
        /// Bit 15: 0 = good measurement data, 1 = error.
        const DATA_ERROR = 1 << 15;
        /// Bit 14: 0 = in sync, 1 = not synchronized to a UTC time source.
        const TIME_UNSYNCHRONIZED = 1 << 14;
        /// Bit 13: data sorting, 0 = by timestamp, 1 = by arrival.
        const SORTING_BY_ARRIVAL = 1 << 13;
        /// Bit 12: PMU trigger detected.
        const TRIGGER_DETECTED = 1 << 12;
        /// Bit 11: configuration change pending in the next few seconds.
        const CONFIG_CHANGE_PENDING = 1 << 11;
        /// Bit 10: data modified by a post-processing filter.
        const DATA_MODIFIED = 1 << 10;
        /// Bit 4: PMU time is locked but within the unlocked-time tolerance window.
        const UNLOCKED_TIME = 1 << 4;
    }
}

impl StatWord {
    /// Bits 5..7: trigger reason code (0-7, meaning defined outside this crate's scope).
    pub fn trigger_reason(self) -> u8 {
        ((self.bits() >> 5) & 0b111) as u8
    }

    pub fn with_trigger_reason(self, reason: u8) -> Self {
        let cleared = self.bits() & !(0b111 << 5);
        Self::from_bits_retain(cleared | (u16::from(reason & 0b111) << 5))
    }

    /// Bits 8..9: time quality / unlocked-time estimate code.
    pub fn time_quality(self) -> u8 {
        ((self.bits() >> 8) & 0b11) as u8
    }

    pub fn with_time_quality(self, quality: u8) -> Self {
        let cleared = self.bits() & !(0b11 << 8);
        Self::from_bits_retain(cleared | (u16::from(quality & 0b11) << 8))
    }
}

/// A single phasor measurement, in whichever representation its station's format word declares.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Phasor {
    Rectangular { real: f64, imag: f64 },
    /// `angle` in radians, per Open Question (c).
    Polar { magnitude: f64, angle: f64 },
}

/// One station's measurement record within a [`DataFrame`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StationData {
    pub stat: StatWord,
    pub phasors: Vec<Phasor>,
    /// Frequency deviation from nominal, Hz.
    pub freq: f64,
    /// Rate of change of frequency, Hz/s.
    pub dfreq: f64,
    pub analogs: Vec<f64>,
    /// One bit per digital input, 16 bits per configured digital word.
    pub digitals: Vec<u16>,
}

impl StationData {
    pub fn validate(&self, station: &StationConfig) -> Result<(), CodecError> {
        check_len("phasors", self.phasors.len(), station.phasor_num())?;
        check_len("analogs", self.analogs.len(), station.analog_num())?;
        check_len("digitals", self.digitals.len(), station.digital_num())?;
        Ok(())
    }
}

fn check_len(what: &'static str, actual: usize, declared: usize) -> Result<(), CodecError> {
    if actual != declared {
        return Err(CodecError::InvalidLayout {
            what,
            declared,
            actual,
        });
    }
    Ok(())
}

/// A complete Data frame: common frame header fields plus one record per station in the bound
/// configuration, in configuration order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DataFrame {
    pub pmu_id: u16,
    pub soc: u32,
    pub frac_sec: u32,
    pub time_quality: u8,
    pub stations: Vec<StationData>,
}

impl DataFrame {
    /// Validate this frame's station records against the configuration it will be encoded
    /// against, per (I6).
    pub fn validate(&self, config: &ConfigurationFrame) -> Result<(), CodecError> {
        if self.frac_sec >= config.time_base {
            return Err(CodecError::FieldRange { field: "frac_sec" });
        }
        check_len("stations", self.stations.len(), config.stations.len())?;
        for (data, station) in self.stations.iter().zip(&config.stations) {
            data.validate(station)?;
        }
        Ok(())
    }
}

/// Scale a fixed-point rectangular phasor component using a station's phasor scale factor.
///
/// Units are 10 uV/10 uA per LSB per Annex D; `scale` is that factor, `raw` the signed 16-bit
/// wire value.
pub(crate) fn scale_phasor_component(raw: i16, scale: u32) -> f64 {
    f64::from(raw) * f64::from(scale) * 1e-5
}

pub(crate) fn unscale_phasor_component(value: f64, scale: u32) -> i16 {
    (value / (f64::from(scale) * 1e-5)).round() as i16
}

/// Polar angle is 1e-4 radians per LSB.
pub(crate) fn scale_angle(raw: i16) -> f64 {
    f64::from(raw) * 1e-4
}

pub(crate) fn unscale_angle(angle: f64) -> i16 {
    (angle / 1e-4).round() as i16
}

/// Polar magnitude shares the same per-unit scale as rectangular components but is unsigned.
pub(crate) fn scale_magnitude(raw: u16, scale: u32) -> f64 {
    f64::from(raw) * f64::from(scale) * 1e-5
}

pub(crate) fn unscale_magnitude(value: f64, scale: u32) -> u16 {
    (value / (f64::from(scale) * 1e-5)).round() as u16
}

/// Fixed-point analog values are scaled by the station's signed analog scale factor.
pub(crate) fn scale_analog(raw: i16, scale: i32) -> f64 {
    f64::from(raw) * f64::from(scale)
}

pub(crate) fn unscale_analog(value: f64, scale: i32) -> i16 {
    if scale == 0 {
        0
    } else {
        (value / f64::from(scale)).round() as i16
    }
}

/// Fixed-point frequency deviation is in mHz.
pub(crate) fn scale_freq(raw: i16) -> f64 {
    f64::from(raw) / 1000.0
}

pub(crate) fn unscale_freq(hz: f64) -> i16 {
    (hz * 1000.0).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_word_trigger_reason_round_trips() {
        let stat = StatWord::DATA_ERROR.with_trigger_reason(5);
        assert_eq!(stat.trigger_reason(), 5);
        assert!(stat.contains(StatWord::DATA_ERROR));
    }

    #[test]
    fn stat_word_time_quality_round_trips() {
        let stat = StatWord::empty().with_time_quality(2);
        assert_eq!(stat.time_quality(), 2);
    }

    #[test]
    fn angle_scale_matches_spec_example() {
        // Scenario 3: angle=7854 raw ~= pi/4 radians.
        let angle = scale_angle(7854);
        assert!((angle - std::f64::consts::FRAC_PI_4).abs() < 1e-3);
        assert_eq!(unscale_angle(angle), 7854);
    }

    #[test]
    fn freq_scale_matches_spec_example() {
        assert_eq!(scale_freq(50), 0.05);
        assert_eq!(unscale_freq(0.05), 50);
    }

    #[test]
    fn analog_scale_matches_spec_example() {
        assert_eq!(scale_analog(-1000, 1), -1000.0);
    }

    #[test]
    fn station_data_validates_against_config() {
        let station_cfg = StationConfig::default_station();
        let data = StationData {
            stat: StatWord::empty(),
            phasors: vec![Phasor::Polar {
                magnitude: 1.0,
                angle: 0.0,
            }],
            freq: 0.0,
            dfreq: 0.0,
            analogs: vec![0.0],
            digitals: vec![0],
        };
        assert!(data.validate(&station_cfg).is_ok());
    }
}
