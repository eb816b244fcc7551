//! Configuration frame (v1/v2): the station metadata that gives every other frame type meaning.
//!
//! A [`ConfigurationFrame`] is both a wire frame and the shape [`crate::config_store`] builds up
//! incrementally before it is ever sent.

use bitflags::bitflags;

use crate::error::CodecError;
use crate::frame::ascii::Name16;

/// Which sync-word frame type a [`ConfigurationFrame`] was or will be carried as.
///
/// The two versions share byte layout; they differ only in how a consumer is meant to interpret
/// phasor scaling (v2 adds no new wire fields over v1).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ConfigVersion {
    V1,
    V2,
}

bitflags! {
    /// The per-station `format` word. Only the low 4 bits are defined; the rest are reserved and
    /// round-trip as zero.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FormatFlags: u16 {
        /// Phasors are polar (magnitude, angle) rather than rectangular (real, imaginary).
        const PHASOR_POLAR = 0b0001;
        /// Phasors are IEEE-754 floats rather than scaled 16-bit integers.
        const PHASOR_FLOAT = 0b0010;
        /// Analog values are IEEE-754 floats rather than scaled 16-bit integers.
        const ANALOG_FLOAT = 0b0100;
        /// Frequency/ROCOF are IEEE-754 floats rather than scaled 16-bit integers.
        const FREQ_FLOAT = 0b1000;
    }
}

impl Default for FormatFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// A phasor's unit of measure plus its fixed-point scale factor (`phasor_unit` in §3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PhasorUnit {
    /// `true` for current, `false` for voltage.
    pub is_current: bool,
    /// Scale factor in units of 10 uV or 10 uA per bit (low 24 bits of the wire word).
    pub scale: u32,
}

impl PhasorUnit {
    fn pack(self) -> u32 {
        let flag = if self.is_current { 1u32 << 31 } else { 0 };
        flag | (self.scale & 0x00FF_FFFF)
    }

    fn unpack(word: u32) -> Self {
        Self {
            is_current: word & (1 << 31) != 0,
            scale: word & 0x00FF_FFFF,
        }
    }
}

impl Default for PhasorUnit {
    fn default() -> Self {
        Self {
            is_current: false,
            scale: 1,
        }
    }
}

/// An analog channel's type code plus signed scale factor (`analog_unit` in §3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AnalogUnit {
    /// High byte of the wire word: single point-on-wave, RMS, peak, etc. Interpreted as an opaque
    /// code; the standard does not name a closed enumeration.
    pub kind: u8,
    /// Signed scale factor (low 3 bytes, sign-extended).
    pub scale: i32,
}

impl AnalogUnit {
    fn pack(self) -> u32 {
        let kind = u32::from(self.kind) << 24;
        let scale = (self.scale as u32) & 0x00FF_FFFF;
        kind | scale
    }

    fn unpack(word: u32) -> Self {
        let kind = (word >> 24) as u8;
        let raw = word & 0x00FF_FFFF;
        // Sign-extend a 24-bit two's-complement value into i32.
        let scale = ((raw << 8) as i32) >> 8;
        Self { kind, scale }
    }
}

impl Default for AnalogUnit {
    fn default() -> Self {
        Self { kind: 0, scale: 1 }
    }
}

/// A digital status word's normal-state mask and valid-input mask (`digital_unit` in §3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DigitalUnit {
    /// High word: the value each of the 16 bits takes when in its normal state.
    pub normal_state: u16,
    /// Low word: which of the 16 bits are wired to a real input.
    pub valid_inputs: u16,
}

impl DigitalUnit {
    fn pack(self) -> u32 {
        (u32::from(self.normal_state) << 16) | u32::from(self.valid_inputs)
    }

    fn unpack(word: u32) -> Self {
        Self {
            normal_state: (word >> 16) as u16,
            valid_inputs: word as u16,
        }
    }
}

impl Default for DigitalUnit {
    fn default() -> Self {
        Self {
            normal_state: 0,
            valid_inputs: 0xFFFF,
        }
    }
}

/// One station's complete configuration entry, per IEEE C37.118.2-2011 Annex D Table D.2 for
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StationConfig {
    pub station_name: Name16,
    pub id_code: u16,
    pub format: FormatFlags,
    pub phasor_names: Vec<Name16>,
    pub analog_names: Vec<Name16>,
    /// One [`Name16`] per digital status bit; always a multiple of 16 in length.
    pub digital_names: Vec<Name16>,
    pub phasor_units: Vec<PhasorUnit>,
    pub analog_units: Vec<AnalogUnit>,
    pub digital_units: Vec<DigitalUnit>,
    /// `true` for 60 Hz nominal, `false` for 50 Hz (bit 0 of `fnom`).
    pub nominal_60hz: bool,
    pub cfg_count: u16,
}

impl StationConfig {
    /// Annex D Table D.2's single-phasor, single-analog, one-digital-word default station.
    pub fn default_station() -> Self {
        Self {
            station_name: Name16::new("STATION1").unwrap(),
            id_code: 1,
            format: FormatFlags::empty(),
            phasor_names: vec![Name16::new("VA").unwrap()],
            analog_names: vec![Name16::new("ANALOG1").unwrap()],
            digital_names: vec![Name16::new("DIGITAL1").unwrap(); 16],
            phasor_units: vec![PhasorUnit::default()],
            analog_units: vec![AnalogUnit::default()],
            digital_units: vec![DigitalUnit::default()],
            nominal_60hz: true,
            cfg_count: 1,
        }
    }

    pub fn phasor_num(&self) -> usize {
        self.phasor_names.len()
    }

    pub fn analog_num(&self) -> usize {
        self.analog_names.len()
    }

    /// Number of 16-bit digital status words (each carrying 16 named bits).
    pub fn digital_num(&self) -> usize {
        self.digital_names.len() / 16
    }

    /// Validate that every per-channel list agrees with its sibling count, per (I3).
    pub fn validate(&self) -> Result<(), CodecError> {
        check_len("phasor_units", self.phasor_units.len(), self.phasor_num())?;
        check_len("analog_units", self.analog_units.len(), self.analog_num())?;
        check_len(
            "digital_units",
            self.digital_units.len(),
            self.digital_num(),
        )?;
        if self.digital_names.len() % 16 != 0 {
            return Err(CodecError::InvalidLayout {
                what: "digital_names",
                declared: self.digital_num() * 16,
                actual: self.digital_names.len(),
            });
        }
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

/// A complete Configuration frame: common frame header fields plus one or more stations.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ConfigurationFrame {
    pub version: ConfigVersion,
    pub pmu_id: u16,
    pub soc: u32,
    pub frac_sec: u32,
    pub time_quality: u8,
    pub time_base: u32,
    pub stations: Vec<StationConfig>,
    /// Positive: frames per second. Negative: seconds per frame.
    pub data_rate: i16,
}

impl ConfigurationFrame {
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.stations.is_empty() {
            return Err(CodecError::InvalidLayout {
                what: "num_pmu",
                declared: 1,
                actual: 0,
            });
        }
        if self.time_base & !0x00FF_FFFF != 0 {
            return Err(CodecError::FieldRange { field: "time_base" });
        }
        if self.frac_sec >= self.time_base {
            return Err(CodecError::FieldRange { field: "frac_sec" });
        }
        for station in &self.stations {
            station.validate()?;
        }
        Ok(())
    }
}

pub(crate) fn pack_phasor_units(units: &[PhasorUnit]) -> Vec<u32> {
    units.iter().map(|u| u.pack()).collect()
}

pub(crate) fn unpack_phasor_unit(word: u32) -> PhasorUnit {
    PhasorUnit::unpack(word)
}

pub(crate) fn pack_analog_units(units: &[AnalogUnit]) -> Vec<u32> {
    units.iter().map(|u| u.pack()).collect()
}

pub(crate) fn unpack_analog_unit(word: u32) -> AnalogUnit {
    AnalogUnit::unpack(word)
}

pub(crate) fn pack_digital_units(units: &[DigitalUnit]) -> Vec<u32> {
    units.iter().map(|u| u.pack()).collect()
}

pub(crate) fn unpack_digital_unit(word: u32) -> DigitalUnit {
    DigitalUnit::unpack(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phasor_unit_round_trips() {
        let unit = PhasorUnit {
            is_current: true,
            scale: 0x00ABCDEF,
        };
        assert_eq!(PhasorUnit::unpack(unit.pack()), unit);
    }

    #[test]
    fn analog_unit_round_trips_negative_scale() {
        let unit = AnalogUnit {
            kind: 3,
            scale: -1000,
        };
        assert_eq!(AnalogUnit::unpack(unit.pack()), unit);
    }

    #[test]
    fn digital_unit_round_trips() {
        let unit = DigitalUnit {
            normal_state: 0xAAAA,
            valid_inputs: 0x00FF,
        };
        assert_eq!(DigitalUnit::unpack(unit.pack()), unit);
    }

    #[test]
    fn default_station_validates() {
        assert!(StationConfig::default_station().validate().is_ok());
    }

    #[test]
    fn default_station_matches_documented_phasor_count() {
        let station = StationConfig::default_station();
        assert_eq!(station.phasor_names.len(), 1);
        assert_eq!(station.phasor_units.len(), 1);
        assert_eq!(station.analog_names.len(), 1);
        assert_eq!(station.digital_names.len(), 16);
        assert_eq!(station.digital_units.len(), 1);
    }

    #[test]
    fn mismatched_phasor_units_rejected() {
        let mut station = StationConfig::default_station();
        station.phasor_units.push(PhasorUnit::default());

        assert_eq!(
            station.validate(),
            Err(CodecError::InvalidLayout {
                what: "phasor_units",
                declared: 1,
                actual: 2,
            })
        );
    }
}
