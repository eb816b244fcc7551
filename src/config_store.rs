//! Configuration store (C3): an in-memory, mutable builder for a PMU's configuration, with the
//! validation and `cfg_count` bookkeeping §4.3 requires.

use crate::error::CodecError;
use crate::frame::ascii::Name16;
use crate::frame::configuration::{
    AnalogUnit, ConfigVersion, ConfigurationFrame, DigitalUnit, FormatFlags, PhasorUnit,
    StationConfig,
};

/// A single station's configuration under construction.
///
/// Every setter validates itself but does not bump `cfg_count` until
/// [`ConfigurationStore::mark_transmitted`] has been called at least once for the owning store;
/// see that method's docs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationBuilder {
    inner: StationConfig,
}

impl StationBuilder {
    /// Annex D Table D.2 defaults: one polar-fixed phasor, one fixed analog, one digital word.
    pub fn default_station() -> Self {
        Self {
            inner: StationConfig::default_station(),
        }
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), CodecError> {
        self.inner.station_name = Name16::new(name)?;
        Ok(())
    }

    pub fn set_id_code(&mut self, id_code: u16) {
        self.inner.id_code = id_code;
    }

    pub fn set_nominal_frequency_60hz(&mut self, is_60hz: bool) {
        self.inner.nominal_60hz = is_60hz;
    }

    pub fn set_phasor_format(&mut self, polar: bool, float: bool) {
        self.inner.format.set(FormatFlags::PHASOR_POLAR, polar);
        self.inner.format.set(FormatFlags::PHASOR_FLOAT, float);
    }

    pub fn set_analog_format(&mut self, float: bool) {
        self.inner.format.set(FormatFlags::ANALOG_FLOAT, float);
    }

    pub fn set_freq_format(&mut self, float: bool) {
        self.inner.format.set(FormatFlags::FREQ_FLOAT, float);
    }

    /// Resize the phasor channel list to `count`, naming each `PH{n}` and defaulting each unit.
    /// Per §4.3, changing a count resets the corresponding lists with zero-initialised entries
    /// rather than attempting to preserve old ones at stale indices.
    pub fn set_phasor_count(&mut self, count: usize) -> Result<(), CodecError> {
        self.inner.phasor_names = numbered_names("PH", count)?;
        self.inner.phasor_units = vec![PhasorUnit::default(); count];
        Ok(())
    }

    pub fn set_analog_count(&mut self, count: usize) -> Result<(), CodecError> {
        self.inner.analog_names = numbered_names("AN", count)?;
        self.inner.analog_units = vec![AnalogUnit::default(); count];
        Ok(())
    }

    /// `count` is the number of 16-bit digital status words, not individual bits.
    pub fn set_digital_word_count(&mut self, count: usize) -> Result<(), CodecError> {
        self.inner.digital_names = numbered_names("DG", count * 16)?;
        self.inner.digital_units = vec![DigitalUnit::default(); count];
        Ok(())
    }

    pub fn set_phasor_name(&mut self, index: usize, name: &str) -> Result<(), CodecError> {
        let slot = self
            .inner
            .phasor_names
            .get_mut(index)
            .ok_or(CodecError::InvalidLayout {
                what: "phasor_names",
                declared: self.inner.phasor_names.len(),
                actual: index + 1,
            })?;
        *slot = Name16::new(name)?;
        Ok(())
    }

    pub fn set_phasor_unit(&mut self, index: usize, unit: PhasorUnit) -> Result<(), CodecError> {
        let slot =
            self.inner
                .phasor_units
                .get_mut(index)
                .ok_or(CodecError::InvalidLayout {
                    what: "phasor_units",
                    declared: self.inner.phasor_units.len(),
                    actual: index + 1,
                })?;
        *slot = unit;
        Ok(())
    }

    pub fn set_analog_unit(&mut self, index: usize, unit: AnalogUnit) -> Result<(), CodecError> {
        let slot =
            self.inner
                .analog_units
                .get_mut(index)
                .ok_or(CodecError::InvalidLayout {
                    what: "analog_units",
                    declared: self.inner.analog_units.len(),
                    actual: index + 1,
                })?;
        *slot = unit;
        Ok(())
    }

    pub fn set_digital_unit(&mut self, index: usize, unit: DigitalUnit) -> Result<(), CodecError> {
        let slot = self
            .inner
            .digital_units
            .get_mut(index)
            .ok_or(CodecError::InvalidLayout {
                what: "digital_units",
                declared: self.inner.digital_units.len(),
                actual: index + 1,
            })?;
        *slot = unit;
        Ok(())
    }
}

fn numbered_names(prefix: &str, count: usize) -> Result<Vec<Name16>, CodecError> {
    (0..count)
        .map(|i| Name16::new(&format!("{prefix}{i}")))
        .collect()
}

/// A mutable configuration under construction, ready to be frozen into a [`ConfigurationFrame`]
/// for [`crate::pmu::Pmu::set_configuration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationStore {
    version: ConfigVersion,
    pmu_id: u16,
    time_base: u32,
    data_rate: i16,
    stations: Vec<StationBuilder>,
    transmitted: bool,
}

impl ConfigurationStore {
    /// Build a store with Annex D Table D.2 defaults: one station, `time_base = 1_000_000`,
    /// `data_rate = 30`.
    pub fn new(version: ConfigVersion, pmu_id: u16) -> Self {
        Self {
            version,
            pmu_id,
            time_base: 1_000_000,
            data_rate: 30,
            stations: vec![StationBuilder::default_station()],
            transmitted: false,
        }
    }

    pub fn time_base(&self) -> u32 {
        self.time_base
    }

    pub fn set_time_base(&mut self, time_base: u32) -> Result<(), CodecError> {
        if time_base & !0x00FF_FFFF != 0 {
            return Err(CodecError::FieldRange { field: "time_base" });
        }
        self.time_base = time_base;
        self.bump_cfg_count();
        Ok(())
    }

    pub fn set_data_rate(&mut self, data_rate: i16) {
        self.data_rate = data_rate;
        self.bump_cfg_count();
    }

    pub fn stations(&mut self) -> &mut Vec<StationBuilder> {
        self.bump_cfg_count();
        &mut self.stations
    }

    /// Record that this configuration has gone out over the wire at least once. After this,
    /// any mutating call bumps every station's `cfg_count`, per §4.3's "emits a new `cfg_count`
    /// whenever a mutating setter is called after the configuration has been transmitted".
    pub fn mark_transmitted(&mut self) {
        self.transmitted = true;
    }

    fn bump_cfg_count(&mut self) {
        if !self.transmitted {
            return;
        }
        for station in &mut self.stations {
            station.inner.cfg_count = station.inner.cfg_count.wrapping_add(1);
        }
    }

    /// Replace this store's contents with an externally-sourced frame, without bumping
    /// `cfg_count` or touching `transmitted`. Used by [`crate::splitter::Splitter`] to mirror an
    /// upstream PMU's configuration verbatim — the splitter didn't author the frame, so it must
    /// not apply its own versioning on top of it.
    pub fn set_frame_verbatim(&mut self, frame: ConfigurationFrame) {
        self.version = frame.version;
        self.pmu_id = frame.pmu_id;
        self.time_base = frame.time_base;
        self.data_rate = frame.data_rate;
        self.stations = frame
            .stations
            .into_iter()
            .map(|inner| StationBuilder { inner })
            .collect();
    }

    /// Replace this store's contents with a caller-supplied frame, then bump `cfg_count` per I5
    /// as any other mutating setter would. Used by [`crate::pmu::Pmu::set_configuration`] for a
    /// PMU reconfigured at runtime.
    pub fn set_frame(&mut self, frame: ConfigurationFrame) {
        self.set_frame_verbatim(frame);
        self.bump_cfg_count();
    }

    /// Freeze this store into a concrete [`ConfigurationFrame`], timestamped with `soc`/`frac_sec`
    /// and validated against (I3).
    pub fn build(
        &self,
        soc: u32,
        frac_sec: u32,
        time_quality: u8,
    ) -> Result<ConfigurationFrame, CodecError> {
        let frame = ConfigurationFrame {
            version: self.version,
            pmu_id: self.pmu_id,
            soc,
            frac_sec,
            time_quality,
            time_base: self.time_base,
            stations: self.stations.iter().map(|s| s.inner.clone()).collect(),
            data_rate: self.data_rate,
        };
        frame.validate()?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_store_builds_a_valid_frame() {
        let store = ConfigurationStore::new(ConfigVersion::V2, 7);
        let frame = store.build(0, 0, 0).unwrap();
        assert_eq!(frame.stations.len(), 1);
        assert_eq!(frame.data_rate, 30);
    }

    #[test]
    fn changing_phasor_count_resets_units() {
        let mut store = ConfigurationStore::new(ConfigVersion::V2, 7);
        store.stations()[0].set_phasor_unit(0, PhasorUnit {
            is_current: true,
            scale: 42,
        }).unwrap();

        store.stations()[0].set_phasor_count(3).unwrap();

        let frame = store.build(0, 0, 0).unwrap();
        assert_eq!(frame.stations[0].phasor_units.len(), 3);
        assert_eq!(frame.stations[0].phasor_units[0].scale, 1);
    }

    #[test]
    fn cfg_count_bumps_only_after_transmission() {
        let mut store = ConfigurationStore::new(ConfigVersion::V2, 7);
        store.set_data_rate(60);
        assert_eq!(store.build(0, 0, 0).unwrap().stations[0].cfg_count, 1);

        store.mark_transmitted();
        store.set_data_rate(30);
        assert_eq!(store.build(0, 0, 0).unwrap().stations[0].cfg_count, 2);
    }

    #[test]
    fn set_frame_bumps_cfg_count_after_transmission() {
        let mut store = ConfigurationStore::new(ConfigVersion::V2, 7);
        store.mark_transmitted();

        let mut incoming = store.build(0, 0, 0).unwrap();
        incoming.data_rate = 60;
        store.set_frame(incoming);

        assert_eq!(store.build(0, 0, 0).unwrap().data_rate, 60);
        assert_eq!(store.build(0, 0, 0).unwrap().stations[0].cfg_count, 2);
    }

    #[test]
    fn set_frame_verbatim_does_not_bump_cfg_count() {
        let mut store = ConfigurationStore::new(ConfigVersion::V2, 7);
        store.mark_transmitted();

        let mut incoming = store.build(0, 0, 0).unwrap();
        incoming.stations[0].cfg_count = 9;
        incoming.data_rate = 60;
        store.set_frame_verbatim(incoming);

        let frame = store.build(0, 0, 0).unwrap();
        assert_eq!(frame.data_rate, 60);
        assert_eq!(frame.stations[0].cfg_count, 9);
    }

    #[test]
    fn out_of_range_index_is_invalid_layout() {
        let mut station = StationBuilder::default_station();
        assert_eq!(
            station.set_phasor_name(5, "X"),
            Err(CodecError::InvalidLayout {
                what: "phasor_names",
                declared: 1,
                actual: 6,
            })
        );
    }
}
