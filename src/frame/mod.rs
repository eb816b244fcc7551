//! The frame codec (C2): encode/decode for all five C37.118.2 frame variants.
//!
//! Every frame shares a 14-byte common header (sync word, frame size, PMU id, SOC, FRACSEC) and a
//! trailing 2-byte CRC. What sits between is dispatched on the sync word's frame-type bits.

pub mod ascii;
pub mod command;
pub mod configuration;
pub mod data;
pub mod header;
pub mod time;

use crate::crc;
use crate::error::CodecError;

use ascii::Name16;
use command::{Command, CommandFrame};
use configuration::{
    unpack_analog_unit, unpack_digital_unit, unpack_phasor_unit, ConfigVersion, ConfigurationFrame,
    FormatFlags, StationConfig,
};
use data::{
    scale_analog, scale_angle, scale_freq, scale_magnitude, scale_phasor_component, unscale_analog,
    unscale_angle, unscale_freq, unscale_magnitude, unscale_phasor_component, DataFrame, Phasor,
    StationData, StatWord,
};
use header::HeaderFrame;

/// The common header's fixed length: sync(2) + frame_size(2) + pmu_id(2) + soc(4) + fracsec(4).
const COMMON_HEADER_LEN: usize = 14;
/// Length of the trailing CRC.
const CHECKSUM_LEN: usize = 2;

/// The sync word's frame-type bits (§6): bits 6..4 of the low byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Header,
    Config1,
    Config2,
    Command,
    Config3,
}

impl FrameType {
    fn bits(self) -> u16 {
        match self {
            FrameType::Data => 0b000,
            FrameType::Header => 0b001,
            FrameType::Config1 => 0b010,
            FrameType::Config2 => 0b011,
            FrameType::Command => 0b100,
            FrameType::Config3 => 0b101,
        }
    }

    fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            0b000 => Some(FrameType::Data),
            0b001 => Some(FrameType::Header),
            0b010 => Some(FrameType::Config1),
            0b011 => Some(FrameType::Config2),
            0b100 => Some(FrameType::Command),
            0b101 => Some(FrameType::Config3),
            _ => None,
        }
    }
}

/// The 2-byte sync word: `1 0101010 TTT VVVV` (bit15 fixed, high byte 0xAA, frame type, version).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SyncWord(u16);

impl SyncWord {
    pub fn new(frame_type: FrameType, version: u8) -> Self {
        Self(0xAA00 | (frame_type.bits() << 4) | u16::from(version & 0x0F))
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn frame_type(self) -> Option<FrameType> {
        FrameType::from_bits((self.0 >> 4) & 0b111)
    }

    pub fn version(self) -> u8 {
        (self.0 & 0x0F) as u8
    }

    fn from_raw(raw: u16) -> Result<Self, CodecError> {
        if raw & 0xAA00 != 0xAA00 {
            return Err(CodecError::UnknownFrame { sync: raw });
        }
        let sync = Self(raw);
        if sync.frame_type().is_none() {
            return Err(CodecError::UnknownFrame { sync: raw });
        }
        Ok(sync)
    }
}

/// A decoded frame, whichever of the five variants it turned out to be.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Frame {
    Configuration(ConfigurationFrame),
    Data(DataFrame),
    Header(HeaderFrame),
    Command(CommandFrame),
}

impl Frame {
    pub fn pmu_id(&self) -> u16 {
        match self {
            Frame::Configuration(f) => f.pmu_id,
            Frame::Data(f) => f.pmu_id,
            Frame::Header(f) => f.pmu_id,
            Frame::Command(f) => f.pmu_id,
        }
    }

    /// Build the protocol-compliant negative acknowledgement for a Configuration Frame 3
    /// request, per Open Question (a): a Header frame stating the command is unsupported, rather
    /// than a silently dropped request.
    pub fn negative_ack(pmu_id: u16, soc: u32, frac_sec: u32, time_quality: u8) -> Self {
        Frame::Header(HeaderFrame {
            pmu_id,
            soc,
            frac_sec,
            time_quality,
            text: "CFG-3 NOT SUPPORTED".to_string(),
        })
    }
}

/// Supplies the configuration needed to interpret a Data frame for a given `pmu_id`, per (I6).
///
/// Implementations are expected to be cheap (a map lookup); decode never mutates the context.
pub trait ConfigLookup {
    fn lookup(&self, pmu_id: u16) -> Option<&ConfigurationFrame>;
}

impl ConfigLookup for ConfigurationFrame {
    fn lookup(&self, pmu_id: u16) -> Option<&ConfigurationFrame> {
        (self.pmu_id == pmu_id).then_some(self)
    }
}

impl ConfigLookup for std::collections::HashMap<u16, ConfigurationFrame> {
    fn lookup(&self, pmu_id: u16) -> Option<&ConfigurationFrame> {
        self.get(&pmu_id)
    }
}

fn fracsec_field(time_quality: u8, frac_sec: u32) -> Result<u32, CodecError> {
    if frac_sec & !0x00FF_FFFF != 0 {
        return Err(CodecError::FieldRange { field: "frac_sec" });
    }
    Ok((u32::from(time_quality) << 24) | (frac_sec & 0x00FF_FFFF))
}

fn split_fracsec_field(field: u32) -> (u8, u32) {
    ((field >> 24) as u8, field & 0x00FF_FFFF)
}

fn push_common_header(buf: &mut Vec<u8>, sync: SyncWord, pmu_id: u16, soc: u32, fracsec: u32) {
    buf.extend_from_slice(&sync.raw().to_be_bytes());
    // frame_size backpatched by the caller once the payload length is known.
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&pmu_id.to_be_bytes());
    buf.extend_from_slice(&soc.to_be_bytes());
    buf.extend_from_slice(&fracsec.to_be_bytes());
}

fn finish_frame(mut buf: Vec<u8>) -> Result<Vec<u8>, CodecError> {
    let total_len = buf.len() + CHECKSUM_LEN;
    let frame_size = u16::try_from(total_len).map_err(|_| CodecError::FieldRange {
        field: "frame_size",
    })?;
    buf[2..4].copy_from_slice(&frame_size.to_be_bytes());

    let checksum = crc::compute(&buf);
    buf.extend_from_slice(&checksum.to_be_bytes());

    Ok(buf)
}

/// Encode a frame into a complete, CRC-checked, length-correct wire buffer (I1, I2).
pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    match frame {
        Frame::Configuration(cfg) => encode_configuration(cfg),
        Frame::Data(data) => encode_data(data),
        Frame::Header(header) => encode_header(header),
        Frame::Command(cmd) => encode_command(cmd),
    }
}

fn encode_configuration(cfg: &ConfigurationFrame) -> Result<Vec<u8>, CodecError> {
    cfg.validate()?;

    let frame_type = match cfg.version {
        ConfigVersion::V1 => FrameType::Config1,
        ConfigVersion::V2 => FrameType::Config2,
    };
    let sync = SyncWord::new(frame_type, 1);
    let fracsec = fracsec_field(cfg.time_quality, cfg.frac_sec)?;

    let mut buf = Vec::new();
    push_common_header(&mut buf, sync, cfg.pmu_id, cfg.soc, fracsec);

    buf.extend_from_slice(&cfg.time_base.to_be_bytes());
    let num_pmu = u16::try_from(cfg.stations.len()).map_err(|_| CodecError::InvalidLayout {
        what: "num_pmu",
        declared: u16::MAX as usize,
        actual: cfg.stations.len(),
    })?;
    buf.extend_from_slice(&num_pmu.to_be_bytes());

    for station in &cfg.stations {
        let mut name_buf = [0u8; 16];
        station.station_name.pack(&mut name_buf);
        buf.extend_from_slice(&name_buf);

        buf.extend_from_slice(&station.id_code.to_be_bytes());
        buf.extend_from_slice(&station.format.bits().to_be_bytes());
        buf.extend_from_slice(&(station.phasor_num() as u16).to_be_bytes());
        buf.extend_from_slice(&(station.analog_num() as u16).to_be_bytes());
        buf.extend_from_slice(&(station.digital_num() as u16).to_be_bytes());

        for name in &station.phasor_names {
            let mut b = [0u8; 16];
            name.pack(&mut b);
            buf.extend_from_slice(&b);
        }
        for name in &station.analog_names {
            let mut b = [0u8; 16];
            name.pack(&mut b);
            buf.extend_from_slice(&b);
        }
        for name in &station.digital_names {
            let mut b = [0u8; 16];
            name.pack(&mut b);
            buf.extend_from_slice(&b);
        }

        for unit in configuration::pack_phasor_units(&station.phasor_units) {
            buf.extend_from_slice(&unit.to_be_bytes());
        }
        for unit in configuration::pack_analog_units(&station.analog_units) {
            buf.extend_from_slice(&unit.to_be_bytes());
        }
        for unit in configuration::pack_digital_units(&station.digital_units) {
            buf.extend_from_slice(&unit.to_be_bytes());
        }

        let fnom: u16 = if station.nominal_60hz { 1 } else { 0 };
        buf.extend_from_slice(&fnom.to_be_bytes());
        buf.extend_from_slice(&station.cfg_count.to_be_bytes());
    }

    buf.extend_from_slice(&cfg.data_rate.to_be_bytes());

    finish_frame(buf)
}

fn encode_data(data: &DataFrame) -> Result<Vec<u8>, CodecError> {
    // A Data frame's shape is entirely config-driven; the caller must call `validate` against its
    // intended configuration before relying on round-trip equality.
    let sync = SyncWord::new(FrameType::Data, 1);
    let fracsec = fracsec_field(data.time_quality, data.frac_sec)?;

    let mut buf = Vec::new();
    push_common_header(&mut buf, sync, data.pmu_id, data.soc, fracsec);

    for station in &data.stations {
        buf.extend_from_slice(&station.stat.bits().to_be_bytes());

        for phasor in &station.phasors {
            // Float vs fixed and polar vs rectangular is carried by the caller's choice of
            // `Phasor` variant and by whether the station declares float format; since this
            // encoder has no station context, it always encodes as the variant's natural
            // float/fixed form is resolved by `encode_data_for` below. Plain `encode` only
            // supports float phasors, where no scale factor is needed.
            match phasor {
                Phasor::Rectangular { real, imag } => {
                    buf.extend_from_slice(&(*real as f32).to_be_bytes());
                    buf.extend_from_slice(&(*imag as f32).to_be_bytes());
                }
                Phasor::Polar { magnitude, angle } => {
                    buf.extend_from_slice(&(*magnitude as f32).to_be_bytes());
                    buf.extend_from_slice(&(*angle as f32).to_be_bytes());
                }
            }
        }

        buf.extend_from_slice(&(station.freq as f32).to_be_bytes());
        buf.extend_from_slice(&(station.dfreq as f32).to_be_bytes());
        for analog in &station.analogs {
            buf.extend_from_slice(&(*analog as f32).to_be_bytes());
        }
        for digital in &station.digitals {
            buf.extend_from_slice(&digital.to_be_bytes());
        }
    }

    finish_frame(buf)
}

/// Encode a Data frame against a specific station configuration, honouring its fixed/float and
/// polar/rectangular format flags. This is the form used by [`crate::pmu`] and [`crate::pdc`];
/// plain [`encode`] (always-float) exists for callers that never learned a configuration.
pub fn encode_data_for(data: &DataFrame, config: &ConfigurationFrame) -> Result<Vec<u8>, CodecError> {
    data.validate(config)?;

    let sync = SyncWord::new(FrameType::Data, 1);
    let fracsec = fracsec_field(data.time_quality, data.frac_sec)?;

    let mut buf = Vec::new();
    push_common_header(&mut buf, sync, data.pmu_id, data.soc, fracsec);

    for (station_data, station_cfg) in data.stations.iter().zip(&config.stations) {
        buf.extend_from_slice(&station_data.stat.bits().to_be_bytes());

        let phasor_float = station_cfg.format.contains(FormatFlags::PHASOR_FLOAT);
        for (phasor, unit) in station_data.phasors.iter().zip(&station_cfg.phasor_units) {
            match (phasor, phasor_float) {
                (Phasor::Rectangular { real, imag }, true) => {
                    buf.extend_from_slice(&(*real as f32).to_be_bytes());
                    buf.extend_from_slice(&(*imag as f32).to_be_bytes());
                }
                (Phasor::Rectangular { real, imag }, false) => {
                    buf.extend_from_slice(
                        &unscale_phasor_component(*real, unit.scale).to_be_bytes(),
                    );
                    buf.extend_from_slice(
                        &unscale_phasor_component(*imag, unit.scale).to_be_bytes(),
                    );
                }
                (Phasor::Polar { magnitude, angle }, true) => {
                    buf.extend_from_slice(&(*magnitude as f32).to_be_bytes());
                    buf.extend_from_slice(&(*angle as f32).to_be_bytes());
                }
                (Phasor::Polar { magnitude, angle }, false) => {
                    buf.extend_from_slice(
                        &unscale_magnitude(*magnitude, unit.scale).to_be_bytes(),
                    );
                    buf.extend_from_slice(&unscale_angle(*angle).to_be_bytes());
                }
            }
        }

        if station_cfg.format.contains(FormatFlags::FREQ_FLOAT) {
            buf.extend_from_slice(&(station_data.freq as f32).to_be_bytes());
            buf.extend_from_slice(&(station_data.dfreq as f32).to_be_bytes());
        } else {
            buf.extend_from_slice(&unscale_freq(station_data.freq).to_be_bytes());
            buf.extend_from_slice(&unscale_freq(station_data.dfreq).to_be_bytes());
        }

        let analog_float = station_cfg.format.contains(FormatFlags::ANALOG_FLOAT);
        for (analog, unit) in station_data.analogs.iter().zip(&station_cfg.analog_units) {
            if analog_float {
                buf.extend_from_slice(&(*analog as f32).to_be_bytes());
            } else {
                buf.extend_from_slice(&unscale_analog(*analog, unit.scale).to_be_bytes());
            }
        }

        for digital in &station_data.digitals {
            buf.extend_from_slice(&digital.to_be_bytes());
        }
    }

    finish_frame(buf)
}

fn encode_header(header: &HeaderFrame) -> Result<Vec<u8>, CodecError> {
    let sync = SyncWord::new(FrameType::Header, 1);
    let fracsec = fracsec_field(header.time_quality, header.frac_sec)?;

    let mut buf = Vec::new();
    push_common_header(&mut buf, sync, header.pmu_id, header.soc, fracsec);
    buf.extend_from_slice(header.text.as_bytes());

    finish_frame(buf)
}

fn encode_command(cmd: &CommandFrame) -> Result<Vec<u8>, CodecError> {
    let sync = SyncWord::new(FrameType::Command, 1);
    let fracsec = fracsec_field(cmd.time_quality, cmd.frac_sec)?;

    let mut buf = Vec::new();
    push_common_header(&mut buf, sync, cmd.pmu_id, cmd.soc, fracsec);
    buf.extend_from_slice(&cmd.command.code().to_be_bytes());
    if matches!(cmd.command, Command::ExtendedFrame) {
        buf.extend_from_slice(&cmd.extframe);
    }

    finish_frame(buf)
}

/// Decode one complete frame from `bytes`, which must be exactly one frame (`bytes.len()` equal
/// to its own `frame_size` field). Use [`StreamDecoder`] to pull frames out of a live byte
/// stream instead.
///
/// `context` is required to decode a Data frame; a missing or non-matching context yields
/// [`CodecError::MissingConfiguration`].
pub fn decode(bytes: &[u8], context: Option<&dyn ConfigLookup>) -> Result<Frame, CodecError> {
    if bytes.len() < COMMON_HEADER_LEN + CHECKSUM_LEN {
        return Err(CodecError::ShortFrame {
            expected: (COMMON_HEADER_LEN + CHECKSUM_LEN) as u16,
            available: bytes.len(),
        });
    }

    let sync = SyncWord::from_raw(u16::from_be_bytes([bytes[0], bytes[1]]))?;
    let frame_size = u16::from_be_bytes([bytes[2], bytes[3]]);

    if bytes.len() != usize::from(frame_size) {
        return Err(CodecError::ShortFrame {
            expected: frame_size,
            available: bytes.len(),
        });
    }

    if !crc::verify(bytes) {
        let computed = crc::compute(&bytes[..bytes.len() - CHECKSUM_LEN]);
        let received = u16::from_be_bytes([bytes[bytes.len() - 2], bytes[bytes.len() - 1]]);
        return Err(CodecError::CrcMismatch { computed, received });
    }

    let pmu_id = u16::from_be_bytes([bytes[4], bytes[5]]);
    let soc = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    let fracsec_raw = u32::from_be_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
    let (time_quality, frac_sec) = split_fracsec_field(fracsec_raw);

    let payload = &bytes[COMMON_HEADER_LEN..bytes.len() - CHECKSUM_LEN];

    match sync.frame_type().expect("validated by SyncWord::from_raw") {
        FrameType::Config1 => decode_configuration(
            ConfigVersion::V1,
            pmu_id,
            soc,
            frac_sec,
            time_quality,
            payload,
        ),
        FrameType::Config2 => decode_configuration(
            ConfigVersion::V2,
            pmu_id,
            soc,
            frac_sec,
            time_quality,
            payload,
        ),
        FrameType::Config3 => Err(CodecError::UnknownFrame { sync: sync.raw() }),
        FrameType::Data => {
            let config = context
                .and_then(|ctx| ctx.lookup(pmu_id))
                .ok_or(CodecError::MissingConfiguration { pmu_id })?;
            decode_data(config, pmu_id, soc, frac_sec, time_quality, payload)
        }
        FrameType::Header => Ok(Frame::Header(HeaderFrame {
            pmu_id,
            soc,
            frac_sec,
            time_quality,
            text: String::from_utf8_lossy(payload).into_owned(),
        })),
        FrameType::Command => decode_command(pmu_id, soc, frac_sec, time_quality, payload),
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if buf.len() < n {
        return Err(CodecError::ShortFrame {
            expected: n as u16,
            available: buf.len(),
        });
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

fn take_u16(buf: &mut &[u8]) -> Result<u16, CodecError> {
    let b = take(buf, 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn take_u32(buf: &mut &[u8]) -> Result<u32, CodecError> {
    let b = take(buf, 4)?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn take_i16(buf: &mut &[u8]) -> Result<i16, CodecError> {
    Ok(take_u16(buf)? as i16)
}

fn take_f32(buf: &mut &[u8]) -> Result<f32, CodecError> {
    let b = take(buf, 4)?;
    Ok(f32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn take_name16(buf: &mut &[u8]) -> Result<Name16, CodecError> {
    let b = take(buf, 16)?;
    let mut arr = [0u8; 16];
    arr.copy_from_slice(b);
    Ok(Name16::unpack(&arr))
}

fn decode_configuration(
    version: ConfigVersion,
    pmu_id: u16,
    soc: u32,
    frac_sec: u32,
    time_quality: u8,
    mut payload: &[u8],
) -> Result<Frame, CodecError> {
    let time_base = take_u32(&mut payload)?;
    if frac_sec >= time_base {
        return Err(CodecError::FieldRange { field: "frac_sec" });
    }
    let num_pmu = take_u16(&mut payload)?;

    let mut stations = Vec::with_capacity(num_pmu as usize);
    for _ in 0..num_pmu {
        let station_name = take_name16(&mut payload)?;
        let id_code = take_u16(&mut payload)?;
        let format = FormatFlags::from_bits_retain(take_u16(&mut payload)?);
        let phnmr = take_u16(&mut payload)? as usize;
        let annmr = take_u16(&mut payload)? as usize;
        let dgnmr = take_u16(&mut payload)? as usize;

        let mut phasor_names = Vec::with_capacity(phnmr);
        for _ in 0..phnmr {
            phasor_names.push(take_name16(&mut payload)?);
        }
        let mut analog_names = Vec::with_capacity(annmr);
        for _ in 0..annmr {
            analog_names.push(take_name16(&mut payload)?);
        }
        let mut digital_names = Vec::with_capacity(dgnmr * 16);
        for _ in 0..(dgnmr * 16) {
            digital_names.push(take_name16(&mut payload)?);
        }

        let mut phasor_units = Vec::with_capacity(phnmr);
        for _ in 0..phnmr {
            phasor_units.push(unpack_phasor_unit(take_u32(&mut payload)?));
        }
        let mut analog_units = Vec::with_capacity(annmr);
        for _ in 0..annmr {
            analog_units.push(unpack_analog_unit(take_u32(&mut payload)?));
        }
        let mut digital_units = Vec::with_capacity(dgnmr);
        for _ in 0..dgnmr {
            digital_units.push(unpack_digital_unit(take_u32(&mut payload)?));
        }

        let fnom = take_u16(&mut payload)?;
        let cfg_count = take_u16(&mut payload)?;

        stations.push(StationConfig {
            station_name,
            id_code,
            format,
            phasor_names,
            analog_names,
            digital_names,
            phasor_units,
            analog_units,
            digital_units,
            nominal_60hz: fnom & 1 != 0,
            cfg_count,
        });
    }

    let data_rate = take_i16(&mut payload)?;

    Ok(Frame::Configuration(ConfigurationFrame {
        version,
        pmu_id,
        soc,
        frac_sec,
        time_quality,
        time_base,
        stations,
        data_rate,
    }))
}

fn decode_data(
    config: &ConfigurationFrame,
    pmu_id: u16,
    soc: u32,
    frac_sec: u32,
    time_quality: u8,
    mut payload: &[u8],
) -> Result<Frame, CodecError> {
    if frac_sec >= config.time_base {
        return Err(CodecError::FieldRange { field: "frac_sec" });
    }
    let mut stations = Vec::with_capacity(config.stations.len());

    for station_cfg in &config.stations {
        let stat = StatWord::from_bits_retain(take_u16(&mut payload)?);

        let phasor_float = station_cfg.format.contains(FormatFlags::PHASOR_FLOAT);
        let polar = station_cfg.format.contains(FormatFlags::PHASOR_POLAR);
        let mut phasors = Vec::with_capacity(station_cfg.phasor_num());
        for unit in &station_cfg.phasor_units {
            let phasor = if phasor_float {
                let a = take_f32(&mut payload)? as f64;
                let b = take_f32(&mut payload)? as f64;
                if polar {
                    Phasor::Polar {
                        magnitude: a,
                        angle: b,
                    }
                } else {
                    Phasor::Rectangular { real: a, imag: b }
                }
            } else if polar {
                let magnitude = scale_magnitude(take_u16(&mut payload)?, unit.scale);
                let angle = scale_angle(take_i16(&mut payload)?);
                Phasor::Polar { magnitude, angle }
            } else {
                let real = scale_phasor_component(take_i16(&mut payload)?, unit.scale);
                let imag = scale_phasor_component(take_i16(&mut payload)?, unit.scale);
                Phasor::Rectangular { real, imag }
            };
            phasors.push(phasor);
        }

        let freq_float = station_cfg.format.contains(FormatFlags::FREQ_FLOAT);
        let (freq, dfreq) = if freq_float {
            (take_f32(&mut payload)? as f64, take_f32(&mut payload)? as f64)
        } else {
            (
                scale_freq(take_i16(&mut payload)?),
                scale_freq(take_i16(&mut payload)?),
            )
        };

        let analog_float = station_cfg.format.contains(FormatFlags::ANALOG_FLOAT);
        let mut analogs = Vec::with_capacity(station_cfg.analog_num());
        for unit in &station_cfg.analog_units {
            let value = if analog_float {
                take_f32(&mut payload)? as f64
            } else {
                scale_analog(take_i16(&mut payload)?, unit.scale)
            };
            analogs.push(value);
        }

        let mut digitals = Vec::with_capacity(station_cfg.digital_num());
        for _ in 0..station_cfg.digital_num() {
            digitals.push(take_u16(&mut payload)?);
        }

        stations.push(StationData {
            stat,
            phasors,
            freq,
            dfreq,
            analogs,
            digitals,
        });
    }

    Ok(Frame::Data(DataFrame {
        pmu_id,
        soc,
        frac_sec,
        time_quality,
        stations,
    }))
}

fn decode_command(
    pmu_id: u16,
    soc: u32,
    frac_sec: u32,
    time_quality: u8,
    mut payload: &[u8],
) -> Result<Frame, CodecError> {
    let command = Command::from_code(take_u16(&mut payload)?)?;
    let extframe = if matches!(command, Command::ExtendedFrame) {
        payload.to_vec()
    } else {
        Vec::new()
    };

    Ok(Frame::Command(CommandFrame {
        pmu_id,
        soc,
        frac_sec,
        time_quality,
        command,
        extframe,
    }))
}

/// Incremental decoder for a live byte stream (a TCP socket's read half).
///
/// Feed it bytes as they arrive; pop decoded frames (or recoverable codec errors) one at a time.
/// On any codec error, the buffer is advanced past the bad data so the stream resynchronises,
/// per §4.2's edge policy and (the round-trip-under-corruption property in §8).
pub struct StreamDecoder {
    buf: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next frame, if a complete one is buffered.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Returns `Ok(Some(Err(_)))` on a recoverable
    /// codec error — the buffer has already been advanced so the caller can just call this again.
    pub fn next_frame(
        &mut self,
        context: Option<&dyn ConfigLookup>,
    ) -> Result<Option<Frame>, CodecError> {
        self.next_frame_raw(context).map(|opt| opt.map(|(_, frame)| frame))
    }

    /// Like [`StreamDecoder::next_frame`] but also returns the exact bytes the frame was decoded
    /// from, so a caller (the splitter, §4.6) can forward them verbatim instead of re-encoding.
    pub fn next_frame_raw(
        &mut self,
        context: Option<&dyn ConfigLookup>,
    ) -> Result<Option<(Vec<u8>, Frame)>, CodecError> {
        loop {
            if self.buf.len() < 4 {
                return Ok(None);
            }

            let raw_sync = u16::from_be_bytes([self.buf[0], self.buf[1]]);
            if SyncWord::from_raw(raw_sync).is_err() {
                // Resynchronise one byte at a time; we don't know a frame_size to trust yet.
                self.buf.remove(0);
                continue;
            }

            let frame_size = usize::from(u16::from_be_bytes([self.buf[2], self.buf[3]]));
            if frame_size < COMMON_HEADER_LEN + CHECKSUM_LEN {
                self.buf.remove(0);
                continue;
            }
            if self.buf.len() < frame_size {
                return Ok(None);
            }

            let frame_bytes: Vec<u8> = self.buf.drain(..frame_size).collect();

            return match decode(&frame_bytes, context) {
                Ok(frame) => Ok(Some((frame_bytes, frame))),
                Err(err) => Err(err),
            };
        }
    }

    /// Signal that the underlying transport has reached EOF. Per §4.2's edge policy, a short
    /// read at EOF must not emit a partial frame: returns `Err(CodecError::EndOfStream)` if any
    /// bytes are still buffered, `Ok(())` if the decoder was left clean.
    pub fn close(&mut self) -> Result<(), CodecError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::EndOfStream)
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::configuration::{PhasorUnit, StationConfig};

    fn sample_header() -> HeaderFrame {
        HeaderFrame {
            pmu_id: 7,
            soc: 1_000_000_000,
            frac_sec: 0,
            time_quality: 0,
            text: "Hello I'm tinyPMU!".to_string(),
        }
    }

    #[test]
    fn header_round_trips() {
        let frame = Frame::Header(sample_header());
        let bytes = encode(&frame).unwrap();

        assert_eq!(u16::from_be_bytes([bytes[0], bytes[1]]), 0xAA11);
        assert_eq!(bytes.len(), u16::from_be_bytes([bytes[2], bytes[3]]) as usize);
        assert!(crc::verify(&bytes));

        let decoded = decode(&bytes, None).unwrap();
        assert_eq!(decoded, frame);
    }

    fn sample_config() -> ConfigurationFrame {
        let mut station = StationConfig::default_station();
        station.format = FormatFlags::PHASOR_POLAR;
        station.phasor_units = vec![PhasorUnit {
            is_current: false,
            scale: 1,
        }];

        ConfigurationFrame {
            version: ConfigVersion::V2,
            pmu_id: 7,
            soc: 1_000_000_000,
            frac_sec: 0,
            time_quality: 0,
            time_base: 1_000_000,
            stations: vec![station],
            data_rate: 30,
        }
    }

    #[test]
    fn configuration_v2_round_trips() {
        let frame = Frame::Configuration(sample_config());
        let bytes = encode(&frame).unwrap();

        assert_eq!(bytes.len(), u16::from_be_bytes([bytes[2], bytes[3]]) as usize);

        let decoded = decode(&bytes, None).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn data_frame_round_trips_against_config() {
        let config = sample_config();

        let data = DataFrame {
            pmu_id: 7,
            soc: 1_000_000_000,
            frac_sec: 0,
            time_quality: 0,
            stations: vec![StationData {
                stat: StatWord::empty(),
                phasors: vec![Phasor::Polar {
                    magnitude: scale_magnitude(12345, 1),
                    angle: scale_angle(7854),
                }],
                freq: scale_freq(50),
                dfreq: 0.0,
                analogs: vec![scale_analog(-1000, 1)],
                digitals: vec![0xAA55],
            }],
        };

        let bytes = encode_data_for(&data, &config).unwrap();
        assert_eq!(bytes.len(), u16::from_be_bytes([bytes[2], bytes[3]]) as usize);

        let decoded = decode(&bytes, Some(&config)).unwrap();
        assert_eq!(decoded, Frame::Data(data));
    }

    #[test]
    fn data_frame_without_configuration_is_missing_configuration() {
        let bytes = vec![0u8; COMMON_HEADER_LEN + CHECKSUM_LEN];
        let mut bytes = bytes;
        let sync = SyncWord::new(FrameType::Data, 1);
        bytes[0..2].copy_from_slice(&sync.raw().to_be_bytes());
        let len = bytes.len() as u16;
        bytes[2..4].copy_from_slice(&len.to_be_bytes());
        let crc = crc::compute(&bytes[..bytes.len() - 2]);
        bytes[bytes.len() - 2..].copy_from_slice(&crc.to_be_bytes());

        assert_eq!(
            decode(&bytes, None),
            Err(CodecError::MissingConfiguration { pmu_id: 0 })
        );
    }

    #[test]
    fn crc_corruption_is_rejected_and_stream_resyncs() {
        let config = sample_config();
        let frame = Frame::Configuration(config);
        let mut bytes = encode(&frame).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;

        assert!(matches!(
            decode(&bytes, None),
            Err(CodecError::CrcMismatch { .. })
        ));

        let mut stream = StreamDecoder::new();
        stream.feed(&bytes);
        // The corrupted frame is consumed and reported once...
        assert!(matches!(
            stream.next_frame(None),
            Err(CodecError::CrcMismatch { .. })
        ));
        // ...and the stream is empty afterwards rather than stuck.
        assert_eq!(stream.next_frame(None).unwrap(), None);
    }

    #[test]
    fn stream_decoder_resyncs_after_garbage_prefix() {
        let frame = Frame::Header(sample_header());
        let bytes = encode(&frame).unwrap();

        let mut stream = StreamDecoder::new();
        stream.feed(&[0x00, 0x01, 0x02]);
        stream.feed(&bytes);

        let decoded = stream.next_frame(None).unwrap();
        assert_eq!(decoded, Some(frame));
    }

    #[test]
    fn unknown_sync_type_reported_as_unknown_frame() {
        let mut bytes = vec![0u8; COMMON_HEADER_LEN + CHECKSUM_LEN];
        // 0xAA70: valid 0xAA prefix, but frame-type bits 111 is not in the defined set.
        bytes[0..2].copy_from_slice(&0xAA71u16.to_be_bytes());
        let len = bytes.len() as u16;
        bytes[2..4].copy_from_slice(&len.to_be_bytes());
        let crc = crc::compute(&bytes[..bytes.len() - 2]);
        bytes[bytes.len() - 2..].copy_from_slice(&crc.to_be_bytes());

        assert!(matches!(
            decode(&bytes, None),
            Err(CodecError::UnknownFrame { .. })
        ));
    }

    #[test]
    fn default_configuration_round_trips_with_documented_phasor_count() {
        let station = StationConfig::default_station();
        assert_eq!(station.phasor_names.len(), 1);
        assert_eq!(station.phasor_units.len(), 1);

        let frame = Frame::Configuration(ConfigurationFrame {
            version: ConfigVersion::V2,
            pmu_id: 7,
            soc: 1_000_000_000,
            frac_sec: 0,
            time_quality: 0,
            time_base: 1_000_000,
            stations: vec![station],
            data_rate: 30,
        });
        let bytes = encode(&frame).unwrap();
        assert_eq!(decode(&bytes, None).unwrap(), frame);
    }

    #[test]
    fn configuration_frac_sec_must_be_less_than_time_base() {
        let mut config = sample_config();
        config.time_base = 1_000_000;
        config.frac_sec = 1_000_000;

        assert_eq!(
            encode(&Frame::Configuration(config)),
            Err(CodecError::FieldRange { field: "frac_sec" })
        );
    }

    #[test]
    fn decode_rejects_configuration_frac_sec_not_less_than_time_base() {
        let config = sample_config();
        let mut bytes = encode(&Frame::Configuration(config.clone())).unwrap();

        // frac_sec lives in the low 24 bits of bytes[10..14]; bump it to equal time_base
        // without touching the time_quality byte.
        let fracsec_raw = u32::from_be_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
        let (time_quality, _) = split_fracsec_field(fracsec_raw);
        let rewritten = (u32::from(time_quality) << 24) | (config.time_base & 0x00FF_FFFF);
        bytes[10..14].copy_from_slice(&rewritten.to_be_bytes());

        let crc = crc::compute(&bytes[..bytes.len() - CHECKSUM_LEN]);
        let len = bytes.len();
        bytes[len - 2..].copy_from_slice(&crc.to_be_bytes());

        assert_eq!(
            decode(&bytes, None),
            Err(CodecError::FieldRange { field: "frac_sec" })
        );
    }

    #[test]
    fn decode_rejects_data_frac_sec_not_less_than_time_base() {
        let config = sample_config();
        let data = DataFrame {
            pmu_id: 7,
            soc: 1_000_000_000,
            frac_sec: 0,
            time_quality: 0,
            stations: vec![StationData {
                stat: StatWord::empty(),
                phasors: vec![Phasor::Polar {
                    magnitude: scale_magnitude(12345, 1),
                    angle: scale_angle(7854),
                }],
                freq: scale_freq(50),
                dfreq: 0.0,
                analogs: vec![scale_analog(-1000, 1)],
                digitals: vec![0xAA55],
            }],
        };
        let mut bytes = encode_data_for(&data, &config).unwrap();

        let fracsec_raw = u32::from_be_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
        let (time_quality, _) = split_fracsec_field(fracsec_raw);
        let rewritten = (u32::from(time_quality) << 24) | (config.time_base & 0x00FF_FFFF);
        bytes[10..14].copy_from_slice(&rewritten.to_be_bytes());

        let crc = crc::compute(&bytes[..bytes.len() - CHECKSUM_LEN]);
        let len = bytes.len();
        bytes[len - 2..].copy_from_slice(&crc.to_be_bytes());

        assert_eq!(
            decode(&bytes, Some(&config)),
            Err(CodecError::FieldRange { field: "frac_sec" })
        );
    }

    #[test]
    fn stream_decoder_close_reports_dangling_partial_frame() {
        let frame = Frame::Header(sample_header());
        let bytes = encode(&frame).unwrap();

        let mut stream = StreamDecoder::new();
        stream.feed(&bytes[..bytes.len() - 1]);
        assert_eq!(stream.next_frame(None), Ok(None));
        assert_eq!(stream.close(), Err(CodecError::EndOfStream));
    }

    #[test]
    fn stream_decoder_close_is_ok_when_drained() {
        let frame = Frame::Header(sample_header());
        let bytes = encode(&frame).unwrap();

        let mut stream = StreamDecoder::new();
        stream.feed(&bytes);
        assert_eq!(stream.next_frame(None).unwrap(), Some(frame));
        assert_eq!(stream.close(), Ok(()));
    }
}
