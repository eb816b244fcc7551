//! Header frame: an arbitrary ASCII payload, constant for the life of a session.

/// A complete Header frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HeaderFrame {
    pub pmu_id: u16,
    pub soc: u32,
    pub frac_sec: u32,
    pub time_quality: u8,
    /// Free-form ASCII text. Not space-padded or length-limited beyond `frame_size`'s own u16
    /// bound.
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_arbitrary_text() {
        let header = HeaderFrame {
            pmu_id: 7,
            soc: 1_000_000_000,
            frac_sec: 0,
            time_quality: 0,
            text: "Hello I'm tinyPMU!".to_string(),
        };
        assert_eq!(header.text.len(), 18);
    }
}
