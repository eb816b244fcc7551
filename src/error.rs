//! Crate error types.

use core::fmt;

/// A top-level crate error.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Error {
    /// A frame failed to decode. See [`CodecError`] for the specific cause.
    Codec(CodecError),

    /// An operation was attempted before the endpoint was ready for it, e.g. calling `send`
    /// before `run`, or reading a data frame before a configuration was learned.
    NotReady,

    /// The connection to the peer was lost.
    ConnectionLost,

    /// A bounded wait (response wait, reconnect backoff) expired.
    Timeout,

    /// An I/O error occurred on the underlying transport.
    Io(IoErrorKind),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Codec(e) => write!(f, "codec: {e}"),
            Error::NotReady => f.write_str("operation requires a prior run()/set_configuration()"),
            Error::ConnectionLost => f.write_str("connection lost"),
            Error::Timeout => f.write_str("timed out"),
            Error::Io(kind) => write!(f, "io error: {kind:?}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(IoErrorKind::from(e.kind()))
    }
}

/// A transport-independent mirror of [`std::io::ErrorKind`], kept small and `PartialEq`/`Eq` so
/// [`Error`] can derive them too.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum IoErrorKind {
    /// The peer closed the connection.
    ConnectionReset,
    /// The operation timed out.
    TimedOut,
    /// Any other I/O failure.
    Other,
}

impl From<std::io::ErrorKind> for IoErrorKind {
    fn from(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::UnexpectedEof => {
                Self::ConnectionReset
            }
            std::io::ErrorKind::TimedOut => Self::TimedOut,
            _ => Self::Other,
        }
    }
}

/// Errors raised by the frame codec ([`crate::frame`]).
///
/// Codec errors during stream decode are recoverable: the caller can resynchronise and keep
/// reading. See [`crate::frame::decode_stream`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CodecError {
    /// The computed CRC did not match the trailing two bytes of the frame.
    CrcMismatch {
        /// CRC computed over the received bytes.
        computed: u16,
        /// CRC found in the frame's trailing two bytes.
        received: u16,
    },

    /// Fewer bytes were available than the frame's declared `frame_size`, and the stream ended.
    ShortFrame {
        /// Bytes the frame claimed to contain.
        expected: u16,
        /// Bytes actually available.
        available: usize,
    },

    /// The sync word's frame-type bits did not match any of the five known frame types.
    UnknownFrame {
        /// The raw sync word that was read.
        sync: u16,
    },

    /// Declared counts did not match the number of items supplied.
    InvalidLayout {
        /// What was being validated, e.g. `"phasor_num"`.
        what: &'static str,
        /// The declared count.
        declared: usize,
        /// The number of items actually supplied.
        actual: usize,
    },

    /// A field value was outside the range the wire format allows, e.g. `frac_sec >= time_base`.
    FieldRange {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A Data frame was encountered for a `pmu_id` with no previously-supplied configuration.
    MissingConfiguration {
        /// The PMU id the data frame claims to belong to.
        pmu_id: u16,
    },

    /// The byte stream ended with no more bytes to read and nothing buffered.
    EndOfStream,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::CrcMismatch { computed, received } => write!(
                f,
                "CRC mismatch: computed {computed:#06x}, frame said {received:#06x}"
            ),
            CodecError::ShortFrame {
                expected,
                available,
            } => write!(
                f,
                "short frame: expected {expected} bytes, only {available} available"
            ),
            CodecError::UnknownFrame { sync } => {
                write!(f, "unknown frame type in sync word {sync:#06x}")
            }
            CodecError::InvalidLayout {
                what,
                declared,
                actual,
            } => write!(f, "{what}: declared {declared}, got {actual}"),
            CodecError::FieldRange { field } => write!(f, "field out of range: {field}"),
            CodecError::MissingConfiguration { pmu_id } => {
                write!(f, "no configuration known for pmu_id {pmu_id:#06x}")
            }
            CodecError::EndOfStream => f.write_str("end of stream"),
        }
    }
}

impl std::error::Error for CodecError {}
