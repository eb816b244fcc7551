//! IEEE C37.118.2-2011 synchrophasor data-transfer protocol: frame codec, PMU server, PDC
//! client, and stream splitter.
//!
//! [`frame`] implements the wire codec shared by every endpoint: the five frame types (§3),
//! their common header and trailing CRC (§3.1), and [`frame::StreamDecoder`] for resyncing a
//! live TCP byte stream into frames. [`pmu::Pmu`] is a server advertising one PMU's
//! configuration and streaming data to connected PDC clients (§4.4). [`pdc::Pdc`] is a client
//! session against exactly one PMU (§4.5). [`splitter::Splitter`] composes a [`pdc::Pdc`] and a
//! [`pmu::Pmu`] to fan one upstream source out to many downstream clients, forwarding frames
//! verbatim rather than re-encoding them (§4.6).

// This mod MUST go first, so that the others see its macros.
pub(crate) mod log;

pub mod config;
pub mod config_store;
pub mod crc;
pub mod error;
pub mod frame;
pub mod pdc;
pub mod pmu;
pub mod splitter;
pub mod transport;

pub use config::{EndpointConfig, ReconnectBackoff, Timeouts};
pub use error::{CodecError, Error};
pub use frame::{ConfigLookup, Frame, FrameType, StreamDecoder};
pub use pdc::Pdc;
pub use pmu::{ClientId, ClientState, Pmu};
pub use splitter::Splitter;
