//! Signal extraction and smoothing primitives used by the task processors.

pub mod demux;
pub mod ewma;
pub mod parser;

pub use demux::{encode_frame, DemuxError, Demuxer, LineBuffer, StreamKind};
pub use ewma::{Ewma, EWMA_TICK};
pub use parser::{parse_hashrate, ParseError, SPEED_MARKER};
