// Records crossing a queue are fixed-width POD: the queue quantum must equal
// the record's in-memory byte width, and the bytes are copied verbatim.

pub mod telemetry;
pub use telemetry::{ChannelId, TelemetryFrame};
