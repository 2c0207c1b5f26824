#![forbid(unsafe_code)]

// ChannelId is consistent and stable across all processes sharing a queue.
// repr(transparent) -> struct memory layout is identical to the wrapped u16
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChannelId(pub u16);

// Minimal fixed-size telemetry record for queue tests and benches.
// POD, packed so the byte width doubles as the queue quantum with no padding.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TelemetryFrame {
    pub ts_mono_ns: u64,
    pub seq: u64,
    pub channel: ChannelId,
    pub reading_milli: i64,
}

impl TelemetryFrame {
    pub fn new(channel: ChannelId, seq: u64, ts_mono_ns: u64, reading_milli: i64) -> Self {
        Self {
            ts_mono_ns,
            seq,
            channel,
            reading_milli,
        }
    }

    /// The frame that follows this one on the same channel.
    #[inline]
    pub fn successor(&self, ts_mono_ns: u64, reading_milli: i64) -> Self {
        let channel = self.channel;
        let seq = self.seq;
        Self {
            ts_mono_ns,
            seq: seq.wrapping_add(1),
            channel,
            reading_milli,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    /// The frame width is the queue quantum; any layout drift silently breaks
    /// peers built against the old width, so pin it.
    #[test]
    fn frame_is_packed_and_fixed_width() {
        assert_eq!(size_of::<TelemetryFrame>(), 26, "TelemetryFrame layout changed");
        assert_eq!(align_of::<TelemetryFrame>(), 1, "TelemetryFrame should be packed");
    }

    #[test]
    fn channel_id_is_pod() {
        assert_eq!(size_of::<ChannelId>(), 2);
    }

    #[test]
    fn successor_advances_seq_only_on_its_channel() {
        let f = TelemetryFrame::new(ChannelId(7), 41, 1_000, -5);
        let g = f.successor(2_000, 9);
        let (seq, channel, reading) = (g.seq, g.channel, g.reading_milli);
        assert_eq!(seq, 42);
        assert_eq!(channel, ChannelId(7));
        assert_eq!(reading, 9);
    }
}
