//! Out-of-band events that travel alongside buffers.
//!
//! Events are categorized by their flow direction:
//!
//! - **Downstream**: travel with data (stream-start, caps, segment, gap, EOS)
//! - **Upstream**: travel against data (seek, QoS, reconfigure)
//! - **Both**: flush-start and flush-stop
//!
//! Serialized events keep their position relative to buffers on a link: an
//! EOS pushed after a buffer is seen by the peer after that buffer.
//! Flush-start is not serialized: it overtakes data to cancel it, and the
//! flush-stop that follows is serialized again.
//!
//! Sticky events (stream-start, caps, segment, EOS) are remembered by the
//! pad that pushed them and replayed to a peer linked later.
//!
//! ```rust
//! use padflow::event::Event;
//!
//! let eos = Event::Eos;
//! assert!(eos.is_downstream());
//! assert!(eos.is_serialized());
//! assert!(eos.is_sticky());
//! assert!(!Event::FlushStart.is_serialized());
//! ```

use crate::caps::{Caps, Structure};
use crate::clock::ClockTime;

// ============================================================================
// Event
// ============================================================================

/// An event flowing through a link.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Start of a new stream.
    StreamStart(StreamStart),
    /// The negotiated format of the buffers that follow.
    Caps(Caps),
    /// Timeline of the buffers that follow.
    Segment(Segment),
    /// No more data follows.
    Eos,
    /// Interval without data.
    Gap {
        /// Start of the gap.
        timestamp: ClockTime,
        /// Length of the gap.
        duration: ClockTime,
    },
    /// Discard all data in flight; pads become flushing.
    FlushStart,
    /// End of a flush; pads accept data again.
    FlushStop {
        /// Whether running time restarts from zero.
        reset_time: bool,
    },
    /// Request to move playback to another position.
    Seek(Seek),
    /// Quality-of-service report from a sink.
    Qos(Qos),
    /// Ask upstream to renegotiate.
    Reconfigure,
    /// Application-defined event.
    Custom(CustomEvent),
}

impl Event {
    /// Flows with data.
    pub fn is_downstream(&self) -> bool {
        match self {
            Event::StreamStart(_)
            | Event::Caps(_)
            | Event::Segment(_)
            | Event::Eos
            | Event::Gap { .. }
            | Event::FlushStart
            | Event::FlushStop { .. } => true,
            Event::Custom(custom) => custom.direction != EventDirection::Upstream,
            _ => false,
        }
    }

    /// Flows against data.
    pub fn is_upstream(&self) -> bool {
        match self {
            Event::Seek(_)
            | Event::Qos(_)
            | Event::Reconfigure
            | Event::FlushStart
            | Event::FlushStop { .. } => true,
            Event::Custom(custom) => custom.direction != EventDirection::Downstream,
            _ => false,
        }
    }

    /// Keeps its order relative to buffers.
    pub fn is_serialized(&self) -> bool {
        match self {
            Event::FlushStart
            | Event::Seek(_)
            | Event::Qos(_)
            | Event::Reconfigure => false,
            Event::Custom(custom) => custom.serialized,
            _ => true,
        }
    }

    /// Stored on the pushing pad and replayed to new peers.
    pub fn is_sticky(&self) -> bool {
        self.sticky_rank().is_some()
    }

    /// Order in which sticky events are replayed.
    pub(crate) fn sticky_rank(&self) -> Option<u8> {
        match self {
            Event::StreamStart(_) => Some(0),
            Event::Caps(_) => Some(1),
            Event::Segment(_) => Some(2),
            Event::Eos => Some(3),
            _ => None,
        }
    }

    /// Lowercase event name used in logs.
    pub fn name(&self) -> &str {
        match self {
            Event::StreamStart(_) => "stream-start",
            Event::Caps(_) => "caps",
            Event::Segment(_) => "segment",
            Event::Eos => "eos",
            Event::Gap { .. } => "gap",
            Event::FlushStart => "flush-start",
            Event::FlushStop { .. } => "flush-stop",
            Event::Seek(_) => "seek",
            Event::Qos(_) => "qos",
            Event::Reconfigure => "reconfigure",
            Event::Custom(custom) => custom.structure.name(),
        }
    }

    /// Stream-start event.
    pub fn stream_start(stream_id: impl Into<String>) -> Self {
        Event::StreamStart(StreamStart {
            stream_id: stream_id.into(),
            group_id: None,
        })
    }

    /// Caps event.
    pub fn caps(caps: Caps) -> Self {
        Event::Caps(caps)
    }

    /// Flush-stop that resets running time.
    pub fn flush_stop() -> Self {
        Event::FlushStop { reset_time: true }
    }
}

/// Payload of [`Event::StreamStart`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStart {
    /// Unique id of the stream.
    pub stream_id: String,
    /// Streams sharing a group id are meant to be played together.
    pub group_id: Option<u32>,
}

// ============================================================================
// Segment
// ============================================================================

/// Unit of segment positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Nanoseconds.
    #[default]
    Time,
    /// Bytes.
    Bytes,
}

/// Maps buffer timestamps to running time.
///
/// Buffers with timestamps outside `[start, stop]` are clipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Position unit.
    pub format: Format,
    /// Playback rate; negative plays backwards.
    pub rate: f64,
    /// First position in the segment.
    pub start: u64,
    /// Last position, `None` when open-ended.
    pub stop: Option<u64>,
    /// Stream time of `start`.
    pub time: u64,
    /// Running time accumulated by previous segments.
    pub base: u64,
    /// Last known position.
    pub position: u64,
}

impl Default for Segment {
    fn default() -> Self {
        Self::new(Format::Time)
    }
}

impl Segment {
    /// Open-ended segment at rate 1.0 starting at zero.
    pub fn new(format: Format) -> Self {
        Self {
            format,
            rate: 1.0,
            start: 0,
            stop: None,
            time: 0,
            base: 0,
            position: 0,
        }
    }

    /// Whether `[position, position + duration)` overlaps the segment.
    pub fn clip(&self, position: u64, duration: Option<u64>) -> bool {
        let end = duration.map(|d| position.saturating_add(d));
        let after_start = match end {
            Some(end) => end > self.start || (end == self.start && position == end),
            None => position >= self.start,
        };
        let before_stop = self.stop.is_none_or(|stop| position < stop || position == self.start);
        after_start && before_stop
    }

    /// Running time of a time-format `position`, or `NONE` outside the segment.
    pub fn to_running_time(&self, position: ClockTime) -> ClockTime {
        if self.format != Format::Time || position.is_none() {
            return ClockTime::NONE;
        }
        let pos = position.nanos();
        if pos < self.start || self.stop.is_some_and(|stop| pos > stop) {
            return ClockTime::NONE;
        }
        let rate = self.rate.abs();
        let offset = if self.rate >= 0.0 {
            pos - self.start
        } else {
            self.stop.unwrap_or(pos).saturating_sub(pos)
        };
        let scaled = if rate == 1.0 {
            offset
        } else {
            (offset as f64 / rate) as u64
        };
        ClockTime::from_nanos(self.base.saturating_add(scaled))
    }
}

// ============================================================================
// Upstream events
// ============================================================================

/// Payload of [`Event::Seek`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Seek {
    /// New playback rate.
    pub rate: f64,
    /// Position unit.
    pub format: Format,
    /// New start position.
    pub start: u64,
    /// New stop position.
    pub stop: Option<u64>,
    /// Flush the pipeline before seeking.
    pub flush: bool,
}

impl Seek {
    /// Flushing seek to `start` in time format.
    pub fn flushing(start: ClockTime) -> Self {
        Self {
            rate: 1.0,
            format: Format::Time,
            start: start.nanos(),
            stop: None,
            flush: true,
        }
    }
}

/// Payload of [`Event::Qos`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Qos {
    /// Long-term processing rate; below 1.0 means too slow.
    pub proportion: f64,
    /// Lateness of the buffer at `timestamp`, negative when early.
    pub diff: i64,
    /// Timestamp of the buffer the report is about.
    pub timestamp: ClockTime,
}

/// Which way a custom event travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDirection {
    /// With the data.
    Downstream,
    /// Against the data.
    Upstream,
    /// Either way.
    Both,
}

/// Payload of [`Event::Custom`].
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    /// Travel direction.
    pub direction: EventDirection,
    /// Whether the event keeps its order relative to buffers.
    pub serialized: bool,
    /// Event name and fields.
    pub structure: Structure,
}

impl CustomEvent {
    /// Serialized downstream custom event.
    pub fn downstream(structure: Structure) -> Self {
        Self {
            direction: EventDirection::Downstream,
            serialized: true,
            structure,
        }
    }

    /// Non-serialized upstream custom event.
    pub fn upstream(structure: Structure) -> Self {
        Self {
            direction: EventDirection::Upstream,
            serialized: false,
            structure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions() {
        assert!(Event::stream_start("s").is_downstream());
        assert!(!Event::stream_start("s").is_upstream());
        assert!(Event::Seek(Seek::flushing(ClockTime::ZERO)).is_upstream());
        assert!(!Event::Reconfigure.is_downstream());
        assert!(Event::FlushStart.is_upstream() && Event::FlushStart.is_downstream());

        let custom = Event::Custom(CustomEvent::upstream(Structure::new("ping")));
        assert!(custom.is_upstream());
        assert!(!custom.is_downstream());
        assert_eq!(custom.name(), "ping");
    }

    #[test]
    fn test_sticky_order() {
        let caps = Event::Caps(Caps::new_any());
        let segment = Event::Segment(Segment::default());
        assert!(Event::stream_start("s").sticky_rank() < caps.sticky_rank());
        assert!(caps.sticky_rank() < segment.sticky_rank());
        assert!(segment.sticky_rank() < Event::Eos.sticky_rank());
        assert!(!Event::FlushStart.is_sticky());
        assert!(!Event::Gap { timestamp: ClockTime::ZERO, duration: ClockTime::ZERO }.is_sticky());
    }

    #[test]
    fn test_flush_start_not_serialized() {
        assert!(!Event::FlushStart.is_serialized());
        assert!(Event::flush_stop().is_serialized());
        assert!(Event::Eos.is_serialized());
        assert!(Event::Caps(Caps::new_any()).is_serialized());
    }

    #[test]
    fn test_running_time() {
        let mut segment = Segment::new(Format::Time);
        segment.start = ClockTime::from_secs(10).nanos();
        segment.stop = Some(ClockTime::from_secs(20).nanos());
        segment.base = ClockTime::from_secs(1).nanos();

        assert_eq!(
            segment.to_running_time(ClockTime::from_secs(15)),
            ClockTime::from_secs(6)
        );
        assert!(segment.to_running_time(ClockTime::from_secs(5)).is_none());
        assert!(segment.to_running_time(ClockTime::from_secs(25)).is_none());

        segment.rate = 2.0;
        assert_eq!(
            segment.to_running_time(ClockTime::from_secs(14)),
            ClockTime::from_secs(3)
        );
    }

    #[test]
    fn test_clip() {
        let mut segment = Segment::new(Format::Bytes);
        segment.start = 100;
        segment.stop = Some(200);
        assert!(segment.clip(150, Some(10)));
        assert!(segment.clip(90, Some(20)));
        assert!(!segment.clip(50, Some(10)));
        assert!(!segment.clip(250, None));
    }
}
