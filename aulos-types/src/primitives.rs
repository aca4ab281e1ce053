//! Wire-level helpers shared by every argument and packet encoder: 4-byte
//! padding, the OSC time-tag, and the two aggregate argument payloads
//! (`rgba` and `midi`) that pack four bytes into a single `u32`.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Rounds `len` up to the next multiple of 4.
pub fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Pads `buf` with zero bytes until its length is a multiple of 4.
pub fn pad4(buf: &mut Vec<u8>) {
    let target = padded_len(buf.len());
    buf.resize(target, 0);
}

/// Appends a single NUL terminator then pads to a multiple of 4, as OSC
/// strings and blobs require at least one stop byte even when already
/// aligned (a 4-byte string is followed by 4 more zero bytes, not zero).
pub fn pad4_with_stop(buf: &mut Vec<u8>) {
    buf.push(0);
    pad4(buf);
}

/// An NTP-format 64-bit timestamp: 32 bits of whole seconds since the NTP
/// epoch, 32 bits of fractional seconds.
///
/// `Ord` is derived in field order (seconds, then fraction), which is the
/// exact ordering bundle scheduling needs and is why the dispatch engine's
/// priority queue can use `TimeTag` as its key with no custom `Ord` impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeTag {
    pub seconds: u32,
    pub fraction: u32,
}

impl TimeTag {
    /// The special time-tag value (seconds=0, fraction=1) meaning "dispatch
    /// immediately, ignoring scheduling order".
    pub const IMMEDIATELY: TimeTag = TimeTag { seconds: 0, fraction: 1 };

    pub fn new(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    /// Builds a time-tag from the current wall-clock time.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_unix_duration(since_epoch)
    }

    /// Converts a `Duration` since the Unix epoch into a `TimeTag`.
    pub fn from_unix_duration(d: Duration) -> Self {
        let seconds = d.as_secs().saturating_add(NTP_UNIX_OFFSET) as u32;
        let fraction = ((d.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self { seconds, fraction: fraction as u32 }
    }

    /// Converts this time-tag to a `Duration` since the Unix epoch, or
    /// `None` if it predates 1970.
    pub fn to_unix_duration(self) -> Option<Duration> {
        let secs = (self.seconds as u64).checked_sub(NTP_UNIX_OFFSET)?;
        let nanos = ((self.fraction as u64) * 1_000_000_000) >> 32;
        Some(Duration::new(secs, nanos as u32))
    }

    /// True for [`Self::IMMEDIATELY`].
    pub fn is_immediate(self) -> bool {
        self == Self::IMMEDIATELY
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[0..4].copy_from_slice(&self.seconds.to_be_bytes());
        out[4..8].copy_from_slice(&self.fraction.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        let seconds = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let fraction = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        Self { seconds, fraction }
    }
}

impl Default for TimeTag {
    fn default() -> Self {
        Self::IMMEDIATELY
    }
}

/// The `r` argument type: four packed color channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorRgba {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl ColorRgba {
    pub fn to_bytes(self) -> [u8; 4] {
        [self.red, self.green, self.blue, self.alpha]
    }

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self { red: bytes[0], green: bytes[1], blue: bytes[2], alpha: bytes[3] }
    }
}

/// The `m` argument type: a raw 4-byte MIDI message (port id, status byte,
/// data1, data2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MidiMessage {
    pub port_id: u8,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

impl MidiMessage {
    pub fn to_bytes(self) -> [u8; 4] {
        [self.port_id, self.status, self.data1, self.data2]
    }

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self { port_id: bytes[0], status: bytes[1], data1: bytes[2], data2: bytes[3] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_len_rounds_up_to_multiple_of_four() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 4);
        assert_eq!(padded_len(4), 4);
        assert_eq!(padded_len(5), 8);
    }

    #[test]
    fn pad4_with_stop_always_grows_buffer() {
        let mut buf = b"abcd".to_vec();
        pad4_with_stop(&mut buf);
        assert_eq!(buf, b"abcd\0\0\0\0");
    }

    #[test]
    fn timetag_ordering_is_field_order() {
        let a = TimeTag::new(10, 5);
        let b = TimeTag::new(10, 6);
        let c = TimeTag::new(11, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn timetag_round_trips_through_unix_duration() {
        let d = Duration::new(1_700_000_000, 500_000_000);
        let tag = TimeTag::from_unix_duration(d);
        let back = tag.to_unix_duration().unwrap();
        assert_eq!(back.as_secs(), d.as_secs());
        assert!((back.subsec_nanos() as i64 - d.subsec_nanos() as i64).abs() < 50);
    }

    #[test]
    fn timetag_bytes_round_trip() {
        let tag = TimeTag::new(0xdeadbeef, 0x00c0ffee);
        assert_eq!(TimeTag::from_bytes(&tag.to_bytes()), tag);
    }

    #[test]
    fn immediately_is_seconds_zero_fraction_one() {
        assert_eq!(TimeTag::IMMEDIATELY, TimeTag::new(0, 1));
        assert!(TimeTag::IMMEDIATELY.is_immediate());
    }
}
