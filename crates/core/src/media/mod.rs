//! Media frames, codecs and RTP packetization.
//!
//! This module provides the [`Packetizer`] trait and codec-specific
//! implementations that convert encoded frames into RTP packets.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded frame is split into one or more RTP packets. Every RTP
//! packet carries a 12-byte fixed header ([`rtp::RtpHeader`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping) for reordering and loss detection.
//! - **Timestamp** (32-bit) on the media clock: 90 kHz for video, the sample
//!   rate for AAC.
//! - **SSRC** (32-bit) randomly chosen to identify the sender.
//! - **Marker bit** set on the last packet of an access unit.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) |
//! | AAC | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) |
//! | G.711 A-law | [`g711`] | [RFC 3551](https://tools.ietf.org/html/rfc3551) |

pub mod aac;
pub mod g711;
pub mod h264;
pub mod h265;
pub mod rtp;

pub use rtp::RtpFrame;

/// Dynamic payload type used for video tracks.
pub const VIDEO_PAYLOAD_TYPE: u8 = 96;
/// Dynamic payload type used for AAC audio tracks.
pub const AUDIO_PAYLOAD_TYPE: u8 = 97;
/// Channel of the video track on interleaved/UDP transports.
pub const VIDEO_CHANNEL: u8 = 0;
/// Channel of the audio track on interleaved/UDP transports.
pub const AUDIO_CHANNEL: u8 = 1;

/// Which elementary stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Audio,
    Video,
}

impl Track {
    /// SDP media type (`m=<media>`).
    pub fn sdp_media(&self) -> &'static str {
        match self {
            Track::Audio => "audio",
            Track::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioCodec {
    #[default]
    Aac,
    G711,
}

/// An encoded media unit handed over by an encoder.
///
/// Immutable once built: the session and packetizer only borrow the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    buffer: Vec<u8>,
    timestamp_us: u64,
    track: Track,
}

impl Frame {
    pub fn new(track: Track, buffer: Vec<u8>, timestamp_us: u64) -> Self {
        Self {
            buffer,
            timestamp_us,
            track,
        }
    }

    pub fn audio(buffer: Vec<u8>, timestamp_us: u64) -> Self {
        Self::new(Track::Audio, buffer, timestamp_us)
    }

    pub fn video(buffer: Vec<u8>, timestamp_us: u64) -> Self {
        Self::new(Track::Video, buffer, timestamp_us)
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Presentation timestamp in microseconds.
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn track(&self) -> Track {
        self.track
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Raw PCM audio handed over by the microphone before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame {
    pub buffer: Vec<u8>,
    pub timestamp_us: u64,
}

impl PcmFrame {
    pub fn new(buffer: Vec<u8>, timestamp_us: u64) -> Self {
        Self {
            buffer,
            timestamp_us,
        }
    }

    /// Replace the samples with silence, keeping the length and timestamp.
    pub fn silence(&mut self) {
        self.buffer.fill(0);
    }
}

/// Raw (YUV) video handed over by the video source before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawVideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_us: u64,
}

/// Codec-specific RTP packetizer.
///
/// Each supported codec implements this trait, providing:
/// - **Packetization**: splitting encoded frames into RTP-sized packets
/// - **SDP attributes**: codec parameters for the ANNOUNCE body
/// - **RTP metadata**: payload type, clock rate, SSRC
///
/// The generic RTP header is handled by [`rtp::RtpHeader`]; packetizers
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Packetize one encoded frame into RTP packets, in send order.
    ///
    /// The RTP timestamp is derived from [`Frame::timestamp_us`] and the
    /// codec clock rate. Every returned packet is tagged with
    /// [`channel`](Self::channel).
    fn packetize(&mut self, frame: &Frame) -> Vec<RtpFrame>;

    /// Codec name for the SDP `a=rtpmap` attribute (e.g. `"H264"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// Logical channel carried in interleaved headers.
    fn channel(&self) -> u8;

    fn ssrc(&self) -> u32;

    /// Which track this packetizer feeds.
    fn track(&self) -> Track;

    /// SDP media-level attribute lines, including the `a=` prefix.
    fn sdp_attributes(&self) -> Vec<String>;
}

/// Split an Annex B bitstream into NAL units, dropping start codes.
///
/// Handles both 4-byte `00 00 00 01` and 3-byte `00 00 01` start codes and
/// tracks each one's length so adjacent NAL boundaries are computed
/// correctly when both forms are mixed. Input without any start code is
/// treated as a single NAL unit (encoders that emit length-less AVCC
/// slices one at a time).
pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut nal_units = Vec::new();
    let mut i = 0usize;

    // (nal_data_start_index, start_code_length)
    let mut start_entries: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            start_entries.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            start_entries.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    if start_entries.is_empty() {
        if !data.is_empty() {
            nal_units.push(data);
        }
        return nal_units;
    }

    for (idx, &(start, _)) in start_entries.iter().enumerate() {
        let end = if idx + 1 < start_entries.len() {
            let (next_start, next_sc_len) = start_entries[idx + 1];
            next_start - next_sc_len
        } else {
            data.len()
        };

        if start < end {
            nal_units.push(&data[start..end]);
        }
    }

    nal_units
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_single_nal_4byte_sc() {
        let data = [0, 0, 0, 1, 0x65, 0xAA, 0xBB];
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x65, 0xAA, 0xBB][..]]);
    }

    #[test]
    fn extract_single_nal_3byte_sc() {
        let data = [0, 0, 1, 0x67, 0x42, 0x00];
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![&[0x67, 0x42, 0x00][..]]);
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = extract_nal_units(&data);
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0], &[0x67, 0x42]);
        assert_eq!(nals[1], &[0x68, 0xCE]);
    }

    #[test]
    fn extract_empty_data() {
        assert!(extract_nal_units(&[]).is_empty());
    }

    #[test]
    fn bare_nal_without_start_code() {
        assert_eq!(extract_nal_units(&[0x41, 0x9A]), vec![&[0x41, 0x9A][..]]);
    }

    #[test]
    fn silence_keeps_length() {
        let mut pcm = PcmFrame::new(vec![1, 2, 3, 4], 10);
        pcm.silence();
        assert_eq!(pcm.buffer, vec![0; 4]);
        assert_eq!(pcm.timestamp_us, 10);
    }
}
