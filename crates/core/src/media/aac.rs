//! AAC RTP packetizer, RFC 3640 `mpeg4-generic` in AAC-hbr mode.
//!
//! Every access unit is sent in its own packet with a 4-byte AU header
//! section:
//!
//! ```text
//! AU-headers-length (16 bits) = 16
//! AU-size (13 bits) | AU-Index (3 bits) = 0
//! ```

use super::rtp::{RtpFrame, RtpHeader};
use super::{Frame, Packetizer, Track};

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC LC audio object type.
const AOT_AAC_LC: u16 = 2;

/// Largest access unit the AU-size field (13 bits) can describe.
const MAX_AU_SIZE: usize = (1 << 13) - 1;

/// Index of `sample_rate` in the MPEG-4 sampling frequency table.
pub fn sample_rate_index(sample_rate: u32) -> Option<u8> {
    SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .map(|i| i as u8)
}

/// Length of an ADTS header at the start of `data`, if one is present.
fn adts_header_len(data: &[u8]) -> Option<usize> {
    if data.len() >= 7 && data[0] == 0xFF && data[1] & 0xF0 == 0xF0 {
        let protection_absent = data[1] & 0x01 == 1;
        Some(if protection_absent { 7 } else { 9 })
    } else {
        None
    }
}

#[derive(Debug)]
pub struct AacPacketizer {
    header: RtpHeader,
    channel: u8,
    sample_rate: u32,
    channels: u8,
}

impl AacPacketizer {
    pub fn new(pt: u8, ssrc: u32, channel: u8, sample_rate: u32, stereo: bool) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc, sample_rate),
            channel,
            sample_rate,
            channels: if stereo { 2 } else { 1 },
        }
    }

    pub fn with_random_ssrc(pt: u8, channel: u8, sample_rate: u32, stereo: bool) -> Self {
        Self::new(pt, rand::random::<u32>(), channel, sample_rate, stereo)
    }

    /// AudioSpecificConfig (ISO 14496-3 §1.6.2.1) as hex for the SDP `config`.
    pub fn audio_specific_config(&self) -> String {
        let index = sample_rate_index(self.sample_rate).unwrap_or(4) as u16;
        let config = (AOT_AAC_LC << 11) | (index << 7) | ((self.channels as u16) << 3);
        format!("{:04X}", config)
    }
}

impl Packetizer for AacPacketizer {
    fn packetize(&mut self, frame: &Frame) -> Vec<RtpFrame> {
        let data = frame.buffer();
        let data = match adts_header_len(data) {
            Some(len) => &data[len.min(data.len())..],
            None => data,
        };
        if data.is_empty() {
            return Vec::new();
        }

        if data.len() > MAX_AU_SIZE {
            tracing::warn!(size = data.len(), "AAC access unit exceeds 13-bit AU-size, dropped");
            return Vec::new();
        }

        self.header.set_media_time(frame.timestamp_us());
        let size = data.len() as u16;
        let au_header = [0x00, 0x10, (size >> 5) as u8, ((size & 0x1F) << 3) as u8];
        vec![self.header.packet(self.channel, true, &[&au_header, data])]
    }

    fn codec_name(&self) -> &'static str {
        "MPEG4-GENERIC"
    }

    fn clock_rate(&self) -> u32 {
        self.sample_rate
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    fn channel(&self) -> u8 {
        self.channel
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    fn track(&self) -> Track {
        Track::Audio
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![
            format!(
                "a=rtpmap:{} {}/{}/{}",
                self.header.pt,
                self.codec_name(),
                self.sample_rate,
                self.channels
            ),
            format!(
                "a=fmtp:{} streamtype=5;profile-level-id=15;mode=AAC-hbr;config={};SizeLength=13;IndexLength=3;IndexDeltaLength=3",
                self.header.pt,
                self.audio_specific_config()
            ),
            format!("a=control:trackID={}", self.channel),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn au_header_encodes_size() {
        let mut p = AacPacketizer::new(97, 1, 1, 44100, true);
        let packets = p.packetize(&Frame::audio(vec![0x21; 300], 1_000_000));
        assert_eq!(packets.len(), 1);
        let payload = packets[0].payload();
        assert_eq!(&payload[..2], &[0x00, 0x10]);
        let size = ((payload[2] as u16) << 5) | (payload[3] as u16 >> 3);
        assert_eq!(size, 300);
        assert_eq!(payload.len(), 304);
        assert!(packets[0].marker());
        assert_eq!(packets[0].rtp_timestamp, 44100);
        assert_eq!(packets[0].channel, 1);
    }

    #[test]
    fn oversized_access_unit_is_dropped() {
        let mut p = AacPacketizer::new(97, 1, 1, 44100, true);
        assert!(p.packetize(&Frame::audio(vec![0x21; MAX_AU_SIZE + 1], 0)).is_empty());

        let packets = p.packetize(&Frame::audio(vec![0x21; MAX_AU_SIZE], 0));
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0].payload()[2..4], &[0xFF, 0xF8]);
    }

    #[test]
    fn adts_header_is_stripped() {
        let mut p = AacPacketizer::new(97, 1, 1, 32000, true);
        let mut data = vec![0xFF, 0xF1, 0x50, 0x80, 0x02, 0x1F, 0xFC];
        data.extend_from_slice(&[1, 2, 3]);
        let packets = p.packetize(&Frame::audio(data, 0));
        assert_eq!(&packets[0].payload()[4..], &[1, 2, 3]);
    }

    #[test]
    fn config_for_common_rates() {
        assert_eq!(AacPacketizer::new(97, 1, 1, 44100, true).audio_specific_config(), "1210");
        assert_eq!(AacPacketizer::new(97, 1, 1, 32000, true).audio_specific_config(), "1290");
        assert_eq!(AacPacketizer::new(97, 1, 1, 48000, false).audio_specific_config(), "1188");
    }

    #[test]
    fn sdp_uses_sample_rate_and_channels() {
        let p = AacPacketizer::new(97, 1, 1, 32000, true);
        let attrs = p.sdp_attributes();
        assert_eq!(attrs[0], "a=rtpmap:97 MPEG4-GENERIC/32000/2");
        assert!(attrs[1].contains("mode=AAC-hbr;config=1290"));
        assert_eq!(attrs[2], "a=control:trackID=1");
    }

    #[test]
    fn unknown_rate_has_no_index() {
        assert_eq!(sample_rate_index(12345), None);
        assert_eq!(sample_rate_index(8000), Some(11));
    }
}
