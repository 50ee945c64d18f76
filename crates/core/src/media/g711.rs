use super::rtp::{RtpFrame, RtpHeader};
use super::{Frame, Packetizer, Track};

/// Static payload type for PCMA (RFC 3551 §6).
pub const PCMA_PAYLOAD_TYPE: u8 = 8;

/// G.711 A-law packetizer. The payload is the encoded samples as-is.
#[derive(Debug)]
pub struct G711Packetizer {
    header: RtpHeader,
    channel: u8,
}

impl G711Packetizer {
    pub fn new(ssrc: u32, channel: u8) -> Self {
        Self {
            header: RtpHeader::new(PCMA_PAYLOAD_TYPE, ssrc, 8000),
            channel,
        }
    }

    pub fn with_random_ssrc(channel: u8) -> Self {
        Self::new(rand::random::<u32>(), channel)
    }
}

impl Packetizer for G711Packetizer {
    fn packetize(&mut self, frame: &Frame) -> Vec<RtpFrame> {
        if frame.is_empty() {
            return Vec::new();
        }
        self.header.set_media_time(frame.timestamp_us());
        vec![self.header.packet(self.channel, false, &[frame.buffer()])]
    }

    fn codec_name(&self) -> &'static str {
        "PCMA"
    }

    fn clock_rate(&self) -> u32 {
        8000
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
            format!("a=rtpmap:{} PCMA/8000/1", self.header.pt),
            format!("a=control:trackID={}", self.channel),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_passed_through() {
        let mut p = G711Packetizer::new(5, 1);
        let packets = p.packetize(&Frame::audio(vec![0xD5; 160], 20_000));
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload(), &[0xD5; 160][..]);
        assert_eq!(packets[0].rtp_timestamp, 160);
        assert_eq!(packets[0].buffer[1] & 0x7f, 8);
    }
}
