//! H.265 (HEVC) RTP packetizer, RFC 7798.
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header** (vs 1-byte in H.264).
//!   The NAL type is in bits 1..6 of the first byte.
//!
//! - **FU header format**: a 2-byte payload header with type 49, then a
//!   1-byte FU header `[S|E|FuType(6)]`.
//!
//! - **SDP attributes** (RFC 7798 §7.1):
//!   ```text
//!   a=rtpmap:96 H265/90000
//!   a=fmtp:96 sprop-vps=...;sprop-sps=...;sprop-pps=...
//!   ```

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::h264::DEFAULT_MTU;
use super::rtp::{RtpFrame, RtpHeader};
use super::{Frame, Packetizer, Track, extract_nal_units};

const NAL_VPS: u8 = 32;
const NAL_SPS: u8 = 33;
const NAL_PPS: u8 = 34;
const NAL_FU: u8 = 49;

fn nal_type(nal: &[u8]) -> u8 {
    (nal[0] >> 1) & 0x3f
}

/// BLA, IDR and CRA pictures (types 16..=21) start a decodable sequence.
fn is_irap(nal: &[u8]) -> bool {
    (16..=21).contains(&nal_type(nal))
}

#[derive(Debug)]
pub struct H265Packetizer {
    header: RtpHeader,
    channel: u8,
    mtu: usize,
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H265Packetizer {
    pub fn new(pt: u8, ssrc: u32, channel: u8) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc, 90000),
            channel,
            mtu: DEFAULT_MTU,
            vps: None,
            sps: None,
            pps: None,
        }
    }

    pub fn with_random_ssrc(pt: u8, channel: u8) -> Self {
        Self::new(pt, rand::random::<u32>(), channel)
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(16);
        self
    }

    pub fn set_parameter_sets(&mut self, vps: &[u8], sps: &[u8], pps: &[u8]) {
        self.vps = extract_nal_units(vps).first().map(|n| n.to_vec());
        self.sps = extract_nal_units(sps).first().map(|n| n.to_vec());
        self.pps = extract_nal_units(pps).first().map(|n| n.to_vec());
    }

    fn packetize_nal(&mut self, nal_unit: &[u8], is_last_nal: bool) -> Vec<RtpFrame> {
        let mut packets = Vec::new();
        if nal_unit.len() < 2 {
            return packets;
        }

        if nal_unit.len() <= self.mtu {
            packets.push(self.header.packet(self.channel, is_last_nal, &[nal_unit]));
            return packets;
        }

        let ty = nal_type(nal_unit);
        let payload_header = [(nal_unit[0] & 0x81) | (NAL_FU << 1), nal_unit[1]];
        let payload = &nal_unit[2..];
        let max_fragment = self.mtu - 3;
        let mut offset = 0usize;

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let last_fragment = remaining <= max_fragment;
            let chunk_size = remaining.min(max_fragment);

            let start_bit = if offset == 0 { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };
            let fu_header = start_bit | end_bit | ty;

            packets.push(self.header.packet(
                self.channel,
                is_last_nal && last_fragment,
                &[
                    &payload_header,
                    &[fu_header],
                    &payload[offset..offset + chunk_size],
                ],
            ));
            offset += chunk_size;
        }

        tracing::trace!(
            nal_type = ty,
            nal_size = nal_unit.len(),
            fragments = packets.len(),
            "FU fragmented HEVC NAL unit"
        );
        packets
    }
}

impl Packetizer for H265Packetizer {
    fn packetize(&mut self, frame: &Frame) -> Vec<RtpFrame> {
        let nal_units: Vec<&[u8]> = extract_nal_units(frame.buffer())
            .into_iter()
            .filter(|n| n.len() >= 2)
            .collect();

        for nal in &nal_units {
            let slot = match nal_type(nal) {
                NAL_VPS => &mut self.vps,
                NAL_SPS => &mut self.sps,
                NAL_PPS => &mut self.pps,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(nal.to_vec());
            }
        }

        self.header.set_media_time(frame.timestamp_us());
        let mut packets = Vec::new();

        let has_irap = nal_units.iter().any(|n| is_irap(n));
        if has_irap {
            for ps in [self.vps.clone(), self.sps.clone(), self.pps.clone()]
                .into_iter()
                .flatten()
            {
                packets.push(self.header.packet(self.channel, false, &[&ps]));
            }
        }

        let media: Vec<&[u8]> = nal_units
            .into_iter()
            .filter(|n| !has_irap || !matches!(nal_type(n), NAL_VPS | NAL_SPS | NAL_PPS))
            .collect();

        for (i, nal) in media.iter().enumerate() {
            packets.append(&mut self.packetize_nal(nal, i == media.len() - 1));
        }

        tracing::trace!(
            rtp_packets = packets.len(),
            frame_bytes = frame.len(),
            ts = self.header.timestamp(),
            "HEVC frame packetized"
        );
        packets
    }

    fn codec_name(&self) -> &'static str {
        "H265"
    }

    fn clock_rate(&self) -> u32 {
        90000
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
        Track::Video
    }

    fn sdp_attributes(&self) -> Vec<String> {
        let mut attrs = vec![format!(
            "a=rtpmap:{} {}/{}",
            self.payload_type(),
            self.codec_name(),
            self.clock_rate()
        )];
        if let (Some(vps), Some(sps), Some(pps)) = (&self.vps, &self.sps, &self.pps) {
            attrs.push(format!(
                "a=fmtp:{} sprop-vps={};sprop-sps={};sprop-pps={}",
                self.header.pt,
                BASE64_STANDARD.encode(vps),
                BASE64_STANDARD.encode(sps),
                BASE64_STANDARD.encode(pps)
            ));
        }
        attrs.push(format!("a=control:trackID={}", self.channel));
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VPS: [u8; 3] = [0x40, 0x01, 0x0c];
    const SPS: [u8; 3] = [0x42, 0x01, 0x01];
    const PPS: [u8; 3] = [0x44, 0x01, 0xc1];

    fn idr(len: usize) -> Vec<u8> {
        let mut data = vec![0, 0, 0, 1, 0x26, 0x01];
        data.extend(vec![0xAB; len]);
        data
    }

    #[test]
    fn nal_type_uses_six_bits() {
        assert_eq!(nal_type(&VPS), NAL_VPS);
        assert_eq!(nal_type(&[0x26, 0x01]), 19);
        assert!(is_irap(&[0x26, 0x01]));
        assert!(!is_irap(&[0x02, 0x01]));
    }

    #[test]
    fn irap_is_preceded_by_parameter_sets() {
        let mut p = H265Packetizer::new(96, 7, 0);
        p.set_parameter_sets(&VPS, &SPS, &PPS);
        let packets = p.packetize(&Frame::video(idr(10), 0));
        assert_eq!(packets.len(), 4);
        assert_eq!(packets[0].payload(), &VPS);
        assert_eq!(packets[1].payload(), &SPS);
        assert_eq!(packets[2].payload(), &PPS);
        assert!(packets[3].marker());
        assert!(!packets[2].marker());
    }

    #[test]
    fn large_nal_uses_fu_49() {
        let mut p = H265Packetizer::new(96, 7, 0);
        let packets = p.packetize(&Frame::video(idr(DEFAULT_MTU * 2), 0));
        assert_eq!(packets.len(), 3);
        for pkt in &packets {
            assert_eq!(nal_type(pkt.payload()), NAL_FU);
            assert_eq!(pkt.payload()[1], 0x01);
            assert_eq!(pkt.payload()[2] & 0x3f, 19);
        }
        assert_eq!(packets[0].payload()[2] & 0x80, 0x80);
        assert_eq!(packets[2].payload()[2] & 0x40, 0x40);
        assert!(packets[2].marker());
        assert!(!packets[0].marker());
    }

    #[test]
    fn sdp_carries_sprop_sets() {
        let mut p = H265Packetizer::new(96, 7, 0);
        p.set_parameter_sets(&VPS, &SPS, &PPS);
        let attrs = p.sdp_attributes();
        assert_eq!(attrs[0], "a=rtpmap:96 H265/90000");
        assert!(attrs[1].starts_with("a=fmtp:96 sprop-vps=QAEM;sprop-sps="));
        assert_eq!(attrs[2], "a=control:trackID=0");
    }
}
