use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::rtp::{RtpFrame, RtpHeader};
use super::{Frame, Packetizer, Track, extract_nal_units};

pub(crate) const DEFAULT_MTU: usize = 1400;

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;
const NAL_STAP_A: u8 = 24;
const NAL_FU_A: u8 = 28;

/// H.264 RTP packetizer (RFC 6184).
///
/// Converts H.264 Annex B access units into RTP packets. Supports three
/// packet types from RFC 6184:
///
/// - **Single NAL Unit** (§5.6): NALs that fit within the MTU are sent
///   as-is in a single RTP packet (12-byte header + NAL bytes).
///
/// - **STAP-A** (§5.7.1): SPS and PPS are aggregated into one packet that
///   precedes every IDR slice, so receivers joining mid-stream can decode.
///
/// - **FU-A Fragmentation** (§5.8): NALs exceeding the MTU are split
///   across multiple RTP packets. Each fragment carries a 2-byte FU
///   header (FU indicator + FU header) before the NAL payload:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to MTU - 2 bytes)
///   ```
///
/// ## Parameter sets
///
/// SPS/PPS normally come from the encoder through
/// [`set_parameter_sets`](Self::set_parameter_sets). They are also captured
/// from the first access unit that carries them in-band.
///
/// ## Marker bit
///
/// Per RFC 6184 §5.1, the RTP marker bit is set on the last RTP packet
/// of an access unit.
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpHeader,
    channel: u8,
    mtu: usize,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H264Packetizer {
    /// Create with explicit payload type and SSRC.
    pub fn new(pt: u8, ssrc: u32, channel: u8) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc, 90000),
            channel,
            mtu: DEFAULT_MTU,
            sps: None,
            pps: None,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8, channel: u8) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt, 90000),
            channel,
            mtu: DEFAULT_MTU,
            sps: None,
            pps: None,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(16);
        self
    }

    /// Install the parameter sets reported by the encoder.
    ///
    /// Accepts them with or without a leading start code.
    pub fn set_parameter_sets(&mut self, sps: &[u8], pps: &[u8]) {
        self.sps = extract_nal_units(sps).first().map(|n| n.to_vec());
        self.pps = extract_nal_units(pps).first().map(|n| n.to_vec());
    }

    /// Derive profile-level-id from SPS NAL (RFC 6184 §8.1): bytes 1–3 are profile_idc, constraint_set, level_idc.
    fn get_profile_level_id(&self) -> Result<String, String> {
        let sps = self.sps.as_deref().ok_or("SPS not set")?;
        if sps.len() < 4 {
            return Err("SPS too short for profile-level-id".into());
        }
        Ok(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    fn get_sprop_parameter_sets(&self) -> Result<String, String> {
        let sps = self.sps.as_deref().ok_or("SPS not set")?;
        let pps = self.pps.as_deref().ok_or("PPS not set")?;
        Ok(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    /// SPS + PPS aggregated in one STAP-A packet (RFC 6184 §5.7.1).
    fn stap_a(&mut self) -> Option<RtpFrame> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        let nri = sps[0] & 0x60;
        let sps_len = (sps.len() as u16).to_be_bytes();
        let pps_len = (pps.len() as u16).to_be_bytes();
        Some(self.header.packet(
            self.channel,
            false,
            &[&[nri | NAL_STAP_A], &sps_len, sps, &pps_len, pps],
        ))
    }

    /// Packetize a single NAL unit into one or more RTP packets.
    ///
    /// If the NAL fits within the MTU, it is sent as a Single NAL Unit
    /// packet (RFC 6184 §5.6). Otherwise, FU-A fragmentation is used
    /// (RFC 6184 §5.8).
    fn packetize_nal(&mut self, nal_unit: &[u8], is_last_nal: bool) -> Vec<RtpFrame> {
        let mut packets = Vec::new();

        if nal_unit.is_empty() {
            return packets;
        }

        if nal_unit.len() <= self.mtu {
            packets.push(self.header.packet(self.channel, is_last_nal, &[nal_unit]));
        } else {
            let nal_header = nal_unit[0];
            let nal_type = nal_header & 0x1f;
            let nri = nal_header & 0x60;

            // FU indicator: NRI from original NAL, type = 28 (FU-A)
            let fu_indicator = nri | NAL_FU_A;
            let payload = &nal_unit[1..];

            let max_fragment = self.mtu - 2;
            let mut offset = 0usize;
            let mut first = true;

            while offset < payload.len() {
                let remaining = payload.len() - offset;
                let last_fragment = remaining <= max_fragment;
                let chunk_size = std::cmp::min(max_fragment, remaining);
                let chunk = &payload[offset..offset + chunk_size];

                // FU header: S=start, E=end, R=0, Type=original NAL type
                let start_bit = if first { 0x80 } else { 0x00 };
                let end_bit = if last_fragment { 0x40 } else { 0x00 };
                let fu_header = start_bit | end_bit | nal_type;

                let marker = is_last_nal && last_fragment;
                packets.push(self.header.packet(
                    self.channel,
                    marker,
                    &[&[fu_indicator, fu_header], chunk],
                ));

                offset += chunk_size;
                first = false;
            }

            tracing::trace!(
                nal_type,
                nal_size = nal_unit.len(),
                fragments = packets.len(),
                "FU-A fragmented NAL unit"
            );
        }

        packets
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, frame: &Frame) -> Vec<RtpFrame> {
        let nal_units = extract_nal_units(frame.buffer());
        let mut packets = Vec::new();

        if self.sps.is_none() || self.pps.is_none() {
            for nal in &nal_units {
                let nal_type = nal[0] & 0x1f;
                if nal_type == NAL_SPS && self.sps.is_none() {
                    self.sps = Some(nal.to_vec());
                    tracing::debug!("H.264 SPS captured from bitstream ({} bytes)", nal.len());
                } else if nal_type == NAL_PPS && self.pps.is_none() {
                    self.pps = Some(nal.to_vec());
                    tracing::debug!("H.264 PPS captured from bitstream ({} bytes)", nal.len());
                }
            }
        }

        self.header.set_media_time(frame.timestamp_us());

        let has_idr = nal_units.iter().any(|n| n[0] & 0x1f == NAL_IDR);
        if has_idr {
            packets.extend(self.stap_a());
        }

        // In-band SPS/PPS are redundant with the STAP-A above.
        let media: Vec<&[u8]> = nal_units
            .into_iter()
            .filter(|n| !has_idr || !matches!(n[0] & 0x1f, NAL_SPS | NAL_PPS))
            .collect();

        for (i, nal) in media.iter().enumerate() {
            let is_last = i == media.len() - 1;
            packets.append(&mut self.packetize_nal(nal, is_last));
        }

        tracing::trace!(
            nal_count = media.len(),
            rtp_packets = packets.len(),
            frame_bytes = frame.len(),
            seq = self.header.sequence(),
            ts = self.header.timestamp(),
            "frame packetized"
        );

        packets
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    /// 90 kHz clock rate per RFC 6184 §8.1.
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

    /// SDP attributes per RFC 6184 §8.2.1.
    ///
    /// Order matters: `a=rtpmap` defines the payload type and MUST precede
    /// `a=fmtp` which references it.
    fn sdp_attributes(&self) -> Vec<String> {
        let mut fmtp = format!("a=fmtp:{} packetization-mode=1", self.header.pt);
        if let Ok(pl) = self.get_profile_level_id() {
            fmtp.push_str(&format!(";profile-level-id={}", pl));
        }
        if let Ok(sprop) = self.get_sprop_parameter_sets() {
            fmtp.push_str(&format!(";sprop-parameter-sets={}", sprop));
        }

        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type(),
                self.codec_name(),
                self.clock_rate()
            ),
            fmtp,
            format!("a=control:trackID={}", self.channel),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 4] = [0x67, 0x42, 0x00, 0x1e];
    const PPS: [u8; 4] = [0x68, 0xce, 0x38, 0x80];

    fn make_packetizer() -> H264Packetizer {
        H264Packetizer::new(96, 0xAABBCCDD, 0)
    }

    #[test]
    fn small_nal_single_packet() {
        let mut p = make_packetizer();
        let nal = vec![0x41, 0xAA, 0xBB, 0xCC];
        let packets = p.packetize_nal(&nal, true);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 12 + 4);
        assert!(packets[0].marker());
    }

    #[test]
    fn large_nal_fragmented() {
        let mut p = H264Packetizer::new(96, 0x11223344, 0);
        let mut nal = vec![0x65];
        nal.extend(vec![0xAA; DEFAULT_MTU + 500]);
        let packets = p.packetize_nal(&nal, true);
        assert!(packets.len() > 1);

        assert_eq!(packets[0].buffer[12] & 0x1f, 28); // FU-A type
        assert_eq!(packets[0].buffer[13] & 0x80, 0x80); // Start bit
        assert!(!packets[0].marker());

        let last = packets.last().unwrap();
        assert_eq!(last.buffer[13] & 0x40, 0x40); // End bit
        assert!(last.marker());

        let carried: usize = packets.iter().map(|p| p.len() - 14).sum();
        assert_eq!(carried, nal.len() - 1);
    }

    #[test]
    fn empty_nal_no_packets() {
        let mut p = make_packetizer();
        assert!(p.packetize_nal(&[], true).is_empty());
    }

    #[test]
    fn timestamp_follows_presentation_time() {
        let mut p = make_packetizer();
        let a = p.packetize(&Frame::video(vec![0, 0, 0, 1, 0x41, 1], 0));
        let b = p.packetize(&Frame::video(vec![0, 0, 0, 1, 0x41, 2], 33_334));
        assert_eq!(a[0].rtp_timestamp, 0);
        assert_eq!(b[0].rtp_timestamp, 3000);
        assert_eq!(b[0].sequence(), a[0].sequence() + 1);
    }

    #[test]
    fn idr_is_preceded_by_stap_a() {
        let mut p = make_packetizer();
        p.set_parameter_sets(&[&[0, 0, 0, 1][..], &SPS].concat(), &PPS);
        let frame = Frame::video(vec![0, 0, 0, 1, 0x65, 0x88, 0x80], 0);
        let packets = p.packetize(&frame);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload()[0] & 0x1f, NAL_STAP_A);
        assert_eq!(&packets[0].payload()[1..3], &[0, 4]);
        assert_eq!(&packets[0].payload()[3..7], &SPS);
        assert!(!packets[0].marker());
        assert_eq!(packets[1].payload(), &[0x65, 0x88, 0x80]);
        assert!(packets[1].marker());
    }

    #[test]
    fn all_packets_carry_channel() {
        let mut p = H264Packetizer::new(96, 1, 3);
        let mut data = vec![0, 0, 0, 1, 0x41];
        data.extend(vec![0x11; DEFAULT_MTU * 2]);
        let packets = p.packetize(&Frame::video(data, 0));
        assert!(packets.iter().all(|p| p.channel == 3));
    }

    #[test]
    fn sdp_attributes_include_packetization_mode() {
        let p = make_packetizer();
        let attrs = p.sdp_attributes();
        assert!(attrs.iter().any(|a| a.contains("packetization-mode=1")));
        assert!(attrs.contains(&"a=control:trackID=0".to_string()));
    }

    #[test]
    fn codec_metadata() {
        let p = make_packetizer();
        assert_eq!(p.codec_name(), "H264");
        assert_eq!(p.clock_rate(), 90000);
        assert_eq!(p.payload_type(), 96);
        assert_eq!(p.track(), Track::Video);
    }

    #[test]
    fn auto_capture_sps_pps_from_first_frame() {
        let mut p = make_packetizer();
        let frame = [
            &[0u8, 0, 0, 1][..],
            &SPS,
            &[0, 0, 0, 1][..],
            &PPS,
            &[0, 0, 0, 1, 0x65, 0x88, 0x00][..],
        ]
        .concat();
        let packets = p.packetize(&Frame::video(frame, 0));
        // STAP-A plus the slice; in-band SPS/PPS are not repeated.
        assert_eq!(packets.len(), 2);
        let attrs = p.sdp_attributes();
        let fmtp = attrs
            .iter()
            .find(|a| a.starts_with("a=fmtp:"))
            .expect("fmtp line");
        assert!(fmtp.contains("profile-level-id=42001e"));
        assert!(fmtp.contains("sprop-parameter-sets=Z0IAHg==,aM44gA=="));
    }
}
