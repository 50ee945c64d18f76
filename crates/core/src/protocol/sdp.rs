//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body of ANNOUNCE requests. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                              ← session name
//! c=IN IP4 <addr>                               ← connection address
//! t=0 0                                         ← timing (live stream)
//! a=tool:livepush                               ← client software (§6)
//! a=recvonly                                    ← server's direction (§6)
//! m=video 0 RTP/AVP 96                          ← media description
//! a=rtpmap:96 H264/90000                        ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;...            ← codec parameters
//! a=control:trackID=0                           ← track control URL
//! m=audio 0 RTP/AVP 97
//! ...
//! ```
//!
//! One `m=` section is emitted per packetizer, video first.

use crate::media::Packetizer;

/// Session-level SDP fields.
#[derive(Debug, Clone)]
pub struct SdpSession {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub session_name: String,
}

impl Default for SdpSession {
    fn default() -> Self {
        Self {
            username: "-".to_string(),
            session_id: "0".to_string(),
            session_version: "0".to_string(),
            session_name: "Live".to_string(),
        }
    }
}

/// Generate the ANNOUNCE description for `host` and the given tracks.
pub fn generate_sdp(session: &SdpSession, host: &str, tracks: &[&dyn Packetizer]) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {} {} IN IP4 {}",
        session.username, session.session_id, session.session_version, host
    ));
    sdp.push(format!("s={}", session.session_name));
    sdp.push(format!("c=IN IP4 {}", host));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:livepush".to_string());
    sdp.push("a=recvonly".to_string());
    for track in tracks {
        sdp.push(format!(
            "m={} 0 RTP/AVP {}",
            track.track().sdp_media(),
            track.payload_type()
        ));
        sdp.extend(track.sdp_attributes());
    }

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::aac::AacPacketizer;
    use crate::media::h264::H264Packetizer;

    #[test]
    fn generates_video_and_audio_sections() {
        let mut video = H264Packetizer::new(96, 0x12345678, 0);
        video.set_parameter_sets(&[0x67, 0x42, 0x00, 0x1e], &[0x68, 0xce, 0x38, 0x80]);
        let audio = AacPacketizer::new(97, 0x9abcdef0, 1, 44100, true);
        let session = SdpSession {
            session_name: "Test Session".to_string(),
            ..Default::default()
        };

        let sdp = generate_sdp(&session, "192.168.1.100", &[&video, &audio]);

        assert!(sdp.contains("v=0\r\n"));
        assert!(sdp.contains("o=- 0 0 IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("s=Test Session\r\n"));
        assert!(sdp.contains("c=IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("a=tool:livepush\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(sdp.contains("a=control:trackID=0\r\n"));
        assert!(sdp.contains("a=rtpmap:97 MPEG4-GENERIC/44100/2\r\n"));
        assert!(sdp.contains("a=control:trackID=1\r\n"));

        // rtpmap must come before fmtp (RFC 6184 §8.2.1)
        let rtpmap_idx = sdp.find("a=rtpmap:96").expect("SDP must include rtpmap");
        let fmtp_idx = sdp.find("a=fmtp:96").expect("SDP must include fmtp");
        assert!(rtpmap_idx < fmtp_idx);

        let video_idx = sdp.find("m=video 0 RTP/AVP 96").expect("video section");
        let audio_idx = sdp.find("m=audio 0 RTP/AVP 97").expect("audio section");
        assert!(sdp.find("a=recvonly").unwrap() < video_idx);
        assert!(video_idx < audio_idx);
        assert!(sdp.ends_with("\r\n"), "SDP must end with CRLF");
    }

    #[test]
    fn video_only() {
        let video = H264Packetizer::new(96, 1, 0);
        let sdp = generate_sdp(&SdpSession::default(), "10.0.0.1", &[&video]);
        assert!(sdp.contains("m=video"));
        assert!(!sdp.contains("m=audio"));
    }
}
