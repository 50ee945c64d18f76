//! Network transport layer for RTP media and RTCP reports.
//!
//! Two framings are supported, selected per connection by [`Protocol`]:
//!
//! - **UDP** ([`udp`]): every RTP packet is an independent datagram sent to
//!   the server port negotiated for its track; RTCP goes to the companion
//!   port. Datagram reordering is left to RTP sequencing.
//!
//! - **TCP interleaved** ([`tcp`], RFC 2326 §10.12): RTP and RTCP share the
//!   RTSP TCP connection. Each packet is prefixed by a 4-byte header:
//!
//!   ```text
//!   '$' (0x24) | channel | length (16-bit big-endian)
//!   ```
//!
//!   RTP of logical channel `c` travels on interleaved channel `2c`, its RTCP
//!   on `2c + 1`.
//!
//! Both sockets of one connection write through a single shared writer, so
//! there is exactly one writer per physical connection.

pub mod tcp;
pub mod udp;

use crate::error::Result;
use crate::media::RtpFrame;

pub use tcp::{RtpSocketTcp, SenderReportTcp};
pub use udp::{RtpSocketUdp, SenderReportUdp, UdpTrack};

/// Interleaved frame marker byte (`$`).
pub const INTERLEAVED_MARKER: u8 = 0x24;

/// How RTP/RTCP reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    Udp,
    #[default]
    Tcp,
}

/// Sink for RTP packets. Consumes each [`RtpFrame`] exactly once.
pub trait RtpSocket: Send {
    /// Write one packet as a single logical unit.
    fn send_frame(&mut self, frame: &RtpFrame) -> Result<()>;

    /// Force any buffered bytes out.
    fn flush(&mut self) -> Result<()>;
}

/// Sink for RTCP sender reports of the track that produced `frame`.
pub trait ReportSocket: Send {
    fn send_report(&mut self, report: &[u8], frame: &RtpFrame) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Header of an interleaved RTP packet of logical channel `channel`.
pub fn rtp_interleaved_header(channel: u8, length: usize) -> [u8; 4] {
    debug_assert!(channel < 128, "logical channel out of range");
    debug_assert!(length <= u16::MAX as usize, "RTP packet too large");
    let length = length as u16;
    [
        INTERLEAVED_MARKER,
        channel << 1,
        (length >> 8) as u8,
        (length & 0xFF) as u8,
    ]
}

/// Header of an interleaved RTCP report of logical channel `channel`.
pub fn rtcp_interleaved_header(channel: u8) -> [u8; 4] {
    debug_assert!(channel < 128, "logical channel out of range");
    let length = crate::rtcp::REPORT_PACKET_LENGTH as u16;
    [
        INTERLEAVED_MARKER,
        (channel << 1) | 1,
        (length >> 8) as u8,
        (length & 0xFF) as u8,
    ]
}

/// Decode an interleaved header into `(interleaved_channel, length)`.
///
/// A header that does not start with `$` is a decode error; callers must
/// drop the connection rather than resynchronize.
pub fn parse_interleaved_header(header: [u8; 4]) -> Result<(u8, u16)> {
    if header[0] != INTERLEAVED_MARKER {
        return Err(crate::StreamError::InvalidInterleavedHeader(header[0]));
    }
    Ok((header[1], u16::from_be_bytes([header[2], header[3]])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtp_header_layout() {
        for channel in [0u8, 1, 5, 127] {
            for len in [0usize, 1, 255, 256, 1412, 65535] {
                let h = rtp_interleaved_header(channel, len);
                assert_eq!(h, [0x24, channel * 2, (len >> 8) as u8, (len & 0xFF) as u8]);
            }
        }
    }

    #[test]
    fn rtcp_header_uses_odd_channel() {
        assert_eq!(rtcp_interleaved_header(0), [0x24, 1, 0x00, 0x1C]);
        assert_eq!(rtcp_interleaved_header(1), [0x24, 3, 0x00, 0x1C]);
        assert_eq!(rtcp_interleaved_header(9), [0x24, 19, 0x00, 0x1C]);
    }

    #[test]
    fn parse_round_trips_rtp_header() {
        let (channel, len) = parse_interleaved_header(rtp_interleaved_header(3, 1400)).unwrap();
        assert_eq!(channel, 6);
        assert_eq!(len, 1400);
    }

    #[test]
    fn parse_rejects_bad_marker() {
        let err = parse_interleaved_header([0x23, 0, 0, 4]).unwrap_err();
        assert!(matches!(err, crate::StreamError::InvalidInterleavedHeader(0x23)));
    }
}
