//! RTCP sender reports (RFC 3550 §6.4.1).
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  RC=0   |    PT=200     |          length = 6           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         SSRC of sender                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |              NTP timestamp, most significant word             |
//! |             NTP timestamp, least significant word             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         RTP timestamp                         |
//! |                     sender's packet count                     |
//! |                      sender's octet count                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The report carries no reception blocks, so its size is fixed at
//! [`REPORT_PACKET_LENGTH`] bytes.

pub mod ntp;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::media::RtpFrame;
use crate::media::rtp::RTP_HEADER_LENGTH;
use crate::transport::ReportSocket;
pub use ntp::NtpTimestamp;

/// Size of a sender report without reception blocks.
pub const REPORT_PACKET_LENGTH: usize = 28;

/// RTCP packet type for sender reports.
const PT_SENDER_REPORT: u8 = 200;

/// Default time between two reports of the same channel.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(3);

/// Cumulative counters of one channel since the last reset.
///
/// Both counters wrap at 2^32 as the RTCP fields do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderReportState {
    pub packet_count: u32,
    /// Payload octets, excluding RTP headers.
    pub octet_count: u32,
}

impl SenderReportState {
    pub fn record(&mut self, frame: &RtpFrame) {
        let payload = frame.len().saturating_sub(RTP_HEADER_LENGTH) as u32;
        self.packet_count = self.packet_count.wrapping_add(1);
        self.octet_count = self.octet_count.wrapping_add(payload);
    }
}

/// Serialize a sender report.
pub fn build_sender_report(
    ssrc: u32,
    ntp: NtpTimestamp,
    rtp_timestamp: u32,
    state: &SenderReportState,
) -> [u8; REPORT_PACKET_LENGTH] {
    let mut report = [0u8; REPORT_PACKET_LENGTH];
    report[0] = 2 << 6;
    report[1] = PT_SENDER_REPORT;
    // Length in 32-bit words minus one.
    report[2..4].copy_from_slice(&((REPORT_PACKET_LENGTH / 4 - 1) as u16).to_be_bytes());
    report[4..8].copy_from_slice(&ssrc.to_be_bytes());
    report[8..16].copy_from_slice(&ntp.to_be_bytes());
    report[16..20].copy_from_slice(&rtp_timestamp.to_be_bytes());
    report[20..24].copy_from_slice(&state.packet_count.to_be_bytes());
    report[24..28].copy_from_slice(&state.octet_count.to_be_bytes());
    report
}

#[derive(Debug)]
struct ChannelReport {
    state: SenderReportState,
    last_report: Instant,
}

/// Accumulates per-channel counters and emits a report when a channel's
/// interval has elapsed.
///
/// Called with every RTP packet right after it is written, by the same
/// owner as the RTP socket, so reports never split an RTP write.
pub struct RtcpReporter {
    socket: Box<dyn ReportSocket>,
    interval: Duration,
    channels: HashMap<u8, ChannelReport>,
}

impl RtcpReporter {
    pub fn new(socket: Box<dyn ReportSocket>, interval: Duration) -> Self {
        Self {
            socket,
            interval,
            channels: HashMap::new(),
        }
    }

    /// Account for `frame` and send a report if the channel is due.
    ///
    /// Returns whether a report was written.
    pub fn update(&mut self, frame: &RtpFrame, ssrc: u32) -> Result<bool> {
        let now = Instant::now();
        let channel = self
            .channels
            .entry(frame.channel)
            .or_insert_with(|| ChannelReport {
                state: SenderReportState::default(),
                last_report: now,
            });
        channel.state.record(frame);

        if now.duration_since(channel.last_report) < self.interval {
            return Ok(false);
        }

        let report = build_sender_report(
            ssrc,
            NtpTimestamp::now(),
            frame.rtp_timestamp,
            &channel.state,
        );
        channel.last_report = now;
        let state = channel.state;

        self.socket.send_report(&report, frame)?;
        tracing::debug!(
            channel = frame.channel,
            packets = state.packet_count,
            octets = state.octet_count,
            "sender report sent"
        );
        Ok(true)
    }

    /// Counters of `channel`, if it has carried any packet.
    pub fn state(&self, channel: u8) -> Option<SenderReportState> {
        self.channels.get(&channel).map(|c| c.state)
    }

    /// Push buffered reports out. Call after an [`update`](Self::update) that wrote one.
    pub fn flush(&mut self) -> Result<()> {
        self.socket.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpHeader;
    use crate::transport::{SenderReportTcp, tcp::SharedWriter};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn frame(header: &mut RtpHeader, channel: u8, payload_len: usize) -> RtpFrame {
        header.packet(channel, true, &[&vec![0xAA; payload_len]])
    }

    #[test]
    fn report_layout() {
        let state = SenderReportState {
            packet_count: 3,
            octet_count: 600,
        };
        let ntp = NtpTimestamp {
            seconds: 1,
            fraction: 2,
        };
        let report = build_sender_report(0xDEADBEEF, ntp, 9000, &state);
        assert_eq!(&report[..4], &[0x80, 200, 0, 6]);
        assert_eq!(&report[4..8], &0xDEADBEEFu32.to_be_bytes());
        assert_eq!(&report[8..16], &[0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(&report[16..20], &9000u32.to_be_bytes());
        assert_eq!(&report[20..24], &3u32.to_be_bytes());
        assert_eq!(&report[24..28], &600u32.to_be_bytes());
    }

    #[test]
    fn counters_are_per_channel_and_monotonic() {
        let writer: SharedWriter<Vec<u8>> = Arc::new(Mutex::new(Vec::new()));
        let mut reporter = RtcpReporter::new(
            Box::new(SenderReportTcp::new(writer)),
            Duration::from_secs(3600),
        );
        let mut video = RtpHeader::new(96, 1, 90000);
        let mut audio = RtpHeader::new(97, 2, 44100);

        for _ in 0..3 {
            assert!(!reporter.update(&frame(&mut video, 0, 100), 1).unwrap());
        }
        assert!(!reporter.update(&frame(&mut audio, 1, 50), 2).unwrap());

        let v = reporter.state(0).unwrap();
        assert_eq!(v.packet_count, 3);
        assert_eq!(v.octet_count, 300);
        let a = reporter.state(1).unwrap();
        assert_eq!(a.packet_count, 1);
        assert_eq!(a.octet_count, 50);

        assert!(reporter.state(5).is_none());
    }

    #[test]
    fn due_report_is_framed_on_companion_channel() {
        let writer: SharedWriter<Vec<u8>> = Arc::new(Mutex::new(Vec::new()));
        let mut reporter =
            RtcpReporter::new(Box::new(SenderReportTcp::new(writer.clone())), Duration::ZERO);
        let mut audio = RtpHeader::new(97, 7, 44100);

        assert!(reporter.update(&frame(&mut audio, 1, 10), 7).unwrap());
        let bytes = writer.lock().clone();
        assert_eq!(bytes.len(), 4 + REPORT_PACKET_LENGTH);
        assert_eq!(&bytes[..4], &[0x24, 3, 0x00, 0x1C]);
        assert_eq!(&bytes[8..12], &7u32.to_be_bytes());
        assert_eq!(&bytes[24..28], &1u32.to_be_bytes());
        assert_eq!(&bytes[28..32], &10u32.to_be_bytes());
    }
}
