use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ReportSocket, RtpSocket, rtcp_interleaved_header, rtp_interleaved_header};
use crate::error::Result;
use crate::media::RtpFrame;
use crate::rtcp::REPORT_PACKET_LENGTH;

/// Writer half of an RTSP TCP connection, shared by signaling, RTP and RTCP.
///
/// Every user holds the lock for the whole of one message, which keeps the
/// connection single-writer.
pub type SharedWriter<W> = Arc<Mutex<W>>;

/// Interleaved RTP over the RTSP TCP connection (RFC 2326 §10.12).
pub struct RtpSocketTcp<W: Write + Send> {
    writer: SharedWriter<W>,
}

impl<W: Write + Send> RtpSocketTcp<W> {
    pub fn new(writer: SharedWriter<W>) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> RtpSocket for RtpSocketTcp<W> {
    fn send_frame(&mut self, frame: &RtpFrame) -> Result<()> {
        let header = rtp_interleaved_header(frame.channel, frame.len());
        let mut packet = Vec::with_capacity(header.len() + frame.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(&frame.buffer);

        self.writer.lock().write_all(&packet)?;
        tracing::trace!(
            channel = header[1],
            len = frame.len(),
            seq = frame.sequence(),
            "interleaved RTP written"
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

/// Interleaved RTCP sender reports, companion channel `2c + 1`.
pub struct SenderReportTcp<W: Write + Send> {
    writer: SharedWriter<W>,
}

impl<W: Write + Send> SenderReportTcp<W> {
    pub fn new(writer: SharedWriter<W>) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> ReportSocket for SenderReportTcp<W> {
    fn send_report(&mut self, report: &[u8], frame: &RtpFrame) -> Result<()> {
        debug_assert_eq!(report.len(), REPORT_PACKET_LENGTH);
        let header = rtcp_interleaved_header(frame.channel);
        let mut packet = Vec::with_capacity(header.len() + report.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(report);

        self.writer.lock().write_all(&packet)?;
        tracing::trace!(channel = header[1], "interleaved RTCP written");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpHeader;

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn frame(channel: u8, payload: &[u8]) -> RtpFrame {
        RtpHeader::new(96, 1, 90000).packet(channel, true, &[payload])
    }

    #[test]
    fn rtp_written_with_marker_header() {
        let writer: SharedWriter<Vec<u8>> = Arc::new(Mutex::new(Vec::new()));
        let mut socket = RtpSocketTcp::new(writer.clone());
        let f = frame(1, &[9, 9, 9]);
        socket.send_frame(&f).unwrap();
        socket.flush().unwrap();

        let bytes = writer.lock().clone();
        assert_eq!(&bytes[..4], &[0x24, 2, 0, 15]);
        assert_eq!(&bytes[4..], f.buffer.as_slice());
    }

    #[test]
    fn rtp_and_rtcp_share_one_stream() {
        let writer: SharedWriter<Vec<u8>> = Arc::new(Mutex::new(Vec::new()));
        let mut rtp = RtpSocketTcp::new(writer.clone());
        let mut rtcp = SenderReportTcp::new(writer.clone());
        let f = frame(0, &[1]);
        rtp.send_frame(&f).unwrap();
        rtcp.send_report(&[0u8; REPORT_PACKET_LENGTH], &f).unwrap();

        let bytes = writer.lock().clone();
        assert_eq!(bytes.len(), 4 + 13 + 4 + REPORT_PACKET_LENGTH);
        assert_eq!(&bytes[17..21], &[0x24, 1, 0x00, 0x1C]);
    }

    #[test]
    fn write_failure_is_reported() {
        let mut socket = RtpSocketTcp::new(Arc::new(Mutex::new(FailingWriter)));
        let err = socket.send_frame(&frame(0, &[1])).unwrap_err();
        assert!(matches!(err, crate::StreamError::Io(_)));
    }
}
