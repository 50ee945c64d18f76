use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

use super::{ReportSocket, RtpSocket};
use crate::error::{Result, StreamError};
use crate::media::RtpFrame;

/// Local RTP/RTCP socket pair of one track and the server ports it feeds.
///
/// Both sockets bind ephemeral ports on the unspecified address of the
/// server's family (`0.0.0.0:0` or `[::]:0`); their numbers are
/// announced to the server as `client_port` during SETUP. Server ports are
/// filled in from the SETUP response.
#[derive(Debug, Clone)]
pub struct UdpTrack {
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
    server_rtp: SocketAddr,
    server_rtcp: SocketAddr,
}

impl UdpTrack {
    /// Bind an ephemeral socket pair for a track served by `server_ip`.
    pub fn bind(server_ip: IpAddr) -> Result<Self> {
        let local = match server_ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let rtp = UdpSocket::bind(SocketAddr::new(local, 0))?;
        let rtcp = UdpSocket::bind(SocketAddr::new(local, 0))?;
        Ok(Self {
            rtp: Arc::new(rtp),
            rtcp: Arc::new(rtcp),
            server_rtp: SocketAddr::new(server_ip, 0),
            server_rtcp: SocketAddr::new(server_ip, 0),
        })
    }

    /// Local `(rtp, rtcp)` ports for the `client_port` transport parameter.
    pub fn client_ports(&self) -> Result<(u16, u16)> {
        Ok((self.rtp.local_addr()?.port(), self.rtcp.local_addr()?.port()))
    }

    pub fn set_server_ports(&mut self, rtp: u16, rtcp: u16) {
        self.server_rtp.set_port(rtp);
        self.server_rtcp.set_port(rtcp);
        tracing::debug!(server_rtp = %self.server_rtp, server_rtcp = %self.server_rtcp, "UDP track configured");
    }
}

/// RTP as plain datagrams, one per [`RtpFrame`], routed by channel.
pub struct RtpSocketUdp {
    tracks: HashMap<u8, UdpTrack>,
}

impl RtpSocketUdp {
    pub fn new(tracks: HashMap<u8, UdpTrack>) -> Self {
        Self { tracks }
    }
}

fn track_for(tracks: &HashMap<u8, UdpTrack>, channel: u8) -> Result<&UdpTrack> {
    tracks.get(&channel).ok_or_else(|| {
        StreamError::Io(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            format!("no UDP track for channel {channel}"),
        ))
    })
}

impl RtpSocket for RtpSocketUdp {
    fn send_frame(&mut self, frame: &RtpFrame) -> Result<()> {
        let track = track_for(&self.tracks, frame.channel)?;
        track.rtp.send_to(&frame.buffer, track.server_rtp)?;
        tracing::trace!(
            channel = frame.channel,
            len = frame.len(),
            seq = frame.sequence(),
            "RTP datagram sent"
        );
        Ok(())
    }

    /// Datagrams are never buffered.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// RTCP sender reports to each track's server RTCP port.
pub struct SenderReportUdp {
    tracks: HashMap<u8, UdpTrack>,
}

impl SenderReportUdp {
    pub fn new(tracks: HashMap<u8, UdpTrack>) -> Self {
        Self { tracks }
    }
}

impl ReportSocket for SenderReportUdp {
    fn send_report(&mut self, report: &[u8], frame: &RtpFrame) -> Result<()> {
        let track = track_for(&self.tracks, frame.channel)?;
        track.rtcp.send_to(report, track.server_rtcp)?;
        tracing::trace!(channel = frame.channel, "RTCP datagram sent");
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
