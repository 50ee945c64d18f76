use crate::transport::Protocol;

/// `Transport` header value a publisher sends in SETUP (RFC 2326 §12.39).
///
/// ```text
/// UDP: RTP/AVP;unicast;client_port=50000-50001;mode=record
/// TCP: RTP/AVP/TCP;unicast;interleaved=0-1;mode=record
/// ```
///
/// The interleaved pair of a track is `2c-2c+1` for channel `c`.
pub fn setup_transport(protocol: Protocol, channel: u8, client_ports: (u16, u16)) -> String {
    match protocol {
        Protocol::Tcp => format!(
            "RTP/AVP/TCP;unicast;interleaved={}-{};mode=record",
            channel << 1,
            (channel << 1) + 1
        ),
        Protocol::Udp => format!(
            "RTP/AVP;unicast;client_port={}-{};mode=record",
            client_ports.0, client_ports.1
        ),
    }
}

/// Transport parameters the server echoed in its SETUP response.
///
/// ## Wire format example
///
/// ```text
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=50000-50001;server_port=5000-5001
///   Transport: RTP/AVP/TCP;unicast;interleaved=2-3
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeader {
    /// Server's RTP/RTCP receive ports (UDP).
    pub server_ports: Option<(u16, u16)>,
    /// Interleaved channel pair (TCP).
    pub interleaved: Option<(u8, u8)>,
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// Looks for `server_port=RTP-RTCP` and `interleaved=A-B` among
    /// semicolon-separated parameters. Returns `None` if neither is present.
    ///
    /// ## Examples
    ///
    /// ```
    /// use livepush::protocol::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;server_port=5000-5001").unwrap();
    /// assert_eq!(th.server_ports, Some((5000, 5001)));
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut parsed = TransportHeader::default();
        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("server_port=") {
                parsed.server_ports = parse_pair(ports);
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                parsed.interleaved = parse_pair(channels)
                    .and_then(|(a, b)| Some((u8::try_from(a).ok()?, u8::try_from(b).ok()?)));
            }
        }
        if parsed.server_ports.is_none() && parsed.interleaved.is_none() {
            return None;
        }
        Some(parsed)
    }
}

/// `A-B`, or a single `A` meaning `A-(A+1)`.
fn parse_pair(value: &str) -> Option<(u16, u16)> {
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: u16 = value.trim().parse().ok()?;
            Some((a, a.checked_add(1)?))
        }
    }
}
