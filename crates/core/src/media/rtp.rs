/// Size of the RTP fixed header written by [`RtpHeader::write`].
pub const RTP_HEADER_LENGTH: usize = 12;

/// Generic RTP fixed header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Shared by all codec packetizers. It manages:
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet.
/// - **Timestamp**: derived from the frame presentation time and the codec
///   clock rate, see [`set_media_time`](Self::set_media_time).
/// - **SSRC**: randomly generated per RFC 3550 §8.1 to avoid collisions.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    clock_rate: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpHeader {
    /// Create a new RTP header state with explicit SSRC.
    pub fn new(pt: u8, ssrc: u32, clock_rate: u32) -> Self {
        tracing::debug!(
            pt,
            clock_rate,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            clock_rate,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC.
    ///
    /// Per RFC 3550 §8.1, the SSRC should be chosen randomly to minimize
    /// the probability of collisions between independent sessions.
    pub fn with_random_ssrc(pt: u8, clock_rate: u32) -> Self {
        Self::new(pt, rand::random::<u32>(), clock_rate)
    }

    /// Current sequence number (before the next [`write`](Self::write) call).
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Timestamp stamped on the packets of the current frame.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Changing the rate (AAC sample rate known late) keeps sequence state.
    pub fn set_clock_rate(&mut self, clock_rate: u32) {
        self.clock_rate = clock_rate;
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    ///
    /// The `marker` bit (RFC 3550 §5.1) signals the last packet of a frame.
    pub fn write(&mut self, marker: bool) -> [u8; RTP_HEADER_LENGTH] {
        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((marker as u8) << 7) | self.pt;

        let mut header = [0u8; RTP_HEADER_LENGTH];
        header[0] = first_byte;
        header[1] = second_byte;
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Set the RTP timestamp from a presentation time in microseconds.
    ///
    /// For video at 90 kHz a 33 333 µs frame interval becomes 3000 ticks.
    pub fn set_media_time(&mut self, timestamp_us: u64) {
        self.timestamp = media_clock_to_rtp(timestamp_us, self.clock_rate);
    }

    /// Build a complete packet for `channel`: header followed by `payload` parts.
    pub fn packet(&mut self, channel: u8, marker: bool, payload: &[&[u8]]) -> RtpFrame {
        let hdr = self.write(marker);
        let size: usize = payload.iter().map(|p| p.len()).sum();
        let mut buffer = Vec::with_capacity(RTP_HEADER_LENGTH + size);
        buffer.extend_from_slice(&hdr);
        for part in payload {
            buffer.extend_from_slice(part);
        }
        RtpFrame::new(buffer, self.timestamp, channel)
    }
}

/// Convert microseconds to media-clock ticks, truncated to 32 bits.
pub fn media_clock_to_rtp(timestamp_us: u64, clock_rate: u32) -> u32 {
    ((timestamp_us as u128 * clock_rate as u128) / 1_000_000) as u32
}

/// One wire-ready RTP packet.
///
/// `buffer` holds the 12-byte header and payload. `channel` identifies the
/// logical stream so a multiplexed transport can separate tracks; the RTCP
/// companion of channel `c` is derived by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpFrame {
    pub buffer: Vec<u8>,
    pub rtp_timestamp: u32,
    pub channel: u8,
}

impl RtpFrame {
    pub fn new(buffer: Vec<u8>, rtp_timestamp: u32, channel: u8) -> Self {
        Self {
            buffer,
            rtp_timestamp,
            channel,
        }
    }

    /// Logical length written into interleaved headers.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Sequence number stamped in the header.
    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn marker(&self) -> bool {
        self.buffer[1] & 0x80 != 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[RTP_HEADER_LENGTH..]
    }
}
