use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use super::auth::{AuthChallenge, Credentials};
use super::request::{RtspRequest, USER_AGENT};
use super::response::RtspResponse;
use super::sdp::{SdpSession, generate_sdp};
use super::transport::{TransportHeader, setup_transport};
use super::Endpoint;
use crate::error::{ParseErrorKind, Result, StreamError};
use crate::media::aac::AacPacketizer;
use crate::media::g711::G711Packetizer;
use crate::media::h264::{DEFAULT_MTU, H264Packetizer};
use crate::media::h265::H265Packetizer;
use crate::media::{
    AUDIO_CHANNEL, AUDIO_PAYLOAD_TYPE, AudioCodec, Frame, Packetizer, Track, VIDEO_CHANNEL,
    VIDEO_PAYLOAD_TYPE, VideoCodec,
};
use crate::observer::{BitrateMeter, ConnectChecker};
use crate::rtcp::{DEFAULT_REPORT_INTERVAL, RtcpReporter};
use crate::sender::ProtocolSender;
use crate::transport::tcp::SharedWriter;
use crate::transport::{
    INTERLEAVED_MARKER, Protocol, ReportSocket, RtpSocket, RtpSocketTcp, RtpSocketUdp,
    SenderReportTcp, SenderReportUdp, UdpTrack, parse_interleaved_header,
};

/// Client-level configuration.
#[derive(Debug, Clone)]
pub struct RtspConfig {
    /// UDP datagrams or TCP interleaved on the RTSP connection.
    pub protocol: Protocol,
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Read and write timeout of the RTSP connection. Bounds every socket write.
    pub io_timeout: Duration,
    /// How long ANNOUNCE waits for the encoder's parameter sets.
    pub parameter_set_timeout: Duration,
    /// Interval between two RTCP sender reports of the same track.
    pub report_interval: Duration,
    /// Largest RTP packet the video packetizer produces.
    pub mtu: usize,
    /// Used when the server challenges and the URL carries none.
    pub credentials: Option<Credentials>,
    pub only_audio: bool,
    pub only_video: bool,
    pub sdp: SdpSession,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            user_agent: USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(5),
            parameter_set_timeout: Duration::from_secs(5),
            report_interval: DEFAULT_REPORT_INTERVAL,
            mtu: DEFAULT_MTU,
            credentials: None,
            only_audio: false,
            only_video: false,
            sdp: SdpSession::default(),
        }
    }
}

/// Codec parameters reported by the encoders.
#[derive(Debug, Clone, Default)]
struct MediaInfo {
    video_codec: VideoCodec,
    audio_codec: AudioCodec,
    /// `(sample_rate, stereo)`
    audio: Option<(u32, bool)>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    vps: Option<Vec<u8>>,
}

impl MediaInfo {
    fn video_ready(&self) -> bool {
        let base = self.sps.is_some() && self.pps.is_some();
        match self.video_codec {
            VideoCodec::H264 => base,
            VideoCodec::H265 => base && self.vps.is_some(),
        }
    }

    fn ready(&self, config: &RtspConfig) -> bool {
        if config.only_audio {
            self.audio.is_some()
        } else {
            self.video_ready()
        }
    }

    fn video_packetizer(&self, mtu: usize) -> Box<dyn Packetizer> {
        match self.video_codec {
            VideoCodec::H264 => {
                let mut p =
                    H264Packetizer::with_random_ssrc(VIDEO_PAYLOAD_TYPE, VIDEO_CHANNEL).with_mtu(mtu);
                if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                    p.set_parameter_sets(sps, pps);
                }
                Box::new(p)
            }
            VideoCodec::H265 => {
                let mut p =
                    H265Packetizer::with_random_ssrc(VIDEO_PAYLOAD_TYPE, VIDEO_CHANNEL).with_mtu(mtu);
                if let (Some(vps), Some(sps), Some(pps)) = (&self.vps, &self.sps, &self.pps) {
                    p.set_parameter_sets(vps, sps, pps);
                }
                Box::new(p)
            }
        }
    }

    fn audio_packetizer(&self) -> Option<Box<dyn Packetizer>> {
        let (sample_rate, stereo) = self.audio?;
        Some(match self.audio_codec {
            AudioCodec::Aac => Box::new(AacPacketizer::with_random_ssrc(
                AUDIO_PAYLOAD_TYPE,
                AUDIO_CHANNEL,
                sample_rate,
                stereo,
            )),
            AudioCodec::G711 => Box::new(G711Packetizer::with_random_ssrc(AUDIO_CHANNEL)),
        })
    }
}

/// Signaling state kept after RECORD, enough to send TEARDOWN.
struct Control {
    writer: SharedWriter<TcpStream>,
    uri: String,
    session: Option<String>,
    cseq: u32,
    auth: Option<(AuthChallenge, Credentials)>,
    user_agent: String,
}

impl Control {
    fn teardown(&mut self) -> Result<()> {
        let mut request = RtspRequest::new("TEARDOWN", &self.uri, self.cseq)
            .add_header("User-Agent", &self.user_agent);
        if let Some(session) = &self.session {
            request = request.add_header("Session", session);
        }
        if let Some((challenge, credentials)) = &self.auth {
            request = request.add_header(
                "Authorization",
                &challenge.authorization(credentials, "TEARDOWN", &self.uri),
            );
        }
        self.cseq += 1;

        let mut writer = self.writer.lock();
        let result = writer
            .write_all(request.serialize().as_bytes())
            .and_then(|_| writer.flush());
        let _ = writer.shutdown(Shutdown::Both);
        result?;
        Ok(())
    }

    fn shutdown(&self) {
        let _ = self.writer.lock().shutdown(Shutdown::Both);
    }
}

/// Everything a frame needs on its way out. Lives under one lock so RTP
/// and RTCP of a frame are written back to back.
struct Connection {
    rtp: Box<dyn RtpSocket>,
    reporter: RtcpReporter,
    video: Option<Box<dyn Packetizer>>,
    audio: Option<Box<dyn Packetizer>>,
    control: Control,
}

impl Connection {
    /// Packetize and write `frame`, returning the bytes put on the wire.
    fn send(&mut self, frame: &Frame) -> Result<usize> {
        let packetizer = match frame.track() {
            Track::Video => self.video.as_mut(),
            Track::Audio => self.audio.as_mut(),
        };
        let Some(packetizer) = packetizer else {
            return Ok(0);
        };
        let ssrc = packetizer.ssrc();
        let packets = packetizer.packetize(frame);

        let mut bytes = 0;
        let mut reported = false;
        for packet in &packets {
            self.rtp.send_frame(packet)?;
            reported |= self.reporter.update(packet, ssrc)?;
            bytes += packet.len();
        }
        self.rtp.flush()?;
        if reported {
            self.reporter.flush()?;
        }
        tracing::trace!(
            track = ?frame.track(),
            packets = packets.len(),
            bytes,
            "frame sent"
        );
        Ok(bytes)
    }
}

enum ClientState {
    Idle,
    Connecting,
    Connected(Box<Connection>),
}

struct Inner {
    config: RwLock<RtspConfig>,
    media: Mutex<MediaInfo>,
    media_ready: Condvar,
    state: Mutex<ClientState>,
    /// Bumped under the state lock whenever an attempt or connection ends.
    /// Background threads holding an old value exit without reporting.
    generation: AtomicU64,
    checker: Mutex<Option<Arc<dyn ConnectChecker>>>,
    bitrate: Mutex<BitrateMeter>,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Move a still-current attempt back to idle. False if it was cancelled.
    fn abandon(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if self.is_current(generation) && matches!(*state, ClientState::Connecting) {
            self.generation.fetch_add(1, Ordering::SeqCst);
            *state = ClientState::Idle;
            self.checker.lock().take();
            true
        } else {
            false
        }
    }
}

/// RTSP publisher: OPTIONS, ANNOUNCE, SETUP per track, RECORD, then RTP.
///
/// Signaling runs on a background thread started by
/// [`connect`](ProtocolSender::connect); the same thread then reads the
/// connection until it closes. Media is written from the caller's thread.
pub struct RtspClient {
    inner: Arc<Inner>,
}

impl Default for RtspClient {
    fn default() -> Self {
        Self::new(RtspConfig::default())
    }
}

impl RtspClient {
    pub fn new(config: RtspConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                media: Mutex::new(MediaInfo::default()),
                media_ready: Condvar::new(),
                state: Mutex::new(ClientState::Idle),
                generation: AtomicU64::new(0),
                checker: Mutex::new(None),
                bitrate: Mutex::new(BitrateMeter::default()),
            }),
        }
    }

    pub fn config(&self) -> RtspConfig {
        self.inner.config.read().clone()
    }

    /// Takes effect on the next connection.
    pub fn set_protocol(&self, protocol: Protocol) {
        self.inner.config.write().protocol = protocol;
    }

    /// Takes effect on the next connection.
    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        self.inner.config.write().credentials = credentials;
    }

    fn send(&self, frame: &Frame) -> Result<()> {
        let mut state = self.inner.state.lock();
        let ClientState::Connected(connection) = &mut *state else {
            tracing::trace!(track = ?frame.track(), "frame dropped, not connected");
            return Ok(());
        };

        match connection.send(frame) {
            Ok(bytes) => {
                drop(state);
                let bitrate = self.inner.bitrate.lock().record(bytes);
                if let Some(bitrate) = bitrate {
                    let checker = self.inner.checker.lock().clone();
                    if let Some(checker) = checker {
                        checker.on_new_bitrate(bitrate);
                    }
                }
                Ok(())
            }
            Err(err) => {
                self.inner.generation.fetch_add(1, Ordering::SeqCst);
                if let ClientState::Connected(connection) =
                    mem::replace(&mut *state, ClientState::Idle)
                {
                    connection.control.shutdown();
                }
                drop(state);
                self.inner.checker.lock().take();
                self.inner.bitrate.lock().reset();
                tracing::warn!(error = %err, "write failed, connection closed");
                Err(err)
            }
        }
    }
}

impl ProtocolSender for RtspClient {
    fn connect(&self, endpoint: &str, checker: Arc<dyn ConnectChecker>) {
        let generation = {
            let mut state = self.inner.state.lock();
            let previous = mem::replace(&mut *state, ClientState::Connecting);
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if let ClientState::Connected(connection) = previous {
                tracing::debug!("replacing live connection");
                connection.control.shutdown();
            }
            generation
        };
        *self.inner.checker.lock() = Some(checker.clone());
        self.inner.bitrate.lock().reset();

        let inner = self.inner.clone();
        let endpoint = endpoint.to_string();
        thread::spawn(move || run(inner, generation, endpoint, checker));
    }

    fn disconnect(&self) {
        let previous = {
            let mut state = self.inner.state.lock();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            mem::replace(&mut *state, ClientState::Idle)
        };
        self.inner.media_ready.notify_all();
        let checker = self.inner.checker.lock().take();
        self.inner.bitrate.lock().reset();

        match previous {
            ClientState::Idle => return,
            ClientState::Connecting => tracing::info!("connection attempt cancelled"),
            ClientState::Connected(mut connection) => {
                if let Err(err) = connection.control.teardown() {
                    tracing::warn!(error = %err, "TEARDOWN failed");
                }
                tracing::info!(uri = %connection.control.uri, "disconnected");
            }
        }
        if let Some(checker) = checker {
            checker.on_disconnect();
        }
    }

    fn is_connected(&self) -> bool {
        matches!(*self.inner.state.lock(), ClientState::Connected(_))
    }

    fn send_audio(&self, frame: &Frame) -> Result<()> {
        self.send(frame)
    }

    fn send_video(&self, frame: &Frame) -> Result<()> {
        self.send(frame)
    }

    fn set_video_codec(&self, codec: VideoCodec) {
        self.inner.media.lock().video_codec = codec;
    }

    fn set_audio_codec(&self, codec: AudioCodec) {
        self.inner.media.lock().audio_codec = codec;
    }

    fn set_audio_info(&self, sample_rate: u32, stereo: bool) {
        self.inner.media.lock().audio = Some((sample_rate, stereo));
        self.inner.media_ready.notify_all();
    }

    fn set_video_info(&self, sps: &[u8], pps: &[u8], vps: Option<&[u8]>) {
        {
            let mut media = self.inner.media.lock();
            media.sps = Some(sps.to_vec());
            media.pps = Some(pps.to_vec());
            media.vps = vps.map(<[u8]>::to_vec);
        }
        tracing::debug!(sps = sps.len(), pps = pps.len(), "video parameter sets received");
        self.inner.media_ready.notify_all();
    }
}

impl Drop for RtspClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Background thread body: handshake, then watch the connection.
fn run(inner: Arc<Inner>, generation: u64, url: String, checker: Arc<dyn ConnectChecker>) {
    let config = inner.config.read().clone();
    let result = Handshake::open(&inner, generation, config, &url, checker.clone())
        .and_then(|mut handshake| {
            let connection = handshake.publish()?;
            Ok((handshake, connection))
        });

    let (handshake, connection) = match result {
        Ok(established) => established,
        Err(err) => {
            if !inner.abandon(generation) {
                tracing::debug!(error = %err, "cancelled attempt ended");
                return;
            }
            tracing::warn!(endpoint = %url, error = %err, "connection failed");
            if matches!(err, StreamError::AuthRequired | StreamError::AuthFailed) {
                checker.on_auth_error();
            }
            checker.on_connection_failed(&err.to_string());
            return;
        }
    };

    let uri = connection.control.uri.clone();
    {
        let mut state = inner.state.lock();
        if !inner.is_current(generation) || !matches!(*state, ClientState::Connecting) {
            drop(state);
            let mut connection = connection;
            let _ = connection.control.teardown();
            tracing::debug!("attempt cancelled after RECORD");
            return;
        }
        *state = ClientState::Connected(Box::new(connection));
    }

    tracing::info!(%uri, "RTSP session established");
    checker.on_connection_success();
    watch(&inner, generation, handshake.reader, &checker);
}

/// Drain what the server sends (RTCP receiver reports, stray responses)
/// until the connection closes or this generation is retired.
fn watch(
    inner: &Inner,
    generation: u64,
    mut reader: BufReader<TcpStream>,
    checker: &Arc<dyn ConnectChecker>,
) {
    let reason = loop {
        if !inner.is_current(generation) {
            return;
        }
        match read_server_message(&mut reader) {
            Ok(()) => {}
            Err(StreamError::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(err) => break err.to_string(),
        }
    };

    let lost = {
        let mut state = inner.state.lock();
        if inner.is_current(generation) && matches!(*state, ClientState::Connected(_)) {
            inner.generation.fetch_add(1, Ordering::SeqCst);
            inner.checker.lock().take();
            Some(mem::replace(&mut *state, ClientState::Idle))
        } else {
            None
        }
    };
    if let Some(ClientState::Connected(connection)) = lost {
        connection.control.shutdown();
        tracing::warn!(%reason, "connection lost");
        checker.on_connection_failed(&reason);
    }
}

fn read_server_message(reader: &mut BufReader<TcpStream>) -> Result<()> {
    let first = match reader.fill_buf()?.first() {
        Some(byte) => *byte,
        None => {
            return Err(StreamError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }
    };

    if first == INTERLEAVED_MARKER {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header)?;
        let (channel, length) = parse_interleaved_header(header)?;
        let mut payload = (&mut *reader).take(length as u64);
        io::copy(&mut payload, &mut io::sink())?;
        tracing::trace!(channel, length, "interleaved packet from server");
    } else {
        let response = RtspResponse::read_from(reader)?;
        tracing::debug!(
            status = response.status_code,
            cseq = ?response.cseq(),
            "unsolicited response"
        );
    }
    Ok(())
}

/// One signaling exchange from TCP connect to RECORD.
struct Handshake {
    inner: Arc<Inner>,
    generation: u64,
    config: RtspConfig,
    endpoint: Endpoint,
    peer: SocketAddr,
    credentials: Option<Credentials>,
    checker: Arc<dyn ConnectChecker>,
    reader: BufReader<TcpStream>,
    writer: SharedWriter<TcpStream>,
    cseq: u32,
    session: Option<String>,
    auth: Option<(AuthChallenge, Credentials)>,
}

impl Handshake {
    fn open(
        inner: &Arc<Inner>,
        generation: u64,
        config: RtspConfig,
        url: &str,
        checker: Arc<dyn ConnectChecker>,
    ) -> Result<Self> {
        let endpoint = Endpoint::parse(url)?;
        let credentials = endpoint
            .credentials
            .clone()
            .or_else(|| config.credentials.clone());

        let peer = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "endpoint has no address"))?;

        tracing::info!(uri = %endpoint.uri(), %peer, protocol = ?config.protocol, "connecting");
        let stream = TcpStream::connect_timeout(&peer, config.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(config.io_timeout))?;
        stream.set_write_timeout(Some(config.io_timeout))?;
        let reader = BufReader::new(stream.try_clone()?);

        Ok(Self {
            inner: inner.clone(),
            generation,
            config,
            endpoint,
            peer,
            credentials,
            checker,
            reader,
            writer: Arc::new(Mutex::new(stream)),
            cseq: 1,
            session: None,
            auth: None,
        })
    }

    fn publish(&mut self) -> Result<Connection> {
        let base = self.endpoint.uri();

        let options = self.request("OPTIONS", &base, &[], None)?;
        expect_success("OPTIONS", &options)?;

        let media = self.wait_for_media()?;
        let video = (!self.config.only_audio).then(|| media.video_packetizer(self.config.mtu));
        let audio = if self.config.only_video {
            None
        } else {
            media.audio_packetizer()
        };
        let tracks: Vec<&dyn Packetizer> = video.iter().chain(audio.iter()).map(|p| &**p).collect();

        let sdp = generate_sdp(&self.config.sdp, &self.peer.ip().to_string(), &tracks);
        let announce = self.request(
            "ANNOUNCE",
            &base,
            &[("Content-Type", "application/sdp")],
            Some(sdp),
        )?;
        expect_success("ANNOUNCE", &announce)?;
        if self.auth.is_some() {
            tracing::info!("authenticated");
            self.checker.on_auth_success();
        }

        let mut udp_tracks = HashMap::new();
        let channels: Vec<u8> = tracks.iter().map(|t| t.channel()).collect();
        for channel in channels {
            let track_uri = format!("{}/trackID={}", base.trim_end_matches('/'), channel);
            let mut udp_track = match self.config.protocol {
                Protocol::Udp => Some(UdpTrack::bind(self.peer.ip())?),
                Protocol::Tcp => None,
            };
            let client_ports = match &udp_track {
                Some(track) => track.client_ports()?,
                None => (0, 0),
            };
            let transport = setup_transport(self.config.protocol, channel, client_ports);

            let setup = self.request("SETUP", &track_uri, &[("Transport", transport.as_str())], None)?;
            expect_success("SETUP", &setup)?;
            if self.session.is_none() {
                self.session = setup.session_id().map(str::to_string);
            }

            if let Some(mut track) = udp_track.take() {
                let (rtp, rtcp) = setup
                    .get_header("Transport")
                    .and_then(TransportHeader::parse)
                    .and_then(|t| t.server_ports)
                    .ok_or(StreamError::Parse {
                        kind: ParseErrorKind::InvalidHeader,
                    })?;
                track.set_server_ports(rtp, rtcp);
                udp_tracks.insert(channel, track);
            }
            tracing::debug!(channel, %transport, session = ?self.session, "track set up");
        }

        let record = self.request("RECORD", &base, &[("Range", "npt=0.000-")], None)?;
        expect_success("RECORD", &record)?;

        let (rtp, reports): (Box<dyn RtpSocket>, Box<dyn ReportSocket>) =
            match self.config.protocol {
                Protocol::Tcp => (
                    Box::new(RtpSocketTcp::new(self.writer.clone())),
                    Box::new(SenderReportTcp::new(self.writer.clone())),
                ),
                Protocol::Udp => (
                    Box::new(RtpSocketUdp::new(udp_tracks.clone())),
                    Box::new(SenderReportUdp::new(udp_tracks)),
                ),
            };

        Ok(Connection {
            rtp,
            reporter: RtcpReporter::new(reports, self.config.report_interval),
            video,
            audio,
            control: Control {
                writer: self.writer.clone(),
                uri: base,
                session: self.session.clone(),
                cseq: self.cseq,
                auth: self.auth.clone(),
                user_agent: self.config.user_agent.clone(),
            },
        })
    }

    /// Block until the encoders reported what ANNOUNCE needs.
    fn wait_for_media(&self) -> Result<MediaInfo> {
        let deadline = Instant::now() + self.config.parameter_set_timeout;
        let mut media = self.inner.media.lock();
        while !media.ready(&self.config) {
            if !self.inner.is_current(self.generation) {
                return Err(StreamError::NotConnected);
            }
            if self
                .inner
                .media_ready
                .wait_until(&mut media, deadline)
                .timed_out()
            {
                break;
            }
        }
        if media.ready(&self.config) {
            Ok(media.clone())
        } else if self.config.only_audio {
            Err(StreamError::MissingAudioConfig)
        } else {
            Err(StreamError::MissingParameterSets)
        }
    }

    /// Send a request, answering one authentication challenge.
    fn request(
        &mut self,
        method: &'static str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<String>,
    ) -> Result<RtspResponse> {
        let response = self.exchange(method, uri, headers, body.clone())?;
        if response.status_code != 401 {
            return Ok(response);
        }
        if self.auth.is_some() {
            return Err(StreamError::AuthFailed);
        }
        let credentials = self.credentials.clone().ok_or(StreamError::AuthRequired)?;
        let challenge = preferred_challenge(&response).ok_or(StreamError::AuthFailed)?;
        tracing::debug!(method, scheme = ?challenge, "server requested authentication");
        self.auth = Some((challenge, credentials));

        let retry = self.exchange(method, uri, headers, body)?;
        if retry.status_code == 401 {
            return Err(StreamError::AuthFailed);
        }
        Ok(retry)
    }

    fn exchange(
        &mut self,
        method: &'static str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<String>,
    ) -> Result<RtspResponse> {
        let cseq = self.cseq;
        self.cseq += 1;

        let mut request =
            RtspRequest::new(method, uri, cseq).add_header("User-Agent", &self.config.user_agent);
        if let Some(session) = &self.session {
            request = request.add_header("Session", session);
        }
        if let Some((challenge, credentials)) = &self.auth {
            request =
                request.add_header("Authorization", &challenge.authorization(credentials, method, uri));
        }
        for (name, value) in headers {
            request = request.add_header(name, value);
        }
        if let Some(body) = body {
            request = request.with_body(body);
        }

        tracing::debug!(method, uri, cseq, "request");
        {
            let mut writer = self.writer.lock();
            writer.write_all(request.serialize().as_bytes())?;
            writer.flush()?;
        }

        loop {
            let response = RtspResponse::read_from(&mut self.reader)?;
            if response.cseq().is_none_or(|c| c == cseq) {
                tracing::debug!(method, status = response.status_code, "response");
                return Ok(response);
            }
            tracing::debug!(expected = cseq, got = ?response.cseq(), "skipping response");
        }
    }
}

/// Digest is preferred when the server offers several schemes.
fn preferred_challenge(response: &RtspResponse) -> Option<AuthChallenge> {
    let mut challenges = response
        .headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("WWW-Authenticate"))
        .filter_map(|(_, value)| AuthChallenge::parse(value));
    let first = challenges.next()?;
    if matches!(first, AuthChallenge::Digest { .. }) {
        return Some(first);
    }
    Some(
        challenges
            .find(|c| matches!(c, AuthChallenge::Digest { .. }))
            .unwrap_or(first),
    )
}

fn expect_success(method: &'static str, response: &RtspResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    Err(StreamError::UnexpectedStatus {
        method,
        status: response.status_code,
        reason: response.reason.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;

    struct ChannelChecker(Mutex<mpsc::Sender<String>>);

    impl ConnectChecker for ChannelChecker {
        fn on_connection_success(&self) {
            let _ = self.0.lock().send("success".into());
        }
        fn on_connection_failed(&self, reason: &str) {
            let _ = self.0.lock().send(format!("failed: {reason}"));
        }
        fn on_disconnect(&self) {
            let _ = self.0.lock().send("disconnect".into());
        }
        fn on_auth_error(&self) {
            let _ = self.0.lock().send("auth_error".into());
        }
        fn on_auth_success(&self) {
            let _ = self.0.lock().send("auth_success".into());
        }
    }

    #[derive(Default)]
    struct Counts {
        rtp: usize,
        reports: usize,
        report_flushes: usize,
    }

    struct CountingRtp(Arc<Mutex<Counts>>);

    impl RtpSocket for CountingRtp {
        fn send_frame(&mut self, _frame: &crate::media::RtpFrame) -> Result<()> {
            self.0.lock().rtp += 1;
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct CountingReports(Arc<Mutex<Counts>>);

    impl ReportSocket for CountingReports {
        fn send_report(&mut self, _report: &[u8], _frame: &crate::media::RtpFrame) -> Result<()> {
            self.0.lock().reports += 1;
            Ok(())
        }
        fn flush(&mut self) -> Result<()> {
            self.0.lock().report_flushes += 1;
            Ok(())
        }
    }

    fn connection(counts: &Arc<Mutex<Counts>>, interval: Duration) -> (Connection, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let connection = Connection {
            rtp: Box::new(CountingRtp(counts.clone())),
            reporter: RtcpReporter::new(Box::new(CountingReports(counts.clone())), interval),
            video: Some(Box::new(H264Packetizer::new(VIDEO_PAYLOAD_TYPE, 1, VIDEO_CHANNEL))),
            audio: None,
            control: Control {
                writer: Arc::new(Mutex::new(stream)),
                uri: "rtsp://127.0.0.1/live".into(),
                session: None,
                cseq: 1,
                auth: None,
                user_agent: USER_AGENT.into(),
            },
        };
        (connection, listener)
    }

    #[test]
    fn due_report_is_flushed_with_the_frame() {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let (mut connection, _listener) = connection(&counts, Duration::ZERO);
        let bytes = connection
            .send(&Frame::video(vec![0, 0, 0, 1, 0x41, 0x9A], 0))
            .unwrap();
        assert!(bytes > 0);

        let counts = counts.lock();
        assert_eq!(counts.rtp, 1);
        assert_eq!(counts.reports, 1);
        assert_eq!(counts.report_flushes, 1);
    }

    #[test]
    fn no_flush_without_a_report() {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let (mut connection, _listener) = connection(&counts, Duration::from_secs(60));
        connection
            .send(&Frame::video(vec![0, 0, 0, 1, 0x41, 0x9A], 0))
            .unwrap();
        assert_eq!(counts.lock().reports, 0);
        assert_eq!(counts.lock().report_flushes, 0);
    }

    fn checker() -> (Arc<dyn ConnectChecker>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(ChannelChecker(Mutex::new(tx))), rx)
    }

    #[test]
    fn media_readiness_depends_on_codec() {
        let config = RtspConfig::default();
        let mut media = MediaInfo {
            sps: Some(vec![0x67]),
            pps: Some(vec![0x68]),
            ..Default::default()
        };
        assert!(media.ready(&config));
        media.video_codec = VideoCodec::H265;
        assert!(!media.ready(&config));
        media.vps = Some(vec![0x40]);
        assert!(media.ready(&config));

        let audio_only = RtspConfig {
            only_audio: true,
            ..Default::default()
        };
        assert!(!MediaInfo::default().ready(&audio_only));
    }

    #[test]
    fn audio_packetizer_follows_codec() {
        let mut media = MediaInfo {
            audio: Some((8000, false)),
            audio_codec: AudioCodec::G711,
            ..Default::default()
        };
        assert_eq!(media.audio_packetizer().unwrap().payload_type(), 8);
        media.audio_codec = AudioCodec::Aac;
        assert_eq!(
            media.audio_packetizer().unwrap().payload_type(),
            AUDIO_PAYLOAD_TYPE
        );
        media.audio = None;
        assert!(media.audio_packetizer().is_none());
    }

    #[test]
    fn digest_challenge_is_preferred() {
        let response = RtspResponse::parse(
            "RTSP/1.0 401 Unauthorized\r\n\
             WWW-Authenticate: Basic realm=\"r\"\r\n\
             WWW-Authenticate: Digest realm=\"r\", nonce=\"n\"\r\n\r\n",
        )
        .unwrap();
        assert!(matches!(
            preferred_challenge(&response),
            Some(AuthChallenge::Digest { .. })
        ));
    }

    #[test]
    fn frames_before_connect_are_dropped() {
        let client = RtspClient::default();
        assert!(!client.is_connected());
        client.send_video(&Frame::video(vec![0, 0, 0, 1, 0x65], 0)).unwrap();
        client.send_audio(&Frame::audio(vec![1, 2], 0)).unwrap();
    }

    #[test]
    fn refused_connection_reports_failure_once() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = RtspClient::default();
        let (checker, events) = checker();
        client.connect(&format!("rtsp://127.0.0.1:{port}/live"), checker);

        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(event.starts_with("failed: "), "{event}");
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(!client.is_connected());

        // Nothing left to disconnect.
        client.disconnect();
        assert!(events.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn invalid_endpoint_reports_failure() {
        let client = RtspClient::default();
        let (checker, events) = checker();
        client.connect("http://example.com/live", checker);
        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event, "failed: parse error: invalid endpoint");
    }

    #[test]
    fn disconnect_during_handshake_reports_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = RtspClient::default();
        let (checker, events) = checker();
        client.connect(&format!("rtsp://127.0.0.1:{port}/live"), checker);

        // Accept but never answer, leaving the client in the handshake.
        let (_conn, _) = listener.accept().unwrap();
        client.disconnect();
        assert_eq!(
            events.recv_timeout(Duration::from_secs(2)).unwrap(),
            "disconnect"
        );
        // The abandoned handshake stays silent once its read times out.
        assert!(events.recv_timeout(Duration::from_millis(300)).is_err());
    }
}
