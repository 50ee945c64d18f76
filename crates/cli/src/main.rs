mod replay;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use clap::Parser;
use livepush::protocol::Credentials;
use livepush::session::VideoConfig;
use livepush::transport::Protocol;
use livepush::{Collaborators, ConnectChecker, RtspClient, RtspConfig, StreamingSession};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use replay::{Bitstream, FileVideoEncoder, NoAudio, NoCamera, NoRecorder};

#[derive(Parser)]
#[command(
    name = "livepush",
    about = "Publish an H.264 Annex B file to an RTSP server"
)]
struct Args {
    /// Target, e.g. rtsp://host:554/live/stream
    endpoint: String,

    /// Annex B H.264 elementary stream to replay
    #[arg(long, short)]
    file: PathBuf,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Send RTP over UDP instead of interleaved on the RTSP connection
    #[arg(long)]
    udp: bool,

    #[arg(long)]
    user: Option<String>,

    #[arg(long, requires = "user")]
    password: Option<String>,

    /// Stop after this many seconds; runs until the connection ends otherwise
    #[arg(long)]
    duration: Option<u64>,
}

enum Outcome {
    Connected,
    Ended(Option<String>),
}

struct Reporter(Mutex<mpsc::Sender<Outcome>>);

impl ConnectChecker for Reporter {
    fn on_connection_success(&self) {
        tracing::info!("publishing");
        let _ = self.0.lock().send(Outcome::Connected);
    }

    fn on_connection_failed(&self, reason: &str) {
        let _ = self.0.lock().send(Outcome::Ended(Some(reason.to_string())));
    }

    fn on_disconnect(&self) {
        let _ = self.0.lock().send(Outcome::Ended(None));
    }

    fn on_auth_error(&self) {
        tracing::error!("server rejected the credentials");
    }

    fn on_auth_success(&self) {
        tracing::info!("authenticated");
    }

    fn on_new_bitrate(&self, bitrate: u64) {
        tracing::debug!(bitrate, "bitrate");
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let data = match std::fs::read(&args.file) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Failed to read {}: {}", args.file.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let Some(stream) = Bitstream::parse(&data) else {
        eprintln!("{} has no SPS, PPS or slices", args.file.display());
        return ExitCode::FAILURE;
    };
    tracing::info!(frames = stream.frames(), "loaded bitstream");

    let client = RtspClient::new(RtspConfig {
        protocol: if args.udp { Protocol::Udp } else { Protocol::Tcp },
        only_video: true,
        credentials: args
            .user
            .map(|user| Credentials::new(user, args.password.unwrap_or_default())),
        ..RtspConfig::default()
    });

    let (tx, rx) = mpsc::channel();
    let session = StreamingSession::new(
        Collaborators {
            audio_capture: Box::new(NoAudio),
            video_source: Box::new(NoCamera),
            audio_encoder: Box::new(NoAudio),
            video_encoder: Box::new(FileVideoEncoder::new(stream)),
            recorder: Box::new(NoRecorder),
            sender: Box::new(client),
        },
        Arc::new(Reporter(Mutex::new(tx))),
    );

    if !session.prepare_video(VideoConfig {
        fps: args.fps,
        ..VideoConfig::default()
    }) {
        eprintln!("Invalid frame rate {}", args.fps);
        return ExitCode::FAILURE;
    }
    if let Err(e) = session.start_stream(&args.endpoint) {
        eprintln!("Failed to start stream: {}", e);
        return ExitCode::FAILURE;
    }

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        let next = match deadline {
            Some(at) => rx
                .recv_timeout(at.saturating_duration_since(Instant::now()))
                .ok(),
            None => rx.recv().ok(),
        };
        match next {
            Some(Outcome::Connected) => continue,
            Some(Outcome::Ended(Some(reason))) => {
                eprintln!("Stream failed: {}", reason);
                return ExitCode::FAILURE;
            }
            Some(Outcome::Ended(None)) | None => break,
        }
    }

    session.stop_stream();
    ExitCode::SUCCESS
}
