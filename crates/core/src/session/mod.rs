//! Publishing session: capture, encoders, recorder and protocol sender
//! coordinated as one state machine.
//!
//! ```text
//! Idle ──start_preview──▶ Previewing
//!   │                        │
//!   ├──start_stream──▶ Streaming ◀──stop_record── StreamingAndRecording
//!   │                        └────start_record──────────▲
//!   └──start_record──▶ Recording ──start_stream─────────┘
//! ```
//!
//! Encoders run while streaming or recording is active: they start on the
//! first of the two and stop when neither remains. The video source also
//! runs while previewing.
//!
//! ## Threads
//!
//! Frame callbacks arrive on collaborator threads. Each reads the state
//! flags once, then calls recorder and sender with no session lock held.
//! A failed send ends the streaming role exactly once: the first caller to
//! flip the flag reports `on_connection_failed`, later ones see it cleared.

pub mod collaborators;
pub mod fps;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

pub use collaborators::{
    AudioCapture, AudioConfig, AudioEncoder, CaptureOutput, EncoderOutput, Recorder, VideoConfig,
    VideoEncoder, VideoSource,
};
pub use fps::FpsCounter;

use crate::error::{Result, StreamError};
use crate::media::{AudioCodec, Frame, PcmFrame, RawVideoFrame, VideoCodec};
use crate::middleware::MiddlewareRegistry;
use crate::observer::ConnectChecker;
use crate::sender::ProtocolSender;

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Previewing,
    Streaming,
    Recording,
    StreamingAndRecording,
}

/// Everything the session drives.
pub struct Collaborators {
    pub audio_capture: Box<dyn AudioCapture>,
    pub video_source: Box<dyn VideoSource>,
    pub audio_encoder: Box<dyn AudioEncoder>,
    pub video_encoder: Box<dyn VideoEncoder>,
    pub recorder: Box<dyn Recorder>,
    pub sender: Box<dyn ProtocolSender>,
}

pub type FpsListener = Arc<dyn Fn(u32) + Send + Sync>;

#[derive(Debug, Default)]
struct Flags {
    streaming: bool,
    recording: bool,
    previewing: bool,
    endpoint: Option<String>,
    /// Identifies the current stream attempt; events of older attempts are dropped.
    stream_id: u64,
    audio_prepared: bool,
    video_prepared: bool,
}

impl Flags {
    fn encoders_wanted(&self) -> bool {
        self.streaming || self.recording
    }
}

/// Codec configuration last reported by the encoders, replayed to a role
/// that starts after the encoders did.
#[derive(Debug, Clone, Default)]
struct CodecInfo {
    audio_format: Option<(u32, bool)>,
    parameter_sets: Option<(Vec<u8>, Vec<u8>, Option<Vec<u8>>)>,
}

/// Immutable snapshot read once per frame callback.
#[derive(Debug, Clone, Copy)]
struct FrameRoute {
    streaming: bool,
    recording: bool,
    stream_id: u64,
}

struct Shared {
    collaborators: Collaborators,
    observer: Arc<dyn ConnectChecker>,
    flags: RwLock<Flags>,
    /// Whether encoders and capture are running. Held across their start/stop.
    pipelines: Mutex<bool>,
    /// Set when flags changed while another thread held `pipelines`.
    pipelines_dirty: AtomicBool,
    muted: AtomicBool,
    codec_info: Mutex<CodecInfo>,
    fps: FpsCounter,
    fps_listener: Mutex<Option<FpsListener>>,
    middleware: MiddlewareRegistry,
    self_ref: Weak<Shared>,
}

impl Shared {
    fn route(&self) -> FrameRoute {
        let flags = self.flags.read();
        FrameRoute {
            streaming: flags.streaming,
            recording: flags.recording,
            stream_id: flags.stream_id,
        }
    }

    fn encoder_output(&self) -> EncoderOutput {
        EncoderOutput {
            shared: self.self_ref.clone(),
        }
    }

    fn capture_output(&self) -> CaptureOutput {
        CaptureOutput {
            shared: self.self_ref.clone(),
        }
    }

    /// Bring encoders and capture in line with the flags.
    ///
    /// With `wait` false the call gives up if another thread is mid-transition;
    /// that thread re-reads the flags before it returns.
    fn reconcile_pipelines(&self, wait: bool) {
        self.pipelines_dirty.store(true, Ordering::SeqCst);
        loop {
            let mut running = if wait {
                self.pipelines.lock()
            } else {
                match self.pipelines.try_lock() {
                    Some(guard) => guard,
                    None => return,
                }
            };
            self.pipelines_dirty.store(false, Ordering::SeqCst);

            let (wanted, previewing, audio, video) = {
                let flags = self.flags.read();
                (
                    flags.encoders_wanted(),
                    flags.previewing,
                    flags.audio_prepared,
                    flags.video_prepared,
                )
            };
            if wanted != *running {
                if wanted {
                    self.start_pipelines(previewing, audio, video);
                } else {
                    self.stop_pipelines(previewing);
                }
                *running = wanted;
            }
            drop(running);

            if !self.pipelines_dirty.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    fn start_pipelines(&self, previewing: bool, audio: bool, video: bool) {
        let c = &self.collaborators;
        if video {
            c.video_encoder.start(self.encoder_output());
            if !previewing {
                c.video_source.start(self.capture_output());
            }
        }
        if audio {
            c.audio_encoder.start(self.encoder_output());
            c.audio_capture.start(self.capture_output());
        }
        tracing::debug!(audio, video, "encoders started");
    }

    fn stop_pipelines(&self, previewing: bool) {
        let c = &self.collaborators;
        c.audio_capture.stop();
        c.audio_encoder.stop();
        if !previewing {
            c.video_source.stop();
        }
        c.video_encoder.stop();
        self.fps.reset();
        tracing::debug!("encoders stopped");
    }

    /// End the streaming role of attempt `stream_id`, once.
    fn fail_stream(&self, stream_id: u64, reason: &str) {
        let failed = {
            let mut flags = self.flags.write();
            if flags.streaming && flags.stream_id == stream_id {
                flags.streaming = false;
                flags.endpoint = None;
                flags.stream_id += 1;
                true
            } else {
                false
            }
        };
        if !failed {
            return;
        }

        tracing::warn!(reason, "stream failed");
        self.observer.on_connection_failed(reason);
        self.collaborators.sender.disconnect();
        self.reconcile_pipelines(false);
    }

    fn on_encoded_audio(&self, frame: Frame) {
        let route = self.route();
        if route.recording {
            self.collaborators.recorder.write_audio(&frame);
        }
        if route.streaming
            && let Err(err) = self.collaborators.sender.send_audio(&frame)
        {
            self.fail_stream(route.stream_id, &err.to_string());
        }
    }

    fn on_encoded_video(&self, frame: Frame) {
        if let Some(fps) = self.fps.tick() {
            let listener = self.fps_listener.lock().clone();
            if let Some(listener) = listener {
                listener(fps);
            }
        }

        let route = self.route();
        if route.recording {
            self.collaborators.recorder.write_video(&frame);
        }
        if route.streaming
            && let Err(err) = self.collaborators.sender.send_video(&frame)
        {
            self.fail_stream(route.stream_id, &err.to_string());
        }
    }

    /// The sender keeps the format for its next ANNOUNCE, so it always gets it.
    fn on_audio_format(&self, sample_rate: u32, stereo: bool) {
        self.codec_info.lock().audio_format = Some((sample_rate, stereo));
        if self.route().recording {
            self.collaborators
                .recorder
                .set_audio_format(sample_rate, stereo);
        }
        self.collaborators.sender.set_audio_info(sample_rate, stereo);
    }

    fn on_video_parameter_sets(&self, sps: &[u8], pps: &[u8], vps: Option<&[u8]>) {
        self.codec_info.lock().parameter_sets =
            Some((sps.to_vec(), pps.to_vec(), vps.map(<[u8]>::to_vec)));
        if self.route().recording {
            self.collaborators
                .recorder
                .set_video_parameter_sets(sps, pps, vps);
        }
        self.collaborators.sender.set_video_info(sps, pps, vps);
    }

    /// Hand the recorder what the running encoders reported before it started.
    fn replay_codec_info_to_recorder(&self) {
        let info = self.codec_info.lock().clone();
        let recorder = &self.collaborators.recorder;
        if let Some((sample_rate, stereo)) = info.audio_format {
            recorder.set_audio_format(sample_rate, stereo);
        }
        if let Some((sps, pps, vps)) = &info.parameter_sets {
            recorder.set_video_parameter_sets(sps, pps, vps.as_deref());
        }
    }

    fn on_pcm_frame(&self, mut frame: PcmFrame) {
        self.middleware.process_audio(&mut frame);
        if self.muted.load(Ordering::Relaxed) {
            frame.silence();
        }
        if self.flags.read().encoders_wanted() {
            self.collaborators.audio_encoder.encode(frame);
        }
    }

    fn on_raw_video_frame(&self, mut frame: RawVideoFrame) {
        self.middleware.process_video(&mut frame);
        if self.flags.read().encoders_wanted() {
            self.collaborators.video_encoder.encode(frame);
        }
    }
}

/// Forwards sender events of one stream attempt to the application observer.
struct SessionChecker {
    shared: Weak<Shared>,
    stream_id: u64,
}

impl SessionChecker {
    fn forward(&self, event: impl FnOnce(&dyn ConnectChecker)) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let current = shared.flags.read().stream_id == self.stream_id;
        if current {
            event(shared.observer.as_ref());
        }
    }
}

impl ConnectChecker for SessionChecker {
    fn on_connection_success(&self) {
        self.forward(|o| o.on_connection_success());
    }

    fn on_connection_failed(&self, reason: &str) {
        if let Some(shared) = self.shared.upgrade() {
            shared.fail_stream(self.stream_id, reason);
        }
    }

    fn on_disconnect(&self) {
        self.forward(|o| o.on_disconnect());
    }

    fn on_auth_error(&self) {
        self.forward(|o| o.on_auth_error());
    }

    fn on_auth_success(&self) {
        self.forward(|o| o.on_auth_success());
    }

    fn on_new_bitrate(&self, bitrate: u64) {
        self.forward(|o| o.on_new_bitrate(bitrate));
    }
}

/// A live publishing session.
///
/// Application-side calls (`prepare_*`, `start_*`, `stop_*`, codec changes)
/// are serialized with each other. Frame callbacks and `mute` never wait on
/// them.
pub struct StreamingSession {
    shared: Arc<Shared>,
    control: Mutex<()>,
}

impl StreamingSession {
    pub fn new(collaborators: Collaborators, observer: Arc<dyn ConnectChecker>) -> Self {
        let shared = Arc::new_cyclic(|self_ref| Shared {
            collaborators,
            observer,
            flags: RwLock::new(Flags::default()),
            pipelines: Mutex::new(false),
            pipelines_dirty: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            codec_info: Mutex::new(CodecInfo::default()),
            fps: FpsCounter::new(),
            fps_listener: Mutex::new(None),
            middleware: MiddlewareRegistry::new(),
            self_ref: self_ref.clone(),
        });
        Self {
            shared,
            control: Mutex::new(()),
        }
    }

    fn is_active(&self) -> bool {
        self.shared.flags.read().encoders_wanted()
    }

    /// Configure audio with 128 kbps, 32 kHz stereo.
    pub fn prepare_audio_default(&self) -> bool {
        self.prepare_audio(AudioConfig::default())
    }

    /// Configure recorder, microphone, sender and encoder for `config`.
    ///
    /// False if the microphone or encoder rejects it, or while active.
    pub fn prepare_audio(&self, config: AudioConfig) -> bool {
        let _control = self.control.lock();
        if self.is_active() {
            tracing::warn!("prepare_audio while streaming or recording");
            return false;
        }
        let c = &self.shared.collaborators;
        c.recorder.set_audio_config(&config);
        if !c.audio_capture.create(&config) {
            tracing::warn!(?config, "microphone rejected audio config");
            return false;
        }
        c.sender.set_audio_info(config.sample_rate, config.stereo);
        let prepared = c.audio_encoder.prepare(&config);
        if !prepared {
            tracing::warn!(?config, "audio encoder rejected config");
        }
        self.shared.flags.write().audio_prepared = prepared;
        prepared
    }

    /// Configure video with 30 fps, 1200 kbps, a key frame every 2 s and no rotation.
    pub fn prepare_video_default(&self) -> bool {
        self.prepare_video(VideoConfig::default())
    }

    /// Configure recorder and encoder; the frame size comes from the video source.
    pub fn prepare_video(&self, mut config: VideoConfig) -> bool {
        let _control = self.control.lock();
        if self.is_active() {
            tracing::warn!("prepare_video while streaming or recording");
            return false;
        }
        let c = &self.shared.collaborators;
        config.width = c.video_source.width();
        config.height = c.video_source.height();
        c.recorder.set_video_config(&config);
        let prepared = c.video_encoder.prepare(&config);
        if !prepared {
            tracing::warn!(?config, "video encoder rejected config");
        }
        self.shared.flags.write().video_prepared = prepared;
        prepared
    }

    /// Start publishing to `endpoint`. The outcome arrives through the observer.
    ///
    /// A second call while streaming is ignored.
    pub fn start_stream(&self, endpoint: &str) -> Result<()> {
        let _control = self.control.lock();
        let stream_id = {
            let mut flags = self.shared.flags.write();
            if flags.streaming {
                tracing::debug!("start_stream while streaming, ignored");
                return Ok(());
            }
            if !flags.audio_prepared && !flags.video_prepared {
                return Err(StreamError::NotPrepared);
            }
            flags.streaming = true;
            flags.endpoint = Some(endpoint.to_string());
            flags.stream_id += 1;
            flags.stream_id
        };

        self.shared.reconcile_pipelines(true);
        tracing::info!(endpoint, "stream starting");
        let checker = Arc::new(SessionChecker {
            shared: Arc::downgrade(&self.shared),
            stream_id,
        });
        self.shared.collaborators.sender.connect(endpoint, checker);
        Ok(())
    }

    /// Stop publishing. Encoders keep running while recording.
    pub fn stop_stream(&self) {
        let _control = self.control.lock();
        let was_streaming = {
            let mut flags = self.shared.flags.write();
            let was = flags.streaming;
            flags.streaming = false;
            flags.endpoint = None;
            was
        };
        self.shared.collaborators.sender.disconnect();
        if was_streaming {
            self.shared.reconcile_pipelines(true);
            tracing::info!("stream stopped");
        }
    }

    pub fn start_record(&self, path: impl AsRef<Path>) -> Result<()> {
        let _control = self.control.lock();
        {
            let flags = self.shared.flags.read();
            if flags.recording {
                tracing::debug!("start_record while recording, ignored");
                return Ok(());
            }
            if !flags.audio_prepared && !flags.video_prepared {
                return Err(StreamError::NotPrepared);
            }
        }
        let path = path.as_ref();
        self.shared.collaborators.recorder.start(path)?;
        self.shared.flags.write().recording = true;
        self.shared.replay_codec_info_to_recorder();
        self.shared.reconcile_pipelines(true);
        tracing::info!(path = %path.display(), "recording started");
        Ok(())
    }

    /// Stop recording. Encoders keep running while streaming.
    pub fn stop_record(&self) {
        let _control = self.control.lock();
        let was_recording = {
            let mut flags = self.shared.flags.write();
            std::mem::replace(&mut flags.recording, false)
        };
        if !was_recording {
            return;
        }
        self.shared.collaborators.recorder.stop();
        self.shared.reconcile_pipelines(true);
        tracing::info!("recording stopped");
    }

    /// Run the video source without encoding.
    pub fn start_preview(&self) {
        let _control = self.control.lock();
        let running = self.shared.pipelines.lock();
        {
            let mut flags = self.shared.flags.write();
            if flags.previewing {
                return;
            }
            flags.previewing = true;
        }
        if !*running {
            self.shared
                .collaborators
                .video_source
                .start(self.shared.capture_output());
        }
        tracing::debug!("preview started");
    }

    /// Stop the preview. The source keeps running while encoders need it.
    pub fn stop_preview(&self) {
        let _control = self.control.lock();
        let running = self.shared.pipelines.lock();
        {
            let mut flags = self.shared.flags.write();
            if !flags.previewing {
                return;
            }
            flags.previewing = false;
        }
        if !*running {
            self.shared.collaborators.video_source.stop();
        }
        tracing::debug!("preview stopped");
    }

    /// Propagate to sender, recorder and encoder. Rejected while active.
    pub fn set_video_codec(&self, codec: VideoCodec) -> Result<()> {
        let _control = self.control.lock();
        if self.is_active() {
            return Err(StreamError::ActiveSession("change video codec"));
        }
        let c = &self.shared.collaborators;
        c.sender.set_video_codec(codec);
        c.recorder.set_video_codec(codec);
        c.video_encoder.set_codec(codec);
        Ok(())
    }

    /// Propagate to sender, recorder and encoder. Rejected while active.
    pub fn set_audio_codec(&self, codec: AudioCodec) -> Result<()> {
        let _control = self.control.lock();
        if self.is_active() {
            return Err(StreamError::ActiveSession("change audio codec"));
        }
        let c = &self.shared.collaborators;
        c.sender.set_audio_codec(codec);
        c.recorder.set_audio_codec(codec);
        c.audio_encoder.set_codec(codec);
        Ok(())
    }

    pub fn mute(&self) {
        self.shared.muted.store(true, Ordering::Relaxed);
    }

    pub fn unmute(&self) {
        self.shared.muted.store(false, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SessionState {
        let flags = self.shared.flags.read();
        match (flags.streaming, flags.recording) {
            (true, true) => SessionState::StreamingAndRecording,
            (true, false) => SessionState::Streaming,
            (false, true) => SessionState::Recording,
            (false, false) if flags.previewing => SessionState::Previewing,
            (false, false) => SessionState::Idle,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.flags.read().streaming
    }

    pub fn is_recording(&self) -> bool {
        self.shared.flags.read().recording
    }

    pub fn is_on_preview(&self) -> bool {
        self.shared.flags.read().previewing
    }

    /// Endpoint of the active stream.
    pub fn endpoint(&self) -> Option<String> {
        self.shared.flags.read().endpoint.clone()
    }

    /// Encoded video frames per second over the last full second.
    pub fn fps(&self) -> u32 {
        self.shared.fps.fps()
    }

    /// Called once per second with the measured frame rate.
    pub fn set_fps_listener(&self, listener: Option<FpsListener>) {
        *self.shared.fps_listener.lock() = listener;
    }

    pub fn middleware(&self) -> &MiddlewareRegistry {
        &self.shared.middleware
    }

    pub fn encoder_output(&self) -> EncoderOutput {
        self.shared.encoder_output()
    }

    pub fn capture_output(&self) -> CaptureOutput {
        self.shared.capture_output()
    }

    pub fn on_encoded_audio(&self, frame: Frame) {
        self.shared.on_encoded_audio(frame);
    }

    pub fn on_encoded_video(&self, frame: Frame) {
        self.shared.on_encoded_video(frame);
    }

    pub fn on_audio_format(&self, sample_rate: u32, stereo: bool) {
        self.shared.on_audio_format(sample_rate, stereo);
    }

    pub fn on_video_parameter_sets(&self, sps: &[u8], pps: &[u8], vps: Option<&[u8]>) {
        self.shared.on_video_parameter_sets(sps, pps, vps);
    }

    pub fn on_pcm_frame(&self, frame: PcmFrame) {
        self.shared.on_pcm_frame(frame);
    }

    pub fn on_raw_video_frame(&self, frame: RawVideoFrame) {
        self.shared.on_raw_video_frame(frame);
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.stop_stream();
        self.stop_record();
        self.stop_preview();
    }
}
