//! Platform collaborators of a [`StreamingSession`](super::StreamingSession).
//!
//! Capture devices, hardware encoders and the file muxer live outside this
//! crate. The session drives them through these traits and hands each a
//! weak callback handle when it starts, so a collaborator never keeps the
//! session alive.

use std::io;
use std::path::Path;
use std::sync::Weak;

use super::Shared;
use crate::media::{AudioCodec, Frame, PcmFrame, RawVideoFrame, VideoCodec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Bits per second.
    pub bitrate: u32,
    pub sample_rate: u32,
    pub stereo: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            bitrate: 128 * 1024,
            sample_rate: 32000,
            stereo: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    /// Filled in from the video source by `prepare_video`.
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Bits per second.
    pub bitrate: u32,
    /// Seconds between key frames.
    pub i_frame_interval: u32,
    /// Degrees, one of 0, 90, 180, 270.
    pub rotation: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            fps: 30,
            bitrate: 1200 * 1024,
            i_frame_interval: 2,
            rotation: 0,
        }
    }
}

pub trait AudioCapture: Send + Sync {
    /// Open the microphone for `config`. False if the device refuses it.
    fn create(&self, config: &AudioConfig) -> bool;
    fn start(&self, output: CaptureOutput);
    fn stop(&self);
}

pub trait VideoSource: Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn start(&self, output: CaptureOutput);
    fn stop(&self);
}

pub trait AudioEncoder: Send + Sync {
    fn prepare(&self, config: &AudioConfig) -> bool;
    fn set_codec(&self, codec: AudioCodec);
    fn start(&self, output: EncoderOutput);
    /// Must not wait for a callback in flight on another thread.
    fn stop(&self);
    fn encode(&self, frame: PcmFrame);
}

pub trait VideoEncoder: Send + Sync {
    fn prepare(&self, config: &VideoConfig) -> bool;
    fn set_codec(&self, codec: VideoCodec);
    fn start(&self, output: EncoderOutput);
    /// Must not wait for a callback in flight on another thread.
    fn stop(&self);
    fn encode(&self, frame: RawVideoFrame);
}

/// Local file muxer.
pub trait Recorder: Send + Sync {
    fn set_audio_config(&self, config: &AudioConfig);
    fn set_video_config(&self, config: &VideoConfig);
    fn set_audio_codec(&self, codec: AudioCodec);
    fn set_video_codec(&self, codec: VideoCodec);
    fn start(&self, path: &Path) -> io::Result<()>;
    fn stop(&self);
    fn set_audio_format(&self, sample_rate: u32, stereo: bool);
    fn set_video_parameter_sets(&self, sps: &[u8], pps: &[u8], vps: Option<&[u8]>);
    fn write_audio(&self, frame: &Frame);
    fn write_video(&self, frame: &Frame);
}

/// Callback handle given to encoders. Calls after the session is dropped are ignored.
#[derive(Clone)]
pub struct EncoderOutput {
    pub(super) shared: Weak<Shared>,
}

impl EncoderOutput {
    pub fn on_encoded_audio(&self, frame: Frame) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_encoded_audio(frame);
        }
    }

    pub fn on_encoded_video(&self, frame: Frame) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_encoded_video(frame);
        }
    }

    pub fn on_audio_format(&self, sample_rate: u32, stereo: bool) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_audio_format(sample_rate, stereo);
        }
    }

    pub fn on_video_parameter_sets(&self, sps: &[u8], pps: &[u8], vps: Option<&[u8]>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_video_parameter_sets(sps, pps, vps);
        }
    }
}

/// Callback handle given to capture devices.
#[derive(Clone)]
pub struct CaptureOutput {
    pub(super) shared: Weak<Shared>,
}

impl CaptureOutput {
    pub fn on_pcm_frame(&self, frame: PcmFrame) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_pcm_frame(frame);
        }
    }

    pub fn on_raw_video_frame(&self, frame: RawVideoFrame) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_raw_video_frame(frame);
        }
    }
}
