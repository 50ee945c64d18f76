//! Collaborators that replay a pre-encoded H.264 file instead of driving
//! a camera and hardware encoder.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use livepush::media::extract_nal_units;
use livepush::session::{
    AudioCapture, AudioConfig, AudioEncoder, CaptureOutput, EncoderOutput, Recorder, VideoConfig,
    VideoEncoder, VideoSource,
};
use livepush::{AudioCodec, Frame, PcmFrame, RawVideoFrame, VideoCodec};
use parking_lot::Mutex;

const NAL_IDR: u8 = 5;
const NAL_SPS: u8 = 7;
const NAL_PPS: u8 = 8;

/// An Annex B file split into access units.
pub struct Bitstream {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    access_units: Vec<Vec<u8>>,
}

impl Bitstream {
    /// One access unit per slice NAL; non-VCL units attach to the next slice.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut sps = None;
        let mut pps = None;
        let mut access_units = Vec::new();
        let mut pending = Vec::new();

        for nal in extract_nal_units(data) {
            let nal_type = nal[0] & 0x1F;
            match nal_type {
                NAL_SPS if sps.is_none() => sps = Some(nal.to_vec()),
                NAL_PPS if pps.is_none() => pps = Some(nal.to_vec()),
                _ => {}
            }
            pending.extend_from_slice(&[0, 0, 0, 1]);
            pending.extend_from_slice(nal);
            if (1..=NAL_IDR).contains(&nal_type) {
                access_units.push(std::mem::take(&mut pending));
            }
        }

        if access_units.is_empty() {
            return None;
        }
        Some(Self {
            sps: sps?,
            pps: pps?,
            access_units,
        })
    }

    pub fn frames(&self) -> usize {
        self.access_units.len()
    }
}

/// Plays the bitstream in a loop at the configured frame rate.
pub struct FileVideoEncoder {
    stream: Arc<Bitstream>,
    fps: Mutex<u32>,
    running: Arc<AtomicBool>,
}

impl FileVideoEncoder {
    pub fn new(stream: Bitstream) -> Self {
        Self {
            stream: Arc::new(stream),
            fps: Mutex::new(30),
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl VideoEncoder for FileVideoEncoder {
    fn prepare(&self, config: &VideoConfig) -> bool {
        if config.fps == 0 {
            return false;
        }
        *self.fps.lock() = config.fps;
        true
    }

    fn set_codec(&self, codec: VideoCodec) {
        if codec != VideoCodec::H264 {
            tracing::warn!(?codec, "file replay only carries H.264");
        }
    }

    fn start(&self, output: EncoderOutput) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let stream = self.stream.clone();
        let running = self.running.clone();
        let interval = Duration::from_secs(1) / *self.fps.lock();

        thread::spawn(move || {
            output.on_video_parameter_sets(&stream.sps, &stream.pps, None);
            let started = Instant::now();
            let mut next = started;
            for au in stream.access_units.iter().cycle() {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let timestamp_us = next.duration_since(started).as_micros() as u64;
                output.on_encoded_video(Frame::video(au.clone(), timestamp_us));
                next += interval;
                if let Some(wait) = next.checked_duration_since(Instant::now()) {
                    thread::sleep(wait);
                }
            }
            tracing::debug!("replay stopped");
        });
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn encode(&self, _frame: RawVideoFrame) {}
}

/// Video source with nothing attached.
pub struct NoCamera;

impl VideoSource for NoCamera {
    fn width(&self) -> u32 {
        0
    }
    fn height(&self) -> u32 {
        0
    }
    fn start(&self, _output: CaptureOutput) {}
    fn stop(&self) {}
}

/// The replay has no audio track.
pub struct NoAudio;

impl AudioCapture for NoAudio {
    fn create(&self, _config: &AudioConfig) -> bool {
        false
    }
    fn start(&self, _output: CaptureOutput) {}
    fn stop(&self) {}
}

impl AudioEncoder for NoAudio {
    fn prepare(&self, _config: &AudioConfig) -> bool {
        false
    }
    fn set_codec(&self, _codec: AudioCodec) {}
    fn start(&self, _output: EncoderOutput) {}
    fn stop(&self) {}
    fn encode(&self, _frame: PcmFrame) {}
}

/// Recording is not offered by the CLI.
pub struct NoRecorder;

impl Recorder for NoRecorder {
    fn set_audio_config(&self, _config: &AudioConfig) {}
    fn set_video_config(&self, _config: &VideoConfig) {}
    fn set_audio_codec(&self, _codec: AudioCodec) {}
    fn set_video_codec(&self, _codec: VideoCodec) {}
    fn start(&self, _path: &Path) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "recording unavailable"))
    }
    fn stop(&self) {}
    fn set_audio_format(&self, _sample_rate: u32, _stereo: bool) {}
    fn set_video_parameter_sets(&self, _sps: &[u8], _pps: &[u8], _vps: Option<&[u8]>) {}
    fn write_audio(&self, _frame: &Frame) {}
    fn write_video(&self, _frame: &Frame) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_access_units() {
        let data = [
            &[0, 0, 0, 1, 0x67, 0x42][..],
            &[0, 0, 0, 1, 0x68, 0xCE],
            &[0, 0, 0, 1, 0x65, 0x88],
            &[0, 0, 1, 0x41, 0x9A],
        ]
        .concat();
        let stream = Bitstream::parse(&data).unwrap();
        assert_eq!(stream.sps, vec![0x67, 0x42]);
        assert_eq!(stream.pps, vec![0x68, 0xCE]);
        assert_eq!(stream.frames(), 2);
        assert_eq!(
            stream.access_units[0],
            vec![0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 0, 1, 0x65, 0x88]
        );
        assert_eq!(stream.access_units[1], vec![0, 0, 0, 1, 0x41, 0x9A]);
    }

    #[test]
    fn rejects_stream_without_parameter_sets() {
        assert!(Bitstream::parse(&[0, 0, 0, 1, 0x65, 0x88]).is_none());
        assert!(Bitstream::parse(&[]).is_none());
    }
}
