use std::sync::Arc;

use crate::error::Result;
use crate::media::{AudioCodec, Frame, VideoCodec};
use crate::observer::ConnectChecker;

/// Protocol-specific half of a publishing session.
///
/// Implementations own the network connection. `connect` returns
/// immediately; the outcome is reported through the checker. Frames handed
/// over before the connection is established are dropped. A send error means
/// the connection is gone: the implementation has already released it and
/// will not report the failure itself.
pub trait ProtocolSender: Send + Sync {
    fn connect(&self, endpoint: &str, checker: Arc<dyn ConnectChecker>);
    fn disconnect(&self);
    fn is_connected(&self) -> bool;

    fn send_audio(&self, frame: &Frame) -> Result<()>;
    fn send_video(&self, frame: &Frame) -> Result<()>;

    fn set_video_codec(&self, codec: VideoCodec);
    fn set_audio_codec(&self, codec: AudioCodec);
    fn set_audio_info(&self, sample_rate: u32, stereo: bool);
    /// `vps` is only present for H.265.
    fn set_video_info(&self, sps: &[u8], pps: &[u8], vps: Option<&[u8]>);
}
