pub mod amf;
pub mod error;
pub mod media;
pub mod middleware;
pub mod observer;
pub mod protocol;
pub mod rtcp;
pub mod sender;
pub mod session;
pub mod transport;

pub use error::{Result, StreamError};
pub use media::{AudioCodec, Frame, Packetizer, PcmFrame, RawVideoFrame, VideoCodec};
pub use observer::ConnectChecker;
pub use protocol::{RtspClient, RtspConfig};
pub use sender::ProtocolSender;
pub use session::{Collaborators, SessionState, StreamingSession};
