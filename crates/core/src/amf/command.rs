//! RTMP command messages encoded as AMF0 value sequences.
//!
//! A command is `name, transaction id, command object, args...`. Data
//! messages such as `@setDataFrame` carry no transaction id and are built
//! with [`set_data_frame`].

use super::{AmfError, AmfValue};

pub const FLASH_VERSION: &str = "FMLE/3.0 (compatible; FMSc/1.0)";

/// FLV codec ids used in `onMetaData`.
pub const VIDEO_CODEC_AVC: f64 = 7.0;
pub const VIDEO_CODEC_HEVC: f64 = 12.0;
pub const AUDIO_CODEC_AAC: f64 = 10.0;
pub const AUDIO_CODEC_G711_ALAW: f64 = 7.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    pub command_object: AmfValue,
    pub args: Vec<AmfValue>,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64, command_object: AmfValue) -> Self {
        Self {
            name: name.into(),
            transaction_id,
            command_object,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: AmfValue) -> Self {
        self.args.push(value);
        self
    }

    pub fn connect(transaction_id: f64, app: &str, tc_url: &str) -> Self {
        Self::new(
            "connect",
            transaction_id,
            AmfValue::object([
                ("app", AmfValue::string(app)),
                ("type", AmfValue::string("nonprivate")),
                ("flashVer", AmfValue::string(FLASH_VERSION)),
                ("tcUrl", AmfValue::string(tc_url)),
            ]),
        )
    }

    pub fn release_stream(transaction_id: f64, stream_name: &str) -> Self {
        Self::new("releaseStream", transaction_id, AmfValue::Null).arg(AmfValue::string(stream_name))
    }

    pub fn fc_publish(transaction_id: f64, stream_name: &str) -> Self {
        Self::new("FCPublish", transaction_id, AmfValue::Null).arg(AmfValue::string(stream_name))
    }

    pub fn create_stream(transaction_id: f64) -> Self {
        Self::new("createStream", transaction_id, AmfValue::Null)
    }

    /// `publish` is sent on the message stream returned by `createStream`
    /// with transaction id 0.
    pub fn publish(stream_name: &str, publish_type: &str) -> Self {
        Self::new("publish", 0.0, AmfValue::Null)
            .arg(AmfValue::string(stream_name))
            .arg(AmfValue::string(publish_type))
    }

    pub fn delete_stream(transaction_id: f64, stream_id: f64) -> Self {
        Self::new("deleteStream", transaction_id, AmfValue::Null).arg(AmfValue::Number(stream_id))
    }

    pub fn encode(&self) -> Result<Vec<u8>, AmfError> {
        let mut out = Vec::new();
        AmfValue::string(self.name.as_str()).write(&mut out)?;
        AmfValue::Number(self.transaction_id).write(&mut out)?;
        self.command_object.write(&mut out)?;
        for arg in &self.args {
            arg.write(&mut out)?;
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AmfError> {
        let mut values = AmfValue::decode_all(bytes)?.into_iter();
        let name = match values.next() {
            Some(AmfValue::String(s)) | Some(AmfValue::LongString(s)) => s,
            _ => return Err(AmfError::MalformedCommand("name")),
        };
        let transaction_id = values
            .next()
            .and_then(|v| v.as_number())
            .ok_or(AmfError::MalformedCommand("transaction id"))?;
        let command_object = values.next().unwrap_or(AmfValue::Null);
        Ok(Self {
            name,
            transaction_id,
            command_object,
            args: values.collect(),
        })
    }

    /// Stream id carried by a `_result` reply to `createStream`.
    pub fn result_stream_id(&self) -> Option<f64> {
        if self.name != "_result" {
            return None;
        }
        self.args.first().and_then(AmfValue::as_number)
    }
}

/// Stream properties announced through `onMetaData`.
#[derive(Debug, Clone, Default)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate: u32,
    pub video_codec_id: Option<f64>,
    pub audio_bitrate: u32,
    pub audio_sample_rate: u32,
    pub audio_stereo: bool,
    pub audio_codec_id: Option<f64>,
}

/// `@setDataFrame("onMetaData", {...})` data message body.
pub fn set_data_frame(meta: &StreamMetadata) -> Result<Vec<u8>, AmfError> {
    let mut props = vec![("duration".to_string(), AmfValue::Number(0.0))];
    if let Some(codec) = meta.video_codec_id {
        props.extend([
            ("width".to_string(), AmfValue::Number(meta.width as f64)),
            ("height".to_string(), AmfValue::Number(meta.height as f64)),
            ("videocodecid".to_string(), AmfValue::Number(codec)),
            ("framerate".to_string(), AmfValue::Number(meta.fps as f64)),
            (
                "videodatarate".to_string(),
                AmfValue::Number((meta.video_bitrate / 1024) as f64),
            ),
        ]);
    }
    if let Some(codec) = meta.audio_codec_id {
        props.extend([
            ("audiocodecid".to_string(), AmfValue::Number(codec)),
            (
                "audiosamplerate".to_string(),
                AmfValue::Number(meta.audio_sample_rate as f64),
            ),
            ("audiosamplesize".to_string(), AmfValue::Number(16.0)),
            ("stereo".to_string(), AmfValue::Boolean(meta.audio_stereo)),
            (
                "audiodatarate".to_string(),
                AmfValue::Number((meta.audio_bitrate / 1024) as f64),
            ),
        ]);
    }
    props.push(("filesize".to_string(), AmfValue::Number(0.0)));

    let mut out = Vec::new();
    AmfValue::string("@setDataFrame").write(&mut out)?;
    AmfValue::string("onMetaData").write(&mut out)?;
    AmfValue::EcmaArray(props).write(&mut out)?;
    Ok(out)
}
