//! The message envelope: newline-delimited JSON frames.
//!
//! ```text
//! {"type": <MessageType>, "payload": <object | null>}\n
//! ```
//!
//! No frame spans lines, so one buffered line read yields one message.
//! Both transports share this codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};

/// Wire protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frame discriminator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Hello,
    Refs,
    Want,
    Pack,
    UpdateRefs,
    GetConfig,
    Config,
    SetConfig,
    Ok,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Hello => "hello",
            MessageType::Refs => "refs",
            MessageType::Want => "want",
            MessageType::Pack => "pack",
            MessageType::UpdateRefs => "update-refs",
            MessageType::GetConfig => "get-config",
            MessageType::Config => "config",
            MessageType::SetConfig => "set-config",
            MessageType::Ok => "ok",
            MessageType::Error => "error",
        }
    }
}

/// One frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl Envelope {
    /// Frame `payload` under `message_type`.
    pub fn new<T: Serialize>(message_type: MessageType, payload: &T) -> Result<Self> {
        Ok(Self {
            message_type,
            payload: Some(serde_json::to_value(payload)?),
        })
    }

    /// A frame with no payload.
    pub fn bare(message_type: MessageType) -> Self {
        Self {
            message_type,
            payload: None,
        }
    }

    /// Decode the payload into `T`, treating a missing payload as `{}`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .payload
            .clone()
            .unwrap_or(serde_json::Value::Object(Default::default()));
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to one wire line (newline included).
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one wire line.
    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim_end())
            .map_err(|e| ProtocolError::InvalidRequest(format!("bad frame: {e}")))
    }

    /// Error when this frame is not of the expected type.
    pub fn expect(self, expected: MessageType) -> Result<Self> {
        if self.message_type == expected {
            Ok(self)
        } else if self.message_type == MessageType::Error {
            let err: crate::messages::ErrorMsg = self.decode()?;
            Err(ProtocolError::Remote {
                code: err.code,
                message: err.message,
            })
        } else {
            Err(ProtocolError::Unexpected {
                expected: expected.as_str(),
                got: self.message_type.as_str().to_string(),
            })
        }
    }
}

/// Write one frame to an async stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Envelope) -> Result<()> {
    let line = frame.to_line()?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `None` at end of stream.
pub async fn read_frame<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> Result<Option<Envelope>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(Envelope::from_line(&line)?))
}

/// Parse a newline-delimited batch (an HTTP request or response body).
pub fn parse_frames(body: &str) -> Result<Vec<Envelope>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(Envelope::from_line)
        .collect()
}

/// Join frames into a newline-delimited batch.
pub fn join_frames(frames: &[Envelope]) -> Result<String> {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&frame.to_line()?);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ErrorMsg, OkMsg};
    use crate::ErrCode;

    #[test]
    fn type_names_use_kebab_case() {
        let env = Envelope::bare(MessageType::UpdateRefs);
        let line = env.to_line().unwrap();
        assert!(line.contains("\"update-refs\""));
        let back = Envelope::from_line(&line).unwrap();
        assert_eq!(back.message_type, MessageType::UpdateRefs);
    }

    #[test]
    fn payload_roundtrip() {
        let env = Envelope::new(
            MessageType::Ok,
            &OkMsg {
                message: Some("done".to_string()),
            },
        )
        .unwrap();
        let back = Envelope::from_line(&env.to_line().unwrap()).unwrap();
        let ok: OkMsg = back.decode().unwrap();
        assert_eq!(ok.message.as_deref(), Some("done"));
    }

    #[test]
    fn expect_converts_error_frames() {
        let env = Envelope::new(
            MessageType::Error,
            &ErrorMsg {
                code: ErrCode::NotFastForward,
                message: "rejected".to_string(),
            },
        )
        .unwrap();
        match env.expect(MessageType::Ok) {
            Err(ProtocolError::Remote { code, message }) => {
                assert_eq!(code, ErrCode::NotFastForward);
                assert_eq!(message, "rejected");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn expect_flags_wrong_type() {
        let env = Envelope::bare(MessageType::Refs);
        assert!(matches!(
            env.expect(MessageType::Pack),
            Err(ProtocolError::Unexpected { .. })
        ));
    }

    #[test]
    fn batch_parse_skips_blank_lines() {
        let body = "{\"type\":\"ok\"}\n\n{\"type\":\"refs\"}\n";
        let frames = parse_frames(body).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].message_type, MessageType::Ok);
        assert_eq!(frames[1].message_type, MessageType::Refs);
    }

    #[tokio::test]
    async fn async_frame_io_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = client;
        let mut reader = tokio::io::BufReader::new(server);

        write_frame(&mut writer, &Envelope::bare(MessageType::Hello))
            .await
            .unwrap();
        drop(writer);

        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.message_type, MessageType::Hello);
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }
}
