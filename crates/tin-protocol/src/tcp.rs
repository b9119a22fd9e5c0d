//! TCP carrier: one bidirectional stream, newline-delimited frames.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::carrier::Carrier;
use crate::envelope::{read_frame, write_frame, Envelope};
use crate::error::{ProtocolError, Result};

/// Default connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TcpCarrier {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TcpCarrier {
    /// Connect to `addr` (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::Transport(format!("connect to {addr} timed out")))?
            .map_err(|e| ProtocolError::Transport(format!("connect to {addr}: {e}")))?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }
}

#[async_trait]
impl Carrier for TcpCarrier {
    async fn exchange(
        &mut self,
        frames: Vec<Envelope>,
        expect_reply: bool,
    ) -> Result<Option<Envelope>> {
        for frame in &frames {
            write_frame(&mut self.writer, frame).await?;
        }
        if !expect_reply {
            return Ok(None);
        }
        match read_frame(&mut self.reader).await? {
            Some(frame) => Ok(Some(frame)),
            None => Err(ProtocolError::Closed),
        }
    }
}
