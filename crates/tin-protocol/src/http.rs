//! HTTPS carrier: each turn becomes one POST of newline-delimited frames.
//!
//! The endpoints are stateless, so the carrier retains the first frame it
//! ever sends (the `hello`) and replays it at the head of every request
//! body. Operation-specific endpoints:
//!
//! * push   → `POST <base>/<repo>/tin-receive-pack`
//! * pull   → `POST <base>/<repo>/tin-upload-pack`
//! * config → `POST <base>/<repo>/tin-config`

use async_trait::async_trait;

use tin_core::Credentials;

use crate::carrier::Carrier;
use crate::envelope::{join_frames, parse_frames, Envelope, MessageType};
use crate::error::{ProtocolError, Result};
use crate::messages::{Hello, Operation};

/// Endpoint suffix for an operation.
pub fn endpoint(operation: Operation) -> &'static str {
    match operation {
        Operation::Push => "tin-receive-pack",
        Operation::Pull => "tin-upload-pack",
        Operation::Config => "tin-config",
    }
}

pub struct HttpCarrier {
    client: reqwest::Client,
    /// Scheme + authority, e.g. `https://tin.example.com`.
    base_url: String,
    credentials: Option<Credentials>,
    /// First frame sent; replayed on every request.
    hello: Option<Envelope>,
    url: Option<String>,
}

impl HttpCarrier {
    pub fn new(base_url: impl Into<String>, credentials: Option<Credentials>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
            hello: None,
            url: None,
        }
    }

    fn request_url(&mut self, frames: &[Envelope]) -> Result<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        // The hello names the repo and the operation; both are needed to
        // shape the endpoint.
        let hello_frame = frames
            .iter()
            .find(|f| f.message_type == MessageType::Hello)
            .ok_or_else(|| {
                ProtocolError::InvalidRequest("http conversation must open with hello".into())
            })?;
        let hello: Hello = hello_frame.decode()?;
        let url = format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            hello.repo_path.trim_matches('/'),
            endpoint(hello.operation),
        );
        self.url = Some(url.clone());
        Ok(url)
    }
}

#[async_trait]
impl Carrier for HttpCarrier {
    async fn exchange(
        &mut self,
        frames: Vec<Envelope>,
        expect_reply: bool,
    ) -> Result<Option<Envelope>> {
        let mut batch: Vec<Envelope> = Vec::new();
        match &self.hello {
            None => {
                self.request_url(&frames)?;
                self.hello = frames
                    .iter()
                    .find(|f| f.message_type == MessageType::Hello)
                    .cloned();
            }
            Some(hello) => {
                if !frames.iter().any(|f| f.message_type == MessageType::Hello) {
                    batch.push(hello.clone());
                }
            }
        }
        batch.extend(frames);

        if !expect_reply {
            // Nothing to deliver that the server needs; the conversation's
            // effects happened in earlier exchanges.
            return Ok(None);
        }

        let url = self
            .url
            .clone()
            .ok_or_else(|| ProtocolError::InvalidRequest("no hello sent yet".into()))?;
        let body = join_frames(&batch)?;

        let mut request = self.client.post(&url).body(body);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(format!("POST {url}: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProtocolError::Transport(format!("reading response: {e}")))?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProtocolError::Transport(
                "authentication required (set TIN_AUTH or run `tin config credentials`)".into(),
            ));
        }
        if !status.is_success() && text.trim().is_empty() {
            return Err(ProtocolError::Transport(format!("POST {url}: {status}")));
        }

        let mut reply = parse_frames(&text)?;
        if reply.is_empty() {
            return Err(ProtocolError::Closed);
        }
        // Turn-based responses carry exactly one frame.
        Ok(Some(reply.remove(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_match_operations() {
        assert_eq!(endpoint(Operation::Push), "tin-receive-pack");
        assert_eq!(endpoint(Operation::Pull), "tin-upload-pack");
        assert_eq!(endpoint(Operation::Config), "tin-config");
    }

    #[test]
    fn url_is_derived_from_hello() {
        let mut carrier = HttpCarrier::new("https://tin.example.com/", None);
        let hello = Envelope::new(
            MessageType::Hello,
            &Hello {
                version: 1,
                operation: Operation::Pull,
                repo_path: "team/project".to_string(),
            },
        )
        .unwrap();
        let url = carrier.request_url(std::slice::from_ref(&hello)).unwrap();
        assert_eq!(
            url,
            "https://tin.example.com/team/project/tin-upload-pack"
        );
    }
}
