//! Transport abstraction for the client side.
//!
//! Conversations are strictly turn-based: the client sends one or two
//! frames, then (usually) reads exactly one reply. `Carrier` models that
//! turn, letting the conversation logic in [`crate::client`] stay
//! identical across TCP (one long-lived stream) and HTTPS (one POST per
//! turn).

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::Result;

#[async_trait]
pub trait Carrier: Send {
    /// Send `frames`, then read one reply frame when `expect_reply`.
    ///
    /// Carriers that batch (HTTP) may skip the network round-trip entirely
    /// for a fire-and-forget turn.
    async fn exchange(
        &mut self,
        frames: Vec<Envelope>,
        expect_reply: bool,
    ) -> Result<Option<Envelope>>;
}
