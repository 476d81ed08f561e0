//! HNCP handshake over a freshly connected stream.
//!
//! The hub always initiates, whichever side opened the connection:
//!
//! ```text
//! hub                                  extension
//!  | INITIATION                    ->   |
//!  |   <-  ACKNOWLEDGEMENT, VERSION     |
//!  | VERSION_ACCEPTANCE            ->   |
//!  |   <-  extension identifier (u64)   |
//!  | hub identifier (u64)          ->   |
//!  |   <-  category bitmask             |
//!  | COMPLETE                      ->   |
//!  |   <-  COMPLETE                     |
//! ```
//!
//! Every receive has its own deadline. Any timeout, short read or unexpected
//! byte aborts the handshake; nothing is retried here.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use house_core::category::{self, Category};
use house_core::identity::HUB_IDENTIFIER;
use house_core::wire::{
    ACKNOWLEDGEMENT, COMPLETE, INITIATION, NO_IDENTIFIERS_AVAILABLE, UNKNOWN_FALLBACK, VERSION,
    VERSION_ACCEPTANCE, VERSION_REJECTION,
};
use house_core::{HouseIdentifier, Role};

/// The receive step a handshake was waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Initiation,
    Acknowledgement,
    VersionAcceptance,
    PeerIdentifier,
    Categories,
    Complete,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("timed out waiting for {step:?}")]
    Timeout { step: Step },

    #[error("peer closed the connection during {step:?}")]
    UnexpectedFailedSocketRead { step: Step },

    #[error("{step:?}: expected 0x{expected:02x}, received 0x{received:02x}")]
    ProtocolMismatch { step: Step, expected: u8, received: u8 },

    #[error("peer speaks protocol version {received}, expected {}", VERSION)]
    VersionMismatch { received: u8 },

    #[error("hub rejected our protocol version")]
    VersionRejected,

    #[error("hub has no identifiers available")]
    NoIdentifiersAvailable,

    #[error("peer identified as {0}, not the hub")]
    NotHub(HouseIdentifier),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a successful handshake learned about the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub peer_identifier: HouseIdentifier,
    pub peer_role: Role,
    /// Declared by extensions. Always empty when the peer is the hub.
    pub supported_categories: BTreeSet<Category>,
}

/// Runs this device's side of the handshake.
#[derive(Debug, Clone)]
pub struct Handshaker {
    role: Role,
    identifier: HouseIdentifier,
    categories: BTreeSet<Category>,
    step_timeout: Duration,
}

impl Handshaker {
    pub fn new(
        role: Role,
        identifier: HouseIdentifier,
        categories: BTreeSet<Category>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            role,
            identifier,
            categories,
            step_timeout,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn identifier(&self) -> HouseIdentifier {
        self.identifier
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Run the handshake for this device's role.
    pub async fn perform<S>(&self, stream: &mut S) -> Result<HandshakeResponse, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.role {
            Role::Hub => self.initiate(stream).await,
            Role::Extension => self.respond(stream).await,
        }
    }

    // ── Hub ──────────────────────────────────────────────────────────────────

    async fn initiate<S>(&self, stream: &mut S) -> Result<HandshakeResponse, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(&[INITIATION]).await?;
        tracing::trace!("sent INITIATION");

        let [ack, version] = self.recv::<2, _>(stream, Step::Acknowledgement).await?;
        expect(Step::Acknowledgement, ACKNOWLEDGEMENT, ack)?;
        if version != VERSION {
            // Best effort: the peer learns why before the socket closes.
            let _ = stream.write_all(&[VERSION_REJECTION]).await;
            return Err(HandshakeError::VersionMismatch { received: version });
        }

        stream.write_all(&[VERSION_ACCEPTANCE]).await?;

        let peer_identifier =
            u64::from_be_bytes(self.recv::<8, _>(stream, Step::PeerIdentifier).await?);
        tracing::trace!(peer = peer_identifier, "received extension identifier");

        stream.write_all(&HUB_IDENTIFIER.to_be_bytes()).await?;

        let supported_categories = self.recv_categories(stream).await?;

        stream.write_all(&[COMPLETE]).await?;
        let [complete] = self.recv::<1, _>(stream, Step::Complete).await?;
        expect(Step::Complete, COMPLETE, complete)?;

        tracing::debug!(
            peer = peer_identifier,
            categories = supported_categories.len(),
            "handshake complete (hub)"
        );
        Ok(HandshakeResponse {
            peer_identifier,
            peer_role: Role::Extension,
            supported_categories,
        })
    }

    /// The bitmask is read with a single bounded read. Bytes the extension
    /// did not send leave their categories unset instead of failing.
    async fn recv_categories<S>(&self, stream: &mut S) -> Result<BTreeSet<Category>, HandshakeError>
    where
        S: AsyncRead + Unpin,
    {
        let step = Step::Categories;
        let mut mask = vec![0u8; Category::mask_len()];
        let n = match timeout(self.step_timeout, stream.read(&mut mask)).await {
            Err(_) => return Err(HandshakeError::Timeout { step }),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(0)) => return Err(HandshakeError::UnexpectedFailedSocketRead { step }),
            Ok(Ok(n)) => n,
        };
        if n < mask.len() {
            tracing::debug!(
                received = n,
                expected = mask.len(),
                "short category bitmask, missing categories skipped"
            );
        }
        Ok(category::categories_from(&mask[..n]))
    }

    // ── Extension ────────────────────────────────────────────────────────────

    async fn respond<S>(&self, stream: &mut S) -> Result<HandshakeResponse, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let [initiation] = self.recv::<1, _>(stream, Step::Initiation).await?;
        if initiation != INITIATION {
            let _ = stream.write_all(&[UNKNOWN_FALLBACK]).await;
            return Err(mismatch(Step::Initiation, INITIATION, initiation));
        }

        stream.write_all(&[ACKNOWLEDGEMENT, VERSION]).await?;

        let [verdict] = self.recv::<1, _>(stream, Step::VersionAcceptance).await?;
        match verdict {
            VERSION_ACCEPTANCE => {}
            VERSION_REJECTION => return Err(HandshakeError::VersionRejected),
            NO_IDENTIFIERS_AVAILABLE => return Err(HandshakeError::NoIdentifiersAvailable),
            other => return Err(mismatch(Step::VersionAcceptance, VERSION_ACCEPTANCE, other)),
        }

        stream.write_all(&self.identifier.to_be_bytes()).await?;

        let hub = u64::from_be_bytes(self.recv::<8, _>(stream, Step::PeerIdentifier).await?);
        if hub != HUB_IDENTIFIER {
            return Err(HandshakeError::NotHub(hub));
        }

        stream.write_all(&category::bitmasks(&self.categories)).await?;

        let [complete] = self.recv::<1, _>(stream, Step::Complete).await?;
        expect(Step::Complete, COMPLETE, complete)?;
        stream.write_all(&[COMPLETE]).await?;

        tracing::debug!(own = self.identifier, "handshake complete (extension)");
        Ok(HandshakeResponse {
            peer_identifier: HUB_IDENTIFIER,
            peer_role: Role::Hub,
            supported_categories: BTreeSet::new(),
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    async fn recv<const N: usize, S>(
        &self,
        stream: &mut S,
        step: Step,
    ) -> Result<[u8; N], HandshakeError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = [0u8; N];
        match timeout(self.step_timeout, stream.read_exact(&mut buf)).await {
            Err(_) => Err(HandshakeError::Timeout { step }),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(HandshakeError::UnexpectedFailedSocketRead { step })
            }
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(_)) => Ok(buf),
        }
    }
}

fn expect(step: Step, expected: u8, received: u8) -> Result<(), HandshakeError> {
    if received == expected {
        Ok(())
    } else {
        Err(mismatch(step, expected, received))
    }
}

fn mismatch(step: Step, expected: u8, received: u8) -> HandshakeError {
    HandshakeError::ProtocolMismatch {
        step,
        expected,
        received,
    }
}
