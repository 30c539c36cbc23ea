//! Trait seams between the gateway core and a wire-protocol stack.
//!
//! Everything here exists so the receiver and the peer client can be
//! exercised with the in-process sim stack: no network protocol code in
//! tests, and a production DIMSE implementation slots in unchanged.

use std::path::Path;

use async_trait::async_trait;
use tokio::net::TcpStream;

use studyrelay_dicom::{AttributeSet, FileMeta};

use crate::association::{AssociationContext, ListenerContext, PeerEndpoint, PresentationContext};
use crate::error::Result;

/// One decoded instance as reconstructed by the wire stack.
#[derive(Debug, Clone)]
pub struct ReceivedInstance {
    /// File meta regenerated from the negotiated context; the transfer
    /// syntax is the one the object arrived in (never transcoded).
    pub meta: FileMeta,
    pub dataset: AttributeSet,
}

/// What the sink tells the wire stack to answer the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Success,
    /// Local failure storing this instance; the association continues.
    Failure { message: String },
}

/// Where a wire stack delivers decoded instances.
#[async_trait]
pub trait InstanceSink: Send + Sync {
    async fn store(
        &self,
        assoc: &AssociationContext,
        instance: ReceivedInstance,
    ) -> StoreOutcome;
}

/// Inbound seam: drives one accepted connection to completion, handing
/// every received instance to the sink.
#[async_trait]
pub trait StoreScp: Send + Sync {
    async fn serve(
        &self,
        stream: TcpStream,
        listener: &ListenerContext,
        sink: &dyn InstanceSink,
    ) -> Result<AssociationSummary>;
}

/// What one association produced.
#[derive(Debug, Clone, Default)]
pub struct AssociationSummary {
    pub calling_ae: String,
    pub instances_received: usize,
    pub instances_failed: usize,
}

/// Outbound seam: opens an association against a peer endpoint with the
/// given presentation contexts.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &PeerEndpoint,
        contexts: &[PresentationContext],
    ) -> Result<Box<dyn PeerSession>>;

    /// A minimal association carrying only the verification context.
    async fn echo(&self, endpoint: &PeerEndpoint) -> Result<()>;
}

/// One open outbound association. Released (dropped) after each study.
#[async_trait]
pub trait PeerSession: Send {
    /// Send one stored file over the association.
    async fn store_file(&mut self, path: &Path) -> Result<()>;

    /// Orderly release.
    async fn release(&mut self) -> Result<()>;
}
