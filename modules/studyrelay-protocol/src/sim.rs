//! In-process simulation of the wire stack.
//!
//! The framing is deliberately trivial (a calling-AE preface, then
//! length-prefixed part-10 payloads with one status byte back per
//! instance). It exists so listeners, forwarders, and destination health
//! can be exercised end to end over real sockets without a DIMSE
//! implementation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use studyrelay_dicom::codec;

use crate::association::{AssociationContext, ListenerContext, PeerEndpoint, PresentationContext};
use crate::error::{ProtocolError, Result};
use crate::traits::{
    AssociationSummary, InstanceSink, PeerConnector, PeerSession, ReceivedInstance, StoreOutcome,
    StoreScp,
};

const STATUS_SUCCESS: u8 = 0x00;
const STATUS_FAILURE: u8 = 0x01;

/// Server half of the sim stack.
#[derive(Debug, Default)]
pub struct SimScp;

#[async_trait]
impl StoreScp for SimScp {
    async fn serve(
        &self,
        mut stream: TcpStream,
        listener: &ListenerContext,
        sink: &dyn InstanceSink,
    ) -> Result<AssociationSummary> {
        let calling_ae = read_preface(&mut stream).await?;
        let assoc = AssociationContext {
            calling_ae: calling_ae.clone(),
            called_ae: listener.ae_title.clone(),
            peer_addr: stream.peer_addr().ok(),
        };
        debug!(calling = %assoc.calling_ae, called = %assoc.called_ae, "Sim association opened");

        let mut summary = AssociationSummary {
            calling_ae,
            ..Default::default()
        };
        loop {
            let mut len_buf = [0u8; 8];
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                // Clean shutdown between frames is association release.
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u64::from_be_bytes(len_buf);
            let mut payload = vec![0u8; len as usize];
            stream.read_exact(&mut payload).await?;

            let file = codec::read_bytes(&payload)?;
            if !listener
                .accepted_sop_classes
                .iter()
                .any(|c| c == &file.meta.media_storage_sop_class_uid)
            {
                stream.write_all(&[STATUS_FAILURE]).await?;
                summary.instances_failed += 1;
                continue;
            }
            let outcome = sink
                .store(
                    &assoc,
                    ReceivedInstance {
                        meta: file.meta,
                        dataset: file.dataset,
                    },
                )
                .await;
            match outcome {
                StoreOutcome::Success => {
                    stream.write_all(&[STATUS_SUCCESS]).await?;
                    summary.instances_received += 1;
                }
                StoreOutcome::Failure { message } => {
                    debug!(error = %message, "Sim store failed");
                    stream.write_all(&[STATUS_FAILURE]).await?;
                    summary.instances_failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

/// Client half: connect, send the preface, then stream files.
pub struct SimClient {
    stream: TcpStream,
}

impl SimClient {
    pub async fn connect(addr: &str, calling_ae: &str) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        write_preface(&mut stream, calling_ae).await?;
        Ok(Self { stream })
    }

    /// Send one part-10 file; returns whether the receiver stored it.
    pub async fn send_file(&mut self, path: &Path) -> Result<bool> {
        let bytes = tokio::fs::read(path).await?;
        self.send_bytes(&bytes).await
    }

    pub async fn send_bytes(&mut self, bytes: &[u8]) -> Result<bool> {
        self.stream
            .write_all(&(bytes.len() as u64).to_be_bytes())
            .await?;
        self.stream.write_all(bytes).await?;
        let mut status = [0u8; 1];
        self.stream.read_exact(&mut status).await?;
        Ok(status[0] == STATUS_SUCCESS)
    }

    pub async fn release(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

async fn write_preface(stream: &mut TcpStream, calling_ae: &str) -> Result<()> {
    let bytes = calling_ae.as_bytes();
    stream.write_all(&(bytes.len() as u16).to_be_bytes()).await?;
    stream.write_all(bytes).await?;
    Ok(())
}

async fn read_preface(stream: &mut TcpStream) -> Result<String> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len > 64 {
        return Err(ProtocolError::Association(format!(
            "calling AE length {len} exceeds limit"
        )));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| ProtocolError::Association("non-UTF8 calling AE".into()))
}

/// Outbound sim: "delivers" files into a local directory and answers echo
/// probes from a shared health flag. Tests flip the flag to script outages.
pub struct SimConnector {
    target_dir: PathBuf,
    healthy: Arc<AtomicBool>,
}

impl SimConnector {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Handle for scripting availability in tests.
    pub fn health_flag(&self) -> Arc<AtomicBool> {
        self.healthy.clone()
    }
}

#[async_trait]
impl PeerConnector for SimConnector {
    async fn connect(
        &self,
        endpoint: &PeerEndpoint,
        contexts: &[PresentationContext],
    ) -> Result<Box<dyn PeerSession>> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(ProtocolError::Rejected(format!(
                "{} is down",
                endpoint.called_ae
            )));
        }
        if contexts.is_empty() {
            return Err(ProtocolError::Association(
                "no presentation contexts proposed".into(),
            ));
        }
        let dir = self.target_dir.join(&endpoint.called_ae);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Box::new(SimSession { dir }))
    }

    async fn echo(&self, endpoint: &PeerEndpoint) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProtocolError::Rejected(format!(
                "{} did not answer echo",
                endpoint.called_ae
            )))
        }
    }
}

struct SimSession {
    dir: PathBuf,
}

#[async_trait]
impl PeerSession for SimSession {
    async fn store_file(&mut self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .ok_or_else(|| ProtocolError::Association("pathless store".into()))?;
        tokio::fs::copy(path, self.dir.join(name)).await?;
        Ok(())
    }

    async fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
