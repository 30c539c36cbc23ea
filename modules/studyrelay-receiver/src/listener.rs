//! One TCP accept loop per route, with a bounded handler pool.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use studyrelay_protocol::{InstanceSink, ListenerContext, StoreScp};

use crate::error::Result;

pub struct Listener {
    context: ListenerContext,
    port: u16,
    max_handlers: usize,
}

impl Listener {
    /// A listener accepting the full storage catalog on `port`.
    pub fn new(ae_title: &str, port: u16, max_handlers: usize) -> Self {
        Self {
            context: ListenerContext::full(ae_title),
            port,
            max_handlers: max_handlers.max(1),
        }
    }

    /// Bind and serve until shutdown.
    pub async fn spawn(
        self,
        scp: Arc<dyn StoreScp>,
        sink: Arc<dyn InstanceSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        self.serve(listener, scp, sink, shutdown).await
    }

    /// Bind an ephemeral loopback port (tests).
    pub async fn spawn_ephemeral(
        self,
        scp: Arc<dyn StoreScp>,
        sink: Arc<dyn InstanceSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        self.serve(listener, scp, sink, shutdown).await
    }

    async fn serve(
        self,
        listener: TcpListener,
        scp: Arc<dyn StoreScp>,
        sink: Arc<dyn InstanceSink>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = listener.local_addr()?;
        info!(ae_title = %self.context.ae_title, addr = %addr, "Listener bound");

        let semaphore = Arc::new(Semaphore::new(self.max_handlers));
        let context = Arc::new(self.context);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!(error = %e, "Accept failed");
                                continue;
                            }
                        };
                        // Each association runs on a pooled handler task.
                        let permit = match semaphore.clone().acquire_owned().await {
                            Ok(p) => p,
                            Err(_) => return,
                        };
                        let scp = scp.clone();
                        let sink = sink.clone();
                        let context = context.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            match scp.serve(stream, &context, sink.as_ref()).await {
                                Ok(summary) => info!(
                                    ae_title = %context.ae_title,
                                    calling = %summary.calling_ae,
                                    received = summary.instances_received,
                                    failed = summary.instances_failed,
                                    "Association closed"
                                ),
                                // Association-level failures end that
                                // peer's session only.
                                Err(e) => error!(
                                    ae_title = %context.ae_title,
                                    peer = %peer,
                                    error = %e,
                                    "Association failed"
                                ),
                            }
                        });
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!(ae_title = %context.ae_title, "Listener stopping");
                            return;
                        }
                    }
                }
            }
        });
        Ok((addr, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbox::InboxWriter;
    use crate::layout::RouteLayout;
    use studyrelay_dicom::dictionary::tags;
    use studyrelay_dicom::{codec, syntax, AttributeSet, FileMeta, Vr};
    use studyrelay_protocol::sim::{SimClient, SimScp};
    use tempfile::TempDir;

    fn encode_instance(study: &str, sop: &str) -> Vec<u8> {
        let mut ds = AttributeSet::new();
        ds.put_string(
            tags::SOP_CLASS_UID,
            Vr::Ui,
            studyrelay_protocol::sop_class::CT_IMAGE_STORAGE,
        );
        ds.put_string(tags::SOP_INSTANCE_UID, Vr::Ui, sop);
        ds.put_string(tags::STUDY_INSTANCE_UID, Vr::Ui, study);
        ds.put_string(tags::SERIES_INSTANCE_UID, Vr::Ui, "1.2.3.1");
        ds.put_string(tags::PATIENT_ID, Vr::Lo, "P1");
        let meta = FileMeta::for_dataset(&ds, syntax::EXPLICIT_VR_LE);
        let mut out = Vec::new();
        codec::write_to(&mut out, &meta, &ds).unwrap();
        out
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn listener_stores_received_instances() {
        let dir = TempDir::new().unwrap();
        let layout = RouteLayout::new(dir.path(), "R1");
        layout.ensure().unwrap();
        let sink = Arc::new(InboxWriter::new(layout.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (addr, handle) = Listener::new("R1", 0, 4)
            .spawn_ephemeral(Arc::new(SimScp), sink, shutdown_rx)
            .await
            .unwrap();

        let mut client = SimClient::connect(&addr.to_string(), "MODALITY").await.unwrap();
        assert!(client.send_bytes(&encode_instance("1.2.3", "1.2.3.1.1")).await.unwrap());
        assert!(client.send_bytes(&encode_instance("1.2.3", "1.2.3.1.2")).await.unwrap());
        client.release().await.unwrap();

        // Both instances landed in the study inbox.
        for sop in ["1.2.3.1.1", "1.2.3.1.2"] {
            let path = layout.instance_path("1.2.3", "1.2.3.1", sop);
            assert!(path.is_file(), "{} missing", path.display());
        }

        shutdown_tx.send(true).unwrap();
        let _ = handle.await;
    }
}
