use std::net::SocketAddr;

/// One proposed or accepted presentation context: an abstract syntax (a
/// storage SOP class) plus the transfer syntaxes offered for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationContext {
    pub abstract_syntax: String,
    pub transfer_syntaxes: Vec<String>,
}

impl PresentationContext {
    pub fn new(abstract_syntax: &str, transfer_syntaxes: &[&str]) -> Self {
        Self {
            abstract_syntax: abstract_syntax.to_string(),
            transfer_syntaxes: transfer_syntaxes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Identity of one accepted inbound association.
#[derive(Debug, Clone)]
pub struct AssociationContext {
    pub calling_ae: String,
    pub called_ae: String,
    pub peer_addr: Option<SocketAddr>,
}

/// What a listener offers to every peer: its AE title and the contexts it
/// will accept.
#[derive(Debug, Clone)]
pub struct ListenerContext {
    pub ae_title: String,
    pub accepted_sop_classes: Vec<String>,
    pub accepted_transfer_syntaxes: Vec<String>,
}

impl ListenerContext {
    /// A listener accepting the full documented storage catalog with the
    /// full advertised transfer-syntax list.
    pub fn full(ae_title: &str) -> Self {
        Self {
            ae_title: ae_title.to_string(),
            accepted_sop_classes: crate::sop_class::STORAGE
                .iter()
                .map(|s| s.to_string())
                .collect(),
            accepted_transfer_syntaxes: studyrelay_dicom::syntax::ADVERTISED
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// An outbound peer endpoint.
#[derive(Debug, Clone)]
pub struct PeerEndpoint {
    pub called_ae: String,
    pub calling_ae: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub timeout_secs: u64,
}
