//! Query endpoint: one reader task over one UDP binding

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{BindError, QueryResponder, UdpBinding};
use crate::error::SdkError;
use crate::events::EventChannels;

/// Inbound query packets are at most 16 bytes for both protocols.
const INBOUND_PACKET_BYTES: usize = 16;

/// Owns a [`UdpBinding`] and the reader task answering queries on it.
///
/// Switching query protocols tears the endpoint down and starts a fresh one:
/// the binding is closed before a replacement is opened, so the port is
/// never owned twice.
pub(crate) struct QueryEndpoint {
    binding: Arc<UdpBinding>,
    reader: JoinHandle<()>,
}

impl QueryEndpoint {
    /// Starts the reader task on `binding`, answering with `responder`.
    pub fn start(
        binding: Arc<UdpBinding>,
        responder: Arc<dyn QueryResponder>,
        events: Arc<EventChannels>,
    ) -> Self {
        let reader = tokio::spawn(run_reader(Arc::clone(&binding), responder, events));
        Self { binding, reader }
    }

    /// Closes the binding, which makes the reader exit without pushing
    /// spurious errors.
    pub fn close_binding(&self) {
        self.binding.close();
    }

    /// Closes the binding and waits for the reader to finish.
    pub async fn shutdown(self) {
        self.binding.close();
        let _ = self.reader.await;
    }

    /// Address the binding is listening on.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.binding.local_addr().ok()
    }
}

async fn run_reader(
    binding: Arc<UdpBinding>,
    responder: Arc<dyn QueryResponder>,
    events: Arc<EventChannels>,
) {
    debug!("query reader started");

    loop {
        let mut buf = [0u8; INBOUND_PACKET_BYTES];
        let (n, peer) = match binding.read(&mut buf).await {
            Ok(read) => read,
            // Reads are configured to time out after a short period so the
            // loop can observe closure; just try again.
            Err(BindError::Timeout) => continue,
            Err(BindError::Closed) => break,
            Err(BindError::Io(e)) => {
                events.push_error(SdkError::QueryRead(e));
                continue;
            }
        };

        trace!(%peer, len = n, "query datagram");

        let resp = match responder.respond(&peer.to_string(), &buf[..n]) {
            Ok(resp) => resp,
            Err(e) => {
                events.push_error(SdkError::Query(e));
                continue;
            }
        };

        match binding.write(&resp, peer).await {
            Ok(_) => {}
            Err(BindError::Closed) => break,
            Err(BindError::Io(e)) => events.push_error(SdkError::QueryWrite(e)),
            // Writes never report Timeout; the deadline maps to an I/O
            // error inside the binding.
            Err(BindError::Timeout) => {}
        }
    }

    debug!("query reader stopped");
}
