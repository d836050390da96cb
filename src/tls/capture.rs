use super::{TlsParams, TlsState};
use crate::driver::{TlsHints, TlsUpgrade};
use rustls::ClientConfig;
use std::{
    io,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{TlsConnector, client::TlsStream};

/// Single-assignment holder for the TLS state of one probe.
///
/// A second write never replaces the first one; it is rejected and
/// remembered so the caller can report it even if the driver swallows the
/// error returned to it.
#[derive(Debug, Default)]
pub struct CaptureSlot {
    state: OnceLock<TlsState>,
    rejected: AtomicBool,
}

impl CaptureSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `state` unless the slot is already populated
    ///
    /// # Errors
    ///
    /// Hands `state` back if the slot was populated before
    pub fn set(&self, state: TlsState) -> Result<(), TlsState> {
        self.state.set(state).inspect_err(|_| self.reject())
    }

    #[must_use]
    pub fn get(&self) -> Option<&TlsState> {
        self.state.get()
    }

    #[must_use]
    pub fn is_populated(&self) -> bool {
        self.state.get().is_some()
    }

    /// Whether a write was attempted after the slot was populated
    #[must_use]
    pub fn rejected_write(&self) -> bool {
        self.rejected.load(Ordering::SeqCst)
    }

    fn reject(&self) {
        self.rejected.store(true, Ordering::SeqCst);
    }

    /// Consume the slot, returning the captured state and the rejected-write flag
    #[must_use]
    pub fn into_parts(self) -> (Option<TlsState>, bool) {
        let rejected = self.rejected.into_inner();
        (self.state.into_inner(), rejected)
    }
}

fn already_captured() -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        "TLS state was already captured for this probe",
    )
}

/// `TlsUpgrade` implementation that records the negotiated state.
///
/// It runs the TLS client handshake over whatever transport the driver hands
/// it, using the probe's client configuration plus the driver's framing hint,
/// then writes a snapshot of the connection into the [`CaptureSlot`].
#[derive(Debug, Clone, Copy)]
pub struct CaptureHook<'a> {
    slot: &'a CaptureSlot,
    params: &'a TlsParams,
}

impl<'a> CaptureHook<'a> {
    #[must_use]
    pub const fn new(slot: &'a CaptureSlot, params: &'a TlsParams) -> Self {
        Self { slot, params }
    }

    fn client_config(&self, hints: TlsHints) -> ClientConfig {
        let mut config = ClientConfig::clone(&self.params.client_config);
        config.max_fragment_size = hints.max_fragment_size;
        config
    }
}

impl TlsUpgrade for CaptureHook<'_> {
    async fn upgrade<S>(&self, transport: S, hints: TlsHints) -> io::Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if self.slot.is_populated() {
            self.slot.reject();
            return Err(already_captured());
        }

        let connector = TlsConnector::from(Arc::new(self.client_config(hints)));
        let stream = connector
            .connect(self.params.server_name.clone(), transport)
            .await?;

        let (_, connection) = stream.get_ref();
        let state = TlsState::from_connection(connection, &self.params.server_name)
            .ok_or_else(|| io::Error::other("handshake completed without negotiated parameters"))?;
        self.slot.set(state).map_err(|_| already_captured())?;

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::tls::{ModuleConfig, derive};

    fn state(server_name: &str) -> TlsState {
        TlsState {
            version: "TLSv1.3".to_string(),
            cipher: "TLS13_AES_128_GCM_SHA256".to_string(),
            server_name: server_name.to_string(),
            peer_certificates: Vec::new(),
        }
    }

    #[test]
    fn test_slot_single_assignment() {
        let slot = CaptureSlot::new();
        assert!(!slot.is_populated());
        assert!(slot.set(state("first")).is_ok());
        assert!(!slot.rejected_write());

        let rejected = slot.set(state("second")).unwrap_err();
        assert_eq!(rejected.server_name, "second");
        assert!(slot.rejected_write());
        assert_eq!(slot.get().unwrap().server_name, "first");

        let (captured, rejected) = slot.into_parts();
        assert_eq!(captured.unwrap().server_name, "first");
        assert!(rejected);
    }

    #[test]
    fn test_slot_empty_parts() {
        let (captured, rejected) = CaptureSlot::new().into_parts();
        assert!(captured.is_none());
        assert!(!rejected);
    }

    #[tokio::test]
    async fn test_hint_copied_into_config() {
        let params = derive(&ModuleConfig::default(), "db.example.com")
            .await
            .unwrap();
        let slot = CaptureSlot::new();
        let hook = CaptureHook::new(&slot, &params);

        let config = hook.client_config(TlsHints {
            max_fragment_size: Some(4088),
        });
        assert_eq!(config.max_fragment_size, Some(4088));
        // caller's configuration is not modified
        assert_eq!(params.client_config.max_fragment_size, None);
    }

    #[tokio::test]
    async fn test_hook_rejects_second_upgrade() {
        let params = derive(&ModuleConfig::default(), "db.example.com")
            .await
            .unwrap();
        let slot = CaptureSlot::new();
        slot.set(state("db.example.com")).unwrap();

        let hook = CaptureHook::new(&slot, &params);
        let (client, _server) = tokio::io::duplex(1024);
        let Err(err) = hook.upgrade(client, TlsHints::default()).await else {
            panic!("second upgrade must be rejected");
        };

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert!(slot.rejected_write());
    }
}
