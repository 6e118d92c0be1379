//! Transport boundary.
//!
//! A real deployment puts a network between the two instances; the protocol
//! only needs something that looks like the dealer's remote interface. The
//! in-process room below is that something for tests and the demo binary:
//! it hands out cloneable handles that serialize calls onto one dealer.

use crate::dealer::DealerInstance;
use crate::error::{ProtocolError, Result};
use crate::messages::{ChannelCheck, CloseConsent, OpenReply, OpenRequest, PlayRequest, PlayReply, SignedResponse};
use parking_lot::RwLock;
use paychan_core::{GameLogic, Ledger, Signature, StateSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The dealer operations a player can invoke remotely.
#[allow(async_fn_in_trait)]
pub trait DealerApi {
    async fn get_open_channel_data(
        &self,
        request: OpenRequest,
        signature: Signature,
    ) -> Result<SignedResponse<OpenReply>>;
    async fn check_open_channel(&self) -> Result<ChannelCheck>;
    async fn call_play(&self, request: PlayRequest) -> Result<PlayReply>;
    async fn confirm_state(&self, snapshot: StateSnapshot) -> Result<()>;
    async fn consent_close_channel(&self, signature: Signature) -> Result<CloseConsent>;
    async fn check_close_channel(&self) -> Result<ChannelCheck>;
}

/// In-process service registry keyed by room address.
pub struct LocalRoom<L, G> {
    dealers: Arc<RwLock<HashMap<String, LocalDealerHandle<L, G>>>>,
}

impl<L, G> LocalRoom<L, G> {
    pub fn new() -> Self {
        Self {
            dealers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish a dealer under a room address.
    pub fn expose_service(
        &self,
        address: impl Into<String>,
        dealer: DealerInstance<L, G>,
    ) -> LocalDealerHandle<L, G> {
        let handle = LocalDealerHandle {
            inner: Arc::new(Mutex::new(dealer)),
        };
        self.dealers.write().insert(address.into(), handle.clone());
        handle
    }

    /// Obtain a callable proxy to a published dealer.
    pub fn remote_interface(&self, address: &str) -> Result<LocalDealerHandle<L, G>> {
        self.dealers
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| ProtocolError::transport(format!("no service at room {}", address)))
    }
}

impl<L, G> Default for LocalRoom<L, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L, G> Clone for LocalRoom<L, G> {
    fn clone(&self) -> Self {
        Self {
            dealers: self.dealers.clone(),
        }
    }
}

/// Cloneable proxy serializing calls onto one shared dealer instance.
pub struct LocalDealerHandle<L, G> {
    inner: Arc<Mutex<DealerInstance<L, G>>>,
}

impl<L, G> Clone for LocalDealerHandle<L, G> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: Ledger, G: GameLogic> LocalDealerHandle<L, G> {
    /// Direct access to the underlying dealer, for inspection in tests and
    /// the demo binary.
    pub async fn with_dealer<R>(&self, f: impl FnOnce(&DealerInstance<L, G>) -> R) -> R {
        let dealer = self.inner.lock().await;
        f(&dealer)
    }
}

impl<L: Ledger, G: GameLogic> DealerApi for LocalDealerHandle<L, G> {
    async fn get_open_channel_data(
        &self,
        request: OpenRequest,
        signature: Signature,
    ) -> Result<SignedResponse<OpenReply>> {
        self.inner
            .lock()
            .await
            .get_open_channel_data(request, signature)
            .await
    }

    async fn check_open_channel(&self) -> Result<ChannelCheck> {
        self.inner.lock().await.check_open_channel().await
    }

    async fn call_play(&self, request: PlayRequest) -> Result<PlayReply> {
        self.inner.lock().await.call_play(request).await
    }

    async fn confirm_state(&self, snapshot: StateSnapshot) -> Result<()> {
        self.inner.lock().await.confirm_state(snapshot)
    }

    async fn consent_close_channel(&self, signature: Signature) -> Result<CloseConsent> {
        self.inner.lock().await.consent_close_channel(signature)
    }

    async fn check_close_channel(&self) -> Result<ChannelCheck> {
        self.inner.lock().await.check_close_channel().await
    }
}
