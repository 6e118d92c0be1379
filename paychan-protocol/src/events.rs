//! Typed protocol notifications.
//!
//! Instances report progress through an explicit event queue the embedding
//! application drains at its own pace. A sink without a subscriber drops
//! events silently; the protocol never blocks on observers.

use paychan_core::{Address, ChannelId, DisputeReason};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Serialize)]
pub enum ProtocolEvent {
    DepositApproved {
        address: Address,
        amount: u64,
    },
    AllowanceChecked {
        address: Address,
        amount: u64,
    },
    ChannelOpened {
        channel_id: ChannelId,
        player_deposit: u64,
        bankroller_deposit: u64,
    },
    RoundPlayed {
        channel_id: ChannelId,
        session: u64,
        bet: u64,
        profit: i64,
    },
    StateConfirmed {
        channel_id: ChannelId,
        session: u64,
        by: Address,
    },
    CloseConsented {
        channel_id: ChannelId,
    },
    ChannelClosed {
        channel_id: ChannelId,
        player_balance: u64,
        bankroller_balance: u64,
    },
    DisputeOpened {
        channel_id: ChannelId,
        reason: DisputeReason,
    },
}

#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<ProtocolEvent>>,
}

impl EventSink {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, UnboundedReceiver<ProtocolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn emit(&self, event: ProtocolEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
