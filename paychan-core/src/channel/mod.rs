//! Per-channel state machine.
//!
//! Each party runs its own copy. Balances are always recomputed from the
//! deposits plus one signed running profit accumulator, never rolled forward
//! from the previous balances, so the two copies cannot drift apart while
//! they agree on the profit history.

pub mod snapshot;

pub use snapshot::{StateData, StateSnapshot};

use crate::error::{ChannelError, Result};
use crate::ledger::{recover, Signer};
use crate::types::{Address, ChannelId, Party};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retained applied-round entries.
pub const MAX_HISTORY_ITEMS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Uninitialized,
    /// Current snapshot carries both signatures (or is the zero state).
    Open,
    /// A round was applied and the counter-party's signature is outstanding.
    AwaitingConfirmation,
    Closed,
    Disputed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposits {
    pub player: u64,
    pub bankroller: u64,
}

/// One applied round, kept for display and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundEntry {
    pub session: u64,
    pub bet: u64,
    pub profit: i64,
    pub player_balance: u64,
    pub timestamp: DateTime<Utc>,
}

pub struct PayChannel {
    signer: Signer,
    counterparty: Address,
    status: ChannelStatus,
    id: Option<ChannelId>,
    deposits: Option<Deposits>,
    profit: i64,
    total_bet: u64,
    session: u64,
    current: Option<StateSnapshot>,
    last_confirmed: Option<StateSnapshot>,
    history: Vec<RoundEntry>,
}

impl PayChannel {
    pub fn new(signer: Signer, counterparty: Address) -> Self {
        Self {
            signer,
            counterparty,
            status: ChannelStatus::Uninitialized,
            id: None,
            deposits: None,
            profit: 0,
            total_bet: 0,
            session: 0,
            current: None,
            last_confirmed: None,
            history: Vec::new(),
        }
    }

    /// Set deposits exactly once and create the session-0 state.
    ///
    /// Calling this twice on one instance is a programming defect, not a
    /// runtime condition.
    pub fn initialize(
        &mut self,
        id: ChannelId,
        player_deposit: u64,
        bankroller_deposit: u64,
    ) -> Result<()> {
        if self.status != ChannelStatus::Uninitialized {
            return Err(ChannelError::AlreadyInitialized);
        }

        let data = StateData {
            id,
            player_balance: player_deposit,
            bankroller_balance: bankroller_deposit,
            total_bet: 0,
            session: 0,
        };
        let snapshot = self.signed_snapshot(data);

        self.id = Some(id);
        self.deposits = Some(Deposits {
            player: player_deposit,
            bankroller: bankroller_deposit,
        });
        self.profit = 0;
        self.total_bet = 0;
        self.session = 0;
        // The opening state is mutually agreed on-chain, so it also serves
        // as the initial dispute fallback.
        self.last_confirmed = Some(snapshot.clone());
        self.current = Some(snapshot);
        self.status = ChannelStatus::Open;

        tracing::info!(
            "Channel {} initialized with deposits {}/{}",
            id,
            player_deposit,
            bankroller_deposit
        );
        Ok(())
    }

    /// Apply one round and return the freshly self-signed snapshot.
    ///
    /// Nothing is mutated unless every check passes.
    pub fn apply_round(&mut self, bet: u64, profit: i64) -> Result<StateSnapshot> {
        let (id, deposits) = match (self.id, self.deposits) {
            (Some(id), Some(deposits)) => (id, deposits),
            _ => return Err(ChannelError::NotInitialized),
        };
        match self.status {
            ChannelStatus::Open | ChannelStatus::AwaitingConfirmation => {}
            ChannelStatus::Uninitialized => return Err(ChannelError::NotInitialized),
            ChannelStatus::Closed | ChannelStatus::Disputed => {
                return Err(ChannelError::internal("round applied to settled channel"))
            }
        }
        if self.has_unconfirmed(&self.counterparty) {
            return Err(ChannelError::UnconfirmedState);
        }

        let cumulative = self
            .profit
            .checked_add(profit)
            .ok_or_else(|| ChannelError::internal("profit accumulator overflow"))?;
        let (player_balance, bankroller_balance) = balances(deposits, cumulative)?;
        let total_bet = self
            .total_bet
            .checked_add(bet)
            .ok_or_else(|| ChannelError::internal("total bet overflow"))?;
        let session = self.session + 1;

        let data = StateData {
            id,
            player_balance,
            bankroller_balance,
            total_bet,
            session,
        };
        let snapshot = self.signed_snapshot(data);

        self.profit = cumulative;
        self.total_bet = total_bet;
        self.session = session;
        self.current = Some(snapshot.clone());
        self.status = ChannelStatus::AwaitingConfirmation;
        self.push_history(RoundEntry {
            session,
            bet,
            profit,
            player_balance,
            timestamp: Utc::now(),
        });

        tracing::debug!(
            "Applied round: session={} bet={} profit={} balances={}/{}",
            session,
            bet,
            profit,
            player_balance,
            bankroller_balance
        );
        Ok(snapshot)
    }

    /// Accept the counter-party's signature over the current state.
    ///
    /// Both parties must already agree on the state bytes; a diverging
    /// snapshot is rejected without touching anything.
    pub fn confirm(&mut self, theirs: &StateSnapshot, identity: &Address) -> Result<()> {
        let current = self.current.as_ref().ok_or(ChannelError::NotInitialized)?;

        if theirs.hash() != current.hash() || theirs.data != current.data {
            tracing::warn!(
                "Refusing snapshot for session {}: hash differs from local session {}",
                theirs.data.session,
                current.data.session
            );
            return Err(ChannelError::HashMismatch);
        }

        let signature = *theirs
            .signs
            .get(identity)
            .ok_or(ChannelError::InvalidSignature)?;
        if recover(&current.hash(), &signature)? != *identity {
            return Err(ChannelError::InvalidSignature);
        }

        let own = self.signer.address();
        if let Some(current) = self.current.as_mut() {
            current.add_signature(*identity, signature);
            if current.is_signed_by(&own) && current.is_signed_by(identity) {
                self.last_confirmed = Some(current.clone());
                if self.status == ChannelStatus::AwaitingConfirmation {
                    self.status = ChannelStatus::Open;
                }
            }
        }

        tracing::debug!("Stored {} signature for session {}", identity, self.session);
        Ok(())
    }

    /// Admission gate: is the counter-party's confirmation of the previous
    /// round still outstanding?
    ///
    /// The session-0 state is exempt: both sides create it independently at
    /// open and never cross-sign it. From the first applied round on, an
    /// unconfirmed current snapshot blocks the next round, which bounds the
    /// divergence between the two copies to a single round.
    pub fn has_unconfirmed(&self, identity: &Address) -> bool {
        match &self.current {
            Some(snapshot) if snapshot.data.session >= 1 => !snapshot.is_signed_by(identity),
            _ => false,
        }
    }

    /// Clear everything. Only meaningful after the channel settled on-chain.
    pub fn reset(&mut self) {
        self.status = ChannelStatus::Uninitialized;
        self.id = None;
        self.deposits = None;
        self.profit = 0;
        self.total_bet = 0;
        self.session = 0;
        self.current = None;
        self.last_confirmed = None;
        self.history.clear();
        tracing::debug!("Channel state reset");
    }

    pub fn mark_closed(&mut self) {
        self.status = ChannelStatus::Closed;
    }

    pub fn mark_disputed(&mut self) {
        self.status = ChannelStatus::Disputed;
    }

    fn signed_snapshot(&self, data: StateData) -> StateSnapshot {
        let mut snapshot = StateSnapshot::new(data);
        let signature = self.signer.sign(&snapshot.hash());
        snapshot.add_signature(self.signer.address(), signature);
        snapshot
    }

    fn push_history(&mut self, entry: RoundEntry) {
        self.history.push(entry);
        if self.history.len() > MAX_HISTORY_ITEMS {
            let excess = self.history.len() - MAX_HISTORY_ITEMS;
            self.history.drain(..excess);
        }
    }

    // Accessors

    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    pub fn id(&self) -> Option<ChannelId> {
        self.id
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn profit(&self) -> i64 {
        self.profit
    }

    pub fn total_bet(&self) -> u64 {
        self.total_bet
    }

    pub fn deposits(&self) -> Option<Deposits> {
        self.deposits
    }

    pub fn player_balance(&self) -> u64 {
        self.current
            .as_ref()
            .map(|s| s.data.player_balance)
            .unwrap_or(0)
    }

    pub fn bankroller_balance(&self) -> u64 {
        self.current
            .as_ref()
            .map(|s| s.data.bankroller_balance)
            .unwrap_or(0)
    }

    pub fn own_address(&self) -> Address {
        self.signer.address()
    }

    pub fn counterparty(&self) -> Address {
        self.counterparty
    }

    pub fn current_snapshot(&self) -> Option<&StateSnapshot> {
        self.current.as_ref()
    }

    /// Newest snapshot carrying both signatures; the session-0 state until
    /// the first round confirms.
    pub fn last_confirmed(&self) -> Option<&StateSnapshot> {
        self.last_confirmed.as_ref()
    }

    /// True when the current snapshot is good to settle on: both parties
    /// have signed it.
    pub fn is_confirmed(&self) -> bool {
        let own = self.signer.address();
        self.current
            .as_ref()
            .map(|s| s.is_signed_by(&own) && s.is_signed_by(&self.counterparty))
            .unwrap_or(false)
    }

    pub fn history(&self) -> &[RoundEntry] {
        &self.history
    }
}

impl std::fmt::Debug for PayChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayChannel")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("session", &self.session)
            .field("profit", &self.profit)
            .finish()
    }
}

fn balances(deposits: Deposits, cumulative_profit: i64) -> Result<(u64, u64)> {
    let player = deposits.player as i128 + cumulative_profit as i128;
    let bankroller = deposits.bankroller as i128 - cumulative_profit as i128;

    if player < 0 {
        return Err(ChannelError::Overdraw {
            party: Party::Player,
            shortfall: player.unsigned_abs() as u64,
        });
    }
    if bankroller < 0 {
        return Err(ChannelError::Overdraw {
            party: Party::Bankroller,
            shortfall: bankroller.unsigned_abs() as u64,
        });
    }

    Ok((player as u64, bankroller as u64))
}
