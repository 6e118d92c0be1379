//! In-memory reference ledger.
//!
//! Stands in for the real chain client in tests and the demo binary. It
//! enforces the economic rules a settlement contract would: funds and
//! allowances at open, conservation and consent at close, and a
//! highest-mutually-signed-session settlement on dispute.

use super::{ContractCall, Ledger, OnChainChannel, OnChainState, TxReceipt, TxStatus};
use crate::channel::StateData;
use crate::dispute::DisputeClaim;
use crate::error::{ChannelError, Result};
use crate::ledger::recover;
use crate::types::{Address, ChannelId, Signature};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    accounts: HashMap<Address, u64>,
    allowances: HashMap<Address, u64>,
    channels: HashMap<ChannelId, OnChainChannel>,
    disputes: Vec<DisputeClaim>,
    block: u64,
}

#[derive(Clone, Default)]
pub struct InMemoryLedger {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account. Test and demo setup only; there is no faucet on a
    /// real ledger.
    pub fn fund(&self, address: Address, amount: u64) {
        let mut inner = self.inner.lock();
        *inner.accounts.entry(address).or_insert(0) += amount;
    }

    pub fn disputes(&self) -> Vec<DisputeClaim> {
        self.inner.lock().disputes.clone()
    }

    fn open_channel(
        inner: &mut Inner,
        channel_id: ChannelId,
        player: Address,
        bankroller: Address,
        player_deposit: u64,
        bankroller_deposit: u64,
    ) -> Result<()> {
        if inner.channels.contains_key(&channel_id) {
            return Err(ChannelError::ledger(format!(
                "channel {} already open",
                channel_id
            )));
        }

        for (party, deposit) in [(player, player_deposit), (bankroller, bankroller_deposit)] {
            let allowance = inner.allowances.get(&party).copied().unwrap_or(0);
            if allowance < deposit {
                return Err(ChannelError::ledger(format!(
                    "allowance of {} below deposit {}",
                    party, deposit
                )));
            }
            let balance = inner.accounts.get(&party).copied().unwrap_or(0);
            if balance < deposit {
                return Err(ChannelError::InsufficientBalance {
                    need: deposit,
                    available: balance,
                });
            }
        }

        for (party, deposit) in [(player, player_deposit), (bankroller, bankroller_deposit)] {
            if let Some(balance) = inner.accounts.get_mut(&party) {
                *balance -= deposit;
            }
            if let Some(allowance) = inner.allowances.get_mut(&party) {
                *allowance -= deposit;
            }
        }

        inner.channels.insert(
            channel_id,
            OnChainChannel {
                state: OnChainState::Open,
                player,
                bankroller,
                player_balance: player_deposit,
                bankroller_balance: bankroller_deposit,
            },
        );
        Ok(())
    }

    fn close_by_consent(
        inner: &mut Inner,
        caller: Address,
        state: StateData,
        consent: Signature,
    ) -> Result<()> {
        let channel = inner
            .channels
            .get(&state.id)
            .ok_or_else(|| ChannelError::ledger("channel not found"))?
            .clone();

        if channel.state != OnChainState::Open {
            return Err(ChannelError::ledger("channel not open"));
        }

        let counterparty = if caller == channel.player {
            channel.bankroller
        } else if caller == channel.bankroller {
            channel.player
        } else {
            return Err(ChannelError::ledger("caller is not a channel party"));
        };

        if recover(&state.close_hash(), &consent)? != counterparty {
            return Err(ChannelError::InvalidSignature);
        }

        let locked = channel.player_balance + channel.bankroller_balance;
        let settled = state
            .player_balance
            .checked_add(state.bankroller_balance)
            .ok_or_else(|| ChannelError::ledger("settlement overflow"))?;
        if settled != locked {
            return Err(ChannelError::ledger(format!(
                "settlement {} does not conserve locked {}",
                settled, locked
            )));
        }

        Self::settle(inner, &channel, state.player_balance, state.bankroller_balance);
        if let Some(record) = inner.channels.get_mut(&state.id) {
            record.state = OnChainState::Closed;
            record.player_balance = state.player_balance;
            record.bankroller_balance = state.bankroller_balance;
        }
        Ok(())
    }

    fn open_dispute(inner: &mut Inner, claim: DisputeClaim) -> Result<()> {
        let channel = inner
            .channels
            .get(&claim.channel_id)
            .ok_or_else(|| ChannelError::ledger("channel not found"))?
            .clone();

        if channel.state != OnChainState::Open {
            return Err(ChannelError::ledger("channel not open"));
        }

        let data = &claim.snapshot.data;
        if data.id != claim.channel_id {
            return Err(ChannelError::ledger("snapshot is for another channel"));
        }

        // Session 0 is the opening state itself; anything later must carry
        // both parties' signatures.
        if data.session == 0 {
            if data.player_balance != channel.player_balance
                || data.bankroller_balance != channel.bankroller_balance
            {
                return Err(ChannelError::ledger("zero state does not match deposits"));
            }
        } else if !claim.snapshot.is_signed_by(&channel.player)
            || !claim.snapshot.is_signed_by(&channel.bankroller)
        {
            return Err(ChannelError::InvalidSignature);
        }

        let locked = channel.player_balance + channel.bankroller_balance;
        if data.player_balance + data.bankroller_balance != locked {
            return Err(ChannelError::ledger("dispute snapshot does not conserve funds"));
        }

        let (player_balance, bankroller_balance) = (data.player_balance, data.bankroller_balance);
        Self::settle(inner, &channel, player_balance, bankroller_balance);
        if let Some(record) = inner.channels.get_mut(&claim.channel_id) {
            record.state = OnChainState::Disputed;
            record.player_balance = player_balance;
            record.bankroller_balance = bankroller_balance;
        }

        inner.disputes.push(claim);
        Ok(())
    }

    fn settle(
        inner: &mut Inner,
        channel: &OnChainChannel,
        player_balance: u64,
        bankroller_balance: u64,
    ) {
        *inner.accounts.entry(channel.player).or_insert(0) += player_balance;
        *inner.accounts.entry(channel.bankroller).or_insert(0) += bankroller_balance;
    }
}

impl Ledger for InMemoryLedger {
    async fn balance(&self, address: Address) -> Result<u64> {
        Ok(self.inner.lock().accounts.get(&address).copied().unwrap_or(0))
    }

    async fn allowance(&self, owner: Address) -> Result<u64> {
        Ok(self.inner.lock().allowances.get(&owner).copied().unwrap_or(0))
    }

    async fn approve(&self, owner: Address, amount: u64) -> Result<()> {
        self.inner.lock().allowances.insert(owner, amount);
        Ok(())
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.inner.lock().block)
    }

    async fn channel_info(&self, id: ChannelId) -> Result<Option<OnChainChannel>> {
        Ok(self.inner.lock().channels.get(&id).cloned())
    }

    async fn submit(&self, caller: Address, call: ContractCall) -> Result<TxReceipt> {
        let mut inner = self.inner.lock();
        inner.block += 1;

        let result = match call {
            ContractCall::OpenChannel {
                channel_id,
                player,
                bankroller,
                player_deposit,
                bankroller_deposit,
                ..
            } => Self::open_channel(
                &mut inner,
                channel_id,
                player,
                bankroller,
                player_deposit,
                bankroller_deposit,
            ),
            ContractCall::CloseByConsent { state, consent } => {
                Self::close_by_consent(&mut inner, caller, state, consent)
            }
            ContractCall::OpenDispute { claim } => Self::open_dispute(&mut inner, claim),
        };

        result.map(|()| TxReceipt {
            block: inner.block,
            status: TxStatus::Confirmed,
        })
    }
}
