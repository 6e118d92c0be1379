//! Bankroller side of the round protocol.
//!
//! One instance per channel. The validation order in `call_play` is the
//! protocol's safety core: the commitment signature is produced only after
//! every check on the player's request has passed, because the randoms are
//! a pure function of that signature and the casino cannot take it back.

use crate::error::{ProtocolError, Result};
use crate::events::{EventSink, ProtocolEvent};
use crate::messages::{
    ChannelCheck, CloseConsent, OpenReply, OpenRequest, PlayRequest, PlayReply, SignedResponse,
    Stage, PROTOCOL_VERSION,
};
use paychan_core::ledger::recover;
use paychan_core::{
    bets_total, rnd, Address, ChannelError, ChannelId, ChannelRules, CommitmentKey, ContractCall,
    DisputeClaim, DisputeReason, GameLogic, Ledger, OnChainState, PayChannel, Signature, Signer,
    StateSnapshot, TxStatus,
};

struct CachedRound {
    session: u64,
    round_hash: [u8; 32],
    reply: PlayReply,
}

pub struct DealerInstance<L, G> {
    signer: Signer,
    ledger: L,
    game: G,
    rules: ChannelRules,
    commitment: CommitmentKey,
    events: EventSink,
    stage: Stage,
    channel: Option<PayChannel>,
    channel_id: Option<ChannelId>,
    player_address: Option<Address>,
    pending_deposits: Option<(u64, u64)>,
    last_round: Option<CachedRound>,
}

impl<L: Ledger, G: GameLogic> DealerInstance<L, G> {
    pub fn new(signer: Signer, ledger: L, game: G, rules: ChannelRules) -> Result<Self> {
        let commitment = CommitmentKey::generate().map_err(ProtocolError::Channel)?;
        Ok(Self::with_commitment(signer, ledger, game, rules, commitment))
    }

    pub fn with_commitment(
        signer: Signer,
        ledger: L,
        game: G,
        rules: ChannelRules,
        commitment: CommitmentKey,
    ) -> Self {
        tracing::debug!("Dealer instance init for {}", signer.address());
        Self {
            signer,
            ledger,
            game,
            rules,
            commitment,
            events: EventSink::disabled(),
            stage: Stage::Idle,
            channel: None,
            channel_id: None,
            player_address: None,
            pending_deposits: None,
            last_round: None,
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn channel(&self) -> Option<&PayChannel> {
        self.channel.as_ref()
    }

    fn expect_stage(&self, expected: Stage) -> Result<()> {
        if self.stage != expected {
            return Err(ProtocolError::InvalidStage {
                expected,
                current: self.stage,
            });
        }
        Ok(())
    }

    fn check_version(version: u32) -> Result<()> {
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion { got: version });
        }
        Ok(())
    }

    /// Validate the player's open request and answer with signed terms:
    /// both deposits, the opening block and the commitment public key.
    pub async fn get_open_channel_data(
        &mut self,
        request: OpenRequest,
        signature: Signature,
    ) -> Result<SignedResponse<OpenReply>> {
        self.expect_stage(Stage::Idle)?;
        Self::check_version(request.version)?;

        let signer_address = recover(&request.hash(), &signature)?;
        if signer_address != request.player_address {
            return Err(ChannelError::InvalidSignature.into());
        }

        let bankroller_deposit = request
            .player_deposit
            .checked_mul(self.rules.deposit_multiplier)
            .ok_or_else(|| ProtocolError::invalid_request("deposit out of range"))?;

        let own = self.signer.address();
        let balance = self.ledger.balance(own).await?;
        let need = bankroller_deposit.saturating_add(self.rules.min_reserve);
        if balance < need {
            return Err(ChannelError::InsufficientBalance {
                need,
                available: balance,
            }
            .into());
        }

        self.ledger.approve(own, bankroller_deposit).await?;
        self.events.emit(ProtocolEvent::DepositApproved {
            address: own,
            amount: bankroller_deposit,
        });

        let opening_block = self.ledger.block_number().await?;
        let reply = OpenReply {
            channel_id: request.channel_id,
            player_address: request.player_address,
            bankroller_address: own,
            player_deposit: request.player_deposit,
            bankroller_deposit,
            opening_block,
            commitment: self.commitment.public().clone(),
        };
        let reply_signature = self.signer.sign(&reply.hash());

        self.channel = Some(PayChannel::new(
            self.signer.clone(),
            request.player_address,
        ));
        self.channel_id = Some(request.channel_id);
        self.player_address = Some(request.player_address);
        self.pending_deposits = Some((request.player_deposit, bankroller_deposit));
        self.stage = Stage::OpenRequested;

        tracing::info!(
            "Open terms for channel {}: deposits {}/{}",
            request.channel_id,
            request.player_deposit,
            bankroller_deposit
        );
        Ok(SignedResponse {
            response: reply,
            signature: reply_signature,
        })
    }

    /// Verify the on-chain record the player claims to have created, then
    /// bring up the local state machine at session 0.
    pub async fn check_open_channel(&mut self) -> Result<ChannelCheck> {
        self.expect_stage(Stage::OpenRequested)?;

        let id = self
            .channel_id
            .ok_or_else(|| ChannelError::internal("no pending channel id"))?;
        let player = self
            .player_address
            .ok_or_else(|| ChannelError::internal("no pending player address"))?;
        let (player_deposit, bankroller_deposit) = self
            .pending_deposits
            .ok_or_else(|| ChannelError::internal("no pending deposits"))?;

        let info = self
            .ledger
            .channel_info(id)
            .await?
            .ok_or(ProtocolError::ChannelNotFound)?;

        if info.state != OnChainState::Open
            || info.player != player
            || info.bankroller != self.signer.address()
            || info.player_balance != player_deposit
            || info.bankroller_balance != bankroller_deposit
        {
            return Err(ProtocolError::invalid_response(
                "on-chain channel does not match the agreed terms",
            ));
        }

        let channel = self
            .channel
            .as_mut()
            .ok_or(ChannelError::NotInitialized)?;
        channel.initialize(id, player_deposit, bankroller_deposit)?;
        self.stage = Stage::Open;

        self.events.emit(ProtocolEvent::ChannelOpened {
            channel_id: id,
            player_deposit,
            bankroller_deposit,
        });
        Ok(ChannelCheck {
            channel_id: id,
            state: info.state,
            player_balance: info.player_balance,
            bankroller_balance: info.bankroller_balance,
        })
    }

    /// Play one round. Everything about the request is validated before the
    /// commitment signature exists; after that the round always completes
    /// with a state snapshot, and a retried identical request gets the
    /// memoized reply instead of a second signature.
    pub async fn call_play(&mut self, request: PlayRequest) -> Result<PlayReply> {
        self.expect_stage(Stage::Open)?;
        Self::check_version(request.version)?;

        let player = self
            .player_address
            .ok_or(ChannelError::NotInitialized)?;
        let id = self.channel_id.ok_or(ChannelError::NotInitialized)?;
        if request.channel_id != id {
            return Err(ProtocolError::invalid_request("unknown channel id"));
        }

        let round_hash = request.round_hash();
        if let Some(cached) = &self.last_round {
            if cached.session == request.session && cached.round_hash == round_hash {
                tracing::debug!("Re-serving memoized reply for session {}", cached.session);
                return Ok(cached.reply.clone());
            }
        }

        let channel = self.channel.as_mut().ok_or(ChannelError::NotInitialized)?;

        let current_session = channel.session();
        if request.session != current_session {
            return Err(ChannelError::SessionMismatch {
                expected: current_session,
                got: request.session,
            }
            .into());
        }

        if channel.has_unconfirmed(&player) {
            tracing::warn!("Player {} has not confirmed the previous state", player);
            return Err(ChannelError::UnconfirmedState.into());
        }

        let bet = bets_total(&request.bets)?;
        let available = channel.player_balance();
        if bet > available {
            return Err(ChannelError::InsufficientBalance {
                need: bet,
                available,
            }
            .into());
        }

        if recover(&round_hash, &request.signature)? != player {
            return Err(ChannelError::InvalidSignature.into());
        }

        // All checks passed: commit to the randomness.
        let commitment_signature = self.commitment.sign(&round_hash)?;
        let randoms = rnd::generate(&commitment_signature, &request.game_data.random_ranges)?;
        let result = self
            .game
            .play(&request.bets, &request.game_data, &randoms)?;

        if result.profit < 0 && result.profit.unsigned_abs() > bet {
            return Err(ChannelError::internal("game logic lost more than staked").into());
        }

        let snapshot = channel.apply_round(bet, result.profit)?;
        let session = snapshot.data.session;

        let reply = PlayReply {
            result,
            randoms,
            commitment_signature,
            snapshot,
        };
        self.last_round = Some(CachedRound {
            session: request.session,
            round_hash,
            reply: reply.clone(),
        });

        self.events.emit(ProtocolEvent::RoundPlayed {
            channel_id: id,
            session,
            bet,
            profit: reply.result.profit,
        });
        tracing::info!(
            "Round {} played: bet={} profit={}",
            session,
            bet,
            reply.result.profit
        );
        Ok(reply)
    }

    /// Accept the player's signature over the current state.
    pub fn confirm_state(&mut self, snapshot: StateSnapshot) -> Result<()> {
        let player = self
            .player_address
            .ok_or(ChannelError::NotInitialized)?;
        let channel = self.channel.as_mut().ok_or(ChannelError::NotInitialized)?;

        channel.confirm(&snapshot, &player)?;

        if let Some(id) = self.channel_id {
            self.events.emit(ProtocolEvent::StateConfirmed {
                channel_id: id,
                session: snapshot.data.session,
                by: player,
            });
        }
        Ok(())
    }

    /// Countersign a cooperative close over the latest confirmed state.
    pub fn consent_close_channel(&mut self, signature: Signature) -> Result<CloseConsent> {
        self.expect_stage(Stage::Open)?;

        let player = self
            .player_address
            .ok_or(ChannelError::NotInitialized)?;
        let channel = self.channel.as_ref().ok_or(ChannelError::NotInitialized)?;

        // The zero state is settleable as-is; every later state needs both
        // signatures before it can back a close.
        if channel.session() > 0 && !channel.is_confirmed() {
            return Err(ChannelError::UnconfirmedState.into());
        }
        let current = channel
            .current_snapshot()
            .ok_or(ChannelError::NotInitialized)?;

        let close_hash = current.data.close_hash();
        if recover(&close_hash, &signature)? != player {
            return Err(ChannelError::InvalidSignature.into());
        }

        let consent_signature = self.signer.sign(&close_hash);
        self.stage = Stage::ClosePending;

        if let Some(id) = self.channel_id {
            self.events
                .emit(ProtocolEvent::CloseConsented { channel_id: id });
        }
        tracing::info!("Consented to close at session {}", current.data.session);
        Ok(CloseConsent {
            consent_signature,
            bankroller_address: self.signer.address(),
        })
    }

    /// Verify the close settled on-chain and tear the channel down.
    pub async fn check_close_channel(&mut self) -> Result<ChannelCheck> {
        self.expect_stage(Stage::ClosePending)?;

        let id = self
            .channel_id
            .ok_or_else(|| ChannelError::internal("no channel id"))?;
        let info = self
            .ledger
            .channel_info(id)
            .await?
            .ok_or(ProtocolError::ChannelNotFound)?;
        if info.state != OnChainState::Closed {
            return Err(ProtocolError::ChannelNotFound);
        }

        if let Some(channel) = self.channel.as_mut() {
            channel.mark_closed();
            channel.reset();
        }
        self.stage = Stage::Closed;

        self.events.emit(ProtocolEvent::ChannelClosed {
            channel_id: id,
            player_balance: info.player_balance,
            bankroller_balance: info.bankroller_balance,
        });
        Ok(ChannelCheck {
            channel_id: id,
            state: info.state,
            player_balance: info.player_balance,
            bankroller_balance: info.bankroller_balance,
        })
    }

    /// Escalate to the ledger with the newest mutually signed snapshot,
    /// typically because the player stopped confirming.
    pub async fn open_dispute(&mut self, reason: DisputeReason) -> Result<()> {
        let id = self.channel_id.ok_or(ChannelError::NotInitialized)?;
        let channel = self.channel.as_mut().ok_or(ChannelError::NotInitialized)?;
        let snapshot = channel
            .last_confirmed()
            .cloned()
            .ok_or_else(|| ChannelError::internal("no snapshot to dispute with"))?;

        let claim = DisputeClaim {
            channel_id: id,
            reason,
            snapshot,
            evidence: None,
        };
        let receipt = self
            .ledger
            .submit(self.signer.address(), ContractCall::OpenDispute { claim })
            .await?;
        if receipt.status != TxStatus::Confirmed {
            return Err(ChannelError::ledger("dispute transaction failed").into());
        }

        channel.mark_disputed();
        self.stage = Stage::Disputed;
        self.events
            .emit(ProtocolEvent::DisputeOpened {
                channel_id: id,
                reason,
            });
        tracing::warn!("Dispute opened on channel {}: {}", id, reason);
        Ok(())
    }
}
