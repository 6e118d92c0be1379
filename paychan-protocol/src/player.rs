//! Player side of the round protocol.
//!
//! The player never trusts a dealer number it cannot reproduce: every round
//! re-derives the randoms from the commitment signature, re-runs the game
//! logic locally and compares profits. Agreement confirms the state;
//! anything else goes to the ledger as a dispute.

use crate::error::{ProtocolError, Result};
use crate::events::{EventSink, ProtocolEvent};
use crate::messages::{
    round_hash, ChannelCheck, OpenRequest, PlayRequest, Stage, PROTOCOL_VERSION,
};
use crate::transport::DealerApi;
use paychan_core::ledger::recover;
use paychan_core::{
    bets_total, rnd, Address, ChannelError, ChannelId, ChannelRules, CommitmentPublic,
    ContractCall, DisputeClaim, DisputeReason, GameData, GameLogic, Ledger, OnChainState,
    PayChannel, RoundEvidence, Signer, StateData, StateSnapshot, TxStatus,
};
use rand::RngCore;

/// What one completed round leaves the caller with.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub session: u64,
    pub profit: i64,
    pub randoms: Vec<u64>,
    pub data: Option<serde_json::Value>,
}

/// Final figures of a settled channel.
#[derive(Debug, Clone)]
pub struct CloseSummary {
    pub channel_id: ChannelId,
    pub player_balance: u64,
    pub bankroller_balance: u64,
    pub total_bet: u64,
    pub session: u64,
}

pub struct PlayerInstance<L, D, G> {
    signer: Signer,
    ledger: L,
    dealer: D,
    game: G,
    rules: ChannelRules,
    events: EventSink,
    stage: Stage,
    channel: Option<PayChannel>,
    channel_id: Option<ChannelId>,
    bankroller_address: Option<Address>,
    commitment: Option<CommitmentPublic>,
    last_round: Option<RoundEvidence>,
}

impl<L: Ledger, D: DealerApi, G: GameLogic> PlayerInstance<L, D, G> {
    pub fn new(signer: Signer, ledger: L, dealer: D, game: G, rules: ChannelRules) -> Self {
        tracing::debug!("Player instance init for {}", signer.address());
        Self {
            signer,
            ledger,
            dealer,
            game,
            rules,
            events: EventSink::disabled(),
            stage: Stage::Idle,
            channel: None,
            channel_id: None,
            bankroller_address: None,
            commitment: None,
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

    /// Open a channel: check own funds, approve the deposit, negotiate
    /// terms with the dealer, verify them, then submit the open
    /// transaction. Nothing reaches the ledger before every dealer claim
    /// checked out.
    pub async fn connect(
        &mut self,
        player_deposit: u64,
        game_payload: Vec<u8>,
    ) -> Result<ChannelCheck> {
        self.expect_stage(Stage::Idle)?;

        let result = self.connect_inner(player_deposit, game_payload).await;
        if result.is_err() && self.stage != Stage::Open {
            // A failed negotiation leaves nothing behind.
            self.stage = Stage::Idle;
            self.channel = None;
            self.channel_id = None;
            self.bankroller_address = None;
            self.commitment = None;
        }
        result
    }

    async fn connect_inner(
        &mut self,
        player_deposit: u64,
        game_payload: Vec<u8>,
    ) -> Result<ChannelCheck> {
        let own = self.signer.address();

        let balance = self.ledger.balance(own).await?;
        let need = player_deposit.saturating_add(self.rules.min_reserve);
        if balance < need {
            return Err(ChannelError::InsufficientBalance {
                need,
                available: balance,
            }
            .into());
        }

        self.ledger.approve(own, player_deposit).await?;
        self.events.emit(ProtocolEvent::DepositApproved {
            address: own,
            amount: player_deposit,
        });

        let channel_id = ChannelId::random();
        let request = OpenRequest {
            version: PROTOCOL_VERSION,
            channel_id,
            player_address: own,
            player_deposit,
            game_payload,
        };
        let signature = self.signer.sign(&request.hash());

        tracing::info!(
            "Opening channel {} with deposit {}",
            channel_id,
            player_deposit
        );
        let signed = self
            .dealer
            .get_open_channel_data(request, signature)
            .await?;
        self.stage = Stage::OpenRequested;
        let reply = signed.response;

        if reply.channel_id != channel_id
            || reply.player_address != own
            || reply.player_deposit != player_deposit
        {
            return Err(ProtocolError::invalid_response(
                "open reply does not echo the request",
            ));
        }

        // The deposit rule is exact: a deviating bankroller deposit in
        // either direction is a fairness problem, not a negotiation.
        let required = player_deposit
            .checked_mul(self.rules.deposit_multiplier)
            .ok_or_else(|| ProtocolError::invalid_request("deposit out of range"))?;
        if reply.bankroller_deposit != required {
            tracing::warn!(
                "Bankroller deposit {} does not match required {}",
                reply.bankroller_deposit,
                required
            );
            return Err(ProtocolError::DepositMismatch {
                required,
                offered: reply.bankroller_deposit,
            });
        }

        let allowance = self.ledger.allowance(reply.bankroller_address).await?;
        if allowance < reply.bankroller_deposit {
            return Err(ProtocolError::CounterpartyUnderfunded {
                need: reply.bankroller_deposit,
                available: allowance,
            });
        }
        let bankroller_balance = self.ledger.balance(reply.bankroller_address).await?;
        if bankroller_balance < reply.bankroller_deposit {
            return Err(ProtocolError::CounterpartyUnderfunded {
                need: reply.bankroller_deposit,
                available: bankroller_balance,
            });
        }
        self.events.emit(ProtocolEvent::AllowanceChecked {
            address: reply.bankroller_address,
            amount: reply.bankroller_deposit,
        });

        if recover(&reply.hash(), &signed.signature)? != reply.bankroller_address {
            return Err(ChannelError::InvalidSignature.into());
        }

        let receipt = self
            .ledger
            .submit(
                own,
                ContractCall::OpenChannel {
                    channel_id,
                    player: own,
                    bankroller: reply.bankroller_address,
                    player_deposit,
                    bankroller_deposit: reply.bankroller_deposit,
                    opening_block: reply.opening_block,
                    commitment: reply.commitment.clone(),
                    signature: signed.signature,
                },
            )
            .await?;
        if receipt.status != TxStatus::Confirmed {
            return Err(ChannelError::ledger("open transaction failed").into());
        }

        let check = self.dealer.check_open_channel().await?;
        if check.state != OnChainState::Open || check.channel_id != channel_id {
            return Err(ProtocolError::invalid_response(
                "dealer does not see the opened channel",
            ));
        }

        let mut channel = PayChannel::new(self.signer.clone(), reply.bankroller_address);
        channel.initialize(channel_id, player_deposit, reply.bankroller_deposit)?;

        self.channel = Some(channel);
        self.channel_id = Some(channel_id);
        self.bankroller_address = Some(reply.bankroller_address);
        self.commitment = Some(reply.commitment);
        self.stage = Stage::Open;

        self.events.emit(ProtocolEvent::ChannelOpened {
            channel_id,
            player_deposit,
            bankroller_deposit: reply.bankroller_deposit,
        });
        tracing::info!("Channel {} open", channel_id);
        Ok(check)
    }

    /// Play one round: send the signed bet, audit everything the dealer
    /// returns, then cross-confirm the new state.
    pub async fn play(
        &mut self,
        bets: Vec<u64>,
        random_ranges: Vec<(u64, u64)>,
        custom: Vec<u8>,
    ) -> Result<RoundOutcome> {
        self.expect_stage(Stage::Open)?;
        self.stage = Stage::RoundInFlight;

        let result = self.play_inner(bets, random_ranges, custom).await;
        if self.stage == Stage::RoundInFlight {
            // Dispute handling moves the stage itself; plain failures
            // return the instance to an idle-open state.
            self.stage = Stage::Open;
        }
        result
    }

    async fn play_inner(
        &mut self,
        bets: Vec<u64>,
        random_ranges: Vec<(u64, u64)>,
        custom: Vec<u8>,
    ) -> Result<RoundOutcome> {
        let id = self.channel_id.ok_or(ChannelError::NotInitialized)?;

        let (session, available) = {
            let channel = self.channel.as_ref().ok_or(ChannelError::NotInitialized)?;
            (channel.session(), channel.player_balance())
        };

        // Reject an overdrawing bet before anything leaves this instance.
        let bet = bets_total(&bets)?;
        if bet > available {
            return Err(ChannelError::InsufficientBalance {
                need: bet,
                available,
            }
            .into());
        }

        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let game_data = GameData {
            seed,
            random_ranges,
            custom,
        };

        let hash = round_hash(&id, session, &bets, &game_data);
        let signature = self.signer.sign(&hash);
        let request = PlayRequest {
            version: PROTOCOL_VERSION,
            channel_id: id,
            session,
            bets: bets.clone(),
            game_data: game_data.clone(),
            signature,
        };

        // Retained for the dispute path: proof of what this round asked.
        self.last_round = Some(RoundEvidence {
            session,
            bets: bets.clone(),
            game_data: game_data.clone(),
            signature,
        });

        let mut attempts = 0;
        let reply = loop {
            attempts += 1;
            match tokio::time::timeout(
                self.rules.round_timeout,
                self.dealer.call_play(request.clone()),
            )
            .await
            {
                Ok(result) => break result?,
                Err(_) if attempts < self.rules.max_play_attempts => {
                    tracing::warn!("Round {} attempt {} timed out, retrying", session, attempts);
                }
                Err(_) => {
                    tracing::error!("Round {} abandoned after {} attempts", session, attempts);
                    return Err(ProtocolError::Timeout { attempts });
                }
            }
        };

        // Audit the dealer's numbers before touching local state.
        let commitment = self
            .commitment
            .as_ref()
            .ok_or(ChannelError::NotInitialized)?;
        if !commitment.verify(&hash, &reply.commitment_signature) {
            return self.fail_round(DisputeReason::InvalidCommitment).await;
        }

        let randoms = rnd::generate(&reply.commitment_signature, &game_data.random_ranges)?;
        if randoms != reply.randoms {
            return self.fail_round(DisputeReason::RandomsMismatch).await;
        }

        let local = self.game.play(&bets, &game_data, &randoms)?;
        if local.profit != reply.result.profit {
            tracing::error!(
                "Profit mismatch: local {} vs dealer {}",
                local.profit,
                reply.result.profit
            );
            return self.fail_round(DisputeReason::ProfitMismatch).await;
        }

        let own_snapshot = {
            let channel = self.channel.as_mut().ok_or(ChannelError::NotInitialized)?;
            channel.apply_round(bet, local.profit)?
        };

        if self.confirm_state(reply.snapshot).is_err() {
            return self.fail_round(DisputeReason::ConfirmationFailed).await;
        }

        self.dealer.confirm_state(own_snapshot).await?;
        self.stage = Stage::Open;

        let session = session + 1;
        self.events.emit(ProtocolEvent::RoundPlayed {
            channel_id: id,
            session,
            bet,
            profit: local.profit,
        });
        tracing::info!(
            "Round {} complete: bet={} profit={} randoms={:?}",
            session,
            bet,
            local.profit,
            randoms
        );
        Ok(RoundOutcome {
            session,
            profit: local.profit,
            randoms,
            data: local.data,
        })
    }

    /// Accept the dealer's signature over the current state. Also callable
    /// by the dealer through the transport.
    pub fn confirm_state(&mut self, snapshot: StateSnapshot) -> Result<()> {
        let bankroller = self
            .bankroller_address
            .ok_or(ChannelError::NotInitialized)?;
        let channel = self.channel.as_mut().ok_or(ChannelError::NotInitialized)?;

        channel.confirm(&snapshot, &bankroller)?;

        if let Some(id) = self.channel_id {
            self.events.emit(ProtocolEvent::StateConfirmed {
                channel_id: id,
                session: snapshot.data.session,
                by: bankroller,
            });
        }
        Ok(())
    }

    /// Cooperative close over the latest mutually confirmed snapshot.
    pub async fn close(&mut self) -> Result<CloseSummary> {
        self.expect_stage(Stage::Open)?;

        let result = self.close_inner().await;
        if result.is_err() && self.stage == Stage::ClosePending {
            self.stage = Stage::Open;
        }
        result
    }

    async fn close_inner(&mut self) -> Result<CloseSummary> {
        let id = self.channel_id.ok_or(ChannelError::NotInitialized)?;
        let bankroller = self
            .bankroller_address
            .ok_or(ChannelError::NotInitialized)?;

        let state: StateData = {
            let channel = self.channel.as_ref().ok_or(ChannelError::NotInitialized)?;
            // Closing on the untouched zero state is fine; any played round
            // must be mutually confirmed first.
            if channel.session() > 0 && !channel.is_confirmed() {
                return Err(ChannelError::UnconfirmedState.into());
            }
            channel
                .current_snapshot()
                .ok_or(ChannelError::NotInitialized)?
                .data
                .clone()
        };

        let close_hash = state.close_hash();
        let signature = self.signer.sign(&close_hash);
        self.stage = Stage::ClosePending;

        let consent = self.dealer.consent_close_channel(signature).await?;

        if consent.bankroller_address != bankroller
            || recover(&close_hash, &consent.consent_signature)? != bankroller
        {
            return Err(ChannelError::InvalidSignature.into());
        }
        self.events.emit(ProtocolEvent::CloseConsented { channel_id: id });

        let receipt = self
            .ledger
            .submit(
                self.signer.address(),
                ContractCall::CloseByConsent {
                    state: state.clone(),
                    consent: consent.consent_signature,
                },
            )
            .await?;
        if receipt.status != TxStatus::Confirmed {
            return Err(ChannelError::ledger("close transaction failed").into());
        }

        let check = self.dealer.check_close_channel().await?;
        if check.state != OnChainState::Closed {
            return Err(ProtocolError::invalid_response(
                "dealer does not see the closed channel",
            ));
        }

        if let Some(channel) = self.channel.as_mut() {
            channel.mark_closed();
            channel.reset();
        }
        self.stage = Stage::Closed;

        self.events.emit(ProtocolEvent::ChannelClosed {
            channel_id: id,
            player_balance: state.player_balance,
            bankroller_balance: state.bankroller_balance,
        });
        tracing::info!("Channel {} closed at session {}", id, state.session);
        Ok(CloseSummary {
            channel_id: id,
            player_balance: state.player_balance,
            bankroller_balance: state.bankroller_balance,
            total_bet: state.total_bet,
            session: state.session,
        })
    }

    /// Escalate to on-chain settlement with the newest mutually signed
    /// snapshot and the retained round evidence.
    pub async fn open_dispute(&mut self, reason: DisputeReason) -> Result<()> {
        let id = self.channel_id.ok_or(ChannelError::NotInitialized)?;
        let snapshot = {
            let channel = self.channel.as_ref().ok_or(ChannelError::NotInitialized)?;
            channel
                .last_confirmed()
                .cloned()
                .ok_or_else(|| ChannelError::internal("no snapshot to dispute with"))?
        };

        let claim = DisputeClaim {
            channel_id: id,
            reason,
            snapshot,
            evidence: self.last_round.clone(),
        };
        let receipt = self
            .ledger
            .submit(self.signer.address(), ContractCall::OpenDispute { claim })
            .await?;
        if receipt.status != TxStatus::Confirmed {
            return Err(ChannelError::ledger("dispute transaction failed").into());
        }

        if let Some(channel) = self.channel.as_mut() {
            channel.mark_disputed();
        }
        self.stage = Stage::Disputed;
        self.events
            .emit(ProtocolEvent::DisputeOpened {
                channel_id: id,
                reason,
            });
        tracing::warn!("Dispute opened on channel {}: {}", id, reason);
        Ok(())
    }

    /// Fairness violations do not get retried past: record, dispute, fail.
    async fn fail_round<T>(&mut self, reason: DisputeReason) -> Result<T> {
        tracing::error!("Fairness violation: {}", reason);
        if let Err(e) = self.open_dispute(reason).await {
            tracing::error!("Dispute submission failed: {}", e);
        }
        Err(ProtocolError::Fairness(reason))
    }
}
