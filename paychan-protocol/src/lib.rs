//! paychan protocol - dealer and player round instances
//!
//! Sequences open, play, confirm and close/dispute between two channel
//! parties. The dealer exposes its operations through the transport
//! boundary; the player drives the exchange and audits every number the
//! dealer returns before confirming a state.

pub mod dealer;
pub mod error;
pub mod events;
pub mod messages;
pub mod player;
pub mod transport;

pub use dealer::DealerInstance;
pub use error::{ProtocolError, Result};
pub use events::{EventSink, ProtocolEvent};
pub use messages::{
    round_hash, ChannelCheck, CloseConsent, OpenReply, OpenRequest, PlayReply, PlayRequest,
    SignedResponse, Stage, PROTOCOL_VERSION,
};
pub use player::{CloseSummary, PlayerInstance, RoundOutcome};
pub use transport::{DealerApi, LocalDealerHandle, LocalRoom};

#[cfg(test)]
mod tests {
    use super::*;
    use paychan_core::{
        bets_total, ChannelError, ChannelId, ChannelRules, CommitmentKey, DisputeReason, GameData,
        GameLogic, InMemoryLedger, Ledger, OnChainState, PlayResult, Signer,
    };
    use std::time::Duration;

    const ROOM: &str = "table-1";
    const PLAYER_DEPOSIT: u64 = 1_000;

    /// Test games: a fair coin and two rigged payout tables.
    #[derive(Clone, Copy)]
    enum TestGame {
        /// One range `(0, 1)` per bet; 1 wins the bet, 0 loses it.
        Coin,
        /// Ignores the randoms: the player always wins the bet sum.
        AlwaysWin,
        /// Ignores the randoms: the player always loses the bet sum.
        AlwaysLose,
    }

    impl GameLogic for TestGame {
        fn play(
            &self,
            bets: &[u64],
            _game_data: &GameData,
            randoms: &[u64],
        ) -> paychan_core::Result<PlayResult> {
            let total = bets_total(bets)? as i64;
            let profit = match self {
                TestGame::Coin => bets
                    .iter()
                    .zip(randoms)
                    .map(|(&bet, &r)| if r == 1 { bet as i64 } else { -(bet as i64) })
                    .sum(),
                TestGame::AlwaysWin => total,
                TestGame::AlwaysLose => -total,
            };
            Ok(PlayResult { profit, data: None })
        }
    }

    type TestDealerHandle = LocalDealerHandle<InMemoryLedger, TestGame>;
    type TestPlayer = PlayerInstance<InMemoryLedger, TestDealerHandle, TestGame>;

    struct Harness {
        ledger: InMemoryLedger,
        player: TestPlayer,
        player_signer: Signer,
        handle: TestDealerHandle,
    }

    fn rules(multiplier: u64) -> ChannelRules {
        ChannelRules {
            deposit_multiplier: multiplier,
            min_reserve: 100,
            round_timeout: Duration::from_secs(5),
            max_play_attempts: 2,
        }
    }

    async fn setup_with(
        player_game: TestGame,
        dealer_game: TestGame,
        player_rules: ChannelRules,
        dealer_rules: ChannelRules,
    ) -> Harness {
        let ledger = InMemoryLedger::new();
        let player_signer = Signer::random();
        let dealer_signer = Signer::random();

        ledger.fund(player_signer.address(), PLAYER_DEPOSIT + 100);
        ledger.fund(
            dealer_signer.address(),
            PLAYER_DEPOSIT * dealer_rules.deposit_multiplier + 100,
        );

        let commitment = CommitmentKey::generate_with_size(512).unwrap();
        let dealer = DealerInstance::with_commitment(
            dealer_signer,
            ledger.clone(),
            dealer_game,
            dealer_rules,
            commitment,
        );

        let room = LocalRoom::new();
        let handle = room.expose_service(ROOM, dealer);
        let player = PlayerInstance::new(
            player_signer.clone(),
            ledger.clone(),
            room.remote_interface(ROOM).unwrap(),
            player_game,
            player_rules,
        );

        Harness {
            ledger,
            player,
            player_signer,
            handle,
        }
    }

    async fn setup(player_game: TestGame, dealer_game: TestGame) -> Harness {
        setup_with(player_game, dealer_game, rules(2), rules(2)).await
    }

    fn craft_play_request(
        signer: &Signer,
        channel_id: ChannelId,
        session: u64,
        bets: Vec<u64>,
        seed_byte: u8,
    ) -> PlayRequest {
        let game_data = GameData {
            seed: [seed_byte; 32],
            random_ranges: vec![(0, 1); bets.len()],
            custom: Vec::new(),
        };
        let hash = round_hash(&channel_id, session, &bets, &game_data);
        let signature = signer.sign(&hash);
        PlayRequest {
            version: PROTOCOL_VERSION,
            channel_id,
            session,
            bets,
            game_data,
            signature,
        }
    }

    #[tokio::test]
    async fn test_open_play_close_happy_path() {
        let harness = setup(TestGame::Coin, TestGame::Coin).await;
        let (sink, mut events) = EventSink::channel();
        let mut player = harness.player.with_events(sink);

        let check = player.connect(PLAYER_DEPOSIT, Vec::new()).await.unwrap();
        assert_eq!(check.state, OnChainState::Open);
        assert_eq!(player.stage(), Stage::Open);

        let mut expected_profit = 0i64;
        for round in 1..=5u64 {
            let outcome = player
                .play(vec![50], vec![(0, 1)], Vec::new())
                .await
                .unwrap();
            assert_eq!(outcome.session, round);
            assert_eq!(outcome.randoms.len(), 1);
            expected_profit += outcome.profit;
        }

        let channel = player.channel().unwrap();
        assert_eq!(channel.session(), 5);
        assert_eq!(channel.profit(), expected_profit);
        assert_eq!(channel.total_bet(), 250);
        assert!(channel.is_confirmed());

        let summary = player.close().await.unwrap();
        assert_eq!(summary.session, 5);
        assert_eq!(summary.total_bet, 250);
        assert_eq!(
            summary.player_balance as i64,
            PLAYER_DEPOSIT as i64 + expected_profit
        );
        assert_eq!(
            summary.player_balance + summary.bankroller_balance,
            3 * PLAYER_DEPOSIT
        );

        // The ledger settled both sides: reserve remainder plus final balance.
        let player_funds = harness
            .ledger
            .balance(harness.player_signer.address())
            .await
            .unwrap();
        assert_eq!(player_funds, 100 + summary.player_balance);

        assert_eq!(player.stage(), Stage::Closed);
        harness
            .handle
            .with_dealer(|d| assert_eq!(d.stage(), Stage::Closed))
            .await;

        // Event stream saw the whole lifecycle in order.
        let mut saw_opened = false;
        let mut rounds_seen = 0;
        let mut saw_closed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ProtocolEvent::ChannelOpened { .. } => saw_opened = true,
                ProtocolEvent::RoundPlayed { .. } => rounds_seen += 1,
                ProtocolEvent::ChannelClosed { .. } => saw_closed = true,
                _ => {}
            }
        }
        assert!(saw_opened);
        assert_eq!(rounds_seen, 5);
        assert!(saw_closed);
    }

    #[tokio::test]
    async fn test_low_dealer_deposit_rejected_before_open() {
        // Player expects x3, dealer pays x2: rejected before any ledger
        // submission.
        let mut harness =
            setup_with(TestGame::Coin, TestGame::Coin, rules(3), rules(2)).await;

        let before = harness
            .ledger
            .balance(harness.player_signer.address())
            .await
            .unwrap();
        let err = harness
            .player
            .connect(PLAYER_DEPOSIT, Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProtocolError::DepositMismatch {
                required: 3_000,
                offered: 2_000
            }
        ));
        assert_eq!(harness.player.stage(), Stage::Idle);

        // No deposit left the player's account.
        let after = harness
            .ledger
            .balance(harness.player_signer.address())
            .await
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_stale_session_rejected_without_side_effects() {
        let mut harness = setup(TestGame::Coin, TestGame::Coin).await;
        let check = harness.player.connect(PLAYER_DEPOSIT, Vec::new()).await.unwrap();

        for _ in 0..2 {
            harness
                .player
                .play(vec![10], vec![(0, 1)], Vec::new())
                .await
                .unwrap();
        }

        // Replay with a future session number while the channel sits at 2.
        let request =
            craft_play_request(&harness.player_signer, check.channel_id, 5, vec![10], 1);
        let err = harness.handle.call_play(request).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Channel(ChannelError::SessionMismatch {
                expected: 2,
                got: 5
            })
        ));

        harness
            .handle
            .with_dealer(|d| {
                let channel = d.channel().unwrap();
                assert_eq!(channel.session(), 2);
                assert_eq!(channel.total_bet(), 20);
            })
            .await;
    }

    #[tokio::test]
    async fn test_unconfirmed_round_blocks_the_next() {
        let harness = setup(TestGame::Coin, TestGame::Coin).await;
        let mut player = harness.player;
        let check = player.connect(PLAYER_DEPOSIT, Vec::new()).await.unwrap();

        // Round 1 straight at the dealer, skipping the confirmation leg.
        let request =
            craft_play_request(&harness.player_signer, check.channel_id, 0, vec![10], 1);
        harness.handle.call_play(request).await.unwrap();

        let request =
            craft_play_request(&harness.player_signer, check.channel_id, 1, vec![10], 2);
        let err = harness.handle.call_play(request).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Channel(ChannelError::UnconfirmedState)
        ));
    }

    #[tokio::test]
    async fn test_retried_round_is_memoized_not_resigned() {
        let harness = setup(TestGame::Coin, TestGame::Coin).await;
        let mut player = harness.player;
        let check = player.connect(PLAYER_DEPOSIT, Vec::new()).await.unwrap();

        let request =
            craft_play_request(&harness.player_signer, check.channel_id, 0, vec![10], 1);
        let first = harness.handle.call_play(request.clone()).await.unwrap();
        let second = harness.handle.call_play(request).await.unwrap();

        // Byte-identical reply, no second state transition.
        assert_eq!(first.commitment_signature, second.commitment_signature);
        assert_eq!(first.randoms, second.randoms);
        assert_eq!(first.result.profit, second.result.profit);
        assert_eq!(first.snapshot.data, second.snapshot.data);
        harness
            .handle
            .with_dealer(|d| assert_eq!(d.channel().unwrap().session(), 1))
            .await;
    }

    #[tokio::test]
    async fn test_overdrawing_bet_rejected_locally() {
        let mut harness = setup(TestGame::Coin, TestGame::Coin).await;
        harness.player.connect(PLAYER_DEPOSIT, Vec::new()).await.unwrap();

        let err = harness
            .player
            .play(vec![PLAYER_DEPOSIT + 1], vec![(0, 1)], Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Channel(ChannelError::InsufficientBalance { .. })
        ));
        // Nothing reached the dealer.
        harness
            .handle
            .with_dealer(|d| assert_eq!(d.channel().unwrap().session(), 0))
            .await;
    }

    #[tokio::test]
    async fn test_dishonest_dealer_routes_to_dispute() {
        let mut harness = setup(TestGame::AlwaysWin, TestGame::AlwaysLose).await;
        harness.player.connect(PLAYER_DEPOSIT, Vec::new()).await.unwrap();

        let err = harness
            .player
            .play(vec![100], vec![(0, 1)], Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Fairness(DisputeReason::ProfitMismatch)
        ));
        assert_eq!(harness.player.stage(), Stage::Disputed);

        // The ledger holds the claim with the retained round evidence and
        // settled from the zero state.
        let disputes = harness.ledger.disputes();
        assert_eq!(disputes.len(), 1);
        assert_eq!(disputes[0].reason, DisputeReason::ProfitMismatch);
        let evidence = disputes[0].evidence.as_ref().unwrap();
        assert_eq!(evidence.session, 0);
        assert_eq!(evidence.bets, vec![100]);

        let player_funds = harness
            .ledger
            .balance(harness.player_signer.address())
            .await
            .unwrap();
        assert_eq!(player_funds, PLAYER_DEPOSIT + 100);
    }

    /// Delegates the open handshake but never answers a round.
    struct MuteDealer {
        inner: TestDealerHandle,
    }

    impl DealerApi for MuteDealer {
        async fn get_open_channel_data(
            &self,
            request: OpenRequest,
            signature: paychan_core::Signature,
        ) -> Result<SignedResponse<OpenReply>> {
            self.inner.get_open_channel_data(request, signature).await
        }

        async fn check_open_channel(&self) -> Result<ChannelCheck> {
            self.inner.check_open_channel().await
        }

        async fn call_play(&self, _request: PlayRequest) -> Result<PlayReply> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProtocolError::transport("unreachable"))
        }

        async fn confirm_state(&self, snapshot: paychan_core::StateSnapshot) -> Result<()> {
            self.inner.confirm_state(snapshot).await
        }

        async fn consent_close_channel(
            &self,
            signature: paychan_core::Signature,
        ) -> Result<CloseConsent> {
            self.inner.consent_close_channel(signature).await
        }

        async fn check_close_channel(&self) -> Result<ChannelCheck> {
            self.inner.check_close_channel().await
        }
    }

    #[tokio::test]
    async fn test_unresponsive_dealer_times_out_then_disputes() {
        let ledger = InMemoryLedger::new();
        let player_signer = Signer::random();
        let dealer_signer = Signer::random();
        ledger.fund(player_signer.address(), PLAYER_DEPOSIT + 100);
        ledger.fund(dealer_signer.address(), 2 * PLAYER_DEPOSIT + 100);

        let fast_rules = ChannelRules {
            round_timeout: Duration::from_millis(50),
            ..rules(2)
        };
        let commitment = CommitmentKey::generate_with_size(512).unwrap();
        let dealer = DealerInstance::with_commitment(
            dealer_signer,
            ledger.clone(),
            TestGame::Coin,
            fast_rules.clone(),
            commitment,
        );
        let room = LocalRoom::new();
        let handle = room.expose_service(ROOM, dealer);
        let mute = MuteDealer { inner: handle };
        let mut player = PlayerInstance::new(
            player_signer.clone(),
            ledger.clone(),
            mute,
            TestGame::Coin,
            fast_rules,
        );

        player.connect(PLAYER_DEPOSIT, Vec::new()).await.unwrap();
        let err = player
            .play(vec![10], vec![(0, 1)], Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout { attempts: 2 }));
        assert_eq!(player.stage(), Stage::Open);

        // Escalation uses the zero state plus the retained round inputs.
        player
            .open_dispute(DisputeReason::Unresponsive)
            .await
            .unwrap();
        assert_eq!(player.stage(), Stage::Disputed);

        let disputes = ledger.disputes();
        assert_eq!(disputes.len(), 1);
        assert!(disputes[0].evidence.is_some());
        assert_eq!(
            ledger.balance(player_signer.address()).await.unwrap(),
            PLAYER_DEPOSIT + 100
        );
    }

    #[tokio::test]
    async fn test_close_requires_confirmed_state() {
        let harness = setup(TestGame::Coin, TestGame::Coin).await;
        let mut player = harness.player;
        let check = player.connect(PLAYER_DEPOSIT, Vec::new()).await.unwrap();

        // Push the dealer one round ahead without the confirmation leg.
        let request =
            craft_play_request(&harness.player_signer, check.channel_id, 0, vec![10], 1);
        harness.handle.call_play(request).await.unwrap();

        // The dealer refuses to consent while its round is unconfirmed, and
        // the failed close leaves the player able to continue.
        let err = player.close().await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Channel(ChannelError::UnconfirmedState)
        ));
        assert_eq!(player.stage(), Stage::Open);
    }

    #[tokio::test]
    async fn test_close_straight_after_open_settles_deposits() {
        let mut harness = setup(TestGame::Coin, TestGame::Coin).await;
        harness.player.connect(PLAYER_DEPOSIT, Vec::new()).await.unwrap();

        let summary = harness.player.close().await.unwrap();
        assert_eq!(summary.session, 0);
        assert_eq!(summary.player_balance, PLAYER_DEPOSIT);
        assert_eq!(summary.bankroller_balance, 2 * PLAYER_DEPOSIT);

        let player_funds = harness
            .ledger
            .balance(harness.player_signer.address())
            .await
            .unwrap();
        assert_eq!(player_funds, PLAYER_DEPOSIT + 100);
    }
}
