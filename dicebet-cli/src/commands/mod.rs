use crate::dice::DiceGame;
use anyhow::{anyhow, Context};
use chrono::Utc;
use comfy_table::{presets::UTF8_FULL, Table};
use paychan_core::{
    rnd, ChannelRules, CommitmentKey, InMemoryLedger, Ledger, Signer,
};
use paychan_protocol::{
    DealerInstance, EventSink, LocalRoom, PlayerInstance, ProtocolEvent,
};
use serde::Serialize;
use std::path::PathBuf;

const ROOM_ADDRESS: &str = "dicebet/table-1";
const WIN_OVER: u64 = 55;

#[derive(Debug, Serialize)]
struct RoundReport {
    session: u64,
    bet: u64,
    rolls: Vec<u64>,
    profit: i64,
    player_balance: u64,
    bankroller_balance: u64,
}

#[derive(Debug, Serialize)]
struct SessionReport {
    channel_id: String,
    started_at: chrono::DateTime<Utc>,
    deposit: u64,
    bankroller_deposit: u64,
    rounds: Vec<RoundReport>,
    final_player_balance: u64,
    final_bankroller_balance: u64,
    total_bet: u64,
}

/// Run a full channel lifecycle locally: open, `rounds` dice rounds, close.
pub async fn simulate(
    rounds: u64,
    deposit: u64,
    bet: u64,
    report: bool,
    data_dir: PathBuf,
) -> anyhow::Result<()> {
    let rules = ChannelRules::default();
    let game = DiceGame::new(WIN_OVER);

    // One in-memory ledger plays the chain for both parties.
    let ledger = InMemoryLedger::new();
    let player_signer = Signer::random();
    let dealer_signer = Signer::random();
    ledger.fund(player_signer.address(), deposit + rules.min_reserve);
    ledger.fund(
        dealer_signer.address(),
        deposit * rules.deposit_multiplier + rules.min_reserve,
    );

    println!("Generating dealer commitment key...");
    let commitment = CommitmentKey::generate().map_err(|e| anyhow!("{e}"))?;

    let (events, mut event_rx) = EventSink::channel();
    let dealer = DealerInstance::with_commitment(
        dealer_signer.clone(),
        ledger.clone(),
        game,
        rules.clone(),
        commitment,
    )
    .with_events(events.clone());

    let room = LocalRoom::new();
    room.expose_service(ROOM_ADDRESS, dealer);

    let mut player = PlayerInstance::new(
        player_signer.clone(),
        ledger.clone(),
        room.remote_interface(ROOM_ADDRESS)
            .map_err(|e| anyhow!("{e}"))?,
        game,
        rules.clone(),
    )
    .with_events(events);

    let check = player
        .connect(deposit, b"dicebet-v1".to_vec())
        .await
        .map_err(|e| anyhow!("open failed: {e}"))?;
    println!(
        "Channel {} open: deposits {}/{}",
        check.channel_id, check.player_balance, check.bankroller_balance
    );

    let started_at = Utc::now();
    let mut round_reports = Vec::new();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Round",
        "Roll",
        "Bet",
        "Profit",
        "Player",
        "Bankroller",
    ]);

    for _ in 0..rounds {
        let available = player
            .channel()
            .map(|c| c.player_balance())
            .unwrap_or(0);
        if available < bet {
            println!("Player balance {} cannot cover bet {}, stopping", available, bet);
            break;
        }

        let outcome = player
            .play(vec![bet], game.ranges_for(&[bet]), Vec::new())
            .await
            .map_err(|e| anyhow!("round failed: {e}"))?;

        let (player_balance, bankroller_balance) = player
            .channel()
            .map(|c| (c.player_balance(), c.bankroller_balance()))
            .unwrap_or((0, 0));

        table.add_row(vec![
            outcome.session.to_string(),
            outcome
                .randoms
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            bet.to_string(),
            format!("{:+}", outcome.profit),
            player_balance.to_string(),
            bankroller_balance.to_string(),
        ]);
        round_reports.push(RoundReport {
            session: outcome.session,
            bet,
            rolls: outcome.randoms.clone(),
            profit: outcome.profit,
            player_balance,
            bankroller_balance,
        });
    }

    println!("{table}");

    let summary = player
        .close()
        .await
        .map_err(|e| anyhow!("close failed: {e}"))?;
    println!(
        "Channel closed at session {}: player {} / bankroller {} (total wagered {})",
        summary.session, summary.player_balance, summary.bankroller_balance, summary.total_bet
    );

    let player_funds = ledger.balance(player_signer.address()).await?;
    let dealer_funds = ledger.balance(dealer_signer.address()).await?;
    println!(
        "Settled on ledger: player {} / bankroller {}",
        player_funds, dealer_funds
    );
    tracing::info!(
        "Simulation complete: {} rounds, net player profit {:+}",
        summary.session,
        summary.player_balance as i64 - deposit as i64
    );

    // A short tail of protocol events, for the curious.
    while let Ok(event) = event_rx.try_recv() {
        if let ProtocolEvent::DisputeOpened { reason, .. } = event {
            println!("dispute opened: {}", reason);
        }
    }

    if report {
        let session_report = SessionReport {
            channel_id: summary.channel_id.to_string(),
            started_at,
            deposit,
            bankroller_deposit: deposit * rules.deposit_multiplier,
            rounds: round_reports,
            final_player_balance: summary.player_balance,
            final_bankroller_balance: summary.bankroller_balance,
            total_bet: summary.total_bet,
        };
        let path = write_report(&session_report, data_dir)?;
        println!("Report written to {}", path.display());
    }

    Ok(())
}

fn write_report(report: &SessionReport, data_dir: PathBuf) -> anyhow::Result<PathBuf> {
    let dir = data_dir.join("dicebet");
    std::fs::create_dir_all(&dir).context("creating report directory")?;

    let path = dir.join(format!(
        "session-{}.json",
        report.started_at.format("%Y%m%dT%H%M%S")
    ));
    let content = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, content).context("writing report")?;
    Ok(path)
}

/// Re-derive the random sequence from a published commitment signature.
///
/// This is the player-side audit step as a standalone tool: anyone holding
/// the signature and the agreed ranges can reproduce the rolls.
pub fn audit(signature_hex: &str, ranges_spec: &str) -> anyhow::Result<()> {
    let signature = hex::decode(signature_hex.trim_start_matches("0x"))
        .context("signature is not valid hex")?;
    let ranges = parse_ranges(ranges_spec)?;

    let randoms = rnd::generate(&signature, &ranges).map_err(|e| anyhow!("{e}"))?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["#", "Range", "Value"]);
    for (i, (value, (min, max))) in randoms.iter().zip(ranges.iter()).enumerate() {
        table.add_row(vec![
            i.to_string(),
            format!("{}-{}", min, max),
            value.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn parse_ranges(spec: &str) -> anyhow::Result<Vec<(u64, u64)>> {
    spec.split(',')
        .map(|part| {
            let (min, max) = part
                .trim()
                .split_once('-')
                .ok_or_else(|| anyhow!("range '{}' is not of the form MIN-MAX", part))?;
            Ok((min.trim().parse()?, max.trim().parse()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranges() {
        assert_eq!(
            parse_ranges("1-100, 0-1").unwrap(),
            vec![(1, 100), (0, 1)]
        );
        assert!(parse_ranges("nonsense").is_err());
    }
}
