use paychan_core::{GameData, GameLogic, PlayResult, Result};
use serde_json::json;

/// Even-money dice: one d100 roll per bet, the player wins on anything
/// strictly above the threshold. A threshold above 50 is the house edge.
#[derive(Debug, Clone, Copy)]
pub struct DiceGame {
    pub win_over: u64,
}

impl DiceGame {
    pub const RANGE: (u64, u64) = (1, 100);

    pub fn new(win_over: u64) -> Self {
        Self { win_over }
    }

    pub fn ranges_for(&self, bets: &[u64]) -> Vec<(u64, u64)> {
        vec![Self::RANGE; bets.len()]
    }
}

impl GameLogic for DiceGame {
    fn play(&self, bets: &[u64], _game_data: &GameData, randoms: &[u64]) -> Result<PlayResult> {
        let mut profit = 0i64;
        let mut rolls = Vec::with_capacity(bets.len());

        for (&bet, &roll) in bets.iter().zip(randoms.iter()) {
            let won = roll > self.win_over;
            profit += if won { bet as i64 } else { -(bet as i64) };
            rolls.push(json!({ "roll": roll, "won": won }));
        }

        Ok(PlayResult {
            profit,
            data: Some(json!({ "rolls": rolls })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_data() -> GameData {
        GameData {
            seed: [0u8; 32],
            random_ranges: vec![DiceGame::RANGE],
            custom: Vec::new(),
        }
    }

    #[test]
    fn test_win_and_loss() {
        let game = DiceGame::new(55);

        let win = game.play(&[10], &game_data(), &[56]).unwrap();
        assert_eq!(win.profit, 10);

        let loss = game.play(&[10], &game_data(), &[55]).unwrap();
        assert_eq!(loss.profit, -10);
    }

    #[test]
    fn test_multiple_bets_sum() {
        let game = DiceGame::new(55);
        let result = game.play(&[10, 20], &game_data(), &[60, 1]).unwrap();
        assert_eq!(result.profit, 10 - 20);
    }
}
