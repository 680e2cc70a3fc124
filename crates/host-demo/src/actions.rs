//! Game actions recorded on the local chain
//!
//! Each player's state lives at the player's address as
//! `{ "name": .., "x": .., "y": .., "score": .. }`.

use borsh::BorshSerialize;
use ledger_types::Address;
use local_node::{ActionContext, ActionError, LedgerAction};
use serde_json::{json, Value};

/// Largest step a single move may take on either axis
pub const MAX_STEP: i32 = 10;

#[derive(BorshSerialize, Clone, Debug, PartialEq, Eq)]
pub enum GameAction {
    /// Register the signer as a player at the origin
    Spawn { name: String },
    /// Move the signer's player
    Move { dx: i32, dy: i32 },
    /// Add to the signer's score
    Score(u32),
}

impl LedgerAction for GameAction {
    fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let player = ctx.signer();
        match self {
            GameAction::Spawn { name } => {
                if ctx.get_state(&player).is_some() {
                    return Err(ActionError::Invalid(format!("{} already spawned", player)));
                }
                if name.is_empty() || name.len() > 32 {
                    return Err(ActionError::Invalid("name must be 1-32 bytes".to_string()));
                }
                ctx.set_state(player, json!({ "name": name, "x": 0, "y": 0, "score": 0 }));
                Ok(())
            }
            GameAction::Move { dx, dy } => {
                let step = -MAX_STEP..=MAX_STEP;
                if !step.contains(dx) || !step.contains(dy) {
                    return Err(ActionError::Invalid(format!("step ({}, {}) too large", dx, dy)));
                }
                let mut state = spawned(ctx, &player)?;
                state["x"] = json!(field(&state, "x") + i64::from(*dx));
                state["y"] = json!(field(&state, "y") + i64::from(*dy));
                ctx.set_state(player, state);
                Ok(())
            }
            GameAction::Score(points) => {
                let mut state = spawned(ctx, &player)?;
                state["score"] = json!(field(&state, "score") + i64::from(*points));
                ctx.set_state(player, state);
                Ok(())
            }
        }
    }
}

fn spawned(ctx: &ActionContext<'_>, player: &Address) -> Result<Value, ActionError> {
    ctx.get_state(player)
        .cloned()
        .ok_or_else(|| ActionError::Unauthorized(format!("{} has not spawned", player)))
}

fn field(state: &Value, key: &str) -> i64 {
    state.get(key).and_then(Value::as_i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn run(
        states: &mut HashMap<Address, Value>,
        player: Address,
        action: GameAction,
    ) -> Result<(), ActionError> {
        let mut ctx = ActionContext::new(player, 1, states);
        action.execute(&mut ctx)
    }

    #[test]
    fn test_spawn_move_score() {
        let player = Address([5u8; 20]);
        let mut states = HashMap::new();

        run(&mut states, player, GameAction::Spawn { name: "ada".to_string() }).unwrap();
        run(&mut states, player, GameAction::Move { dx: 3, dy: -2 }).unwrap();
        run(&mut states, player, GameAction::Move { dx: 1, dy: 1 }).unwrap();
        run(&mut states, player, GameAction::Score(15)).unwrap();

        assert_eq!(
            states[&player],
            json!({ "name": "ada", "x": 4, "y": -1, "score": 15 })
        );
    }

    #[test]
    fn test_rules() {
        let player = Address([6u8; 20]);
        let mut states = HashMap::new();

        assert!(matches!(
            run(&mut states, player, GameAction::Move { dx: 1, dy: 0 }),
            Err(ActionError::Unauthorized(_))
        ));
        run(&mut states, player, GameAction::Spawn { name: "bob".to_string() }).unwrap();
        assert!(matches!(
            run(&mut states, player, GameAction::Spawn { name: "bob".to_string() }),
            Err(ActionError::Invalid(_))
        ));
        assert!(matches!(
            run(&mut states, player, GameAction::Move { dx: MAX_STEP + 1, dy: 0 }),
            Err(ActionError::Invalid(_))
        ));
    }
}
