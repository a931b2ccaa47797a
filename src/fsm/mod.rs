//! Per-entity finite-state machine.
//!
//! One [`EntityState`] record per entity, persisted wholesale in the shared
//! store and mutated only under the entity lock. The transition table is a
//! static adjacency map; `Idle` and `Error` are emergency targets reachable
//! from any state.

mod machine;
mod storage;
mod sweeper;

pub use machine::{StateMachine, TransitionObserver};
pub use storage::{StateStorage, StoreStorage, DEFAULT_STATE_TTL};
pub use sweeper::StateSweeper;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// Conversation flow states. `Idle` is the initial state; `Error` is the
/// universal recovery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    Searching,
    AwaitingAmount,
    AwaitingConfirm,
    Error,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::Searching => "searching",
            ConversationState::AwaitingAmount => "awaiting_amount",
            ConversationState::AwaitingConfirm => "awaiting_confirm",
            ConversationState::Error => "error",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permitted non-emergency successors per state.
fn successors(from: ConversationState) -> &'static [ConversationState] {
    use ConversationState::*;
    match from {
        Idle => &[Searching],
        Searching => &[AwaitingAmount, Idle],
        AwaitingAmount => &[AwaitingConfirm, Searching],
        AwaitingConfirm => &[Idle],
        Error => &[],
    }
}

/// Reports whether moving from one state to another is valid. `Idle` and
/// `Error` are always reachable, bypassing the table.
pub fn is_transition_allowed(from: ConversationState, to: ConversationState) -> bool {
    if matches!(to, ConversationState::Idle | ConversationState::Error) {
        return true;
    }
    successors(from).contains(&to)
}

/// One entity's position in the FSM. Overwritten wholesale on every
/// successful transition; `updated_at` is stamped by the storage layer on
/// each write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: i64,
    pub current_state: ConversationState,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default = "SystemTime::now")]
    pub updated_at: SystemTime,
}

impl EntityState {
    pub fn new(entity_id: i64, current_state: ConversationState) -> Self {
        Self {
            entity_id,
            current_state,
            context: HashMap::new(),
            updated_at: SystemTime::now(),
        }
    }

    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversationState::*;

    #[test]
    fn table_transitions() {
        assert!(is_transition_allowed(Idle, Searching));
        assert!(is_transition_allowed(Searching, AwaitingAmount));
        assert!(is_transition_allowed(AwaitingAmount, AwaitingConfirm));
        assert!(is_transition_allowed(AwaitingConfirm, Idle));
        assert!(is_transition_allowed(AwaitingAmount, Searching));
    }

    #[test]
    fn forbidden_transitions() {
        assert!(!is_transition_allowed(Idle, AwaitingAmount));
        assert!(!is_transition_allowed(Idle, AwaitingConfirm));
        assert!(!is_transition_allowed(Searching, AwaitingConfirm));
        assert!(!is_transition_allowed(AwaitingConfirm, AwaitingAmount));
    }

    #[test]
    fn idle_and_error_are_reachable_from_everywhere() {
        for from in [Idle, Searching, AwaitingAmount, AwaitingConfirm, Error] {
            assert!(is_transition_allowed(from, Idle));
            assert!(is_transition_allowed(from, Error));
        }
    }

    #[test]
    fn error_has_no_table_successors() {
        assert!(!is_transition_allowed(Error, Searching));
        assert!(!is_transition_allowed(Error, AwaitingConfirm));
    }

    #[test]
    fn state_serializes_as_snake_case() {
        let json = serde_json::to_string(&AwaitingConfirm).unwrap();
        assert_eq!(json, "\"awaiting_confirm\"");
        let back: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AwaitingConfirm);
    }

    #[test]
    fn entity_state_round_trips() {
        let mut context = HashMap::new();
        context.insert("query".to_string(), serde_json::json!("solace"));
        let state = EntityState::new(7, Searching).with_context(context);

        let encoded = serde_json::to_vec(&state).unwrap();
        let decoded: EntityState = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, state);
    }
}
