//! Application state

use crate::engine::QuestEngine;

pub struct AppState {
    pub engine: QuestEngine,
}

impl AppState {
    pub fn new(engine: QuestEngine) -> Self {
        Self { engine }
    }
}
