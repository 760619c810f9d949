// src/state.rs

use crate::config::Config;
use crate::engine::SessionEngine;
use axum::extract::FromRef;

#[derive(Clone)]
pub struct AppState {
    pub engine: SessionEngine,
    pub config: Config,
}

impl FromRef<AppState> for SessionEngine {
    fn from_ref(state: &AppState) -> Self {
        state.engine.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
