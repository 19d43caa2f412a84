use crate::models::{BackendKind, BackendState, BackendStates, EngineState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub active: Option<BackendKind>,
    pub state: EngineState,
}

/// Picks the highest-priority backend that is neither failed nor unavailable
/// and derives the engine state from it.
pub fn select(states: &BackendStates) -> Selection {
    let active = BackendKind::PRIORITY
        .into_iter()
        .find(|kind| states.get(*kind).is_candidate());

    let state = match active {
        Some(kind) => match states.get(kind) {
            BackendState::Ready => EngineState::Playing(kind),
            _ => EngineState::Loading,
        },
        None => first_error(states)
            .map(EngineState::Error)
            .unwrap_or(EngineState::NoSource),
    };

    Selection { active, state }
}

fn first_error(states: &BackendStates) -> Option<String> {
    BackendKind::PRIORITY
        .into_iter()
        .find_map(|kind| match states.get(kind) {
            BackendState::Error(reason) => Some(reason.clone()),
            _ => None,
        })
}
