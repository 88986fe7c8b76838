use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod rooms;
pub mod rounds;
pub mod websocket;

/// Compose the room, round, socket and documentation trees over the shared state.
pub fn router(state: SharedState) -> Router<()> {
    rooms::router()
        .merge(rounds::router())
        .merge(websocket::router())
        .merge(docs::router())
        .with_state(state)
}
