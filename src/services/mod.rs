/// OpenAPI documentation generation.
pub mod documentation;
/// Drift repair between persisted presence and live sessions.
pub mod reconciliation;
/// Event helpers shared by the services and the hub.
pub mod room_events;
/// Room lifecycle: creation, joining, listing, game start and end.
pub mod room_service;
/// Round engine with exactly-once scoring.
pub mod round_service;
/// WebSocket session loops.
pub mod websocket_service;
