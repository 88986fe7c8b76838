/// Room, player, round and score persistence behind one trait.
pub mod festival_store;
/// Database model definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
