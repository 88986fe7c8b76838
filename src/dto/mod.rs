pub mod room;
pub mod round;
pub mod validation;
pub mod ws;
