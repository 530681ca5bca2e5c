pub mod entity;
pub mod occurrence;
pub mod phase;
pub mod poll_state;

pub use entity::*;
pub use occurrence::*;
pub use phase::*;
pub use poll_state::*;
