pub mod dictionary;
pub mod errors;
pub mod game;
pub mod messages;
pub mod player;

// Re-export all types
pub use dictionary::*;
pub use errors::*;
pub use game::*;
pub use messages::*;
pub use player::*;
