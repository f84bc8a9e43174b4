pub mod colors;
pub mod events;
pub mod geo;
pub mod player;
pub mod territory;

pub use colors::identity_color;
pub use events::*;
pub use geo::*;
pub use player::*;
pub use territory::*;
