pub mod events;
pub mod models;
pub mod session;
pub mod stats;
pub mod tracks;

pub use events::*;
pub use models::*;
pub use session::*;
pub use stats::*;
pub use tracks::*;
