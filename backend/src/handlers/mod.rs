pub mod activities;
pub mod auth;
pub mod health;
pub mod preferences;
pub mod records;

pub use activities::*;
pub use auth::*;
pub use health::*;
pub use preferences::*;
pub use records::*;
