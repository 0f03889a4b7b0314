pub mod activity;
pub mod auth;
pub mod logging;
pub mod request_id;

pub use activity::*;
pub use auth::*;
pub use logging::*;
pub use request_id::*;
