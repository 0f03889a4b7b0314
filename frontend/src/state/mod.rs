pub mod preferences;
pub mod theme;
