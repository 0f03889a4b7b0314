//! Payload validation: custom rules plugged into `validator` derives.

pub mod rules;

pub use validator::Validate;
