// courier-common: shared types for the Courier relay and its clients

pub mod protocol;
pub mod types;
