// taskman-common: shared types and wire protocol for the taskman relay

pub mod protocol;
pub mod types;
