pub mod config;
pub mod coordinator;
pub mod defects;
pub mod heat_transfer;
pub mod materials;
pub mod result;
pub mod simulation;
