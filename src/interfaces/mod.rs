pub mod csv;
pub mod simulation;
