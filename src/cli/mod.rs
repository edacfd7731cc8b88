pub mod commands;
pub mod signals;
