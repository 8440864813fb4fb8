pub mod cli;
pub mod commands;
pub mod config;
pub mod doctor;
pub mod enroll;
pub mod errors;
pub mod output;
pub mod terminal;
