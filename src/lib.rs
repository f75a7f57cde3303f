pub mod cli;
pub mod components;
pub mod constants;
pub mod core;
pub mod dev_utils;
pub mod models;
pub mod state;
pub mod system;
