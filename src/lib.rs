pub mod capture;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod proxy;
pub mod state;
pub mod web;
