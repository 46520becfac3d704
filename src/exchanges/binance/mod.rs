//! Binance spot adapter

pub mod auth;
pub mod client;
pub mod messages;

pub use client::BinanceClient;
