// handlers/mod.rs - HTTP handlers
//
// Statement execution lives under the configured prefix; health and admin
// endpoints sit beside it.
pub mod admin;
pub mod health;
pub mod statement;
