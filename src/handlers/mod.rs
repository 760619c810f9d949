// src/handlers/mod.rs

pub mod admin;
pub mod events;
pub mod session;
