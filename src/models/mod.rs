// src/models/mod.rs

pub mod exam;
pub mod integrity;
pub mod session;
