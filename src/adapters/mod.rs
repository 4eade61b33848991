// Adapters layer: concrete implementations for external systems.

pub mod http;
pub mod services;
pub mod storage;
