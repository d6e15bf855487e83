pub mod agent_client;
pub mod callback_service;
pub mod config;
pub mod context;
pub mod debug_http;
pub mod error;
pub mod log_classifier;
pub mod log_tail;
pub mod port_alloc;
pub mod session_state;
pub mod shutdown;
pub mod supervisor;

#[cfg(test)]
mod test_support;
