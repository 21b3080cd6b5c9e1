//! Real-time message delivery and conversation history over HTTP and WebSocket.

pub mod app_state;
pub mod db;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
mod tracer;
