//! HTTP API: routing and request/response mapping over the order pipeline.

pub mod app;
