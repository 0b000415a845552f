//! Pipeline Server
//!
//! Serves live object lines over Server-Sent Events. Object-created
//! notifications are pulled from a queue, the named objects are streamed from
//! storage line by line, and every line is pushed to all connected
//! subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        ┌──────────────────┐        ┌──────────────────┐
//! │  Queue Iterator  │──msg──▶│ Message Processor│──get──▶│  Object Store    │
//! │  (SQS)           │◀─del───│                  │◀─body──│  (S3)            │
//! └────────▲─────────┘        └────────┬─────────┘        └──────────────────┘
//!          │ polls                     │ lines
//! ┌────────┴─────────┐        ┌────────▼─────────┐        ┌──────────────────┐
//! │  Pipeline Runner │        │   Broadcaster    │───────▶│ HTTP API (axum)  │
//! │  + Heartbeat     │──ping─▶│   + Registry     │  SSE   │ GET /v1/events   │
//! └──────────────────┘        └──────────────────┘        └──────────────────┘
//! ```

pub mod api;
pub mod config;
