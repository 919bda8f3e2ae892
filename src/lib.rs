//! WhatsApp relay: webhook ingestion, keyword auto-responses, outbound
//! sends and realtime fan-out of message and delivery events.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod phone;
pub mod pipeline;
pub mod realtime;
pub mod store;
pub mod tracking;
pub mod webhook;
