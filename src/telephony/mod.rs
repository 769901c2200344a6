//! Telephony provider integration: the duplex media-stream protocol and the
//! REST client for placing outbound calls.

pub mod client;
pub mod protocol;

pub use client::{greeting_twiml, OutboundCall, TelephonyClient};
pub use protocol::{OutboundFrame, StreamEvent};
