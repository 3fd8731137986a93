//! # Orchestrator Core
//!
//! Fleet lifecycle, VPN coordination, engine selection, and stream-proxy
//! multiplexing for the Acestream fleet orchestrator. Consumed by
//! `orchestrator-server`, which owns the HTTP surface and wires these
//! managers together behind `AppState`.
//!
//! Module map mirrors the component table: `container` (C1), `fleet` (C2),
//! `vpn` (C3), `health` (C4), `autoscaler` (C5), `selector` (C6),
//! `streams` (C7), `proxy::ts` / `proxy::hls` (C8/C9), `events` (C10),
//! `resilience` (C11).

pub mod autoscaler;
pub mod container;
pub mod events;
pub mod fleet;
pub mod health;
pub mod proxy;
pub mod resilience;
pub mod selector;
pub mod streams;
pub mod vpn;
