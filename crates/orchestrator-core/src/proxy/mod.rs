//! Proxy Core (C8/C9, §4.8–§4.9).
//!
//! `ts` and `hls` each own their admission path, per-channel session state,
//! and client bookkeeping independently — they share only the small
//! vocabulary in `common` (client handles, channel state, the header the
//! engine requires to avoid compressing the stream). Fleet State (C2) stays
//! the system of record for `Stream` rows; these modules own the
//! proxy-internal `Session`/`Client` records §3 describes as living outside
//! C2's lock.

pub mod common;
pub mod hls;
pub mod ts;
