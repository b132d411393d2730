//! End-to-end smoke scenarios.
//!
//! These run against real validator node processes and are therefore both
//! `#[ignore]`d and gated on `SMOKE_ENABLE=1`:
//!
//! ```bash
//! SMOKE_ENABLE=1 SMOKE_NODE_BINARY=/path/to/validator-node \
//!     cargo test -p smoke-harness scenarios -- --ignored
//! ```
//!
//! Attach to an already-running network instead of launching one by
//! setting `SMOKE_NODE_URLS=http://host:8800,http://host:8801`.

pub mod smoke;
