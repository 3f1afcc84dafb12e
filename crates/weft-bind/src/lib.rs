#![forbid(unsafe_code)]

//! Component bindings: the glue between an external component system and
//! [`weft_state`] stores.
//!
//! The host component system is consumed through a narrow contract: it
//! calls [`Binding::on_update`] from its update hook after each
//! property/state change, calls [`Binding::disconnect`] exactly once on
//! teardown, and supplies a `request_update` re-render trigger at
//! construction. Nothing else about the host is assumed — no templating,
//! no styling, no diffing.

pub mod binding;

pub use binding::Binding;
