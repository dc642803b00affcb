//! Runtime composition (C7/C8, spec §4.7-§4.8): the single call surface a
//! host embeds, wiring sessions, catalogs, validators, breakers, and the
//! plugin pipeline together.

pub mod request;
pub mod runtime;

pub use request::{CallMethod, CallRequest};
pub use runtime::{GuardrailsProfile, PrefixFn, PrefixOption, Runtime, RuntimeConfig, SessionRuntimeStateHandle, TelemetryConfig, TelemetrySnapshot};
