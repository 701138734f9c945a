//! # Identity module
//!
//! Global process state is limited, per spec §5, to three application
//! identity strings set once at startup and read-only thereafter: the
//! application name, version and component. Everything else that looks like
//! "global state" in this crate (the metrics registry, the processing-time
//! index) is instead threaded through explicitly via [`crate::metrics`] and
//! [`crate::processing`] handles — see spec §9's note to "prefer passing
//! these via a context object in a rewrite rather than resurrecting
//! module-level variables".

use std::sync::OnceLock;

/// The three application-identity constants, set once at startup.
#[derive(Clone, Debug)]
pub struct AppIdentity {
    pub name: &'static str,
    pub version: &'static str,
    pub component: &'static str,
}

static IDENTITY: OnceLock<AppIdentity> = OnceLock::new();

/// Sets the process-wide identity. Must be called at most once; subsequent
/// calls are ignored (the first writer wins), matching "set once at startup"
/// rather than making this fallible noise callers have to handle.
pub fn set(identity: AppIdentity) {
    let _ = IDENTITY.set(identity);
}

/// Reads the process-wide identity, defaulting to the crate's own
/// name/version if [`set`] was never called (useful in tests and in any
/// code path exercised before the binary's `main` runs it).
pub fn get() -> AppIdentity {
    IDENTITY
        .get()
        .cloned()
        .unwrap_or(AppIdentity {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            component: "controller",
        })
}
