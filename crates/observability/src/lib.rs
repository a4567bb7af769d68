//! Process-wide tracing setup for the procura binaries and tests.

pub mod tracing;

/// Install the JSON subscriber with the `RUST_LOG` filter (default `info`).
///
/// Later calls leave the first subscriber in place.
pub fn init() {
    tracing::init();
}
