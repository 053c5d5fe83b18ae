//! Test suites for the autoport session daemon.

mod bootstrap;
pub(crate) mod support;
