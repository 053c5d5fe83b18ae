//! Test suites for the autoport client.

mod support;
