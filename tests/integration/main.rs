//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the controller against
//! the simulated Bluedroid stack and mock application components. All
//! tests run on the host (x86_64) with no radio required.

#![cfg(not(target_os = "espidf"))]

mod bridge_tests;
mod controller_tests;
mod mock_stack;
