// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

mod entrypoint_common;
mod entrypoint_main;
mod entrypoint_test;

pub use entrypoint_main::impl_main;
pub use entrypoint_test::impl_test;
