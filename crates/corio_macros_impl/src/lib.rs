// Copyright (c) The Corio Project Authors.
// Licensed under the MIT License.

//! <div class="warning">This crate is a private dependency of <b>corio_rt</b>. You should never
//! add this as a direct dependency.</div>

#![doc(hidden)]
#![doc(html_no_source)]

pub mod runtime;
pub mod syn_helpers;
