//
// Copyright 2025 Tabs Data Inc.
//

#[macro_use]
pub mod codec;

pub mod types;
