//
// Copyright 2025 Tabs Data Inc.
//

pub mod auth;
