// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod api;
pub mod config;
pub mod countdown;
pub mod credential;
pub mod error;
pub mod host;
pub mod link;
pub mod machine;
pub mod poller;
pub mod run;
pub mod submit;
pub mod task;
pub mod test_support;
pub mod verify;
