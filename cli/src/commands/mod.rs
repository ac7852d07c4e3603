// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the flowsmith CLI

pub mod config;
pub mod flow;

pub use self::config::ConfigCommand;
pub use self::flow::FlowCommand;
