// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod flow_parser;
pub mod in_memory;
pub mod nifi_client;

pub use flow_parser::FlowParser;
pub use in_memory::InMemoryFlowApi;
pub use nifi_client::NifiClient;
