// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod deploy_flow;
pub mod layout_validator;
pub mod live_walk;
pub mod metadata_resolver;
pub mod prepare;
pub mod retry;
pub mod root_services;
pub mod service_provisioner;
pub mod teardown;
pub mod topology_validator;

// Re-export use cases for convenience
pub use deploy_flow::{DeployFlowUseCase, StandardDeployFlowUseCase};
pub use layout_validator::{LayoutReport, LayoutValidator};
pub use root_services::RootServiceRegistry;
pub use topology_validator::{TopologyIssue, TopologyReport, TopologyValidator};
