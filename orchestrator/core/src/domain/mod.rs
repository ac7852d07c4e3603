// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Flow specification model, type metadata, and the pure resolution and layout
//! rules applied before anything touches the live system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Entities, value objects and collaborator traits

pub mod deployer_config;
pub mod deployment;
pub mod flow;
pub mod layout;
pub mod live_system;
pub mod metadata;
pub mod properties;
pub mod relationships;
pub mod services;
