// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Flowsmith core
//!
//! Declarative NiFi flow deployment: parse a YAML flow spec, resolve it against
//! the live system's type metadata, lay it out, deploy it and validate the result.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, deployment use cases and live-system adapters

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
