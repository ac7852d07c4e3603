// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Breadth-first snapshots of a live group subtree.

use std::collections::VecDeque;

use crate::domain::live_system::{FlowApi, GroupFlow, LiveSystemError};

/// A group snapshot and its slash-separated path from the walk's start.
#[derive(Debug, Clone)]
pub struct WalkedGroup {
    pub path: String,
    pub flow: GroupFlow,
}

/// Snapshot `group_id` and every descendant, parents before children.
pub async fn walk_subtree(
    api: &dyn FlowApi,
    group_id: &str,
) -> Result<Vec<WalkedGroup>, LiveSystemError> {
    let mut walked = Vec::new();
    let mut pending = VecDeque::from([(group_id.to_string(), None::<String>)]);

    while let Some((id, parent_path)) = pending.pop_front() {
        let flow = api.group_flow(&id).await?;
        let path = match parent_path {
            Some(parent) => format!("{}/{}", parent, flow.group.name),
            None => flow.group.name.clone(),
        };
        for child in &flow.child_groups {
            pending.push_back((child.id.clone(), Some(path.clone())));
        }
        walked.push(WalkedGroup { path, flow });
    }

    Ok(walked)
}
