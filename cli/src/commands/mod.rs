// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod proxy;

pub use agent::AgentArgs;
pub use proxy::ProxyArgs;

/// Treat an empty environment value like an absent one.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
