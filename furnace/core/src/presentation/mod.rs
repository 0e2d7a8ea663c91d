// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_api;
pub mod proxy_api;
