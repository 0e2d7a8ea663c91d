// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_client;
pub mod image_mount;
pub mod process;
pub mod registry_client;
pub mod scripted;
