// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod forwarding;
pub mod pipeline;
pub mod process;
pub mod registration;
