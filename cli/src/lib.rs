// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! Furnace CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Argument parsing, telemetry bootstrap and HTTP serving for
//!   the `furnace agent` and `furnace proxy` entry points

pub mod commands;
pub mod server;
pub mod telemetry;
