// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Furnace Core
//!
//! Flame-graph profiling of a running container workload, plus the central
//! directory that lets one process remote-control many per-pod agents.
//!
//! # Architecture
//!
//! - **domain**: states, options, registrations, errors and the seams
//!   (`ProcessLauncher`, `LeaseRegistrar`, `AgentApi`, `AgentConnector`)
//! - **application**: `ProcessPipeline`, `AgentController`, `LeaseRenewer`,
//!   `LeaseRegistry`, `RequestRouter`
//! - **infrastructure**: tokio subprocesses, podman image mounting, reqwest
//!   clients, an in-memory launcher for tests
//! - **presentation**: the agent and proxy axum routers

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
