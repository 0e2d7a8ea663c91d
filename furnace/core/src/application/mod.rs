// Copyright (c) 2026 Furnace contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod controller;
pub mod lease_registry;
pub mod lease_renewer;
pub mod pipeline;
pub mod router;

pub use controller::AgentController;
pub use lease_registry::LeaseRegistry;
pub use lease_renewer::LeaseRenewer;
pub use pipeline::{PipelineCompletion, ProcessPipeline};
pub use router::RequestRouter;
