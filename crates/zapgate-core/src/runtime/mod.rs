// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime adapter.
//!
//! The lifecycle manager and registry only talk to the [`ContainerRuntime`]
//! trait. Two backends are provided:
//!
//! - [`DockerCli`]: shells out to the `docker` binary
//! - [`MockRuntime`]: in-memory containers for tests

mod docker;
mod mock;
mod net;
mod traits;

pub use docker::{DockerCli, DockerCliConfig, RegistryCredentials};
pub use mock::MockRuntime;
pub use net::{DEFAULT_BRIDGE_HOST, allocate_free_port};
pub use traits::*;
