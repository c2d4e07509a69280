// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host networking helpers.

use std::net::TcpListener;

/// Address used to reach published ports when `DOCKER_BRIDGE_HOST` is unset.
pub const DEFAULT_BRIDGE_HOST: &str = "127.0.0.1";

/// Ask the OS for a free TCP port.
///
/// The listener is closed before returning, so another process may still
/// take the port before the container binds it.
pub fn allocate_free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("0.0.0.0:0")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_free_port_is_bindable() {
        let port = allocate_free_port().unwrap();
        assert!(port > 0);
        assert!(TcpListener::bind(("0.0.0.0", port)).is_ok());
    }
}
