use crate::core::errors::KernelError;
use std::net::TcpListener;
use tracing::debug;

/// Sockets a kernel binds: shell, iopub, stdin, control, heartbeat
pub const KERNEL_PORT_COUNT: usize = 5;

/// Find `count` distinct free TCP ports on `ip`
///
/// All listeners are held open until every port has been recorded, so the OS
/// cannot hand out the same port twice in one batch. The ports are released
/// before returning; the kernel binds them afterwards.
pub fn reserve_ports(ip: &str, count: usize) -> Result<Vec<u16>, KernelError> {
    let listeners = (0..count)
        .map(|_| TcpListener::bind((ip, 0)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| KernelError::KernelLaunch(format!("cannot reserve ports on {}: {}", ip, e)))?;

    let ports = listeners
        .iter()
        .map(|listener| listener.local_addr().map(|addr| addr.port()))
        .collect::<Result<Vec<_>, _>>()?;

    drop(listeners);
    debug!(?ports, "reserved kernel ports");
    Ok(ports)
}
