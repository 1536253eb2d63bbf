/// Connection lifecycle - everything needed to start and watch a kernel
///
/// # Components
/// - `reserve_ports`: free TCP ports for the kernel's five sockets
/// - `ConnectionDescriptor`: ports, key and scheme, written as the connection file
/// - `KernelSpec` / `KernelProcess`: argv templating and the supervised child
/// - `HeartbeatMonitor`: REQ ping against the heartbeat port
pub mod descriptor;
pub mod heartbeat;
pub mod ports;
pub mod process;

pub use descriptor::{runtime_dir, ConnectionDescriptor, RUNTIME_DIR_ENV};
pub use heartbeat::{HeartbeatMonitor, HeartbeatState};
pub use ports::{reserve_ports, KERNEL_PORT_COUNT};
pub use process::{
    InterruptMode, KernelProcess, KernelSpec, ProcessState, CONNECTION_FILE_PLACEHOLDER,
};
