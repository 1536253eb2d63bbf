use crate::core::config::EngineConfig;
use crate::core::connection::ports::{reserve_ports, KERNEL_PORT_COUNT};
use crate::core::errors::KernelError;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use zeroize::Zeroizing;

/// Environment variable overriding the runtime directory
pub const RUNTIME_DIR_ENV: &str = "JUPYTER_RUNTIME_DIR";

/// Everything a kernel needs to bind its sockets, as written to the connection file
///
/// The descriptor is immutable once generated and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub ip: String,
    pub transport: String,
    pub signature_scheme: String,
    pub key: Secret<String>,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
    pub kernel_name: Option<String>,
}

// The kernel reads the key from this file, so serialization must expose it
impl Serialize for ConnectionDescriptor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let fields = if self.kernel_name.is_some() { 10 } else { 9 };
        let mut state = serializer.serialize_struct("ConnectionDescriptor", fields)?;
        state.serialize_field("ip", &self.ip)?;
        state.serialize_field("transport", &self.transport)?;
        state.serialize_field("signature_scheme", &self.signature_scheme)?;
        state.serialize_field("key", self.key.expose_secret())?;
        state.serialize_field("shell_port", &self.shell_port)?;
        state.serialize_field("iopub_port", &self.iopub_port)?;
        state.serialize_field("stdin_port", &self.stdin_port)?;
        state.serialize_field("control_port", &self.control_port)?;
        state.serialize_field("hb_port", &self.hb_port)?;
        if let Some(kernel_name) = &self.kernel_name {
            state.serialize_field("kernel_name", kernel_name)?;
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for ConnectionDescriptor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct DescriptorHelper {
            ip: String,
            transport: String,
            signature_scheme: String,
            key: String,
            shell_port: u16,
            iopub_port: u16,
            stdin_port: u16,
            control_port: u16,
            hb_port: u16,
            #[serde(default)]
            kernel_name: Option<String>,
        }

        let helper = DescriptorHelper::deserialize(deserializer)?;
        Ok(Self {
            ip: helper.ip,
            transport: helper.transport,
            signature_scheme: helper.signature_scheme,
            key: Secret::new(helper.key),
            shell_port: helper.shell_port,
            iopub_port: helper.iopub_port,
            stdin_port: helper.stdin_port,
            control_port: helper.control_port,
            hb_port: helper.hb_port,
            kernel_name: helper.kernel_name,
        })
    }
}

/// Fresh signing key: 32 random bytes, hex encoded
fn generate_key() -> String {
    let mut bytes = Zeroizing::new([0u8; 32]);
    rand::thread_rng().fill_bytes(bytes.as_mut_slice());
    hex::encode(bytes.as_slice())
}

impl ConnectionDescriptor {
    /// Build a descriptor for a new kernel
    ///
    /// TCP descriptors get freshly reserved ports; IPC descriptors number
    /// their sockets 1..=5 as Jupyter does.
    pub fn generate(config: &EngineConfig, kernel_name: Option<String>) -> Result<Self, KernelError> {
        let ports = if config.transport == "ipc" {
            (1..=KERNEL_PORT_COUNT as u16).collect()
        } else {
            reserve_ports(&config.ip, KERNEL_PORT_COUNT)?
        };

        Ok(Self {
            ip: config.ip.clone(),
            transport: config.transport.clone(),
            signature_scheme: config.signature_scheme.clone(),
            key: Secret::new(generate_key()),
            shell_port: ports[0],
            iopub_port: ports[1],
            stdin_port: ports[2],
            control_port: ports[3],
            hb_port: ports[4],
            kernel_name,
        })
    }

    /// Socket address of one of the kernel's ports
    pub fn endpoint(&self, port: u16) -> String {
        if self.transport == "ipc" {
            format!("ipc://{}-{}", self.ip, port)
        } else {
            format!("{}://{}:{}", self.transport, self.ip, port)
        }
    }

    pub fn shell_endpoint(&self) -> String {
        self.endpoint(self.shell_port)
    }

    pub fn iopub_endpoint(&self) -> String {
        self.endpoint(self.iopub_port)
    }

    pub fn stdin_endpoint(&self) -> String {
        self.endpoint(self.stdin_port)
    }

    pub fn control_endpoint(&self) -> String {
        self.endpoint(self.control_port)
    }

    pub fn heartbeat_endpoint(&self) -> String {
        self.endpoint(self.hb_port)
    }

    /// Write the descriptor as `kernel-<uuid>.json` inside `dir`
    ///
    /// The file is written to a temporary sibling and renamed into place, so
    /// a kernel never observes a partially written file.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, KernelError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("kernel-{}.json", uuid::Uuid::new_v4()));

        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.flush()?;
        file.persist(&path).map_err(|e| KernelError::IoError(e.error))?;

        debug!(path = %path.display(), "wrote connection file");
        Ok(path)
    }

    /// Load a descriptor from an existing connection file
    pub fn read_from(path: &Path) -> Result<Self, KernelError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Directory that holds connection files
///
/// Resolution order: explicit configuration, `JUPYTER_RUNTIME_DIR`, then the
/// platform data directory plus `jupyter/runtime`.
pub fn runtime_dir(config: &EngineConfig) -> Result<PathBuf, KernelError> {
    if let Some(dir) = &config.runtime_dir {
        return Ok(dir.clone());
    }
    if let Some(dir) = env::var_os(RUNTIME_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    directories::BaseDirs::new()
        .map(|dirs| dirs.data_dir().join("jupyter").join("runtime"))
        .ok_or_else(|| {
            KernelError::KernelLaunch("cannot determine a runtime directory".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    #[test]
    fn test_generate_tcp_descriptor() {
        let descriptor = ConnectionDescriptor::generate(&EngineConfig::new(), None).unwrap();

        let ports: HashSet<u16> = [
            descriptor.shell_port,
            descriptor.iopub_port,
            descriptor.stdin_port,
            descriptor.control_port,
            descriptor.hb_port,
        ]
        .into_iter()
        .collect();
        assert_eq!(ports.len(), 5);
        assert_eq!(descriptor.key.expose_secret().len(), 64);
        assert_eq!(descriptor.signature_scheme, "hmac-sha256");
        assert!(descriptor
            .shell_endpoint()
            .starts_with("tcp://127.0.0.1:"));
    }

    #[test]
    fn test_keys_differ_between_descriptors() {
        let a = ConnectionDescriptor::generate(&EngineConfig::new(), None).unwrap();
        let b = ConnectionDescriptor::generate(&EngineConfig::new(), None).unwrap();
        assert_ne!(a.key.expose_secret(), b.key.expose_secret());
    }

    #[test]
    fn test_ipc_endpoints() {
        let mut config = EngineConfig::new();
        config.transport = "ipc".to_string();
        config.ip = "/tmp/kernel-ipc".to_string();
        let descriptor = ConnectionDescriptor::generate(&config, None).unwrap();

        assert_eq!(descriptor.shell_endpoint(), "ipc:///tmp/kernel-ipc-1");
        assert_eq!(descriptor.heartbeat_endpoint(), "ipc:///tmp/kernel-ipc-5");
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let descriptor =
            ConnectionDescriptor::generate(&EngineConfig::new(), Some("python3".to_string())).unwrap();

        let path = descriptor.write_to(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("kernel-") && name.ends_with(".json"));

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["key"], descriptor.key.expose_secret().as_str());
        assert_eq!(raw["kernel_name"], "python3");

        let loaded = ConnectionDescriptor::read_from(&path).unwrap();
        assert_eq!(loaded.shell_port, descriptor.shell_port);
        assert_eq!(loaded.key.expose_secret(), descriptor.key.expose_secret());

        // only the final file remains; no temporary siblings
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_debug_output_hides_key() {
        let descriptor = ConnectionDescriptor::generate(&EngineConfig::new(), None).unwrap();
        let debug = format!("{:?}", descriptor);
        assert!(!debug.contains(descriptor.key.expose_secret().as_str()));
    }

    #[test]
    fn test_runtime_dir_prefers_config() {
        let config = EngineConfig::new().runtime_dir("/srv/runtime");
        assert_eq!(runtime_dir(&config).unwrap(), PathBuf::from("/srv/runtime"));
    }
}
