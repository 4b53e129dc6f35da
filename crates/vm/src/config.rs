//! Virtual machine configuration.
//!
//! Tunables with sensible defaults, optionally loaded from a TOML file:
//!
//! ```toml
//! stack_capacity = 4096
//! heap_capacity = 256
//! collect_on_halt = true
//! ```

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Initial stack size in bytes; the stack grows on demand.
    pub stack_capacity: usize,
    /// Initial number of heap segment slots; the heap vector grows on
    /// demand.
    pub heap_capacity: usize,
    /// Run a final garbage collection when execution finishes.
    pub collect_on_halt: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_capacity: 1024,
            heap_capacity: 128,
            collect_on_halt: true,
        }
    }
}

impl VmConfig {
    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("invalid VM configuration: {}", e))
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("couldn't open '{}' for reading: {}", path.display(), e))?;
        Self::from_toml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.stack_capacity, 1024);
        assert_eq!(config.heap_capacity, 128);
        assert!(config.collect_on_halt);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = VmConfig::from_toml("stack_capacity = 4096").unwrap();
        assert_eq!(config.stack_capacity, 4096);
        assert_eq!(config.heap_capacity, 128);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(VmConfig::from_toml("stack_size = 10").is_err());
    }
}
