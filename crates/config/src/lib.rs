//! Configuration file loading for the record-synchronization service (§6.2).
//!
//! Settings live in a single ini-style file: a `[recceiver]` section for
//! service-wide options, plus one section per entry in `[recceiver] procs`
//! for that processor's own settings. Lookups are case-sensitive; every
//! recognized key has a hardcoded default.

pub mod error;
pub mod processors;
pub mod service;

pub use error::{ConfigError, Result};
pub use processors::{ProcessorConfig, ProcessorKind};
pub use service::ServiceConfig;

use std::path::{Path, PathBuf};

/// A fully parsed configuration: service settings plus every resolved
/// processor from `procs`, in the order they were listed.
#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub processors: Vec<ProcessorConfig>,
}

impl Config {
    /// Resolve which file to load, per §6.2's search order: an explicit
    /// path, else `/etc/recceiver.conf`, else `~/.recceiver.conf`, else an
    /// inline default that runs only the print processor.
    pub fn resolve(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let system_wide = Path::new("/etc/recceiver.conf");
        if system_wide.is_file() {
            return Self::load(system_wide);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let per_user = PathBuf::from(home).join(".recceiver.conf");
            if per_user.is_file() {
                return Self::load(&per_user);
            }
        }

        Ok(Self::print_only())
    }

    /// Parse a config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ini = ini::Ini::load_from_file(path)
            .map_err(|error| ConfigError::Ini { path: path.to_path_buf(), error })?;
        Self::from_ini(&ini)
    }

    /// Parse config from an in-memory ini document; mainly useful for tests.
    pub fn parse(src: &str) -> Result<Self> {
        let ini = ini::Ini::load_from_str(src)
            .map_err(|error| ConfigError::Ini {
                path: PathBuf::from("<string>"),
                error: ini::Error::Parse(error),
            })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &ini::Ini) -> Result<Self> {
        let service = ServiceConfig::parse(ini)?;

        let procs = ini.section(Some("recceiver")).and_then(|s| s.get("procs")).unwrap_or("");
        let processors = procs
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| ProcessorConfig::parse(ini, entry))
            .collect::<Result<Vec<_>>>()?;

        if processors.is_empty() {
            return Ok(Self { service, processors: Self::print_only().processors });
        }

        Ok(Self { service, processors })
    }

    /// The built-in fallback: default service settings, print processor only.
    fn print_only() -> Self {
        Self {
            service: ServiceConfig::default(),
            processors: vec![ProcessorConfig { instance_name: "print".to_string(), kind: ProcessorKind::Print }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_falls_back_to_a_print_only_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.service, ServiceConfig::default());
        assert_eq!(config.processors.len(), 1);
        assert!(matches!(config.processors[0].kind, ProcessorKind::Print));
    }

    #[test]
    fn procs_list_resolves_each_entry_in_order() {
        let config = Config::parse(
            "[recceiver]\nprocs=print, cf:mycf\n[mycf]\nusername=svc\n",
        )
        .unwrap();
        assert_eq!(config.processors.len(), 2);
        assert_eq!(config.processors[0].instance_name, "print");
        assert_eq!(config.processors[1].instance_name, "mycf");
    }

    #[test]
    fn resolve_without_an_explicit_path_or_system_files_falls_back_to_print_only() {
        // SAFETY: test-local; no concurrent HOME mutation in this process.
        let previous = std::env::var_os("HOME");
        unsafe {
            std::env::remove_var("HOME");
        }
        let config = Config::resolve(None).unwrap();
        assert_eq!(config.processors.len(), 1);
        if let Some(home) = previous {
            unsafe {
                std::env::set_var("HOME", home);
            }
        }
    }

    #[test]
    fn resolve_with_an_explicit_path_loads_that_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recceiver.conf");
        std::fs::write(&path, "[recceiver]\nprocs=print\nmaxActive=7\n").unwrap();

        let config = Config::resolve(Some(&path)).unwrap();
        assert_eq!(config.service.max_active, 7);
    }
}
