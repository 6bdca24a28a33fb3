//! Per-processor configuration: one entry per `plugname:instname` pair in
//! `[recceiver] procs` (§6.2), resolved against its own `[instname]` section.

use recsync_processors::DirectoryConfig;

use crate::error::{ConfigError, Result};

/// Which processor implementation a `procs` entry selects.
#[derive(Debug, Clone)]
pub enum ProcessorKind {
    /// Logs every transaction; takes no configuration.
    Print,
    /// Reconciles against a directory service.
    Directory(Box<DirectoryConfig>),
}

/// One resolved entry from `procs`: its instance name and parsed settings.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Section name this entry's options were read from (`instname`, or
    /// `plugname` when no `instname` was given).
    pub instance_name: String,
    pub kind: ProcessorKind,
}

impl ProcessorConfig {
    pub(crate) fn parse(ini: &ini::Ini, entry: &str) -> Result<Self> {
        let (plugname, instname) = match entry.split_once(':') {
            Some((plugname, instname)) => (plugname.trim(), instname.trim()),
            None => (entry.trim(), ""),
        };
        let instance_name = if instname.is_empty() { plugname.to_string() } else { instname.to_string() };

        let kind = match plugname {
            "print" | "show" => ProcessorKind::Print,
            "cf" => ProcessorKind::Directory(Box::new(parse_directory_config(ini, &instance_name)?)),
            other => return Err(ConfigError::UnknownProcessor(other.to_string())),
        };

        Ok(Self { instance_name, kind })
    }
}

fn parse_directory_config(ini: &ini::Ini, section_name: &str) -> Result<DirectoryConfig> {
    let section = ini.section(Some(section_name));
    let get = |key: &str| section.and_then(|s| s.get(key));
    let mut config = DirectoryConfig::default();

    if let Some(v) = get("alias") {
        config.alias_enabled = parse_bool("alias", v)?;
    }
    if let Some(v) = get("recordType") {
        config.record_type_enabled = parse_bool("recordType", v)?;
    }
    if let Some(v) = get("recordDesc") {
        config.record_description_enabled = parse_bool("recordDesc", v)?;
    }
    if let Some(v) = get("iocConnectionInfo") {
        config.ioc_connection_info = parse_bool("iocConnectionInfo", v)?;
    }
    if let Some(v) = get("cleanOnStart") {
        config.clean_on_start = parse_bool("cleanOnStart", v)?;
    }
    if let Some(v) = get("cleanOnStop") {
        config.clean_on_stop = parse_bool("cleanOnStop", v)?;
    }
    if let Some(v) = get("username") {
        config.username = v.to_string();
    }
    if let Some(v) = get("recceiverId") {
        config.recceiver_id = v.to_string();
    }
    if let Some(v) = get("timezone") {
        config.timezone = v.to_string();
    }
    if let Some(v) = get("findSizeLimit") {
        config.find_size_limit = parse_usize("findSizeLimit", v)?;
    }
    if let Some(v) = get("url") {
        config.base_url = v.to_string();
    }
    if let Some(v) = get("environment_vars") {
        config.environment_vars = parse_environment_vars(v)?;
    }
    if let Some(v) = get("infotags") {
        config.info_tag_whitelist = split_tags(v);
    }

    Ok(config)
}

fn parse_environment_vars(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            pair.split_once(':')
                .map(|(env, prop)| (env.trim().to_string(), prop.trim().to_string()))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "environment_vars".to_string(),
                    value: pair.to_string(),
                })
        })
        .collect()
}

/// `infotags` is whitespace-separated in some deployments and
/// comma-separated in others; accept both by splitting on `,` and then on
/// whitespace, stripping each resulting token.
fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .flat_map(str::split_whitespace)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() }),
    }
}

fn parse_usize(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_entry_needs_no_section() {
        let ini = ini::Ini::load_from_str("[recceiver]\nprocs=print\n").unwrap();
        let config = ProcessorConfig::parse(&ini, "print").unwrap();
        assert_eq!(config.instance_name, "print");
        assert!(matches!(config.kind, ProcessorKind::Print));
    }

    #[test]
    fn instname_defaults_to_the_plugin_name() {
        let ini = ini::Ini::load_from_str("[recceiver]\nprocs=cf\n[cf]\nusername=svc\n").unwrap();
        let config = ProcessorConfig::parse(&ini, "cf").unwrap();
        assert_eq!(config.instance_name, "cf");
        match config.kind {
            ProcessorKind::Directory(dir) => assert_eq!(dir.username, "svc"),
            ProcessorKind::Print => panic!("expected a directory processor"),
        }
    }

    #[test]
    fn distinct_instname_selects_its_own_section() {
        let ini = ini::Ini::load_from_str("[recceiver]\nprocs=cf:mycf\n[mycf]\nrecceiverId=abc\n").unwrap();
        let config = ProcessorConfig::parse(&ini, "cf:mycf").unwrap();
        assert_eq!(config.instance_name, "mycf");
        match config.kind {
            ProcessorKind::Directory(dir) => assert_eq!(dir.recceiver_id, "abc"),
            ProcessorKind::Print => panic!("expected a directory processor"),
        }
    }

    #[test]
    fn unknown_plugin_name_is_rejected() {
        let ini = ini::Ini::load_from_str("[recceiver]\nprocs=db\n").unwrap();
        assert!(ProcessorConfig::parse(&ini, "db").is_err());
    }

    #[test]
    fn infotags_accepts_comma_and_whitespace_separated_lists() {
        assert_eq!(split_tags("a, b,c"), vec!["a", "b", "c"]);
        assert_eq!(split_tags("a b  c"), vec!["a", "b", "c"]);
        assert_eq!(split_tags("a, b c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn environment_vars_parses_epics_name_to_property_pairs() {
        let parsed = parse_environment_vars("ENGINEER:engineer, EPICS_HOST_ARCH:hostArch").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("ENGINEER".to_string(), "engineer".to_string()),
                ("EPICS_HOST_ARCH".to_string(), "hostArch".to_string()),
            ]
        );
    }
}
