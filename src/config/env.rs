//! `$$NAME$$` substitution in container settings

use super::types::EnvVar;
use crate::host::HostInfo;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn substitution_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\$([A-Za-z_][A-Za-z0-9_]*)\$\$").expect("substitution pattern is valid")
    })
}

/// Variables available for substitution. Later insertions win.
#[derive(Debug, Clone, Default)]
pub struct EnvMap {
    vars: HashMap<String, String>,
}

impl EnvMap {
    /// Variables describing the current host
    pub fn for_host(host: &HostInfo) -> Self {
        let mut env = Self::default();
        env.insert("HOST_NAME", &host.host_name);
        env.insert("HUMAN_FRIENDLY_HOST_NAME", &host.human_friendly_host_name);
        env.insert("HOST_IP", &host.ip.to_string());
        env.insert("NUM_CPUS", &host.num_cpus.to_string());
        env.insert("HOST_OS", &host.os);
        env.insert("HOST_ARCH", &host.arch);
        env
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    /// Add config-declared variables. Their values may refer to variables
    /// already in the map.
    pub fn extend(&mut self, vars: &[EnvVar]) {
        for var in vars {
            let value = self.expand(&var.value);
            self.vars.insert(var.var.clone(), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Replace every known `$$NAME$$`; unknown names stay untouched
    pub fn expand(&self, input: &str) -> String {
        if !input.contains("$$") {
            return input.to_string();
        }

        substitution_pattern()
            .replace_all(input, |caps: &regex::Captures| {
                self.vars
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn host() -> HostInfo {
        HostInfo {
            host_name: "fakehost".to_string(),
            human_friendly_host_name: "FakeHost".to_string(),
            ip: Ipv4Addr::new(10, 76, 77, 78),
            num_cpus: 8,
            os: "linux".to_string(),
            arch: "amd64".to_string(),
        }
    }

    #[test]
    fn test_host_variables() {
        let env = EnvMap::for_host(&host());
        assert_eq!(
            env.expand("http://$$HOST_IP$$:8080/$$HOST_NAME$$"),
            "http://10.76.77.78:8080/fakehost"
        );
        assert_eq!(env.expand("$$NUM_CPUS$$ cpus"), "8 cpus");
    }

    #[test]
    fn test_unknown_variable_left_alone() {
        let env = EnvMap::for_host(&host());
        assert_eq!(env.expand("$$NOPE$$-$$HOST_OS$$"), "$$NOPE$$-linux");
    }

    #[test]
    fn test_declared_vars_can_refer_to_earlier_ones() {
        let mut env = EnvMap::for_host(&host());
        env.extend(&[
            EnvVar::new("DATA_ROOT", "/srv/$$HOST_NAME$$"),
            EnvVar::new("MEDIA", "$$DATA_ROOT$$/media"),
        ]);
        assert_eq!(env.get("MEDIA"), Some("/srv/fakehost/media"));
    }

    #[test]
    fn test_later_declarations_win() {
        let mut env = EnvMap::default();
        env.extend(&[EnvVar::new("TZ", "UTC")]);
        env.extend(&[EnvVar::new("TZ", "Europe/Berlin")]);
        assert_eq!(env.expand("$$TZ$$"), "Europe/Berlin");
    }
}
