use crate::deadline::WaitPolicy;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub loglevel: String,
    // Wait budgets, in seconds
    pub notification_poll_default: u64,
    pub notification_poll_max: u64,
    pub command_poll_default: u64,
    pub command_poll_max: u64,
    pub command_wait_default: u64,
    pub command_wait_max: u64,
    /// Hard cap on any single blocking call, whatever the policy says.
    pub request_deadline: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1".to_string(),
            port: 7474,
            loglevel: "info".to_string(),
            notification_poll_default: 30,
            notification_poll_max: 60,
            command_poll_default: 30,
            command_poll_max: 60,
            command_wait_default: 30,
            command_wait_max: 60,
            request_deadline: 120,
        }
    }
}

impl Config {
    pub fn from_args(args: &[String]) -> Self {
        let mut config = Config::default();
        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            if let Some(key) = flag.strip_prefix("--") {
                if i + 1 < args.len() {
                    if let Err(e) = config.set(key, &args[i + 1]) {
                        eprintln!("ignoring {flag}: {e}");
                    }
                    i += 1;
                }
            }
            i += 1;
        }
        config
    }

    pub fn notification_policy(&self) -> WaitPolicy {
        WaitPolicy::from_secs(self.notification_poll_default, self.notification_poll_max)
    }

    pub fn command_policy(&self) -> WaitPolicy {
        WaitPolicy::from_secs(self.command_poll_default, self.command_poll_max)
    }

    pub fn command_wait_policy(&self) -> WaitPolicy {
        WaitPolicy::from_secs(self.command_wait_default, self.command_wait_max)
    }

    pub fn keys() -> &'static [&'static str] {
        &[
            "bind",
            "port",
            "loglevel",
            "notification-poll-default",
            "notification-poll-max",
            "command-poll-default",
            "command-poll-max",
            "command-wait-default",
            "command-wait-max",
            "request-deadline",
        ]
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key.to_lowercase().as_str() {
            "bind" => Some(self.bind.clone()),
            "port" => Some(self.port.to_string()),
            "loglevel" => Some(self.loglevel.clone()),
            "notification-poll-default" => Some(self.notification_poll_default.to_string()),
            "notification-poll-max" => Some(self.notification_poll_max.to_string()),
            "command-poll-default" => Some(self.command_poll_default.to_string()),
            "command-poll-max" => Some(self.command_poll_max.to_string()),
            "command-wait-default" => Some(self.command_wait_default.to_string()),
            "command-wait-max" => Some(self.command_wait_max.to_string()),
            "request-deadline" => Some(self.request_deadline.to_string()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        fn secs(value: &str) -> Result<u64, String> {
            value
                .parse()
                .map_err(|_| format!("Invalid number of seconds '{value}'"))
        }

        match key.to_lowercase().as_str() {
            "bind" => self.bind = value.to_string(),
            "port" => {
                self.port = value
                    .parse()
                    .map_err(|_| "Invalid port value".to_string())?
            }
            "loglevel" => self.loglevel = value.to_string(),
            "notification-poll-default" => self.notification_poll_default = secs(value)?,
            "notification-poll-max" => self.notification_poll_max = secs(value)?,
            "command-poll-default" => self.command_poll_default = secs(value)?,
            "command-poll-max" => self.command_poll_max = secs(value)?,
            "command-wait-default" => self.command_wait_default = secs(value)?,
            "command-wait-max" => self.command_wait_max = secs(value)?,
            "request-deadline" => self.request_deadline = secs(value)?,
            other => return Err(format!("Unknown option or number of arguments for CONFIG SET - '{other}'")),
        }
        Ok(())
    }
}

pub type SharedConfig = Arc<RwLock<Config>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_args() {
        let config = Config::from_args(&args(&[
            "--port",
            "9000",
            "--notification-poll-max",
            "90",
            "--command-wait-default",
            "5",
        ]));
        assert_eq!(config.port, 9000);
        assert_eq!(config.notification_poll_max, 90);
        assert_eq!(config.command_wait_default, 5);
        assert_eq!(config.command_poll_max, 60);
    }

    #[test]
    fn test_from_args_ignores_bad_values() {
        let config = Config::from_args(&args(&["--port", "nope", "--bogus", "1"]));
        assert_eq!(config.port, 7474);
    }

    #[test]
    fn test_get_set_roundtrip_all_keys() {
        let mut config = Config::default();
        for key in Config::keys() {
            let value = config.get(key).unwrap();
            config.set(key, &value).unwrap();
        }
        assert!(config.get("maxmemory").is_none());
        assert!(config.set("request-deadline", "-1").is_err());
    }

    #[test]
    fn test_policies() {
        let mut config = Config::default();
        config.set("command-poll-max", "10").unwrap();
        assert_eq!(config.command_policy().resolve(Some(10000.0)), Duration::from_secs(10));
        assert_eq!(
            config.notification_policy().resolve(None),
            Duration::from_secs(30)
        );
        assert_eq!(config.command_wait_policy().max, Duration::from_secs(60));
    }
}
