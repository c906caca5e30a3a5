use crate::command::{arg_text, wrong_arg_count};
use crate::config::{Config, SharedConfig};
use crate::connection::ClientState;
use crate::error::{HiveError, HiveResult};
use crate::hub::SharedHub;
use crate::resp::Frame;
use tracing::info;

pub fn cmd_ping(args: &[Frame]) -> HiveResult<Frame> {
    match args {
        [] => Ok(Frame::simple("PONG")),
        [msg] => Ok(msg.as_bytes().map_or_else(|| Frame::simple("PONG"), Frame::bulk)),
        _ => Err(wrong_arg_count("ping")),
    }
}

pub fn cmd_quit(client: &mut ClientState) -> HiveResult<Frame> {
    client.should_close = true;
    Ok(Frame::ok())
}

/// CLIENT SETNAME | GETNAME | ID
pub fn cmd_client(args: &[Frame], client: &mut ClientState) -> HiveResult<Frame> {
    let subcmd = arg_text(args, 0)
        .map_err(|_| wrong_arg_count("client"))?
        .to_uppercase();
    match subcmd.as_str() {
        "SETNAME" => {
            if args.len() != 2 {
                return Err(wrong_arg_count("client|setname"));
            }
            let name = arg_text(args, 1)?;
            if name.contains(char::is_whitespace) {
                return Err(HiveError::Generic(
                    "Client names cannot contain spaces, newlines or special characters.".into(),
                ));
            }
            client.name = (!name.is_empty()).then_some(name);
            Ok(Frame::ok())
        }
        "GETNAME" => Ok(Frame::optional(client.name.clone())),
        "ID" => Ok(Frame::integer(client.id as i64)),
        other => Err(HiveError::Generic(format!(
            "unknown subcommand '{}'. Try CLIENT HELP.",
            other.to_lowercase()
        ))),
    }
}

/// Store clock in microseconds. The value is a valid `SINCE` cursor.
pub async fn cmd_time(hub: &SharedHub) -> HiveResult<Frame> {
    let now = hub.current_timestamp().await?;
    Ok(Frame::integer(now.as_micros() as i64))
}

pub async fn cmd_info(hub: &SharedHub, config: &SharedConfig) -> HiveResult<Frame> {
    let cfg = config.read().await;
    let stats = hub.stats();
    let mut info = String::new();

    info.push_str("# Server\r\n");
    info.push_str(&format!("hivepoll_version:{}\r\n", env!("CARGO_PKG_VERSION")));
    info.push_str(&format!("process_id:{}\r\n", std::process::id()));
    info.push_str(&format!("tcp_port:{}\r\n", cfg.port));
    info.push_str("\r\n");

    info.push_str("# Waiters\r\n");
    info.push_str(&format!("notification_waits:{}\r\n", stats.notification_waits));
    info.push_str(&format!("command_waits:{}\r\n", stats.command_waits));
    info.push_str(&format!("command_update_waits:{}\r\n", stats.command_update_waits));
    info.push_str("\r\n");

    info.push_str("# Limits\r\n");
    for key in Config::keys().iter().filter(|k| k.contains('-')) {
        if let Some(value) = cfg.get(key) {
            info.push_str(&format!("{}:{}\r\n", key.replace('-', "_"), value));
        }
    }

    Ok(Frame::bulk(info))
}

pub async fn cmd_config(args: &[Frame], config: &SharedConfig) -> HiveResult<Frame> {
    let subcmd = arg_text(args, 0)
        .map_err(|_| wrong_arg_count("config"))?
        .to_uppercase();

    match subcmd.as_str() {
        "GET" => {
            if args.len() != 2 {
                return Err(wrong_arg_count("config|get"));
            }
            let pattern = arg_text(args, 1)?.to_lowercase();
            let cfg = config.read().await;
            let mut result = Vec::new();
            for key in Config::keys().iter().filter(|k| key_matches(&pattern, k)) {
                if let Some(value) = cfg.get(key) {
                    result.push(Frame::bulk(*key));
                    result.push(Frame::bulk(value));
                }
            }
            Ok(Frame::array(result))
        }
        "SET" => {
            if args.len() < 3 || args.len() % 2 == 0 {
                return Err(wrong_arg_count("config|set"));
            }
            // All pairs apply or none do.
            let mut cfg = config.write().await;
            let mut updated = cfg.clone();
            for pair in args[1..].chunks(2) {
                let key = arg_text(pair, 0)?;
                let value = arg_text(pair, 1)?;
                updated.set(&key, &value).map_err(HiveError::Generic)?;
            }
            *cfg = updated;
            info!(args = args.len() / 2, "configuration updated");
            Ok(Frame::ok())
        }
        "RESETSTAT" => Ok(Frame::ok()),
        _ => Err(HiveError::Generic(format!(
            "unknown subcommand '{}'. Try CONFIG HELP.",
            subcmd.to_lowercase()
        ))),
    }
}

/// `*`, an exact key, or a `prefix*` pattern.
fn key_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tokio_util::sync::CancellationToken;

    fn bulk_args(words: &[&str]) -> Vec<Frame> {
        words.iter().map(|w| Frame::bulk(*w)).collect()
    }

    #[test]
    fn test_ping() {
        assert_eq!(cmd_ping(&[]).unwrap(), Frame::simple("PONG"));
        assert_eq!(cmd_ping(&bulk_args(&["hi"])).unwrap(), Frame::bulk("hi"));
        assert!(cmd_ping(&bulk_args(&["a", "b"])).is_err());
    }

    #[test]
    fn test_client_name() {
        let mut client = ClientState::new(&CancellationToken::new());
        assert_eq!(cmd_client(&bulk_args(&["GETNAME"]), &mut client).unwrap(), Frame::nil());
        cmd_client(&bulk_args(&["setname", "gateway"]), &mut client).unwrap();
        assert_eq!(
            cmd_client(&bulk_args(&["GETNAME"]), &mut client).unwrap(),
            Frame::bulk("gateway")
        );
        assert!(cmd_client(&bulk_args(&["SETNAME", "a b"]), &mut client).is_err());
    }

    #[tokio::test]
    async fn test_config_get_set() {
        let config: SharedConfig = Arc::new(RwLock::new(Config::default()));
        let reply = cmd_config(&bulk_args(&["GET", "command-wait-*"]), &config).await.unwrap();
        assert_eq!(
            reply,
            Frame::array(vec![
                Frame::bulk("command-wait-default"),
                Frame::bulk("30"),
                Frame::bulk("command-wait-max"),
                Frame::bulk("60"),
            ])
        );

        cmd_config(&bulk_args(&["SET", "notification-poll-max", "5"]), &config)
            .await
            .unwrap();
        assert_eq!(config.read().await.notification_poll_max, 5);

        // A bad pair rejects the whole command.
        let err = cmd_config(
            &bulk_args(&["SET", "command-poll-max", "7", "no-such-key", "1"]),
            &config,
        )
        .await;
        assert!(err.is_err());
        assert_eq!(config.read().await.command_poll_max, 60);
    }

    #[test]
    fn test_key_matches() {
        assert!(key_matches("*", "port"));
        assert!(key_matches("port", "port"));
        assert!(key_matches("command-*", "command-poll-max"));
        assert!(!key_matches("command-*", "request-deadline"));
    }
}
