pub mod device;
pub mod device_command;
pub mod notification;
pub mod server_cmd;

use crate::clock::Timestamp;
use crate::config::SharedConfig;
use crate::connection::ClientState;
use crate::error::{HiveError, HiveResult};
use crate::hub::{PollRequest, SharedHub};
use crate::model::{Command, Device, DeviceId, Equipment, Notification};
use crate::resp::Frame;
use std::collections::HashMap;
use tracing::warn;

/// Dispatch a parsed command to the appropriate handler.
pub async fn dispatch(
    cmd_name: &str,
    args: &[Frame],
    hub: &SharedHub,
    config: &SharedConfig,
    client: &mut ClientState,
) -> Frame {
    let result = match cmd_name {
        // Connection / server
        "PING" => server_cmd::cmd_ping(args),
        "QUIT" => server_cmd::cmd_quit(client),
        "CLIENT" => server_cmd::cmd_client(args, client),
        "TIME" => server_cmd::cmd_time(hub).await,
        "INFO" => server_cmd::cmd_info(hub, config).await,
        "CONFIG" => server_cmd::cmd_config(args, config).await,

        // Devices
        "DEVICE.SAVE" => device::cmd_save(args, hub).await,
        "DEVICE.GET" => device::cmd_get(args, hub).await,
        "DEVICE.EQUIPMENT" => device::cmd_equipment(args, hub).await,

        // Notifications
        "NOTIFICATION.INSERT" => notification::cmd_insert(args, hub).await,
        "NOTIFICATION.POLL" => notification::cmd_poll(args, hub, client).await,
        "NOTIFICATION.POLLMANY" => notification::cmd_poll_many(args, hub, client).await,

        // Commands
        "COMMAND.INSERT" => device_command::cmd_insert(args, hub).await,
        "COMMAND.POLL" => device_command::cmd_poll(args, hub, client).await,
        "COMMAND.POLLMANY" => device_command::cmd_poll_many(args, hub, client).await,
        "COMMAND.UPDATE" => device_command::cmd_update(args, hub).await,
        "COMMAND.WAIT" => device_command::cmd_wait(args, hub, client).await,

        _ => {
            let preview: Vec<String> = args
                .iter()
                .take(3)
                .filter_map(|a| a.to_text())
                .map(|s| format!("'{s}'"))
                .collect();
            Err(HiveError::UnknownCommand(cmd_name.to_lowercase(), preview.join(" ")))
        }
    };

    match result {
        Ok(frame) => frame,
        Err(e) => {
            if let HiveError::Storage(reason) = &e {
                warn!(client = client.id, cmd = cmd_name, %reason, "storage failure");
            }
            Frame::error(e.to_resp_error())
        }
    }
}

pub fn arg_text(args: &[Frame], index: usize) -> HiveResult<String> {
    args.get(index)
        .and_then(Frame::to_text)
        .ok_or(HiveError::SyntaxError)
}

pub fn arg_u64(arg: &Frame) -> HiveResult<u64> {
    arg.to_text()
        .and_then(|s| s.parse().ok())
        .ok_or(HiveError::NotInteger)
}

pub fn arg_i64(arg: &Frame) -> HiveResult<i64> {
    arg.to_text()
        .and_then(|s| s.parse().ok())
        .ok_or(HiveError::NotInteger)
}

pub fn arg_f64(arg: &Frame) -> HiveResult<f64> {
    arg.to_text()
        .and_then(|s| s.parse().ok())
        .ok_or(HiveError::NotFloat)
}

pub fn wrong_arg_count(cmd: &str) -> HiveError {
    HiveError::WrongArgCount(cmd.to_lowercase())
}

fn split_list(arg: &Frame) -> HiveResult<Vec<String>> {
    let text = arg.to_text().ok_or(HiveError::SyntaxError)?;
    Ok(text
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Trailing `[DEVICES g1,g2] [SINCE ts] [NAMES a,b] [WAIT secs]` options.
#[derive(Debug, Default)]
pub struct PollOptions {
    pub devices: Option<Vec<String>>,
    pub request: PollRequest,
}

impl PollOptions {
    pub fn parse(args: &[Frame], allow_devices: bool) -> HiveResult<Self> {
        let mut options = PollOptions::default();
        let mut i = 0;
        while i < args.len() {
            let opt = args[i].to_text().unwrap_or_default().to_uppercase();
            let value = args.get(i + 1).ok_or(HiveError::SyntaxError)?;
            match opt.as_str() {
                "SINCE" => options.request.since = Some(Timestamp::from_micros(arg_u64(value)?)),
                "NAMES" => options.request.names = Some(split_list(value)?),
                "WAIT" => options.request.wait = Some(arg_f64(value)?),
                "DEVICES" if allow_devices => options.devices = Some(split_list(value)?),
                _ => return Err(HiveError::SyntaxError),
            }
            i += 2;
        }
        Ok(options)
    }
}

/// Resolves device ids to guids for rows that span several devices.
pub struct GuidCache<'a> {
    hub: &'a SharedHub,
    guids: HashMap<DeviceId, String>,
}

impl<'a> GuidCache<'a> {
    pub fn new(hub: &'a SharedHub) -> Self {
        GuidCache {
            hub,
            guids: HashMap::new(),
        }
    }

    pub async fn guid(&mut self, id: DeviceId) -> HiveResult<String> {
        if let Some(guid) = self.guids.get(&id) {
            return Ok(guid.clone());
        }
        let guid = self.hub.device_by_id(id).await?.guid;
        self.guids.insert(id, guid.clone());
        Ok(guid)
    }
}

fn field(name: &str, value: impl Into<Vec<u8>>) -> [Frame; 2] {
    [Frame::bulk(name), Frame::bulk(value)]
}

fn optional_field(name: &str, value: Option<&str>) -> [Frame; 2] {
    [Frame::bulk(name), Frame::optional(value)]
}

pub fn device_frame(device: &Device) -> Frame {
    let fields = [
        field("id", device.id.to_string()),
        field("guid", device.guid.as_str()),
        field("name", device.name.as_str()),
        optional_field("status", device.status.as_deref()),
    ];
    Frame::array(fields.into_iter().flatten().collect())
}

pub fn equipment_frame(equipment: &Equipment) -> Frame {
    let fields = [
        field("code", equipment.code.as_str()),
        field("timestamp", equipment.timestamp.to_string()),
        optional_field("parameters", equipment.parameters.as_deref()),
    ];
    Frame::array(fields.into_iter().flatten().collect())
}

/// Flat field/value array, like HGETALL.
pub fn notification_frame(notification: &Notification, guid: &str) -> Frame {
    let fields = [
        field("id", notification.id.to_string()),
        field("timestamp", notification.timestamp.to_string()),
        field("device", guid),
        field("notification", notification.name.as_str()),
        optional_field("parameters", notification.parameters.as_deref()),
    ];
    Frame::array(fields.into_iter().flatten().collect())
}

pub fn command_frame(command: &Command, guid: &str) -> Frame {
    let fields = [
        field("id", command.id.to_string()),
        field("timestamp", command.timestamp.to_string()),
        field("device", guid),
        field("command", command.name.as_str()),
        optional_field("parameters", command.parameters.as_deref()),
        optional_field("lifetime", command.lifetime.map(|l| l.to_string()).as_deref()),
        optional_field("flags", command.flags.map(|f| f.to_string()).as_deref()),
        optional_field("status", command.status.as_deref()),
        optional_field("result", command.result.as_deref()),
    ];
    Frame::array(fields.into_iter().flatten().collect())
}
