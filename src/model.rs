use crate::clock::Timestamp;
use crate::waiter::Scope;
use std::fmt;

/// Internal device identifier, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    /// External identifier clients address the device by.
    pub guid: String,
    pub name: String,
    /// Last status the device reported through a `deviceStatus` notification.
    pub status: Option<String>,
}

/// Latest known state of one piece of a device's equipment, keyed by
/// (device, code).
#[derive(Debug, Clone, PartialEq)]
pub struct Equipment {
    pub device_id: DeviceId,
    pub code: String,
    pub timestamp: Timestamp,
    pub parameters: Option<String>,
}

/// Telemetry sent by a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub device_id: DeviceId,
    pub timestamp: Timestamp,
    pub name: String,
    pub parameters: Option<String>,
}

/// An instruction sent to a device. `status` stays `None` until the device
/// reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: CommandId,
    pub device_id: DeviceId,
    pub timestamp: Timestamp,
    pub name: String,
    pub parameters: Option<String>,
    pub lifetime: Option<u32>,
    pub flags: Option<i64>,
    pub status: Option<String>,
    pub result: Option<String>,
}

/// Fields a client supplies when creating a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewCommand {
    pub name: String,
    pub parameters: Option<String>,
    pub lifetime: Option<u32>,
    pub flags: Option<i64>,
}

/// Which devices a query or a wait covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerFilter {
    Any,
    Specific(DeviceId),
    Many(Vec<DeviceId>),
}

impl OwnerFilter {
    pub fn matches(&self, device: DeviceId) -> bool {
        match self {
            OwnerFilter::Any => true,
            OwnerFilter::Specific(id) => *id == device,
            OwnerFilter::Many(ids) => ids.contains(&device),
        }
    }

    /// Primary wait keys covering the same devices.
    pub fn scopes(&self) -> Vec<Scope<DeviceId>> {
        match self {
            OwnerFilter::Any => vec![Scope::Any],
            OwnerFilter::Specific(id) => vec![Scope::Key(*id)],
            OwnerFilter::Many(ids) => ids.iter().copied().map(Scope::Key).collect(),
        }
    }
}

/// Name filter where an empty list means "any name".
pub fn name_matches(names: Option<&[String]>, name: &str) -> bool {
    match names {
        None => true,
        Some(names) => names.is_empty() || names.iter().any(|n| n == name),
    }
}
