use crate::clock::{MonotonicClock, Timestamp};
use crate::error::HiveResult;
use crate::model::{
    Command, CommandId, Device, DeviceId, Equipment, NewCommand, Notification, OwnerFilter,
    name_matches,
};
use crate::store::Persistence;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    devices: HashMap<DeviceId, Device>,
    guids: HashMap<String, DeviceId>,
    /// Append-only, so also sorted by timestamp.
    notifications: Vec<Notification>,
    commands: BTreeMap<CommandId, Command>,
    equipment: BTreeMap<(DeviceId, String), Equipment>,
    next_device: u64,
    next_notification: u64,
    next_command: u64,
}

/// In-memory [`Persistence`].
///
/// Rows are stamped while the write lock is held and `current_timestamp`
/// reads the clock under the read lock, so timestamp order is commit order
/// and no cursor can be handed out between a row's stamp and its insert.
#[derive(Debug, Default)]
pub struct MemoryStore {
    clock: MonotonicClock,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            clock: MonotonicClock::new(),
            tables: RwLock::new(Tables::default()),
        }
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn current_timestamp(&self) -> HiveResult<Timestamp> {
        let _tables = self.tables.read().await;
        Ok(self.clock.now())
    }

    async fn save_device(&self, guid: &str, name: &str) -> HiveResult<Device> {
        let mut tables = self.tables.write().await;
        if let Some(id) = tables.guids.get(guid).copied() {
            if let Some(device) = tables.devices.get_mut(&id) {
                device.name = name.to_string();
                return Ok(device.clone());
            }
        }
        tables.next_device += 1;
        let device = Device {
            id: DeviceId(tables.next_device),
            guid: guid.to_string(),
            name: name.to_string(),
            status: None,
        };
        tables.guids.insert(device.guid.clone(), device.id);
        tables.devices.insert(device.id, device.clone());
        Ok(device)
    }

    async fn device_by_guid(&self, guid: &str) -> HiveResult<Option<Device>> {
        let tables = self.tables.read().await;
        Ok(tables
            .guids
            .get(guid)
            .and_then(|id| tables.devices.get(id))
            .cloned())
    }

    async fn device_by_id(&self, id: DeviceId) -> HiveResult<Option<Device>> {
        Ok(self.tables.read().await.devices.get(&id).cloned())
    }

    async fn update_device_status(&self, id: DeviceId, status: &str) -> HiveResult<Option<Device>> {
        let mut tables = self.tables.write().await;
        Ok(tables.devices.get_mut(&id).map(|device| {
            device.status = Some(status.to_string());
            device.clone()
        }))
    }

    async fn save_equipment(
        &self,
        device: DeviceId,
        code: &str,
        timestamp: Timestamp,
        parameters: Option<&str>,
    ) -> HiveResult<Equipment> {
        let equipment = Equipment {
            device_id: device,
            code: code.to_string(),
            timestamp,
            parameters: parameters.map(str::to_string),
        };
        let mut tables = self.tables.write().await;
        tables
            .equipment
            .insert((device, equipment.code.clone()), equipment.clone());
        Ok(equipment)
    }

    async fn equipment(&self, device: DeviceId) -> HiveResult<Vec<Equipment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .equipment
            .values()
            .filter(|e| e.device_id == device)
            .cloned()
            .collect())
    }

    async fn save_notification(
        &self,
        device: DeviceId,
        name: &str,
        parameters: Option<&str>,
    ) -> HiveResult<Notification> {
        let mut tables = self.tables.write().await;
        tables.next_notification += 1;
        let notification = Notification {
            id: tables.next_notification,
            device_id: device,
            timestamp: self.clock.now(),
            name: name.to_string(),
            parameters: parameters.map(str::to_string),
        };
        tables.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn notifications_since(
        &self,
        owner: &OwnerFilter,
        since: Timestamp,
        names: Option<&[String]>,
    ) -> HiveResult<Vec<Notification>> {
        let tables = self.tables.read().await;
        let start = tables
            .notifications
            .partition_point(|n| n.timestamp <= since);
        Ok(tables.notifications[start..]
            .iter()
            .filter(|n| owner.matches(n.device_id) && name_matches(names, &n.name))
            .cloned()
            .collect())
    }

    async fn save_command(&self, device: DeviceId, command: NewCommand) -> HiveResult<Command> {
        let mut tables = self.tables.write().await;
        tables.next_command += 1;
        let command = Command {
            id: CommandId(tables.next_command),
            device_id: device,
            timestamp: self.clock.now(),
            name: command.name,
            parameters: command.parameters,
            lifetime: command.lifetime,
            flags: command.flags,
            status: None,
            result: None,
        };
        tables.commands.insert(command.id, command.clone());
        Ok(command)
    }

    async fn commands_since(
        &self,
        owner: &OwnerFilter,
        since: Timestamp,
        names: Option<&[String]>,
    ) -> HiveResult<Vec<Command>> {
        let tables = self.tables.read().await;
        // Ids are assigned in timestamp order, so walking by id is walking by time.
        Ok(tables
            .commands
            .values()
            .filter(|c| c.timestamp > since)
            .filter(|c| owner.matches(c.device_id) && name_matches(names, &c.name))
            .cloned()
            .collect())
    }

    async fn command(&self, id: CommandId) -> HiveResult<Option<Command>> {
        Ok(self.tables.read().await.commands.get(&id).cloned())
    }

    async fn update_command(
        &self,
        id: CommandId,
        status: &str,
        result: Option<&str>,
    ) -> HiveResult<Option<Command>> {
        let mut tables = self.tables.write().await;
        Ok(tables.commands.get_mut(&id).map(|command| {
            command.status = Some(status.to_string());
            command.result = result.map(str::to_string);
            command.clone()
        }))
    }
}
