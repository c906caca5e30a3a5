//! Persistence boundary.
//!
//! The hub only ever talks to [`Persistence`]; `MemoryStore` is the
//! in-process implementation the server runs with.

pub mod memory;

use crate::clock::Timestamp;
use crate::error::HiveResult;
use crate::model::{
    Command, CommandId, Device, DeviceId, Equipment, NewCommand, Notification, OwnerFilter,
};
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::MemoryStore;

/// Storage of devices, notifications and commands.
///
/// Implementations must make a saved row visible to every query issued after
/// the save returns, and must stamp rows from the same clock that
/// `current_timestamp` reads.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Server-authoritative "now".
    async fn current_timestamp(&self) -> HiveResult<Timestamp>;

    /// Insert or rename a device, keyed by guid.
    async fn save_device(&self, guid: &str, name: &str) -> HiveResult<Device>;

    async fn device_by_guid(&self, guid: &str) -> HiveResult<Option<Device>>;

    async fn device_by_id(&self, id: DeviceId) -> HiveResult<Option<Device>>;

    /// Returns `None` for an unknown device.
    async fn update_device_status(&self, id: DeviceId, status: &str) -> HiveResult<Option<Device>>;

    /// Insert or replace the equipment row for (`device`, `code`).
    async fn save_equipment(
        &self,
        device: DeviceId,
        code: &str,
        timestamp: Timestamp,
        parameters: Option<&str>,
    ) -> HiveResult<Equipment>;

    /// Every equipment row of a device, ordered by code.
    async fn equipment(&self, device: DeviceId) -> HiveResult<Vec<Equipment>>;

    async fn save_notification(
        &self,
        device: DeviceId,
        name: &str,
        parameters: Option<&str>,
    ) -> HiveResult<Notification>;

    /// Notifications stamped strictly after `since`, oldest first.
    async fn notifications_since(
        &self,
        owner: &OwnerFilter,
        since: Timestamp,
        names: Option<&[String]>,
    ) -> HiveResult<Vec<Notification>>;

    async fn save_command(&self, device: DeviceId, command: NewCommand) -> HiveResult<Command>;

    /// Commands stamped strictly after `since`, oldest first.
    async fn commands_since(
        &self,
        owner: &OwnerFilter,
        since: Timestamp,
        names: Option<&[String]>,
    ) -> HiveResult<Vec<Command>>;

    async fn command(&self, id: CommandId) -> HiveResult<Option<Command>>;

    /// Record a device's response. Returns `None` for an unknown command.
    async fn update_command(
        &self,
        id: CommandId,
        status: &str,
        result: Option<&str>,
    ) -> HiveResult<Option<Command>>;
}

pub type SharedPersistence = Arc<dyn Persistence>;
