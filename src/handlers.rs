//! Server-side reactions to well-known notification names.
//!
//! After a notification is stored and before pollers are woken, the hub hands
//! it to every handler registered for its name. Names match
//! case-insensitively. A failing handler is logged and never fails the insert.

use crate::error::{HiveError, HiveResult};
use crate::model::Notification;
use crate::store::Persistence;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Notification that reports a device's own status.
pub const DEVICE_STATUS: &str = "deviceStatus";
/// Notification that reports the state of one piece of equipment.
pub const EQUIPMENT: &str = "equipment";

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Notification names this handler reacts to.
    fn notification_names(&self) -> &[&'static str];

    async fn handle(&self, store: &dyn Persistence, notification: &Notification) -> HiveResult<()>;
}

/// Parameters as a JSON object. Anything else, including no parameters at
/// all, is rejected.
fn parameters(notification: &Notification) -> HiveResult<Map<String, Value>> {
    let raw = notification.parameters.as_deref().unwrap_or("null");
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(HiveError::InvalidParameters(
            "parameters must be a JSON object".into(),
        )),
    }
}

/// Non-empty string field, or an error naming the missing field.
fn required_text(params: &Map<String, Value>, key: &str) -> HiveResult<String> {
    match params.get(key).and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(HiveError::InvalidParameters(format!(
            "missing required '{key}' parameter"
        ))),
    }
}

/// `deviceStatus {"status": "..."}` sets the device's status.
pub struct DeviceStatusHandler;

#[async_trait]
impl NotificationHandler for DeviceStatusHandler {
    fn notification_names(&self) -> &[&'static str] {
        &[DEVICE_STATUS]
    }

    async fn handle(&self, store: &dyn Persistence, notification: &Notification) -> HiveResult<()> {
        let status = required_text(&parameters(notification)?, "status")?;
        store
            .update_device_status(notification.device_id, &status)
            .await?
            .ok_or(HiveError::DeviceNotFound)?;
        Ok(())
    }
}

/// `equipment {"equipment": code, ...}` upserts that equipment's state. The
/// code itself is stripped from the stored parameters.
pub struct EquipmentHandler;

#[async_trait]
impl NotificationHandler for EquipmentHandler {
    fn notification_names(&self) -> &[&'static str] {
        &[EQUIPMENT]
    }

    async fn handle(&self, store: &dyn Persistence, notification: &Notification) -> HiveResult<()> {
        let mut params = parameters(notification)?;
        let code = required_text(&params, "equipment")?;
        params.remove("equipment");
        let rest = Value::Object(params).to_string();
        store
            .save_equipment(
                notification.device_id,
                &code,
                notification.timestamp,
                Some(&rest),
            )
            .await?;
        Ok(())
    }
}

/// Handlers keyed by lowercased notification name.
#[derive(Default)]
pub struct NotificationRouter {
    handlers: HashMap<String, Vec<Arc<dyn NotificationHandler>>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The device-status and equipment handlers.
    pub fn standard() -> Self {
        let mut router = Self::new();
        router.register(Arc::new(DeviceStatusHandler));
        router.register(Arc::new(EquipmentHandler));
        router
    }

    pub fn register(&mut self, handler: Arc<dyn NotificationHandler>) {
        for name in handler.notification_names() {
            self.handlers
                .entry(name.to_lowercase())
                .or_default()
                .push(handler.clone());
        }
    }

    /// Run every handler registered for the notification's name. Returns how
    /// many succeeded.
    pub async fn process(&self, store: &dyn Persistence, notification: &Notification) -> usize {
        let Some(handlers) = self.handlers.get(&notification.name.to_lowercase()) else {
            return 0;
        };
        let mut handled = 0;
        for handler in handlers {
            match handler.handle(store, notification).await {
                Ok(()) => handled += 1,
                Err(e) => warn!(
                    device = %notification.device_id,
                    name = %notification.name,
                    error = %e,
                    "notification handler failed"
                ),
            }
        }
        debug!(name = %notification.name, handled, "notification handlers ran");
        handled
    }
}
