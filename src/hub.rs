//! Device message hub: the poll operations and the write-path hooks that wake
//! them.
//!
//! Every write commits to the store first and only then notifies the matching
//! registry. Notification handlers run in between, so a poller woken by a
//! `deviceStatus` row already sees the new status. Every poll registers before it re-queries (see [`poll_until`]).

use crate::clock::Timestamp;
use crate::config::SharedConfig;
use crate::deadline::{WaitPolicy, WaitScope};
use crate::error::{HiveError, HiveResult};
use crate::handlers::NotificationRouter;
use crate::model::{
    Command, CommandId, Device, DeviceId, Equipment, NewCommand, Notification, OwnerFilter,
};
use crate::poll::{Interest, poll_until};
use crate::store::SharedPersistence;
use crate::waiter::{ObjectWaiter, Scope};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Caller-side parameters shared by every row poll.
#[derive(Debug, Clone, Default)]
pub struct PollRequest {
    /// Exclusive resume point. `None` means "from now".
    pub since: Option<Timestamp>,
    /// Names to match. `None` or empty matches every name.
    pub names: Option<Vec<String>>,
    /// Requested wait in seconds. `None` takes the configured default.
    pub wait: Option<f64>,
}

impl PollRequest {
    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn names<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn wait(mut self, secs: f64) -> Self {
        self.wait = Some(secs);
        self
    }

    fn name_filter(&self) -> Option<Vec<String>> {
        self.names.clone().filter(|names| !names.is_empty())
    }
}

#[derive(Debug, Clone, Copy)]
enum PollKind {
    Notification,
    Command,
    CommandUpdate,
}

/// Outstanding bucket memberships per registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub notification_waits: usize,
    pub command_waits: usize,
    pub command_update_waits: usize,
}

pub struct MessageHub {
    store: SharedPersistence,
    config: SharedConfig,
    handlers: NotificationRouter,
    notifications: ObjectWaiter<DeviceId, String>,
    commands: ObjectWaiter<DeviceId, String>,
    command_updates: ObjectWaiter<CommandId>,
}

pub type SharedHub = Arc<MessageHub>;

impl MessageHub {
    pub fn new(store: SharedPersistence, config: SharedConfig) -> Self {
        MessageHub {
            store,
            config,
            handlers: NotificationRouter::standard(),
            notifications: ObjectWaiter::new(),
            commands: ObjectWaiter::new(),
            command_updates: ObjectWaiter::new(),
        }
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            notification_waits: self.notifications.registrations(),
            command_waits: self.commands.registrations(),
            command_update_waits: self.command_updates.registrations(),
        }
    }

    pub async fn current_timestamp(&self) -> HiveResult<Timestamp> {
        self.store.current_timestamp().await
    }

    // Devices

    pub async fn register_device(&self, guid: &str, name: &str) -> HiveResult<Device> {
        let device = self.store.save_device(guid, name).await?;
        debug!(guid, id = %device.id, "device saved");
        Ok(device)
    }

    pub async fn device(&self, guid: &str) -> HiveResult<Device> {
        self.store
            .device_by_guid(guid)
            .await?
            .ok_or(HiveError::DeviceNotFound)
    }

    pub async fn device_by_id(&self, id: DeviceId) -> HiveResult<Device> {
        self.store
            .device_by_id(id)
            .await?
            .ok_or(HiveError::DeviceNotFound)
    }

    pub async fn equipment(&self, device: DeviceId) -> HiveResult<Vec<Equipment>> {
        self.store.equipment(device).await
    }

    // Write path

    pub async fn insert_notification(
        &self,
        device: DeviceId,
        name: &str,
        parameters: Option<&str>,
    ) -> HiveResult<Notification> {
        let notification = self.store.save_notification(device, name, parameters).await?;
        self.handlers
            .process(self.store.as_ref(), &notification)
            .await;
        let woken = self
            .notifications
            .notify_changed([Scope::Key(device), Scope::Any], Some(&notification.name));
        trace!(%device, name, woken, "notification inserted");
        Ok(notification)
    }

    pub async fn insert_command(&self, device: DeviceId, command: NewCommand) -> HiveResult<Command> {
        let command = self.store.save_command(device, command).await?;
        let woken = self
            .commands
            .notify_changed([Scope::Key(device), Scope::Any], Some(&command.name));
        trace!(%device, name = %command.name, woken, "command inserted");
        Ok(command)
    }

    /// Record a device's response to one of its commands.
    pub async fn update_command(
        &self,
        device: DeviceId,
        id: CommandId,
        status: &str,
        result: Option<&str>,
    ) -> HiveResult<Command> {
        self.owned_command(device, id).await?;
        let command = self
            .store
            .update_command(id, status, result)
            .await?
            .ok_or(HiveError::CommandNotFound)?;
        let woken = self
            .command_updates
            .notify_changed([Scope::Key(id), Scope::Any], None);
        trace!(%device, command = %id, status, woken, "command updated");
        Ok(command)
    }

    // Poll path

    /// New notifications of one device.
    pub async fn poll_notifications(
        &self,
        device: DeviceId,
        request: &PollRequest,
        cancel: &CancellationToken,
    ) -> HiveResult<Vec<Notification>> {
        self.poll_notification_rows(OwnerFilter::Specific(device), request, cancel)
            .await
    }

    /// New notifications of several devices, or of every device when
    /// `devices` is `None`.
    pub async fn poll_notifications_many(
        &self,
        devices: Option<Vec<DeviceId>>,
        request: &PollRequest,
        cancel: &CancellationToken,
    ) -> HiveResult<Vec<(DeviceId, Notification)>> {
        let owner = devices.map_or(OwnerFilter::Any, OwnerFilter::Many);
        let rows = self.poll_notification_rows(owner, request, cancel).await?;
        Ok(rows.into_iter().map(|n| (n.device_id, n)).collect())
    }

    /// New commands for one device.
    pub async fn poll_commands(
        &self,
        device: DeviceId,
        request: &PollRequest,
        cancel: &CancellationToken,
    ) -> HiveResult<Vec<Command>> {
        self.poll_command_rows(OwnerFilter::Specific(device), request, cancel)
            .await
    }

    pub async fn poll_commands_many(
        &self,
        devices: Option<Vec<DeviceId>>,
        request: &PollRequest,
        cancel: &CancellationToken,
    ) -> HiveResult<Vec<(DeviceId, Command)>> {
        let owner = devices.map_or(OwnerFilter::Any, OwnerFilter::Many);
        let rows = self.poll_command_rows(owner, request, cancel).await?;
        Ok(rows.into_iter().map(|c| (c.device_id, c)).collect())
    }

    /// Wait until the device has set a status on the command.
    ///
    /// Returns at once if it already has one, `None` if the wait runs out.
    pub async fn wait_command_update(
        &self,
        device: DeviceId,
        id: CommandId,
        wait: Option<f64>,
        cancel: &CancellationToken,
    ) -> HiveResult<Option<Command>> {
        let command = self.owned_command(device, id).await?;
        if command.status.is_some() {
            return Ok(Some(command));
        }

        let scope = self.scope(PollKind::CommandUpdate, wait, cancel).await;
        let interest = Interest::primary(Scope::Key(id));
        let store = &self.store;
        poll_until(
            &self.command_updates,
            &interest,
            &scope,
            Timestamp::EPOCH,
            |_| async move {
                let command = store.command(id).await?;
                Ok::<_, HiveError>(command.filter(|c| c.status.is_some()))
            },
        )
        .await
    }

    async fn poll_notification_rows(
        &self,
        owner: OwnerFilter,
        request: &PollRequest,
        cancel: &CancellationToken,
    ) -> HiveResult<Vec<Notification>> {
        let names = request.name_filter();
        let since = self.cursor(request.since).await?;
        let scope = self.scope(PollKind::Notification, request.wait, cancel).await;
        let interest = Interest::new(owner.scopes(), names.clone());

        let store = &self.store;
        let owner = &owner;
        let names = names.as_deref();
        poll_until(&self.notifications, &interest, &scope, since, |since| async move {
            store.notifications_since(owner, since, names).await
        })
        .await
    }

    async fn poll_command_rows(
        &self,
        owner: OwnerFilter,
        request: &PollRequest,
        cancel: &CancellationToken,
    ) -> HiveResult<Vec<Command>> {
        let names = request.name_filter();
        let since = self.cursor(request.since).await?;
        let scope = self.scope(PollKind::Command, request.wait, cancel).await;
        let interest = Interest::new(owner.scopes(), names.clone());

        let store = &self.store;
        let owner = &owner;
        let names = names.as_deref();
        poll_until(&self.commands, &interest, &scope, since, |since| async move {
            store.commands_since(owner, since, names).await
        })
        .await
    }

    async fn owned_command(&self, device: DeviceId, id: CommandId) -> HiveResult<Command> {
        match self.store.command(id).await? {
            Some(command) if command.device_id == device => Ok(command),
            _ => Err(HiveError::CommandNotFound),
        }
    }

    async fn cursor(&self, since: Option<Timestamp>) -> HiveResult<Timestamp> {
        match since {
            Some(since) => Ok(since),
            None => self.store.current_timestamp().await,
        }
    }

    async fn scope(&self, kind: PollKind, wait: Option<f64>, cancel: &CancellationToken) -> WaitScope {
        let cfg = self.config.read().await;
        let policy: WaitPolicy = match kind {
            PollKind::Notification => cfg.notification_policy(),
            PollKind::Command => cfg.command_policy(),
            PollKind::CommandUpdate => cfg.command_wait_policy(),
        };
        let budget = policy.resolve(wait);
        trace!(?kind, ?wait, ?budget, "wait budget");
        WaitScope::new(budget, Duration::from_secs(cfg.request_deadline), cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryStore;
    use tokio::sync::RwLock;
    use tokio::time::Instant;

    fn hub() -> SharedHub {
        let config = Arc::new(RwLock::new(Config::default()));
        Arc::new(MessageHub::new(Arc::new(MemoryStore::new()), config))
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_one_scenario() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let t0 = hub.current_timestamp().await.unwrap();
        let cancel = CancellationToken::new();

        let writer = {
            let hub = hub.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                hub.insert_notification(d1, "temp", Some("21.5")).await.unwrap()
            })
        };

        let start = Instant::now();
        let rows = hub
            .poll_notifications(d1, &PollRequest::default().since(t0).wait(5.0), &cancel)
            .await
            .unwrap();
        let written = writer.await.unwrap();
        assert_eq!(rows, vec![written.clone()]);
        assert!(start.elapsed() < Duration::from_millis(150));

        let start = Instant::now();
        let rows = hub
            .poll_notifications(d1, &PollRequest::default().since(written.timestamp).wait(1.0), &cancel)
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(hub.stats(), HubStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clamped_to_server_max() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let rows = hub
            .poll_notifications(d1, &PollRequest::default().wait(10000.0), &cancel)
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_wait_when_unspecified() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let cancel = CancellationToken::new();
        let start = Instant::now();
        hub.poll_commands(d1, &PollRequest::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_zero_wait_on_empty_store() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let cancel = CancellationToken::new();
        let start = std::time::Instant::now();
        let rows = hub
            .poll_notifications(d1, &PollRequest::default().wait(0.0), &cancel)
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_filter_on_poll() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let t0 = hub.current_timestamp().await.unwrap();
        let cancel = CancellationToken::new();

        {
            let hub = hub.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                hub.insert_notification(d1, "humidity", None).await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                hub.insert_notification(d1, "temp", None).await.unwrap();
            });
        }

        let rows = hub
            .poll_notifications(d1, &PollRequest::default().since(t0).names(["temp"]).wait(5.0), &cancel)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "temp");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_many_any_device() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let d2 = hub.register_device("d2", "D2").await.unwrap().id;
        let cancel = CancellationToken::new();

        {
            let hub = hub.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                hub.insert_command(d2, NewCommand { name: "blink".into(), ..Default::default() })
                    .await
                    .unwrap();
            });
        }

        let rows = hub
            .poll_commands_many(None, &PollRequest::default().wait(5.0), &cancel)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, d2);

        // A set that excludes d2 does not see it.
        let rows = hub
            .poll_commands_many(Some(vec![d1]), &PollRequest::default().since(Timestamp::EPOCH).wait(1.0), &cancel)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_command_update() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let d2 = hub.register_device("d2", "D2").await.unwrap().id;
        let cancel = CancellationToken::new();
        let command = hub
            .insert_command(d1, NewCommand { name: "reboot".into(), ..Default::default() })
            .await
            .unwrap();

        assert!(matches!(
            hub.wait_command_update(d2, command.id, Some(1.0), &cancel).await,
            Err(HiveError::CommandNotFound)
        ));
        assert!(
            hub.wait_command_update(d1, command.id, Some(1.0), &cancel)
                .await
                .unwrap()
                .is_none()
        );

        {
            let hub = hub.clone();
            let id = command.id;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                hub.update_command(d1, id, "done", Some("ok")).await.unwrap();
            });
        }

        let start = Instant::now();
        let updated = hub
            .wait_command_update(d1, command.id, None, &cancel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status.as_deref(), Some("done"));
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(300));

        // Already has a status: no waiting.
        let start = Instant::now();
        assert!(hub.wait_command_update(d1, command.id, None, &cancel).await.unwrap().is_some());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_update_foreign_command_rejected() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let d2 = hub.register_device("d2", "D2").await.unwrap().id;
        let command = hub
            .insert_command(d1, NewCommand { name: "x".into(), ..Default::default() })
            .await
            .unwrap();
        assert!(matches!(
            hub.update_command(d2, command.id, "done", None).await,
            Err(HiveError::CommandNotFound)
        ));
        assert!(matches!(hub.device("nope").await, Err(HiveError::DeviceNotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_leaves_no_waiters() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let cancel = CancellationToken::new();
        let poller = {
            let hub = hub.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                hub.poll_notifications(d1, &PollRequest::default().names(["a", "b"]), &cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.stats().notification_waits, 2);

        cancel.cancel();
        assert!(poller.await.unwrap().unwrap().is_empty());
        assert_eq!(hub.stats(), HubStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_config_change_applies() {
        let config = Arc::new(RwLock::new(Config::default()));
        let hub = MessageHub::new(Arc::new(MemoryStore::new()), config.clone());
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        config.write().await.set("notification-poll-max", "2").unwrap();

        let start = Instant::now();
        hub.poll_notifications(d1, &PollRequest::default().wait(30.0), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_limits_do_not_overflow() {
        let config = Arc::new(RwLock::new(Config::default()));
        {
            let mut cfg = config.write().await;
            cfg.set("notification-poll-max", "18446744073709551615").unwrap();
            cfg.set("request-deadline", "18446744073709551615").unwrap();
        }
        let hub = MessageHub::new(Arc::new(MemoryStore::new()), config);
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            });
        }

        for wait in [1e30, f64::INFINITY] {
            let start = Instant::now();
            let rows = hub
                .poll_notifications(d1, &PollRequest::default().wait(wait), &cancel)
                .await
                .unwrap();
            assert!(rows.is_empty());
            assert!(start.elapsed() <= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_status_notification_updates_device() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let t0 = hub.current_timestamp().await.unwrap();
        let cancel = CancellationToken::new();

        let poller = {
            let hub = hub.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let rows = hub
                    .poll_notifications(d1, &PollRequest::default().since(t0).wait(5.0), &cancel)
                    .await
                    .unwrap();
                // Woken only after the handler ran.
                let device = hub.device("d1").await.unwrap();
                (rows, device)
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let row = hub
            .insert_notification(d1, "deviceStatus", Some(r#"{"status":"online"}"#))
            .await
            .unwrap();
        let (rows, device) = poller.await.unwrap();
        assert_eq!(rows, vec![row]);
        assert_eq!(device.status.as_deref(), Some("online"));
    }

    #[tokio::test]
    async fn test_handler_failure_keeps_notification() {
        let hub = hub();
        let d1 = hub.register_device("d1", "D1").await.unwrap().id;
        let row = hub
            .insert_notification(d1, "equipment", Some("{broken"))
            .await
            .unwrap();
        assert_eq!(row.name, "equipment");
        assert!(hub.equipment(d1).await.unwrap().is_empty());

        hub.insert_notification(d1, "Equipment", Some(r#"{"equipment":"valve","open":1}"#))
            .await
            .unwrap();
        let equipment = hub.equipment(d1).await.unwrap();
        assert_eq!(equipment.len(), 1);
        assert_eq!(equipment[0].code, "valve");
        assert_eq!(equipment[0].parameters.as_deref(), Some(r#"{"open":1}"#));
    }
}
