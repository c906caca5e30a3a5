use crate::command::{GuidCache, PollOptions, arg_text, notification_frame, wrong_arg_count};
use crate::connection::ClientState;
use crate::error::HiveResult;
use crate::hub::SharedHub;
use crate::model::DeviceId;
use crate::resp::Frame;

/// NOTIFICATION.INSERT guid name [parameters]
pub async fn cmd_insert(args: &[Frame], hub: &SharedHub) -> HiveResult<Frame> {
    if !(2..=3).contains(&args.len()) {
        return Err(wrong_arg_count("notification.insert"));
    }
    let device = hub.device(&arg_text(args, 0)?).await?;
    let name = arg_text(args, 1)?;
    let parameters = args.get(2).map(|_| arg_text(args, 2)).transpose()?;
    let notification = hub
        .insert_notification(device.id, &name, parameters.as_deref())
        .await?;
    Ok(notification_frame(&notification, &device.guid))
}

/// NOTIFICATION.POLL guid [SINCE ts] [NAMES a,b] [WAIT secs]
pub async fn cmd_poll(args: &[Frame], hub: &SharedHub, client: &ClientState) -> HiveResult<Frame> {
    if args.is_empty() {
        return Err(wrong_arg_count("notification.poll"));
    }
    let device = hub.device(&arg_text(args, 0)?).await?;
    let options = PollOptions::parse(&args[1..], false)?;
    let rows = hub
        .poll_notifications(device.id, &options.request, &client.cancel)
        .await?;
    Ok(Frame::array(
        rows.iter().map(|n| notification_frame(n, &device.guid)).collect(),
    ))
}

/// NOTIFICATION.POLLMANY [DEVICES g1,g2] [SINCE ts] [NAMES a,b] [WAIT secs]
pub async fn cmd_poll_many(args: &[Frame], hub: &SharedHub, client: &ClientState) -> HiveResult<Frame> {
    let options = PollOptions::parse(args, true)?;
    let devices = resolve_devices(hub, options.devices.as_deref()).await?;
    let rows = hub
        .poll_notifications_many(devices, &options.request, &client.cancel)
        .await?;

    let mut guids = GuidCache::new(hub);
    let mut frames = Vec::with_capacity(rows.len());
    for (device, notification) in &rows {
        let guid = guids.guid(*device).await?;
        let row = notification_frame(notification, &guid);
        frames.push(Frame::array(vec![Frame::bulk(guid), row]));
    }
    Ok(Frame::array(frames))
}

/// Guids to ids; `None` stays `None` (every device).
pub(crate) async fn resolve_devices(
    hub: &SharedHub,
    guids: Option<&[String]>,
) -> HiveResult<Option<Vec<DeviceId>>> {
    let Some(guids) = guids else {
        return Ok(None);
    };
    let mut ids = Vec::with_capacity(guids.len());
    for guid in guids {
        ids.push(hub.device(guid).await?.id);
    }
    Ok(Some(ids))
}
