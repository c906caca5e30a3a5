use crate::command::notification::resolve_devices;
use crate::command::{
    GuidCache, PollOptions, arg_f64, arg_i64, arg_text, arg_u64, command_frame, wrong_arg_count,
};
use crate::connection::ClientState;
use crate::error::{HiveError, HiveResult};
use crate::hub::SharedHub;
use crate::model::{CommandId, NewCommand};
use crate::resp::Frame;

/// COMMAND.INSERT guid name [parameters] [LIFETIME secs] [FLAGS n]
///
/// Options come in pairs, so an odd number of trailing arguments means the
/// first one is the parameters.
pub async fn cmd_insert(args: &[Frame], hub: &SharedHub) -> HiveResult<Frame> {
    if args.len() < 2 {
        return Err(wrong_arg_count("command.insert"));
    }
    let device = hub.device(&arg_text(args, 0)?).await?;
    let mut command = NewCommand {
        name: arg_text(args, 1)?,
        ..Default::default()
    };

    let mut i = 2;
    if args.len() % 2 == 1 {
        command.parameters = Some(arg_text(args, 2)?);
        i = 3;
    }
    while i < args.len() {
        let opt = arg_text(args, i)?.to_uppercase();
        let value = &args[i + 1];
        match opt.as_str() {
            "LIFETIME" => {
                let secs = arg_u64(value)?;
                command.lifetime = Some(u32::try_from(secs).map_err(|_| HiveError::NotInteger)?);
            }
            "FLAGS" => command.flags = Some(arg_i64(value)?),
            _ => return Err(HiveError::SyntaxError),
        }
        i += 2;
    }

    let command = hub.insert_command(device.id, command).await?;
    Ok(command_frame(&command, &device.guid))
}

/// COMMAND.POLL guid [SINCE ts] [NAMES a,b] [WAIT secs]
pub async fn cmd_poll(args: &[Frame], hub: &SharedHub, client: &ClientState) -> HiveResult<Frame> {
    if args.is_empty() {
        return Err(wrong_arg_count("command.poll"));
    }
    let device = hub.device(&arg_text(args, 0)?).await?;
    let options = PollOptions::parse(&args[1..], false)?;
    let rows = hub
        .poll_commands(device.id, &options.request, &client.cancel)
        .await?;
    Ok(Frame::array(
        rows.iter().map(|c| command_frame(c, &device.guid)).collect(),
    ))
}

/// COMMAND.POLLMANY [DEVICES g1,g2] [SINCE ts] [NAMES a,b] [WAIT secs]
pub async fn cmd_poll_many(args: &[Frame], hub: &SharedHub, client: &ClientState) -> HiveResult<Frame> {
    let options = PollOptions::parse(args, true)?;
    let devices = resolve_devices(hub, options.devices.as_deref()).await?;
    let rows = hub
        .poll_commands_many(devices, &options.request, &client.cancel)
        .await?;

    let mut guids = GuidCache::new(hub);
    let mut frames = Vec::with_capacity(rows.len());
    for (device, command) in &rows {
        let guid = guids.guid(*device).await?;
        let row = command_frame(command, &guid);
        frames.push(Frame::array(vec![Frame::bulk(guid), row]));
    }
    Ok(Frame::array(frames))
}

/// COMMAND.UPDATE guid id status [result]
pub async fn cmd_update(args: &[Frame], hub: &SharedHub) -> HiveResult<Frame> {
    if !(3..=4).contains(&args.len()) {
        return Err(wrong_arg_count("command.update"));
    }
    let device = hub.device(&arg_text(args, 0)?).await?;
    let id = CommandId(arg_u64(&args[1])?);
    let status = arg_text(args, 2)?;
    let result = args.get(3).map(|_| arg_text(args, 3)).transpose()?;
    let command = hub
        .update_command(device.id, id, &status, result.as_deref())
        .await?;
    Ok(command_frame(&command, &device.guid))
}

/// COMMAND.WAIT guid id [WAIT secs]
///
/// The updated command, or nil if no status arrived in time.
pub async fn cmd_wait(args: &[Frame], hub: &SharedHub, client: &ClientState) -> HiveResult<Frame> {
    let wait = match args.len() {
        2 => None,
        4 if arg_text(args, 2)?.eq_ignore_ascii_case("WAIT") => Some(arg_f64(&args[3])?),
        4 => return Err(HiveError::SyntaxError),
        _ => return Err(wrong_arg_count("command.wait")),
    };
    let device = hub.device(&arg_text(args, 0)?).await?;
    let id = CommandId(arg_u64(&args[1])?);
    let command = hub
        .wait_command_update(device.id, id, wait, &client.cancel)
        .await?;
    Ok(command.map_or_else(Frame::nil, |c| command_frame(&c, &device.guid)))
}
