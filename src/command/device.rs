use crate::command::{arg_text, device_frame, equipment_frame, wrong_arg_count};
use crate::error::HiveResult;
use crate::hub::SharedHub;
use crate::resp::Frame;

/// DEVICE.SAVE guid [name]
///
/// The name defaults to the guid.
pub async fn cmd_save(args: &[Frame], hub: &SharedHub) -> HiveResult<Frame> {
    if !(1..=2).contains(&args.len()) {
        return Err(wrong_arg_count("device.save"));
    }
    let guid = arg_text(args, 0)?;
    let name = match args.get(1) {
        Some(_) => arg_text(args, 1)?,
        None => guid.clone(),
    };
    let device = hub.register_device(&guid, &name).await?;
    Ok(Frame::integer(device.id.0 as i64))
}

/// DEVICE.GET guid
pub async fn cmd_get(args: &[Frame], hub: &SharedHub) -> HiveResult<Frame> {
    if args.len() != 1 {
        return Err(wrong_arg_count("device.get"));
    }
    let device = hub.device(&arg_text(args, 0)?).await?;
    Ok(device_frame(&device))
}

/// DEVICE.EQUIPMENT guid
///
/// Latest state of each piece of equipment, ordered by code.
pub async fn cmd_equipment(args: &[Frame], hub: &SharedHub) -> HiveResult<Frame> {
    if args.len() != 1 {
        return Err(wrong_arg_count("device.equipment"));
    }
    let device = hub.device(&arg_text(args, 0)?).await?;
    let rows = hub.equipment(device.id).await?;
    Ok(Frame::array(rows.iter().map(equipment_frame).collect()))
}
