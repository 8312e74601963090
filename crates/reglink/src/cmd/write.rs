use serde::Serialize;

use crate::cmd::{parse_word, WriteArgs};
use crate::exit::{device_error, CliResult, SUCCESS};

#[derive(Serialize)]
struct WriteOutput {
    address: String,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    readback: Option<String>,
}

pub fn run(args: WriteArgs) -> CliResult<i32> {
    let address = parse_word(&args.address)?;
    let value = parse_word(&args.value)?;
    let timeout = args.device.operation_timeout()?;
    let device = args.device.open()?;

    device
        .session()
        .write_uint32_with(address, value, &timeout, true, args.device.sequence_check)
        .map_err(|err| device_error("write failed", err.into()))?;

    let readback = if args.verify {
        let timeout = args.device.operation_timeout()?;
        Some(
            device
                .session()
                .read_uint32_with(address, &timeout, args.device.sequence_check)
                .map_err(|err| device_error("readback failed", err.into()))?,
        )
    } else {
        None
    };

    if args.json {
        let out = WriteOutput {
            address: format!("{address:#010x}"),
            value: format!("{value:#010x}"),
            readback: readback.map(|value| format!("{value:#010x}")),
        };
        println!(
            "{}",
            serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
        );
    } else if let Some(readback) = readback {
        println!("{readback:#010x}");
    }
    Ok(SUCCESS)
}
