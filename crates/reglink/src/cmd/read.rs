use serde::Serialize;

use crate::cmd::{parse_word, ReadArgs};
use crate::exit::{device_error, CliResult, SUCCESS};

#[derive(Serialize)]
struct ReadOutput {
    address: String,
    value: String,
}

pub fn run(args: ReadArgs) -> CliResult<i32> {
    let address = parse_word(&args.address)?;
    let timeout = args.device.operation_timeout()?;
    let device = args.device.open()?;

    let value = device
        .session()
        .read_uint32_with(address, &timeout, args.device.sequence_check)
        .map_err(|err| device_error("read failed", err.into()))?;

    if args.json {
        let out = ReadOutput {
            address: format!("{address:#010x}"),
            value: format!("{value:#010x}"),
        };
        println!(
            "{}",
            serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        println!("{value:#010x}");
    }
    Ok(SUCCESS)
}
