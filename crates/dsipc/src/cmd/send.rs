use std::path::Path;
use std::time::Duration;

use dsipc_protocol::{read_reply_with_timeout, IpcMessage, Reply};
use dsipc_transport::UnixDomainSocket;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{protocol_error, transport_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;
    let reply = request(&args.path, args.command_set, args.command_id, payload, timeout)?;
    print_reply(args.command_set, args.command_id, &reply, format);
    Ok(exit_code(&reply))
}

/// Connect, send one message and wait for the Server reply.
pub fn request(
    path: &Path,
    command_set: u8,
    command_id: u8,
    payload: Vec<u8>,
    timeout: Duration,
) -> CliResult<Reply> {
    let mut message = IpcMessage::new(command_set, command_id, payload)
        .map_err(|err| protocol_error("invalid message", err))?;
    let mut stream =
        UnixDomainSocket::connect(path).map_err(|err| transport_error("connect failed", err))?;
    message
        .send(&mut stream)
        .map_err(|err| protocol_error("send failed", err))?;
    read_reply_with_timeout(&mut stream, Some(timeout))
        .map_err(|err| protocol_error("receive failed", err))
}

/// Server/Error replies make the command fail.
pub fn exit_code(reply: &Reply) -> i32 {
    match reply {
        Reply::Ok(_) => SUCCESS,
        Reply::Error(_) => FAILURE,
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(hex) = &args.hex {
        return decode_hex(hex);
    }
    Ok(Vec::new())
}

fn decode_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "--hex needs an even number of digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).unwrap_or("");
            u8::from_str_radix(text, 16)
                .map_err(|_| CliError::new(USAGE, format!("--hex has invalid digits: {text:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hex_accepts_spaced_pairs() {
        assert_eq!(decode_hex("00 ff 10").unwrap(), vec![0x00, 0xff, 0x10]);
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
    }

    #[test]
    fn error_replies_fail_the_command() {
        assert_eq!(exit_code(&Reply::Error(0x8013_1385)), FAILURE);
        assert_eq!(exit_code(&Reply::Ok(Default::default())), SUCCESS);
    }
}
