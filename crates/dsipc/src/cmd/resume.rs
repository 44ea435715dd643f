use dsipc_protocol::command::process;
use dsipc_protocol::CommandSet;

use crate::cmd::send::{exit_code, request};
use crate::cmd::{parse_duration, ResumeArgs};
use crate::exit::CliResult;
use crate::output::{print_reply, OutputFormat};

pub fn run(args: ResumeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let command_set = CommandSet::Process.into();
    let reply = request(
        &args.path,
        command_set,
        process::RESUME_RUNTIME,
        Vec::new(),
        timeout,
    )?;
    print_reply(command_set, process::RESUME_RUNTIME, &reply, format);
    Ok(exit_code(&reply))
}
