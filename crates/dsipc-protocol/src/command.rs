//! Command sets and command ids.
//!
//! The numeric values are part of the wire contract and must not change.

/// Coarse routing field of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandSet {
    Dump = 0x01,
    EventPipe = 0x02,
    Profiler = 0x03,
    Process = 0x04,
    /// Replies only; never accepted as a request.
    Server = 0xFF,
}

impl CommandSet {
    pub fn name(self) -> &'static str {
        match self {
            CommandSet::Dump => "Dump",
            CommandSet::EventPipe => "EventPipe",
            CommandSet::Profiler => "Profiler",
            CommandSet::Process => "Process",
            CommandSet::Server => "Server",
        }
    }
}

impl TryFrom<u8> for CommandSet {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(CommandSet::Dump),
            0x02 => Ok(CommandSet::EventPipe),
            0x03 => Ok(CommandSet::Profiler),
            0x04 => Ok(CommandSet::Process),
            0xFF => Ok(CommandSet::Server),
            other => Err(other),
        }
    }
}

impl From<CommandSet> for u8 {
    fn from(value: CommandSet) -> Self {
        value as u8
    }
}

/// Response ids on the Server command set.
pub mod server {
    pub const OK: u8 = 0x00;
    pub const ERROR: u8 = 0xFF;
}

/// Process command ids.
pub mod process {
    pub const GET_PROCESS_INFO: u8 = 0x00;
    pub const RESUME_RUNTIME: u8 = 0x01;
    pub const GET_PROCESS_ENVIRONMENT: u8 = 0x02;
    pub const SET_ENVIRONMENT_VARIABLE: u8 = 0x03;
    pub const GET_PROCESS_INFO_2: u8 = 0x04;
    pub const ENABLE_PERFMAP: u8 = 0x05;
    pub const DISABLE_PERFMAP: u8 = 0x06;
    pub const APPLY_STARTUP_HOOK: u8 = 0x07;
    pub const GET_PROCESS_INFO_3: u8 = 0x08;
}

/// EventPipe command ids.
pub mod eventpipe {
    pub const STOP_TRACING: u8 = 0x01;
    pub const COLLECT_TRACING: u8 = 0x02;
    pub const COLLECT_TRACING_2: u8 = 0x03;
    pub const COLLECT_TRACING_3: u8 = 0x04;
    pub const COLLECT_TRACING_4: u8 = 0x05;
}

/// Dump command ids.
pub mod dump {
    pub const GENERATE_CORE_DUMP: u8 = 0x01;
    pub const GENERATE_CORE_DUMP_2: u8 = 0x02;
    pub const GENERATE_CORE_DUMP_3: u8 = 0x03;
}

/// Profiler command ids.
pub mod profiler {
    pub const ATTACH_PROFILER: u8 = 0x01;
    pub const STARTUP_PROFILER: u8 = 0x02;
}

/// Human-readable name of a command set byte.
pub fn command_set_name(command_set: u8) -> &'static str {
    CommandSet::try_from(command_set)
        .map(CommandSet::name)
        .unwrap_or("Unknown")
}

/// Human-readable name of a `(command_set, command_id)` pair.
pub fn command_name(command_set: u8, command_id: u8) -> &'static str {
    match (CommandSet::try_from(command_set), command_id) {
        (Ok(CommandSet::Server), server::OK) => "OK",
        (Ok(CommandSet::Server), server::ERROR) => "Error",
        (Ok(CommandSet::Process), process::GET_PROCESS_INFO) => "GetProcessInfo",
        (Ok(CommandSet::Process), process::RESUME_RUNTIME) => "ResumeRuntime",
        (Ok(CommandSet::Process), process::GET_PROCESS_ENVIRONMENT) => "GetProcessEnvironment",
        (Ok(CommandSet::Process), process::SET_ENVIRONMENT_VARIABLE) => "SetEnvironmentVariable",
        (Ok(CommandSet::Process), process::GET_PROCESS_INFO_2) => "GetProcessInfo2",
        (Ok(CommandSet::Process), process::ENABLE_PERFMAP) => "EnablePerfMap",
        (Ok(CommandSet::Process), process::DISABLE_PERFMAP) => "DisablePerfMap",
        (Ok(CommandSet::Process), process::APPLY_STARTUP_HOOK) => "ApplyStartupHook",
        (Ok(CommandSet::Process), process::GET_PROCESS_INFO_3) => "GetProcessInfo3",
        (Ok(CommandSet::EventPipe), eventpipe::STOP_TRACING) => "StopTracing",
        (Ok(CommandSet::EventPipe), eventpipe::COLLECT_TRACING) => "CollectTracing",
        (Ok(CommandSet::EventPipe), eventpipe::COLLECT_TRACING_2) => "CollectTracing2",
        (Ok(CommandSet::EventPipe), eventpipe::COLLECT_TRACING_3) => "CollectTracing3",
        (Ok(CommandSet::EventPipe), eventpipe::COLLECT_TRACING_4) => "CollectTracing4",
        (Ok(CommandSet::Dump), dump::GENERATE_CORE_DUMP) => "GenerateCoreDump",
        (Ok(CommandSet::Dump), dump::GENERATE_CORE_DUMP_2) => "GenerateCoreDump2",
        (Ok(CommandSet::Dump), dump::GENERATE_CORE_DUMP_3) => "GenerateCoreDump3",
        (Ok(CommandSet::Profiler), profiler::ATTACH_PROFILER) => "AttachProfiler",
        (Ok(CommandSet::Profiler), profiler::STARTUP_PROFILER) => "StartupProfiler",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_set_values_match_wire_contract() {
        assert_eq!(u8::from(CommandSet::Dump), 0x01);
        assert_eq!(u8::from(CommandSet::EventPipe), 0x02);
        assert_eq!(u8::from(CommandSet::Profiler), 0x03);
        assert_eq!(u8::from(CommandSet::Process), 0x04);
        assert_eq!(u8::from(CommandSet::Server), 0xFF);
    }

    #[test]
    fn unknown_command_set_is_rejected() {
        assert_eq!(CommandSet::try_from(0x05), Err(0x05));
        assert_eq!(command_set_name(0x00), "Unknown");
    }

    #[test]
    fn names_resolve_per_command_set() {
        assert_eq!(command_name(0x04, process::RESUME_RUNTIME), "ResumeRuntime");
        assert_eq!(command_name(0x01, dump::GENERATE_CORE_DUMP), "GenerateCoreDump");
        assert_eq!(command_name(0xFF, server::ERROR), "Error");
        assert_eq!(command_name(0x02, 0x7F), "Unknown");
    }
}
