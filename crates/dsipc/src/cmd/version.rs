use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("dsipc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: dsipc");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("DSIPC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "protocol: {}",
        String::from_utf8_lossy(&dsipc_protocol::MAGIC[..dsipc_protocol::MAGIC.len() - 1])
    );
    println!(
        "features: server={}, dump={}, profiler={}, cli=true",
        cfg!(feature = "server"),
        cfg!(feature = "dump"),
        cfg!(feature = "profiler")
    );

    Ok(SUCCESS)
}
