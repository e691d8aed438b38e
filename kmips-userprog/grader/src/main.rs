//! Boots a KMIPS machine and runs the shell program given on the command
//! line as the root process.
//!
//! ```text
//! kmips-grader [-m pages] [-t ticks] [-d flags] [-q] [-e] [-x program args..]
//! ```
//!
//! Executables are looked up in the current directory of the host.
use kmips::{HaltReason, MachineConfig};
use kmips_userprog::UserKernel;
use std::process::ExitCode;

fn main() -> ExitCode {
    let config = match MachineConfig::from_args(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kmips-grader: {}", e);
            return ExitCode::from(2);
        }
    };

    let program = config.shell_program.clone();
    let image = match std::fs::read(&program) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("kmips-grader: cannot read {}: {}", program, e);
            return ExitCode::from(2);
        }
    };

    let user = UserKernel::boot(config);
    let machine = user.kernel().machine().clone();
    if !machine.file_system().insert(&program, &image) {
        eprintln!("kmips-grader: {} is not a valid file name", program);
        return ExitCode::from(2);
    }

    let halt = user.run();
    if !machine.config().echo_console {
        print!("{}", String::from_utf8_lossy(&machine.console().take_output()));
    }
    kmips::info!("Root process status: {:?}", user.root_status());
    match halt {
        HaltReason::Requested => ExitCode::SUCCESS,
        reason => {
            eprintln!("kmips-grader: machine stopped: {:?}", reason);
            ExitCode::FAILURE
        }
    }
}
