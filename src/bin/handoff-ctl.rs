use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use graceful_handoff::lifecycle::{read_pid_file, RESTART_SIGNAL, STOP_SIGNAL};

#[derive(Parser)]
#[command(name = "handoff-ctl")]
#[command(about = "Signal a running graceful-handoff process", long_about = None)]
struct Cli {
    /// PID file written by the running service
    #[arg(short, long, default_value = "graceful-handoff.pid")]
    pid_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hand the listener to a new process, then drain and exit
    Reload,
    /// Drain in-flight requests and exit
    Stop,
    /// Report whether the recorded process is alive
    Status,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let pid = Pid::from_raw(read_pid_file(&cli.pid_file)?);

    match cli.command {
        Commands::Reload => send(pid, RESTART_SIGNAL),
        Commands::Stop => send(pid, STOP_SIGNAL),
        Commands::Status => match kill(pid, None::<Signal>) {
            Ok(()) => {
                println!("running (pid {pid})");
                Ok(ExitCode::SUCCESS)
            }
            Err(Errno::ESRCH) => {
                println!("not running (stale pid {pid})");
                Ok(ExitCode::FAILURE)
            }
            Err(e) => Err(e.into()),
        },
    }
}

fn send(pid: Pid, signal: Signal) -> Result<ExitCode, Box<dyn std::error::Error>> {
    kill(pid, signal)?;
    println!("sent {signal} to pid {pid}");
    Ok(ExitCode::SUCCESS)
}
