//! unitctl - CLI for unitd
//!
//! Communicates with the unitd daemon over /run/unitd.sock.

use clap::{Parser, Subcommand, ValueEnum};
use peercred_ipc::Client;
use std::path::PathBuf;
use unitd::manager::{JobOutcome, JobType};
use unitd::protocol::{Request, Response, SOCKET_PATH};

#[derive(Parser)]
#[command(name = "unitctl")]
#[command(about = "Control the unitd service manager")]
struct Args {
    /// Control socket path
    #[arg(long, global = true, default_value = SOCKET_PATH)]
    socket: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start units and everything they require
    Start {
        /// Unit names (e.g., "web" or "web.service")
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Stop units
    Stop {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Restart units
    Restart {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Reload units without restarting them
    Reload {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Show unit status
    Status {
        /// Unit name
        name: String,
    },

    /// List known units
    List,

    /// Show the jobs a request would run, in order, without running them
    Plan {
        /// Job type
        #[arg(value_enum)]
        job_type: PlanType,
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Reload unit files from disk
    DaemonReload,

    /// Parse a unit file locally (doesn't require daemon)
    Parse {
        /// Path to the unit file
        path: PathBuf,
    },

    /// Ping the daemon
    Ping,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanType {
    Start,
    Stop,
    Restart,
    Reload,
}

impl From<PlanType> for JobType {
    fn from(t: PlanType) -> Self {
        match t {
            PlanType::Start => JobType::Start,
            PlanType::Stop => JobType::Stop,
            PlanType::Restart => JobType::Restart,
            PlanType::Reload => JobType::Reload,
        }
    }
}

fn main() {
    let args = Args::parse();

    let request = match args.command {
        // Parse is local-only
        Command::Parse { path } => {
            parse_local(&path);
            return;
        }
        Command::Start { names } => Request::Start { names },
        Command::Stop { names } => Request::Stop { names },
        Command::Restart { names } => Request::Restart { names },
        Command::Reload { names } => Request::Reload { names },
        Command::Status { name } => Request::Status { name },
        Command::List => Request::List,
        Command::Plan { job_type, names } => Request::Plan {
            job_type: job_type.into(),
            names,
        },
        Command::DaemonReload => Request::ReloadUnitFiles,
        Command::Ping => Request::Ping,
    };

    match Client::call(&args.socket, &request) {
        Ok(response) => print_response(response),
        Err(e) => {
            if e.to_string().contains("connect") || e.to_string().contains("No such file") {
                eprintln!("unitctl: daemon not running");
                eprintln!("  start with: sudo unitd");
            } else {
                eprintln!("unitctl: {}", e);
            }
            std::process::exit(1);
        }
    }
}

fn print_response(response: Response) {
    match response {
        Response::Ok => {} // Silent success
        Response::Pong => println!("pong"),
        Response::Error(msg) => {
            eprintln!("error: {}", msg);
            std::process::exit(1);
        }
        Response::Jobs(reports) => {
            let mut failed = false;
            for report in reports {
                let outcome = match report.outcome {
                    JobOutcome::Done => "done".to_string(),
                    JobOutcome::Skipped => "skipped".to_string(),
                    JobOutcome::Failed(reason) => {
                        failed = true;
                        format!("failed: {}", reason)
                    }
                };
                println!("{:<40} {:>8}  {}", report.unit, report.job_type, outcome);
            }
            if failed {
                std::process::exit(1);
            }
        }
        Response::Plan(plan) => {
            if plan.is_empty() {
                println!("Nothing to do");
                return;
            }
            for job in plan {
                if job.after.is_empty() {
                    println!("  → {} {}", job.job_type, job.unit);
                } else {
                    println!("  → {} {} (after {})", job.job_type, job.unit, job.after.join(", "));
                }
            }
        }
        Response::Units(units) => {
            if units.is_empty() {
                println!("No units loaded");
                return;
            }
            println!("{:<40} {:>10} {:>12}", "UNIT", "TYPE", "STATE");
            for unit in units {
                println!(
                    "{:<40} {:>10} {:>12}",
                    unit.name, unit.unit_type, unit.state
                );
            }
        }
        Response::Status(unit) => {
            println!("● {}", unit.name);
            println!("     Type: {}", unit.unit_type);
            println!("    State: {}", unit.state);
            if let Some(pid) = unit.main_pid {
                println!("      PID: {}", pid);
            }
            if let Some(job) = unit.job {
                println!("      Job: {}", job);
            }
            if let Some(desc) = unit.description {
                println!("    Desc:  {}", desc);
            }
        }
        Response::Loaded(count) => println!("Loaded {} unit files", count),
    }
}

fn parse_local(path: &PathBuf) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("unitctl: {}", e);
            std::process::exit(1);
        }
    };
    rt.block_on(async {
        match unitd::units::load_unit(path).await {
            Ok(unit) => {
                println!("Name: {}", unit.name());
                println!("Type: {}", unit.unit_type());
                let section = unit.unit_section();
                if let Some(desc) = &section.description {
                    println!("Description: {}", desc);
                }
                for (label, list) in [
                    ("Requires", &section.requires),
                    ("Wants", &section.wants),
                    ("Conflicts", &section.conflicts),
                    ("After", &section.after),
                    ("Before", &section.before),
                ] {
                    if !list.is_empty() {
                        println!("{}: {}", label, list.join(", "));
                    }
                }
                if let Some(svc) = unit.as_service() {
                    println!("ServiceType: {:?}", svc.service.service_type);
                    for line in &svc.service.exec_start {
                        println!("ExecStart: {}", line);
                    }
                }
            }
            Err(e) => {
                eprintln!("Failed to parse: {}", e);
                std::process::exit(1);
            }
        }
    });
}
