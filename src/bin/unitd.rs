//! unitd - transactional service manager daemon
//!
//! Listens on /run/unitd.sock for commands from unitctl.
//!
//! - SIGTERM/SIGINT stop every active unit, then exit
//! - SIGHUP reloads unit files from the search paths

use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use peercred_ipc::{CallerInfo, Connection, Server};
use unitd::manager::{self, JobReport, Manager, ManagerError};
use unitd::protocol::{Request, Response, SOCKET_PATH};
use unitd::signals::{DaemonSignal, SignalHandler};

#[derive(Parser)]
#[command(name = "unitd")]
#[command(about = "Transactional service manager daemon")]
#[command(
    long_about = "unitd loads .service and .target unit files and runs start/stop \
    requests as dependency-aware transactions. It listens on /run/unitd.sock for \
    commands from unitctl."
)]
struct Args {
    /// Unit search path; repeat to add more, earlier paths win
    #[arg(long = "unit-dir", value_name = "DIR")]
    unit_dirs: Vec<PathBuf>,

    /// Control socket path
    #[arg(long, default_value = SOCKET_PATH)]
    socket: String,

    /// Units to start once the daemon is up
    #[arg(long = "start", value_name = "UNIT")]
    start: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let unit_dirs = if args.unit_dirs.is_empty() {
        manager::default_unit_paths()
    } else {
        args.unit_dirs
    };
    let manager = Arc::new(Manager::with_paths(unit_dirs));

    match manager.load_units().await {
        Ok(count) => info!("Loaded {} unit files", count),
        Err(e) => log::error!("Failed to load unit files: {}", e),
    }

    let server = Server::bind(&args.socket)?;
    info!("unitd listening on {}", args.socket);

    // Background reaping of exited main processes
    let manager_bg = Arc::clone(&manager);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(100));
        loop {
            interval.tick().await;
            manager_bg.reap().await;
        }
    });

    let mut signal_rx = SignalHandler::new()?.spawn_forwarder();

    if !args.start.is_empty() {
        let manager_boot = Arc::clone(&manager);
        let names = args.start;
        tokio::spawn(async move {
            info!("Starting {}", names.join(" "));
            log_reports(manager_boot.start(&names).await);
        });
    }

    loop {
        tokio::select! {
            accepted = server.accept() => match accepted {
                Ok((conn, caller)) => {
                    let manager = Arc::clone(&manager);
                    tokio::spawn(handle_connection(conn, caller, manager));
                }
                Err(e) => {
                    log::error!("accept error: {}", e);
                }
            },
            Some(sig) = signal_rx.recv() => {
                if sig.is_shutdown() {
                    info!("Received {:?}, stopping all units", sig);
                    log_reports(manager.stop_all().await);
                    break;
                }
                handle_signal(sig, &manager).await;
            }
        }
    }

    if let Err(e) = std::fs::remove_file(&args.socket) {
        log::debug!("Failed to remove {}: {}", args.socket, e);
    }
    info!("unitd exiting");
    Ok(())
}

async fn handle_signal(sig: DaemonSignal, manager: &Manager) {
    match sig {
        DaemonSignal::Hup => {
            info!("Received SIGHUP, reloading unit files");
            match manager.load_units().await {
                Ok(count) => info!("Reloaded {} unit files", count),
                Err(e) => log::error!("Failed to reload units: {}", e),
            }
        }
        DaemonSignal::Usr1 => {
            info!("Received SIGUSR1, dumping state");
            for unit in manager.list().await {
                info!("  {}: {}", unit.name, unit.state);
            }
        }
        DaemonSignal::Term | DaemonSignal::Int => {}
    }
}

fn log_reports(result: Result<Vec<JobReport>, ManagerError>) {
    match result {
        Ok(reports) => {
            for report in reports {
                if report.is_failed() {
                    log::warn!("{} {}: {:?}", report.unit, report.job_type, report.outcome);
                } else {
                    log::debug!("{} {}: {:?}", report.unit, report.job_type, report.outcome);
                }
            }
        }
        Err(e) => log::error!("Transaction failed: {}", e),
    }
}

async fn handle_connection(mut conn: Connection, caller: CallerInfo, manager: Arc<Manager>) {
    info!(
        "connection from uid={} pid={} exe={:?}",
        caller.uid, caller.pid, caller.exe
    );

    let request: Request = match conn.read().await {
        Ok(r) => r,
        Err(e) => {
            log::error!("read error: {}", e);
            let _ = conn.write(&Response::Error("invalid request".into())).await;
            return;
        }
    };

    let response = handle_request(request, &manager).await;
    if let Err(e) = conn.write(&response).await {
        log::error!("write error: {}", e);
    }
}

fn jobs(result: Result<Vec<JobReport>, ManagerError>) -> Response {
    match result {
        Ok(reports) => Response::Jobs(reports),
        Err(e) => Response::Error(e.to_string()),
    }
}

async fn handle_request(request: Request, manager: &Manager) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::Start { names } => jobs(manager.start(&names).await),
        Request::Stop { names } => jobs(manager.stop(&names).await),
        Request::Restart { names } => jobs(manager.restart(&names).await),
        Request::Reload { names } => jobs(manager.reload(&names).await),

        Request::Plan { job_type, names } => match manager.plan(job_type, &names).await {
            Ok(plan) => Response::Plan(plan),
            Err(e) => Response::Error(e.to_string()),
        },

        Request::Status { name } => match manager.status(&name).await {
            Ok(info) => Response::Status(info),
            Err(e) => Response::Error(e.to_string()),
        },

        Request::List => Response::Units(manager.list().await),

        Request::ReloadUnitFiles => match manager.load_units().await {
            Ok(count) => Response::Loaded(count),
            Err(e) => Response::Error(e.to_string()),
        },
    }
}
