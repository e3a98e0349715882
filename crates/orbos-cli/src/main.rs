//! `orbos` – flight-software kernel host.
//!
//! 1. Loads `~/.orbos/config.toml` (or `$ORBOS_CONFIG`), writing the default
//!    configuration on first run.
//! 2. Boots the kernel over simulated peripherals and a file-backed backup
//!    register, then supervises it until Ctrl-C.
//! 3. After a reset (fatal path or hardware watchdog expiry) reboots
//!    in-process, up to `max_resets` times.
//!
//! `--inject-fault` enables the `FaultInjector` task on the first boot, which
//! drives the system through a deadline overrun and one reboot.

mod config;

use std::sync::Arc;

use colored::Colorize;
use orbos_hal::{BackupRegister, FileBackupRegister};
use orbos_kernel::LogLevelSink;
use orbos_runtime::{FlightSystem, Hardware, LogLevelHandle, Shutdown, init_tracing};
use orbos_types::{CommandEnvelope, Operation, Payload, TaskId};
use tokio::sync::watch;
use tracing::warn;

fn main() {
    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::default_with_env();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::default_with_env()
        }
    };
    println!();

    let (otel_guard, levels) = init_tracing("orbos", cfg.kernel.log_level);
    let inject_fault = std::env::args().skip(1).any(|arg| arg == "--inject-fault");

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        stop_tx.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; orderly shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start tokio runtime".red(), e);
            std::process::exit(1);
        }
    };
    let code = runtime.block_on(fly(cfg, levels, inject_fault, stop_rx));
    drop(runtime);
    drop(otel_guard);
    std::process::exit(code);
}

// ─────────────────────────────────────────────────────────────────────────────
// Boot / reboot loop
// ─────────────────────────────────────────────────────────────────────────────

async fn fly(
    cfg: config::Config,
    levels: LogLevelHandle,
    inject_fault: bool,
    stop: watch::Receiver<bool>,
) -> i32 {
    let backup: Arc<dyn BackupRegister> = Arc::new(FileBackupRegister::new(&cfg.backup_path));
    let sink: Arc<dyn LogLevelSink> = Arc::new(levels);
    let mut resets = 0u32;

    loop {
        let hardware = Hardware::simulated(backup.clone());
        let system = match FlightSystem::boot(cfg.kernel.clone(), hardware, Some(sink.clone())).await
        {
            Ok(system) => system,
            Err(e) => {
                eprintln!("{}: {}", "Boot failed".red().bold(), e);
                return 1;
            }
        };
        println!(
            "  {} Kernel up ({} tasks, previous run: {:?})",
            "✓".green().bold(),
            system.registry().len(),
            system.prior_shutdown()
        );

        if inject_fault && resets == 0 {
            request_fault(&system);
        }

        let mut stop = stop.clone();
        let outcome = system
            .run_until(async move {
                if stop.wait_for(|stopped| *stopped).await.is_err() {
                    // No Ctrl-C handler: run until reset.
                    std::future::pending::<()>().await;
                }
            })
            .await;

        match outcome {
            Shutdown::Clean => {
                println!("  {} Clean shutdown.", "✓".green().bold());
                return 0;
            }
            Shutdown::Reset(reason) => {
                resets += 1;
                println!(
                    "  {} Reset #{}: {}",
                    "✗".red().bold(),
                    resets,
                    reason.to_string().red()
                );
                if resets > cfg.max_resets {
                    eprintln!(
                        "{}",
                        format!("  Giving up after {} resets.", cfg.max_resets).red().bold()
                    );
                    return 2;
                }
                println!("  Rebooting …");
            }
        }
    }
}

fn request_fault(system: &FlightSystem) {
    let Some(injector) = system.registry().id_by_name("FaultInjector") else {
        println!("  {}", "No FaultInjector task configured; ignoring --inject-fault.".yellow());
        return;
    };
    let enable = CommandEnvelope::new(
        TaskId::TASK_MANAGER,
        Operation::EnableTask,
        Payload::Task(injector),
    );
    match system.enqueue(enable) {
        Ok(()) => println!("  {} FaultInjector enable requested.", "⚠".yellow().bold()),
        Err(e) => println!("{}: {}", "Fault injection failed".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____       __    ____  _____"#.bold().cyan());
    println!("{}", r#"  / __ \_____/ /_  / __ \/ ___/"#.bold().cyan());
    println!("{}", r#" / / / / ___/ __ \/ / / /\__ \ "#.bold().cyan());
    println!("{}", r#"/ /_/ / /  / /_/ / /_/ /___/ / "#.bold().cyan());
    println!("{}", r#"\____/_/  /_.___/\____//____/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "OrbOS".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Flight software supervisory kernel");
    println!();
}
