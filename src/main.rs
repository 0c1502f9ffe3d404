use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use chemsens::param::{self, Param};
use chemsens::run;
use chrono::Local;
use flexi_logger::{Duplicate, FileSpec, FlexiLoggerError, Logger, LoggerHandle, WriteMode};
use log::{error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

fn custom_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &log::Record,
) -> std::io::Result<()> {
    write!(
        w,
        "{} [{}] {}",
        now.now().format("%Y-%m-%d %H:%M:%S"),
        record.level(),
        record.args()
    )
}

fn start_logger(param: &Param) -> Result<LoggerHandle, FlexiLoggerError> {
    let logger = Logger::try_with_str(&param.general.log_level)?.format(custom_format);

    if param.general.log_base.is_empty() {
        logger.start()
    } else {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        logger
            .log_to_file(
                FileSpec::default()
                    .basename(&param.general.log_base)
                    .suffix(&param.general.log_suffix)
                    .discriminant(&timestamp),
            )
            .duplicate_to_stderr(Duplicate::All)
            .write_mode(WriteMode::BufferAndFlush)
            .start()
    }
}

fn main() {
    let param_path = std::env::args().nth(1).unwrap_or_else(|| "param.yaml".to_string());
    let param = match param::get(param_path.clone()) {
        Ok(param) => param,
        Err(e) => {
            eprintln!("Cannot load parameters from {}: {}", param_path, e);
            process::exit(1);
        }
    };

    let logger = match start_logger(&param) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Cannot start logger: {}", e);
            process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            let r = Arc::clone(&running);
            thread::spawn(move || {
                for signal in signals.forever() {
                    warn!("Signal {} received, stopping after the fits in progress...", signal);
                    r.store(false, Ordering::Relaxed);
                }
            });
        }
        Err(e) => warn!("Cannot install signal handlers: {}", e),
    }

    info!("\x1b[1;96mchemsens v{}#{}\x1b[0m", env!("CARGO_PKG_VERSION"), env!("CHEMSENS_GIT_SHA"));

    let status = match run(&param, running) {
        Ok(experiment) => {
            info!("{}", experiment.display_results());
            if param.general.save_exp.is_empty() {
                0
            } else {
                match experiment.save_auto(&param.general.save_exp) {
                    Ok(()) => {
                        info!("Experiment saved to {}", param.general.save_exp);
                        0
                    }
                    Err(e) => {
                        error!("Cannot save experiment: {}", e);
                        1
                    }
                }
            }
        }
        Err(e) => {
            error!("{}", e);
            1
        }
    };

    logger.flush();
    process::exit(status);
}
