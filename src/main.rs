use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use cxlsim::sim::top::{CxlSystem, SystemConfig};
use log::{error, info};
use toml::Table;

#[derive(Parser)]
#[command(version, about)]
struct CxlsimArgs {
    #[arg(help = "Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help = "Override requests per requester")]
    requests: Option<u32>,
    #[arg(long, help = "Override number of requesters")]
    requesters: Option<usize>,
    #[arg(long, help = "Override timeout in ticks")]
    timeout: Option<u64>,
    #[arg(long, help = "Write the JSON report to this file instead of stdout")]
    report: Option<PathBuf>,
    #[arg(long, help = "Enable log at level (0:warn, 1:info, 2:debug) unless RUST_LOG is set")]
    log: Option<u64>,
}

pub fn main() -> ExitCode {
    let argv = CxlsimArgs::parse();
    let config = fs::read_to_string(&argv.config_path).unwrap_or_else(|err| {
        eprintln!("failed to read config file: {}", err);
        std::process::exit(1);
    });
    let config_table: Table = toml::from_str(&config).unwrap_or_else(|err| {
        eprintln!("cannot parse config toml: {}", err);
        std::process::exit(1);
    });

    let mut sys_config = SystemConfig::from_table(&config_table);

    // override toml configs with argv
    sys_config.sim.log_level = argv.log.unwrap_or(sys_config.sim.log_level);
    sys_config.sim.timeout = argv.timeout.unwrap_or(sys_config.sim.timeout);
    sys_config.sim.report_json = argv.report.or(sys_config.sim.report_json);
    sys_config.traffic.requests_per_requester = argv
        .requests
        .unwrap_or(sys_config.traffic.requests_per_requester);
    sys_config.traffic.num_requesters = argv.requesters.unwrap_or(sys_config.traffic.num_requesters);

    let level = match sys_config.sim.log_level {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let report_path = sys_config.sim.report_json.clone();
    let mut system = CxlSystem::new(sys_config);
    let report = match system.simulate() {
        Ok(report) => report,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("simulation failed: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(err) => {
            eprintln!("cannot serialize report: {}", err);
            return ExitCode::FAILURE;
        }
    };
    match report_path {
        Some(path) => {
            if let Err(err) = fs::write(&path, json) {
                eprintln!("cannot write report to {}: {}", path.display(), err);
                return ExitCode::FAILURE;
            }
            info!("report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    if report.timed_out {
        eprintln!("timed out after {} ticks", report.ticks);
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}
