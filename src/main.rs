//! Launcher for cavity bring-up, shutdown, and the quench monitor.
//!
//! Targets one cavity, one cryomodule, one linac, or the whole machine;
//! parallelism across targets is a matter of launching more processes. The
//! site point transport is an external collaborator, so this binary wires
//! the orchestration against the in-memory backend seeded with nominal
//! values: a full dry-run rehearsal of the requested sequence. Exit code 0
//! only when every targeted cavity ends `Ready`.

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use srf_bringup::config::{MonitorConfig, SetupConfig};
use srf_bringup::hierarchy::Machine;
use srf_bringup::points::MemoryPoints;
use srf_bringup::quench::QuenchMonitor;
use srf_bringup::sim;
use srf_bringup::types::{CavityNumber, CavityStatusReport, RequestFlags};

const USAGE: &str = "usage: srf-bringup [--shutdown | --quench-monitor] \
[--linac NAME | --cm NAME [--cavity N]] [--ssa-cal] [--auto-tune] [--char] [--ramp]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Setup,
    Shutdown,
    QuenchMonitor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Machine,
    Linac(String),
    Cryomodule(String),
    Cavity { cm: String, number: CavityNumber },
}

#[derive(Debug, PartialEq)]
struct Invocation {
    mode: Mode,
    target: Target,
    flags: RequestFlags,
}

impl Invocation {
    /// Hand-rolled argument parsing; no request flag given means all four.
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut mode = Mode::Setup;
        let mut linac = None;
        let mut cm = None;
        let mut cavity = None;
        let mut flags = RequestFlags::none();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--shutdown" => mode = Mode::Shutdown,
                "--quench-monitor" => mode = Mode::QuenchMonitor,
                "--linac" => linac = Some(next_value(&mut iter, "--linac")?),
                "--cm" => cm = Some(next_value(&mut iter, "--cm")?),
                "--cavity" => {
                    let value = next_value(&mut iter, "--cavity")?;
                    let number: u8 = value
                        .parse()
                        .map_err(|_| format!("--cavity expects a number, got {value}"))?;
                    cavity = Some(
                        CavityNumber::new(number)
                            .ok_or(format!("cavity number must be 1-8, got {number}"))?,
                    );
                }
                "--ssa-cal" => flags.ssa_cal = true,
                "--auto-tune" => flags.auto_tune = true,
                "--char" => flags.cav_char = true,
                "--ramp" => flags.rf_ramp = true,
                other => return Err(format!("unknown argument {other}")),
            }
        }
        let target = match (linac, cm, cavity) {
            (None, None, None) => Target::Machine,
            (Some(name), None, None) => Target::Linac(name),
            (None, Some(name), None) => Target::Cryomodule(name),
            (None, Some(name), Some(number)) => Target::Cavity { cm: name, number },
            (_, None, Some(_)) => return Err("--cavity requires --cm".to_string()),
            (Some(_), Some(_), _) => {
                return Err("--linac and --cm are mutually exclusive".to_string())
            }
        };
        if !flags.any() {
            flags = RequestFlags::all();
        }
        Ok(Invocation {
            mode,
            target,
            flags,
        })
    }
}

fn next_value<'a>(
    iter: &mut impl Iterator<Item = &'a String>,
    flag: &str,
) -> Result<String, String> {
    iter.next()
        .map(|s| s.to_string())
        .ok_or(format!("{flag} expects a value"))
}

async fn run_target(
    machine: &mut Machine,
    points: &MemoryPoints,
    config: &SetupConfig,
    invocation: &Invocation,
) -> Result<Vec<CavityStatusReport>, String> {
    let shutdown = invocation.mode == Mode::Shutdown;
    match &invocation.target {
        Target::Machine => {
            machine.flags = invocation.flags;
            if shutdown {
                machine.trigger_shutdown(points, config).await;
            } else {
                machine.trigger_start(points, config).await;
            }
            Ok(machine.status_reports())
        }
        Target::Linac(name) => {
            let linac = machine
                .linac_mut(name)
                .ok_or(format!("no linac named {name}"))?;
            linac.flags = invocation.flags;
            if shutdown {
                linac.trigger_shutdown(points, config).await;
            } else {
                linac.trigger_start(points, config).await;
            }
            Ok(linac
                .cryomodules()
                .iter()
                .flat_map(|cm| cm.status_reports())
                .collect())
        }
        Target::Cryomodule(name) => {
            let module = machine
                .cryomodule_mut(name)
                .ok_or(format!("no cryomodule named {name}"))?;
            module.flags = invocation.flags;
            if shutdown {
                module.trigger_shutdown(points, config).await;
            } else {
                module.trigger_start(points, config).await;
            }
            Ok(module.status_reports())
        }
        Target::Cavity { cm, number } => {
            let module = machine
                .cryomodule_mut(cm)
                .ok_or(format!("no cryomodule named {cm}"))?;
            let cavity = module
                .cavity_mut(*number)
                .ok_or(format!("no cavity {number} in CM{cm}"))?;
            cavity.flags = invocation.flags;
            if shutdown {
                cavity.shut_down(points, config).await;
            } else {
                cavity.setup(points, config).await;
            }
            Ok(vec![cavity.status_report()])
        }
    }
}

async fn run_quench_monitor(points: &MemoryPoints, machine: &Machine) -> ExitCode {
    let mut monitor = QuenchMonitor::new(MonitorConfig::from_env());
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    match monitor.run(points, machine, shutdown).await {
        Ok(()) => {
            print_json(&monitor.report());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("quench monitor stopped: {err}");
            ExitCode::from(1)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to serialize report: {err}"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "srf_bringup=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match Invocation::parse(&args) {
        Ok(invocation) => invocation,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("{USAGE}");
            return ExitCode::from(1);
        }
    };

    let mut machine = Machine::new();
    let points = MemoryPoints::new();
    sim::seed_nominal_machine(&points, &machine);

    if invocation.mode == Mode::QuenchMonitor {
        return run_quench_monitor(&points, &machine).await;
    }

    let config = SetupConfig::from_env();
    match run_target(&mut machine, &points, &config, &invocation).await {
        Ok(reports) => {
            print_json(&reports);
            if reports.iter().all(|r| r.status.is_ready()) {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation, String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Invocation::parse(&args)
    }

    #[test]
    fn no_arguments_means_full_machine_setup_with_all_flags() {
        let invocation = parse(&[]).unwrap();
        assert_eq!(invocation.mode, Mode::Setup);
        assert_eq!(invocation.target, Target::Machine);
        assert_eq!(invocation.flags, RequestFlags::all());
    }

    #[test]
    fn explicit_flags_suppress_the_default() {
        let invocation = parse(&["--ssa-cal"]).unwrap();
        assert!(invocation.flags.ssa_cal);
        assert!(!invocation.flags.rf_ramp);
    }

    #[test]
    fn cavity_target_requires_cm() {
        assert!(parse(&["--cavity", "3"]).is_err());
        let invocation = parse(&["--cm", "02", "--cavity", "3"]).unwrap();
        assert_eq!(
            invocation.target,
            Target::Cavity {
                cm: "02".to_string(),
                number: CavityNumber(3)
            }
        );
    }

    #[test]
    fn cavity_number_is_validated() {
        assert!(parse(&["--cm", "02", "--cavity", "9"]).is_err());
        assert!(parse(&["--cm", "02", "--cavity", "x"]).is_err());
    }

    #[test]
    fn linac_and_cm_are_mutually_exclusive() {
        assert!(parse(&["--linac", "L1B", "--cm", "02"]).is_err());
    }

    #[test]
    fn shutdown_mode_parses() {
        let invocation = parse(&["--shutdown", "--cm", "H1"]).unwrap();
        assert_eq!(invocation.mode, Mode::Shutdown);
        assert_eq!(invocation.target, Target::Cryomodule("H1".to_string()));
    }

    #[test]
    fn unknown_arguments_are_rejected() {
        assert!(parse(&["--frobnicate"]).is_err());
    }

    #[test]
    fn missing_value_is_rejected() {
        assert!(parse(&["--linac"]).is_err());
    }
}
