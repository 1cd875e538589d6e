// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! fanctl: operator tool for choosing the fan mode, setting a manual duty
//! and editing the fan curve. Writes go to the same documents the auto
//! service and the actuator read.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use pi_fan_control::config;
use pi_fan_control::curve::{CurveStore, FanCurve, clamp_duty, default_curve, parse_temperature};
use pi_fan_control::mode::{DEFAULT_MANUAL_DUTY, ModeResolver};
use pi_fan_control::sensor::{self, FixedTemperature, TemperatureSource};
use pi_fan_control::state::{ControlMode, ControlState, ControlStateSync};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "fanctl", about = "Fan mode and curve control")]
struct Cli {
    /// Path to the configuration file [default: /etc/fanctl/config.toml].
    #[arg(short, long)]
    config: Option<String>,

    /// Use this temperature (Celsius) instead of reading the sensor.
    #[arg(long, global = true, value_parser = parse_temperature)]
    temp: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current mode, commanded duty and temperature.
    Status,

    /// Switch mode: auto, manual, silent, normal or performance.
    Mode {
        mode: ControlMode,

        /// Duty for manual mode (0-255).
        #[arg(long, allow_negative_numbers = true)]
        pwm: Option<i64>,
    },

    /// Change the duty while in manual mode.
    Pwm {
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },

    /// Inspect or edit the fan curve.
    Curve {
        #[command(subcommand)]
        action: CurveAction,
    },

    /// Print the current temperature reading.
    Temp,
}

#[derive(Subcommand, Debug)]
enum CurveAction {
    /// List the curve points.
    Show,
    /// Add a point, or overwrite the duty of an existing temperature.
    Add {
        #[arg(allow_negative_numbers = true, value_parser = parse_temperature)]
        temp: f64,
        #[arg(allow_negative_numbers = true)]
        pwm: i64,
    },
    /// Remove the point at a temperature.
    Remove {
        #[arg(allow_negative_numbers = true, value_parser = parse_temperature)]
        temp: f64,
    },
    /// Restore the default curve.
    Reset,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config_path = config::resolve_config_path(cli.config.as_deref());
    let cfg = config::load_config_or_default(&config_path);

    let source: Box<dyn TemperatureSource> = match cli.temp {
        Some(t) => Box::new(FixedTemperature(t)),
        None => sensor::from_config(&cfg.sensor).context("Failed to set up temperature source")?,
    };
    let resolver = ModeResolver::new(
        CurveStore::new(&cfg.storage.curve_path),
        ControlStateSync::new(&cfg.storage.state_path),
    );

    match cli.command {
        Command::Status => show_status(&resolver, source.as_ref()),
        Command::Mode { mode, pwm } => set_mode(&resolver, source.as_ref(), mode, pwm),
        Command::Pwm { value } => set_manual_pwm(&resolver, value),
        Command::Curve { action } => edit_curve(resolver.curve(), action),
        Command::Temp => {
            let t = source
                .read_celsius()
                .with_context(|| format!("Failed to read {}", source.describe()))?;
            println!("{t:.1}C");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn show_status(resolver: &ModeResolver, source: &dyn TemperatureSource) -> anyhow::Result<()> {
    let state = resolver.state_sync().read();
    println!("Mode:        {}", state.mode);
    match state.target_duty {
        Some(duty) => println!("Target PWM:  {duty} ({}%)", percent(duty)),
        None => println!("Target PWM:  not set"),
    }

    match source.read_celsius() {
        Ok(t) => {
            let duty = resolver.curve().interpolate(t);
            println!("Temperature: {t:.1}C");
            println!("Curve PWM:   {duty} ({}%)", percent(duty));
        }
        Err(e) => println!("Temperature: unavailable ({e})"),
    }
    Ok(())
}

fn set_mode(
    resolver: &ModeResolver,
    source: &dyn TemperatureSource,
    mode: ControlMode,
    pwm: Option<i64>,
) -> anyhow::Result<()> {
    let current = resolver.state_sync().read();
    if pwm.is_some() && mode != ControlMode::Manual {
        log::warn!("--pwm only applies to manual mode, ignoring");
    }
    let manual = pwm
        .or(current.target_duty.map(i64::from))
        .unwrap_or(DEFAULT_MANUAL_DUTY);

    let target = if mode == ControlMode::Auto {
        match source.read_celsius() {
            Ok(t) => Some(resolver.resolve(mode, t, manual)),
            Err(e) => {
                log::warn!("Temperature unavailable ({e}), leaving the duty to the auto service");
                None
            }
        }
    } else {
        Some(resolver.resolve(mode, 0.0, manual))
    };

    let state = ControlState::new(mode, target);
    resolver
        .state_sync()
        .write(&state)
        .with_context(|| format!("Failed to write {}", resolver.state_sync().path().display()))?;

    match target {
        Some(duty) => println!("Mode set to {mode}, PWM {duty} ({}%)", percent(duty)),
        None => println!("Mode set to {mode}"),
    }
    Ok(())
}

fn set_manual_pwm(resolver: &ModeResolver, value: i64) -> anyhow::Result<()> {
    let current = resolver.state_sync().read();
    if current.mode != ControlMode::Manual {
        bail!(
            "Fan is in {} mode; switch with `fanctl mode manual --pwm {value}`",
            current.mode
        );
    }

    let duty = clamp_duty(value);
    resolver
        .state_sync()
        .write(&ControlState::new(ControlMode::Manual, Some(duty)))
        .with_context(|| format!("Failed to write {}", resolver.state_sync().path().display()))?;
    println!("Manual PWM set to {duty} ({}%)", percent(duty));
    Ok(())
}

fn edit_curve(store: &CurveStore, action: CurveAction) -> anyhow::Result<()> {
    let curve = match action {
        CurveAction::Show => store.load(),
        CurveAction::Add { temp, pwm } => store
            .add_point(temp, pwm)
            .with_context(|| format!("Failed to save {}", store.path().display()))?,
        CurveAction::Remove { temp } => store
            .remove_point(temp)
            .with_context(|| format!("Failed to save {}", store.path().display()))?,
        CurveAction::Reset => {
            let curve = default_curve();
            store
                .save(&curve)
                .with_context(|| format!("Failed to save {}", store.path().display()))?;
            curve
        }
    };
    print_curve(&curve);
    Ok(())
}

fn print_curve(curve: &FanCurve) {
    for p in curve.points() {
        println!("{:>5}C -> PWM {:>3} ({}%)", p.temp_c, p.pwm, percent(p.pwm));
    }
}

fn percent(duty: u8) -> u32 {
    duty as u32 * 100 / 255
}
