//! `fieldbot-cli` – the fieldbot command line.
//!
//! This binary is the entry point of the rover.  It:
//!
//! 1. Initialises logging (and optional OTLP export) via
//!    [`fieldbot_runtime::init_tracing`].
//! 2. Loads `~/.fieldbot/config.toml`, writing the defaults on first run.
//! 3. Drives one autonomous session until **Ctrl-C**, which cancels the
//!    session so the drive stops and the hardware is released.
//! 4. Drops the user into a prompt for questions about the recorded runs.

mod config;
mod repl;
mod session;

use colored::Colorize;
use tracing::warn;

use crate::config::Config;
use crate::session::SessionRunner;

fn main() {
    let hardware = if cfg!(feature = "raspberry-pi") { "raspberry-pi" } else { "sim" };
    let _tracing = fieldbot_runtime::init_tracing(&fieldbot_runtime::TelemetryConfig::from_env(hardware));

    print_banner();

    let cfg = load_config();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start the async runtime".red(), e);
            std::process::exit(1);
        }
    };
    let runner = SessionRunner::new(cfg, runtime);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // The first Ctrl-C ends the running session; at the prompt it exits.
    let active = runner.active();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        if active.interrupt() {
            println!("{}", "⚠  Ctrl-C received – stopping the session …".yellow().bold());
        } else {
            println!("{}", "  ✓ Exiting fieldbot.".green());
            std::process::exit(130);
        }
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; sessions can only end with the process");
    }

    repl::cmd_run(&runner);

    println!();
    println!("  Ask about the run, e.g. {}", "did we see a pest last run?".italic());
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&runner);
}

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"    _______      __    ____        __ "#.bold().green());
    println!("{}", r#"   / __(_)__ / /___/ / /  ___  / /_"#.bold().green());
    println!("{}", r#"  / _// / -_) / _  / _ \/ _ \/ __/"#.bold().green());
    println!("{}", r#" /_/ /_/\__/_/\_,_/_.__/\___/\__/ "#.bold().green());
    println!();
    println!("  {} {}", "fieldbot".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Autonomous field rover");
    println!();
}
