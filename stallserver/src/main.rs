//! Offline stall server binary: loads the configuration, starts the relay
//! and drives the interactive console until `/stop`.

mod console;

use std::io::{self, BufRead};
use std::path::Path;

use clap::{App, Arg};
use slog::{crit, error, warn, Logger};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

use stallcore::{Server, Settings};

use crate::console::Console;

fn main() {
    let matches = App::new("stallserver")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Relay between game clients and the gate that keeps market stalls trading offline")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .value_name("FILE")
                .default_value("stallserver.toml")
                .help("Path to the TOML configuration file"),
        )
        .arg(
            Arg::with_name("log-level")
                .short("l")
                .long("log-level")
                .takes_value(true)
                .default_value("info")
                .possible_values(&["trace", "debug", "info", "warning", "error", "critical"])
                .help("Log verbosity"),
        )
        .get_matches();

    let severity = match matches.value_of("log-level") {
        Some("trace") => Severity::Trace,
        Some("debug") => Severity::Debug,
        Some("warning") => Severity::Warning,
        Some("error") => Severity::Error,
        Some("critical") => Severity::Critical,
        _ => Severity::Info,
    };

    let log = match TerminalLoggerBuilder::new()
        .level(severity)
        .destination(Destination::Stderr)
        .build()
    {
        Ok(log) => log,
        Err(build_error) => {
            eprintln!("logger setup failed: {}", build_error);
            return;
        }
    };

    println!("==========================================");
    println!(" stallserver v{} - offline stall relay", env!("CARGO_PKG_VERSION"));
    println!("==========================================");

    let config_path = matches.value_of("config").unwrap_or("stallserver.toml");
    let settings = match load_settings(config_path, &log) {
        Some(settings) => settings,
        None => return,
    };

    let mut server = match Server::new(settings, log.clone()) {
        Ok(server) => server,
        Err(setup_error) => {
            crit!(log, "server setup failed"; "error" => ?setup_error);
            return;
        }
    };

    if let Err(run_error) = server.run() {
        crit!(log, "server startup failed"; "error" => ?run_error);
        return;
    }

    let ctx = server.ctx();
    let commands = Console::standard();
    println!("Type /help for the list of commands.");

    let stdin = io::stdin();
    let mut line = String::new();

    while !ctx.stopping() {
        line.clear();

        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => commands.dispatch(&line, &ctx),
            Err(read_error) => {
                error!(log, "console read failed"; "error" => %read_error);
                break;
            }
        }
    }

    server.stop();
}

fn load_settings(path: &str, log: &Logger) -> Option<Settings> {
    if !Path::new(path).exists() {
        warn!(log, "configuration file not found, using defaults"; "path" => path);
        return Some(Settings::default());
    }

    match serdeconv::from_toml_file(path) {
        Ok(settings) => Some(settings),
        Err(parse_error) => {
            crit!(log, "configuration file is invalid";
                "path" => path, "error" => %parse_error);
            None
        }
    }
}
