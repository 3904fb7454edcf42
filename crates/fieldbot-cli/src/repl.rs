//! REPL – the fieldbot prompt.
//!
//! Supported commands:
//!   /help          – show this list
//!   /run           – start an autonomous session (Ctrl-C ends it)
//!   /runs          – list recorded runs
//!   /ask <text>    – put a question to the farming assistant
//!   /quit | /exit  – leave fieldbot
//!
//! Anything else is a question about what the rover saw, e.g.
//! `did we see a pest last run?`.

use colored::Colorize;
use std::io::{self, BufRead, Write};

use crate::session::SessionRunner;

/// A parsed prompt line.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Help,
    Run,
    Runs,
    Ask(&'a str),
    Quit,
    Query(&'a str),
    Unknown(&'a str),
}

fn parse(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    Some(match head {
        "/help" => Command::Help,
        "/run" => Command::Run,
        "/runs" => Command::Runs,
        "/ask" => Command::Ask(rest),
        "/quit" | "/exit" => Command::Quit,
        other if other.starts_with('/') => Command::Unknown(other),
        _ => Command::Query(line),
    })
}

/// Read commands from stdin until `/quit` or EOF.
pub fn run(runner: &SessionRunner) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", "fieldbot>".bold().green());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let Some(cmd) = parse(&line) else {
            continue;
        };
        match cmd {
            Command::Help => cmd_help(),
            Command::Run => cmd_run(runner),
            Command::Runs => cmd_runs(runner),
            Command::Ask("") => println!("Usage: {} <question>", "/ask".bold()),
            Command::Ask(question) => println!("{}", runner.ask(question)),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Command::Query(question) => println!("{}", runner.history().answer(question)),
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "fieldbot Commands".bold().underline());
    println!("  {}          – start an autonomous session (Ctrl-C ends it)", "/run".bold().cyan());
    println!("  {}         – list recorded runs", "/runs".bold().cyan());
    println!("  {}  – ask the farming assistant", "/ask <text>".bold().cyan());
    println!("  {} – exit the CLI", "/quit  /exit".bold().cyan());
    println!("  Anything else is a question about the runs, e.g. {}", "did we see a pest last run?".italic());
    println!();
}

pub fn cmd_run(runner: &SessionRunner) {
    println!("  {} Press {} to end the session.", "▶".green().bold(), "Ctrl-C".bold());
    match runner.run_session() {
        Ok(run) => {
            let seconds = (run.finished_at - run.started_at).num_seconds();
            println!(
                "  {} Run {} recorded: {} observation(s) over {}s.",
                "✓".green().bold(),
                run.id.to_string().dimmed(),
                run.entries.len(),
                seconds
            );
        }
        Err(e) => println!("{}: {}", "Could not start the session".red(), e),
    }
}

fn cmd_runs(runner: &SessionRunner) {
    let runs = runner.history().runs();
    if runs.is_empty() {
        println!("  No runs recorded yet. Type {} to start one.", "/run".bold());
        return;
    }
    for (i, run) in runs.iter().enumerate() {
        let labelled = run.entries.iter().filter(|e| e.label != fieldbot_runtime::NO_FRAME_LABEL).count();
        println!(
            "  {:>2}. {}  {} observation(s), {} labelled",
            i + 1,
            run.started_at.format("%Y-%m-%d %H:%M:%S").to_string().bold(),
            run.entries.len(),
            labelled
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(parse("   \n"), None);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse("/run\n"), Some(Command::Run));
        assert_eq!(parse("/runs"), Some(Command::Runs));
        assert_eq!(parse("/exit"), Some(Command::Quit));
        assert_eq!(parse("/ask  when do tomatoes ripen? "), Some(Command::Ask("when do tomatoes ripen?")));
        assert_eq!(parse("/ask"), Some(Command::Ask("")));
        assert_eq!(parse("/dance now"), Some(Command::Unknown("/dance")));
    }

    #[test]
    fn plain_text_is_a_run_query() {
        assert_eq!(
            parse("did we see a pest last run?"),
            Some(Command::Query("did we see a pest last run?"))
        );
    }
}
