//! cockpit-hook: reports one CLI lifecycle event to the cockpit ingress.
//!
//! Usage: cockpit-hook <event-type> [--tool NAME] [--title TEXT] [--task-id ID]
//!
//! The slot comes from `AGENTCOCKPIT_TERMINAL_ID`, the target from
//! `AGENTCOCKPIT_HOOK_URL`. Always exits 0: a missing or slow cockpit must
//! never fail the CLI's turn.

use std::io::{IsTerminal, Read};
use std::process;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use agentcockpit_lib::config::{hook_url_from_env, terminal_id_from_env};
use agentcockpit_lib::models::HookReport;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const STDIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "cockpit-hook")]
#[command(version)]
#[command(about = "Report a CLI hook event to AgentCockpit")]
struct Args {
    /// session_finished, confirmation_needed or title_update
    event_type: String,
    #[arg(long)]
    tool: Option<String>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    task_id: Option<String>,
}

/// The part of the CLI's hook payload we use
#[derive(Debug, Default, Deserialize)]
struct HookInput {
    #[serde(default)]
    tool_name: Option<String>,
}

/// Read the CLI's JSON payload if one is piped in, giving up after a short
/// wait so a held-open stdin cannot hang the hook
fn read_stdin_payload() -> HookInput {
    if std::io::stdin().is_terminal() {
        return HookInput::default();
    }
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = String::new();
        let _ = std::io::stdin().read_to_string(&mut buf);
        let _ = tx.send(buf);
    });
    rx.recv_timeout(STDIN_TIMEOUT)
        .ok()
        .and_then(|buf| serde_json::from_str(&buf).ok())
        .unwrap_or_default()
}

fn send(report: &HookReport, url: &str) -> Result<(), reqwest::Error> {
    let client = reqwest::blocking::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    client.post(url).json(report).send()?.error_for_status()?;
    Ok(())
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            process::exit(0);
        }
    };

    let input = read_stdin_payload();
    let mut report = HookReport::new(args.event_type, terminal_id_from_env());
    report.tool = args.tool.or(input.tool_name);
    report.title = args.title;
    report.task_id = args.task_id;

    if let Err(e) = send(&report, &hook_url_from_env()) {
        eprintln!("cockpit-hook: {}", e);
    }
    process::exit(0);
}
