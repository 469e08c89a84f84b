//! `hearth chat`: type what you would say; devices are simulated.

use chrono::Utc;
use hearth_agent::{ActionRecord, Runtime, TurnOutcome};
use hearth_config::AppConfig;
use hearth_core::event::{NewEvent, PresenceSignal, PresenceState, Transcript};
use hearth_core::intent::ActionState;
use hearth_core::speech::{SilentVoice, SpeechSynthesizer};
use hearth_devices::{DeviceRegistry, SimulatedHome};
use hearth_ingress::RoutineScheduler;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::voice;

fn print_action(record: &ActionRecord) {
    let action = record.action.summary();
    match record.state {
        ActionState::Acknowledged => println!("     ✓ {action}"),
        ActionState::Failed | ActionState::TimedOut => println!(
            "     ✗ {action} ({} after {} attempt(s))",
            record.state.as_str(),
            record.attempt_count()
        ),
        other => println!(
            "     - {action} ({}: {})",
            other.as_str(),
            record.reason.as_deref().unwrap_or("")
        ),
    }
}

fn print_outcome(outcome: &TurnOutcome) {
    for record in &outcome.actions {
        print_action(record);
    }
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let engine = hearth_providers::from_config(&config.reasoning)?;
    let store = hearth_portfolio::open(&config.portfolio)?;
    let home = Arc::new(SimulatedHome::new(DeviceRegistry::from_config(&config.devices)));
    let (console_voice, stream) = voice::console();
    let voice: Arc<dyn SpeechSynthesizer> = if config.voice.enabled {
        Arc::new(console_voice)
    } else {
        Arc::new(SilentVoice)
    };

    let (runtime, feed) = Runtime::from_config(&config, engine, store, home.clone(), voice)?;
    let runtime = if config.voice.enabled {
        runtime.with_reply_sink(Arc::new(stream))
    } else {
        runtime
    };
    let runtime = Arc::new(runtime);
    let log = runtime.log();
    let shutdown = CancellationToken::new();

    let scheduler = RoutineScheduler::from_config(log.clone(), &config.routines)?;
    let routines = scheduler.len();
    let scheduler_task = scheduler.spawn(shutdown.clone());

    let (tx, mut outcomes) = mpsc::unbounded_channel();
    let runtime_task = tokio::spawn(runtime.clone().run(feed, shutdown.clone(), Some(tx)));
    debug!(model = %config.reasoning.model, routines, "Chat session started");

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║            Hearth: Interactive Mode            ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {}", config.reasoning.model);
    println!("  Devices:   {} (simulated)", config.devices.len());
    println!("  Routines:  {routines}");
    println!();
    println!("  Type what you would say and press Enter.");
    println!("  /presence home|away|asleep, /devices, /bye");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();

        match input {
            "" => {}
            "/bye" | "/quit" | "exit" => break,
            "/devices" => {
                for state in home.snapshot() {
                    println!("     {} {}={}", state.device, state.capability, state.state);
                }
            }
            _ if input.starts_with("/presence") => {
                let arg = input.trim_start_matches("/presence").trim();
                match PresenceState::parse(arg) {
                    Some(state) => {
                        log.submit(NewEvent::presence(PresenceSignal {
                            state,
                            zone: None,
                            sensor: "console".into(),
                        }))?;
                        println!("     presence: {}", state.as_str());
                    }
                    None => println!("     usage: /presence home|away|asleep"),
                }
            }
            text => {
                let id = log.submit(NewEvent::speech(Transcript::immediate(text, Utc::now())))?;
                // Wait for this turn; routines that finish meanwhile are shown too
                while let Some(outcome) = outcomes.recv().await {
                    print_outcome(&outcome);
                    if outcome.trigger == id {
                        break;
                    }
                }
            }
        }

        prompt()?;
    }

    println!("\n  Goodbye!");
    shutdown.cancel();
    runtime_task.await?;
    scheduler_task.await?;
    Ok(())
}
