//! Demo-Binary: startet einen Sprach-Anruf auf der Kommandozeile
//!
//! Braucht GEMINI_API_KEY in der Umgebung. Ctrl+C beendet den Anruf.

use anyhow::{anyhow, Result};
use aura_voice::call::{CallEvent, CallState};
use aura_voice::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let state = AppState::init().map_err(|e| anyhow!(e))?;

    let mut events = state.subscribe_call_events();

    state.start_voice_call().await.map_err(|e| anyhow!(e))?;
    println!("Call starting, press Ctrl+C to hang up");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Hanging up");
                state.stop_voice_call();
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(CallEvent::StateChanged(new_state)) => {
                        println!("Call state: {}", state.call_state_label());
                        // Server hat aufgelegt oder der Anruf ist gescheitert
                        if matches!(new_state, CallState::Idle | CallState::Error) {
                            break;
                        }
                    }
                    Ok(CallEvent::Error(message)) => {
                        eprintln!("Call error: {}", message);
                    }
                    Err(_) => break,
                }
            }
        }
    }

    Ok(())
}
