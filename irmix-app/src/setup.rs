//! Applying command-line mixer setup to an engine

use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use irmix_audio::{AlignStart, EngineEvent, IrMixEngine, NUM_SLOTS};
use irmix_library::SessionState;
use tracing::{info, warn};

use crate::cli::MixArgs;

/// Longest wait for an alignment pass
const ALIGN_WAIT: Duration = Duration::from_secs(30);

/// Build an engine from `args`: session, impulse files, parameters, then
/// optional alignment
pub fn build_engine(args: &MixArgs) -> anyhow::Result<IrMixEngine> {
    if args.irs.len() > NUM_SLOTS {
        bail!("at most {} impulse responses can be loaded", NUM_SLOTS);
    }

    let mut engine = IrMixEngine::new();

    let session = if let Some(path) = &args.session {
        Some(SessionState::load_from(path).with_context(|| format!("reading session {}", path.display()))?)
    } else if args.last_session {
        Some(SessionState::load())
    } else {
        None
    };
    if let Some(session) = session {
        for (slot, err) in engine.restore_session(&session) {
            warn!(slot = slot + 1, error = %err, "session slot not restored");
        }
    }

    for (slot, path) in args.irs.iter().enumerate() {
        engine
            .load_impulse(slot, path)
            .with_context(|| format!("loading {} into slot {}", path.display(), slot + 1))?;
    }

    for (name, value) in &args.params {
        let stored = engine.set_parameter(name, *value)?;
        if stored != *value {
            warn!(name = %name, requested = value, stored, "parameter clamped");
        }
    }

    if args.align {
        run_alignment(&mut engine)?;
    }

    if args.save_session {
        engine.session_state().save().context("saving session")?;
        info!(path = %SessionState::session_path().display(), "session saved");
    }

    Ok(engine)
}

/// Trigger alignment and block until its results are applied
pub fn run_alignment(engine: &mut IrMixEngine) -> anyhow::Result<()> {
    if engine.trigger_alignment()? == AlignStart::Busy {
        bail!("alignment already running");
    }

    let start = Instant::now();
    loop {
        let remaining = ALIGN_WAIT.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            bail!("alignment did not finish within {:?}", ALIGN_WAIT);
        }
        match engine.events().recv_timeout(remaining) {
            Ok(EngineEvent::AlignmentComplete) => {
                engine.apply_alignment_results();
                return Ok(());
            }
            Ok(EngineEvent::Error(msg)) => warn!(%msg, "engine error"),
            Ok(_) => {}
            Err(_) => bail!("alignment did not finish within {:?}", ALIGN_WAIT),
        }
    }
}

/// Print every slot's name and timing
pub fn print_slots(engine: &IrMixEngine) {
    for slot in 0..NUM_SLOTS {
        let n = slot + 1;
        let delay = engine.parameter(&format!("Slot{n}_DelayMs")).unwrap_or(0.0);
        let align = engine.parameter(&format!("Slot{n}_AlignMs")).unwrap_or(0.0);
        println!(
            "slot {}: {:<24} delay {:>6.3} ms  align {:>6.3} ms",
            n,
            engine.slot_name(slot),
            delay,
            align
        );
    }
}
