//! Engine facade - control-thread operations and the audio-side processor
//!
//! [`IrMixEngine`] lives on the control thread. It owns the decoded impulse
//! responses, the parameter store and the aligner, and talks to the audio
//! thread's [`MixProcessor`] over bounded channels: ready-built convolvers go
//! down, replaced ones come back up to be dropped here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use irmix_analysis::AlignmentResult;
use irmix_library::{sibling_impulse, ImpulseLoader, ImpulseResponse, LoadError, ResampleError, SessionState};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::aligner::{AlignStart, Aligner};
use crate::convolver::Convolver;
use crate::export::{write_wav_24, ExportError};
use crate::params::{ParamStore, NUM_SLOTS};
use crate::renderer::{render_offline, MixRenderer, RenderSnapshot, DEFAULT_RENDER_SECS};

/// Capacity of the command, retire, and event channels
const CHANNEL_CAPACITY: usize = 1024;

/// Display name of an empty slot
pub const EMPTY_SLOT_NAME: &str = "[Empty]";

/// Errors returned by engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Slot index {0} out of range")]
    InvalidSlot(usize),
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Failed to load impulse: {0}")]
    Load(#[from] LoadError),
    #[error("Failed to build convolution kernel: {0}")]
    Kernel(#[from] ResampleError),
    #[error("Export failed: {0}")]
    Export(#[from] ExportError),
    #[error("No sibling impulse for slot {0}")]
    NoSibling(usize),
    #[error("Audio command queue is full")]
    QueueFull,
    #[error("Failed to start alignment worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Notifications for the control thread
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Something audible changed (load, clear, parameters, alignment)
    ProcessingChanged,
    SlotLoaded { slot: usize },
    SlotCleared { slot: usize },
    /// An alignment pass published results
    AlignmentComplete,
    Error(String),
}

/// Messages from the control thread to the audio thread
pub enum ProcessorCommand {
    Install { slot: usize, convolver: Box<Convolver> },
    Clear { slot: usize },
    Reset,
}

/// Audio-thread side of the engine
///
/// Call [`MixProcessor::process_block`] from the audio callback. Pending
/// commands are applied at the start of each block.
pub struct MixProcessor {
    renderer: MixRenderer,
    commands: Receiver<ProcessorCommand>,
    retired: Sender<Box<Convolver>>,
}

impl MixProcessor {
    /// Apply queued commands. Never blocks or allocates.
    fn drain_commands(&mut self) {
        loop {
            let cmd = match self.commands.try_recv() {
                Ok(cmd) => cmd,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            let replaced = match cmd {
                ProcessorCommand::Install { slot, convolver } => {
                    self.renderer.slot_mut(slot).install(convolver)
                }
                ProcessorCommand::Clear { slot } => self.renderer.slot_mut(slot).take(),
                ProcessorCommand::Reset => {
                    self.renderer.reset();
                    None
                }
            };
            if let Some(old) = replaced {
                // If the control side is gone the kernel is dropped here
                let _ = self.retired.try_send(old);
            }
        }
    }

    /// Process an interleaved stereo block in place
    pub fn process_block(&mut self, buffer: &mut [f32]) {
        self.drain_commands();
        self.renderer.process_block(buffer);
    }

    /// Process interleaved `input` with `input_channels` channels into
    /// interleaved stereo `output`
    pub fn process_block_from(&mut self, input: &[f32], input_channels: usize, output: &mut [f32]) {
        self.drain_commands();
        self.renderer.process_block_from(input, input_channels, output);
    }

    pub fn sample_rate(&self) -> u32 {
        self.renderer.sample_rate()
    }

    pub fn max_block(&self) -> usize {
        self.renderer.max_block()
    }
}

/// Control-side state of one slot
#[derive(Default)]
struct SlotState {
    impulse: Option<Arc<ImpulseResponse>>,
    /// User delay captured when alignment was last triggered
    manual_delay_ms: Option<f32>,
}

/// Link to the live processor
struct ProcessorLink {
    commands: Sender<ProcessorCommand>,
    retired: Receiver<Box<Convolver>>,
    sample_rate: u32,
    max_block: usize,
}

/// The IR mixer engine (control thread)
pub struct IrMixEngine {
    params: Arc<ParamStore>,
    slots: [SlotState; NUM_SLOTS],
    loader: ImpulseLoader,
    aligner: Aligner,
    processor: Option<ProcessorLink>,
    event_tx: Sender<EngineEvent>,
    event_rx: Receiver<EngineEvent>,
}

impl Default for IrMixEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IrMixEngine {
    pub fn new() -> Self {
        let (event_tx, event_rx) = bounded(CHANNEL_CAPACITY);
        Self {
            params: Arc::new(ParamStore::new()),
            slots: Default::default(),
            loader: ImpulseLoader::new(),
            aligner: Aligner::new(),
            processor: None,
            event_tx,
            event_rx,
        }
    }

    /// Shared parameter store
    pub fn params(&self) -> &Arc<ParamStore> {
        &self.params
    }

    /// Receiver for engine events
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.event_rx
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.try_send(event);
    }

    fn check_slot(slot: usize) -> Result<(), EngineError> {
        if slot < NUM_SLOTS {
            Ok(())
        } else {
            Err(EngineError::InvalidSlot(slot))
        }
    }

    /// Build the audio-side processor for `sample_rate` / `max_block`.
    ///
    /// Currently loaded impulses are built into it. A processor created
    /// earlier stops receiving commands.
    pub fn create_processor(&mut self, sample_rate: u32, max_block: usize) -> Result<MixProcessor, EngineError> {
        let mut renderer = MixRenderer::new(&self.params);
        renderer.prepare(sample_rate, max_block)?;
        for (index, state) in self.slots.iter().enumerate() {
            if let Some(ir) = &state.impulse {
                renderer.slot_mut(index).load_impulse(Arc::clone(ir))?;
            }
        }

        let (cmd_tx, cmd_rx) = bounded(CHANNEL_CAPACITY);
        let (retired_tx, retired_rx) = bounded(CHANNEL_CAPACITY);
        self.processor = Some(ProcessorLink {
            commands: cmd_tx,
            retired: retired_rx,
            sample_rate,
            max_block: renderer.max_block(),
        });

        info!(sample_rate, max_block, "processor created");
        Ok(MixProcessor {
            renderer,
            commands: cmd_rx,
            retired: retired_tx,
        })
    }

    /// Sample rate of the live processor, if one was created
    pub fn processor_sample_rate(&self) -> Option<u32> {
        self.processor.as_ref().map(|link| link.sample_rate)
    }

    fn send_command(&self, cmd: ProcessorCommand) -> Result<(), EngineError> {
        if let Some(link) = &self.processor {
            link.commands.try_send(cmd).map_err(|_| EngineError::QueueFull)?;
        }
        Ok(())
    }

    /// Drop convolvers the audio thread has handed back
    pub fn collect_retired(&self) -> usize {
        let Some(link) = &self.processor else {
            return 0;
        };
        let mut count = 0;
        while link.retired.try_recv().is_ok() {
            count += 1;
        }
        if count > 0 {
            debug!(count, "released retired kernels");
        }
        count
    }

    /// Load an impulse response file into `slot`.
    ///
    /// On failure the slot keeps whatever it held before. On success the
    /// slot's alignment offset is reset.
    pub fn load_impulse(&mut self, slot: usize, path: &Path) -> Result<(), EngineError> {
        Self::check_slot(slot)?;
        let ir = match self.loader.load(path) {
            Ok(ir) => Arc::new(ir),
            Err(e) => {
                warn!(slot, path = %path.display(), error = %e, "failed to load impulse");
                self.emit(EngineEvent::Error(format!("Slot {}: {}", slot + 1, e)));
                return Err(e.into());
            }
        };
        self.install_impulse(slot, ir)?;
        info!(slot, path = %path.display(), "impulse loaded");
        Ok(())
    }

    /// Put an already decoded response into `slot`
    pub fn install_impulse(&mut self, slot: usize, ir: Arc<ImpulseResponse>) -> Result<(), EngineError> {
        Self::check_slot(slot)?;
        if let Some(link) = &self.processor {
            let convolver = Convolver::from_impulse(Arc::clone(&ir), link.sample_rate, link.max_block)?;
            self.send_command(ProcessorCommand::Install {
                slot,
                convolver: Box::new(convolver),
            })?;
        }

        self.slots[slot].impulse = Some(ir);
        self.discard_pending_alignment();
        self.params.slot(slot).align_ms.set(0.0);
        self.collect_retired();

        self.emit(EngineEvent::SlotLoaded { slot });
        self.emit(EngineEvent::ProcessingChanged);
        Ok(())
    }

    /// Empty `slot`
    pub fn clear_impulse(&mut self, slot: usize) -> Result<(), EngineError> {
        Self::check_slot(slot)?;
        self.send_command(ProcessorCommand::Clear { slot })?;
        self.slots[slot].impulse = None;
        self.discard_pending_alignment();
        self.params.slot(slot).align_ms.set(0.0);
        self.collect_retired();

        info!(slot, "slot cleared");
        self.emit(EngineEvent::SlotCleared { slot });
        self.emit(EngineEvent::ProcessingChanged);
        Ok(())
    }

    /// Load the file `step` positions away from the current one in its folder
    /// (wrapping). Returns the newly loaded path.
    pub fn navigate_to_sibling_impulse(&mut self, slot: usize, step: isize) -> Result<PathBuf, EngineError> {
        Self::check_slot(slot)?;
        let current = self
            .loaded_path(slot)
            .ok_or(EngineError::NoSibling(slot))?;
        let next = sibling_impulse(&current, step).ok_or(EngineError::NoSibling(slot))?;
        self.load_impulse(slot, &next)?;
        Ok(next)
    }

    /// Whether `slot` holds an impulse
    pub fn is_loaded(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|s| s.impulse.is_some())
    }

    /// Source file of the impulse in `slot`
    pub fn loaded_path(&self, slot: usize) -> Option<PathBuf> {
        self.slots
            .get(slot)?
            .impulse
            .as_ref()?
            .path()
            .map(Path::to_path_buf)
    }

    /// Display name for `slot`: the file stem, or `[Empty]`
    pub fn slot_name(&self, slot: usize) -> String {
        self.slots
            .get(slot)
            .and_then(|s| s.impulse.as_ref())
            .and_then(|ir| ir.name())
            .unwrap_or_else(|| EMPTY_SLOT_NAME.to_string())
    }

    /// Write a parameter by name. Returns the stored (clamped) value.
    pub fn set_parameter(&self, name: &str, value: f32) -> Result<f32, EngineError> {
        let stored = self
            .params
            .set(name, value)
            .ok_or_else(|| EngineError::UnknownParameter(name.to_string()))?;
        self.emit(EngineEvent::ProcessingChanged);
        Ok(stored)
    }

    /// Read a parameter by name
    pub fn parameter(&self, name: &str) -> Option<f32> {
        self.params.get(name)
    }

    /// Start a background alignment pass.
    ///
    /// Each slot's current user delay is remembered for `revert_alignment`.
    /// While a pass is running further triggers are ignored and report
    /// `AlignStart::Busy`.
    pub fn trigger_alignment(&mut self) -> Result<AlignStart, EngineError> {
        if self.aligner.is_running() {
            debug!("alignment trigger ignored, pass in progress");
            return Ok(AlignStart::Busy);
        }

        for (index, state) in self.slots.iter_mut().enumerate() {
            state.manual_delay_ms = Some(self.params.slot(index).delay_ms.get());
        }

        let impulses = std::array::from_fn(|i| self.slots[i].impulse.clone());
        let events = self.event_tx.clone();
        let started = self.aligner.trigger(impulses, move || {
            let _ = events.try_send(EngineEvent::AlignmentComplete);
        })?;

        if started == AlignStart::Started {
            info!("alignment started");
        }
        Ok(started)
    }

    /// Whether an alignment pass is running
    pub fn is_aligning(&self) -> bool {
        self.aligner.is_running()
    }

    /// Copy published alignment results into the per-slot offsets.
    ///
    /// Returns the applied result, or `None` if nothing new was published.
    pub fn apply_alignment_results(&mut self) -> Option<AlignmentResult> {
        let result = self.aligner.take_results()?;
        for (index, offset) in result.offsets_ms.iter().enumerate() {
            self.params.slot(index).align_ms.set(*offset as f32);
        }
        info!(offsets_ms = ?result.offsets_ms, "alignment applied");
        self.emit(EngineEvent::ProcessingChanged);
        Some(result)
    }

    /// Restore the user delays captured at the last trigger and zero all
    /// alignment offsets. A pass still in flight is discarded.
    pub fn revert_alignment(&mut self) {
        self.discard_pending_alignment();
        for (index, state) in self.slots.iter().enumerate() {
            let params = self.params.slot(index);
            if let Some(delay) = state.manual_delay_ms {
                params.delay_ms.set(delay);
            }
            params.align_ms.set(0.0);
        }
        info!("alignment reverted");
        self.emit(EngineEvent::ProcessingChanged);
    }

    /// Results computed from an older slot set must never be applied
    fn discard_pending_alignment(&self) {
        if self.aligner.is_running() || self.aligner.has_results() {
            self.aligner.discard();
            debug!("pending alignment discarded");
        }
    }

    /// Frozen copy of everything an offline render needs
    pub fn render_snapshot(&self) -> RenderSnapshot {
        RenderSnapshot {
            params: self.params.snapshot(),
            impulses: std::array::from_fn(|i| self.slots[i].impulse.clone()),
        }
    }

    /// Render the mix's impulse response and write it as a 24-bit WAV.
    ///
    /// Runs synchronously with its own DSP instances; the live processor is
    /// not touched.
    pub fn export_mixed_impulse(&self, path: &Path, sample_rate: u32, mono: bool) -> Result<(), EngineError> {
        let snapshot = self.render_snapshot();
        let rendered = render_offline(&snapshot, DEFAULT_RENDER_SECS, sample_rate)?;

        let channels = if mono {
            vec![rendered.to_mono()]
        } else {
            vec![rendered.left, rendered.right]
        };

        if let Err(e) = write_wav_24(path, &channels, sample_rate) {
            self.emit(EngineEvent::Error(e.to_string()));
            return Err(e.into());
        }
        Ok(())
    }

    /// Drain pending events, applying alignment results as they arrive and
    /// releasing retired kernels
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            if event == EngineEvent::AlignmentComplete {
                self.apply_alignment_results();
            }
            events.push(event);
        }
        self.collect_retired();
        events
    }

    /// Clear processing history on the live processor
    pub fn reset_processor(&self) -> Result<(), EngineError> {
        self.send_command(ProcessorCommand::Reset)
    }

    /// Capture loaded files, alignment offsets, and parameters
    pub fn session_state(&self) -> SessionState {
        let mut session = SessionState::default();
        for (index, slot) in session.slots.iter_mut().enumerate() {
            slot.path = self.loaded_path(index);
            slot.align_ms = self.params.slot(index).align_ms.get();
        }
        session.params = self
            .params
            .values()
            .into_iter()
            .filter(|(name, _)| !name.ends_with("_AlignMs"))
            .collect();
        session
    }

    /// Restore a saved session.
    ///
    /// Parameters are applied first, then every slot whose file still loads
    /// is reloaded and given its saved alignment offset. A slot whose file
    /// fails to load keeps what it held before and is reported in the
    /// returned list.
    pub fn restore_session(&mut self, session: &SessionState) -> Vec<(usize, EngineError)> {
        for (name, value) in &session.params {
            if self.params.set(name, *value).is_none() {
                warn!(name = %name, "ignoring unknown session parameter");
            }
        }

        let mut failures = Vec::new();
        for (index, slot) in session.slots.iter().enumerate() {
            let Some(path) = &slot.path else {
                if self.is_loaded(index) {
                    if let Err(e) = self.clear_impulse(index) {
                        failures.push((index, e));
                    }
                }
                continue;
            };
            match self.load_impulse(index, path) {
                Ok(()) => {
                    self.params.slot(index).align_ms.set(slot.align_ms);
                }
                Err(e) => failures.push((index, e)),
            }
        }

        self.emit(EngineEvent::ProcessingChanged);
        failures
    }

    /// Stop the aligner (waits up to two seconds for a running pass)
    pub fn shutdown(&mut self) {
        self.aligner.shutdown();
        self.collect_retired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn write_ir(dir: &Path, name: &str, samples: &[f32]) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn spike(len: usize, at: usize) -> Vec<f32> {
        let mut v = vec![0.0; len];
        v[at] = 1.0;
        v
    }

    fn unit_block(frames: usize) -> Vec<f32> {
        let mut buf = vec![0.0; frames * 2];
        buf[0] = 1.0;
        buf[1] = 1.0;
        buf
    }

    fn wait_for_alignment(engine: &mut IrMixEngine) -> AlignmentResult {
        let start = Instant::now();
        loop {
            for event in engine.event_rx.clone().try_iter() {
                if event == EngineEvent::AlignmentComplete {
                    if let Some(result) = engine.apply_alignment_results() {
                        return result;
                    }
                }
            }
            assert!(start.elapsed() < Duration::from_secs(5), "alignment timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_load_and_slot_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ir(dir.path(), "Greenback.wav", &spike(100, 0));
        let mut engine = IrMixEngine::new();

        assert_eq!(engine.slot_name(0), EMPTY_SLOT_NAME);
        engine.load_impulse(0, &path).unwrap();
        assert!(engine.is_loaded(0));
        assert_eq!(engine.slot_name(0), "Greenback");
        assert_eq!(engine.loaded_path(0), Some(path));

        let events: Vec<_> = engine.events().try_iter().collect();
        assert!(events.contains(&EngineEvent::SlotLoaded { slot: 0 }));
        assert!(events.contains(&EngineEvent::ProcessingChanged));
    }

    #[test]
    fn test_failed_load_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_ir(dir.path(), "good.wav", &spike(100, 0));
        let mut engine = IrMixEngine::new();
        engine.load_impulse(1, &good).unwrap();

        let err = engine.load_impulse(1, &dir.path().join("missing.wav")).unwrap_err();
        assert!(matches!(err, EngineError::Load(_)));
        assert_eq!(engine.slot_name(1), "good");
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let mut engine = IrMixEngine::new();
        assert!(matches!(engine.clear_impulse(4), Err(EngineError::InvalidSlot(4))));
        assert!(matches!(
            engine.load_impulse(9, Path::new("x.wav")),
            Err(EngineError::InvalidSlot(9))
        ));
    }

    #[test]
    fn test_parameters_by_name() {
        let engine = IrMixEngine::new();
        assert_eq!(engine.set_parameter("Slot1_Pan", 500.0).unwrap(), 100.0);
        assert_eq!(engine.parameter("Slot1_Pan"), Some(100.0));
        assert!(matches!(
            engine.set_parameter("Slot1_Volume", 1.0),
            Err(EngineError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_processor_receives_loaded_kernels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ir(dir.path(), "a.wav", &[0.5, 0.25]);
        let mut engine = IrMixEngine::new();
        engine.set_parameter("Slot1_Level", 0.0).unwrap();
        let mut processor = engine.create_processor(48000, 128).unwrap();

        let mut silent = unit_block(128);
        processor.process_block(&mut silent);
        assert!(silent.iter().all(|s| *s == 0.0));

        engine.load_impulse(0, &path).unwrap();
        let mut loaded = unit_block(128);
        processor.process_block(&mut loaded);
        assert!(loaded[0].abs() > 0.1);

        engine.clear_impulse(0).unwrap();
        let mut cleared = unit_block(128);
        processor.process_block(&mut cleared);
        assert!(cleared.iter().all(|s| *s == 0.0));
        assert_eq!(engine.collect_retired(), 1);
    }

    #[test]
    fn test_reload_same_file_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..300).map(|i| (i as f32 * 0.3).sin() * (-(i as f32) / 50.0).exp()).collect();
        let path = write_ir(dir.path(), "room.wav", &samples);
        let mut engine = IrMixEngine::new();
        let mut processor = engine.create_processor(48000, 256).unwrap();

        engine.load_impulse(0, &path).unwrap();
        processor.process_block(&mut vec![0.0; 512]);
        let mut first = unit_block(256);
        engine.clear_impulse(0).unwrap();
        engine.load_impulse(0, &path).unwrap();
        engine.reset_processor().unwrap();
        processor.process_block(&mut first);

        engine.clear_impulse(0).unwrap();
        engine.load_impulse(0, &path).unwrap();
        engine.reset_processor().unwrap();
        let mut second = unit_block(256);
        processor.process_block(&mut second);

        assert_eq!(first, second);
    }

    #[test]
    fn test_navigate_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_ir(dir.path(), "a.wav", &spike(10, 0));
        let b = write_ir(dir.path(), "b.wav", &spike(10, 1));
        let mut engine = IrMixEngine::new();

        assert!(matches!(
            engine.navigate_to_sibling_impulse(0, 1),
            Err(EngineError::NoSibling(0))
        ));

        engine.load_impulse(0, &a).unwrap();
        assert_eq!(engine.navigate_to_sibling_impulse(0, 1).unwrap(), b);
        assert_eq!(engine.navigate_to_sibling_impulse(0, 1).unwrap(), a);
        assert_eq!(engine.navigate_to_sibling_impulse(0, -1).unwrap(), b);
    }

    #[test]
    fn test_alignment_apply_and_revert() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_ir(dir.path(), "a.wav", &spike(1000, 10));
        let b = write_ir(dir.path(), "b.wav", &spike(1000, 58));
        let mut engine = IrMixEngine::new();
        engine.load_impulse(1, &a).unwrap();
        engine.load_impulse(2, &b).unwrap();
        engine.set_parameter("Slot3_DelayMs", 2.0).unwrap();

        assert_eq!(engine.trigger_alignment().unwrap(), AlignStart::Started);
        let result = wait_for_alignment(&mut engine);
        assert_eq!(result.reference, Some(1));
        assert_eq!(engine.parameter("Slot2_AlignMs"), Some(0.0));
        let offset = engine.parameter("Slot3_AlignMs").unwrap();
        assert!((offset - 1.0).abs() < 1e-6);

        engine.set_parameter("Slot3_DelayMs", 7.0).unwrap();
        engine.revert_alignment();
        assert_eq!(engine.parameter("Slot3_DelayMs"), Some(2.0));
        assert_eq!(engine.parameter("Slot3_AlignMs"), Some(0.0));
    }

    fn wait_until_idle(engine: &IrMixEngine) {
        let start = Instant::now();
        while engine.is_aligning() {
            assert!(start.elapsed() < Duration::from_secs(5), "alignment timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn spiked_engine(dir: &Path) -> IrMixEngine {
        let a = write_ir(dir, "a.wav", &spike(1000, 10));
        let b = write_ir(dir, "b.wav", &spike(1000, 58));
        let mut engine = IrMixEngine::new();
        engine.load_impulse(0, &a).unwrap();
        engine.load_impulse(1, &b).unwrap();
        engine
    }

    #[test]
    fn test_revert_discards_pending_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = spiked_engine(dir.path());
        engine.set_parameter("Slot2_DelayMs", 3.0).unwrap();

        assert_eq!(engine.trigger_alignment().unwrap(), AlignStart::Started);
        engine.revert_alignment();
        wait_until_idle(&engine);
        engine.poll_events();

        assert_eq!(engine.parameter("Slot2_AlignMs"), Some(0.0));
        assert_eq!(engine.parameter("Slot2_DelayMs"), Some(3.0));
        assert!(engine.apply_alignment_results().is_none());
    }

    #[test]
    fn test_revert_after_publish_before_poll() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = spiked_engine(dir.path());

        engine.trigger_alignment().unwrap();
        wait_until_idle(&engine);
        engine.revert_alignment();
        engine.poll_events();
        assert_eq!(engine.parameter("Slot2_AlignMs"), Some(0.0));
    }

    #[test]
    fn test_load_during_alignment_discards_stale_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = spiked_engine(dir.path());
        let c = write_ir(dir.path(), "c.wav", &spike(1000, 10));

        engine.trigger_alignment().unwrap();
        engine.load_impulse(1, &c).unwrap();
        wait_until_idle(&engine);
        engine.poll_events();
        assert_eq!(engine.parameter("Slot2_AlignMs"), Some(0.0));

        // A fresh pass over the new slot set still works
        engine.trigger_alignment().unwrap();
        let result = wait_for_alignment(&mut engine);
        assert_eq!(result.offsets_ms[1], 0.0);
    }

    #[test]
    fn test_clear_during_alignment_discards_stale_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = spiked_engine(dir.path());

        engine.trigger_alignment().unwrap();
        engine.clear_impulse(1).unwrap();
        wait_until_idle(&engine);
        engine.poll_events();
        assert!(!engine.is_loaded(1));
        assert_eq!(engine.parameter("Slot2_AlignMs"), Some(0.0));
    }

    #[test]
    fn test_alignment_with_nothing_loaded() {
        let mut engine = IrMixEngine::new();
        engine.trigger_alignment().unwrap();
        let result = wait_for_alignment(&mut engine);
        assert_eq!(result, AlignmentResult::empty());
    }

    #[test]
    fn test_load_resets_alignment_offset() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_ir(dir.path(), "a.wav", &spike(10, 0));
        let mut engine = IrMixEngine::new();
        engine.set_parameter("Slot1_AlignMs", 3.0).unwrap();
        engine.load_impulse(0, &a).unwrap();
        assert_eq!(engine.parameter("Slot1_AlignMs"), Some(0.0));
    }

    #[test]
    fn test_export_matches_live_processing() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..400).map(|i| (i as f32 * 0.21).cos() * (-(i as f32) / 70.0).exp()).collect();
        let path = write_ir(dir.path(), "cab.wav", &samples);
        let mut engine = IrMixEngine::new();
        engine.load_impulse(0, &path).unwrap();
        engine.set_parameter("Slot1_Pan", 30.0).unwrap();

        let out = dir.path().join("mix.wav");
        engine.export_mixed_impulse(&out, 48000, false).unwrap();
        let mut reader = hound::WavReader::open(&out).unwrap();
        assert_eq!(reader.spec().bits_per_sample, 24);
        assert_eq!(reader.duration(), 96000);
        let exported: Vec<f32> = reader
            .samples::<i32>()
            .take(1024)
            .map(|s| s.unwrap() as f32 / 8_388_607.0)
            .collect();

        let mut processor = engine.create_processor(48000, 512).unwrap();
        let mut live = unit_block(512);
        processor.process_block(&mut live);

        for (i, (e, l)) in exported.iter().zip(&live).enumerate() {
            assert!((e - l).abs() < 1e-6, "sample {}: {} vs {}", i, e, l);
        }
    }

    #[test]
    fn test_export_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ir(dir.path(), "cab.wav", &spike(50, 0));
        let mut engine = IrMixEngine::new();
        engine.load_impulse(0, &path).unwrap();
        let out = dir.path().join("mono.wav");
        engine.export_mixed_impulse(&out, 44100, true).unwrap();
        let reader = hound::WavReader::open(&out).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 44100);
        assert_eq!(reader.duration(), 88200);
    }

    #[test]
    fn test_session_roundtrip_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_ir(dir.path(), "a.wav", &spike(10, 0));
        let mut engine = IrMixEngine::new();
        engine.load_impulse(2, &a).unwrap();
        engine.set_parameter("Slot3_AlignMs", 1.5).unwrap();
        engine.set_parameter("MidGainDb", -3.0).unwrap();
        let session = engine.session_state();

        let mut restored = IrMixEngine::new();
        let failures = restored.restore_session(&session);
        assert!(failures.is_empty());
        assert_eq!(restored.loaded_path(2), Some(a));
        assert_eq!(restored.parameter("Slot3_AlignMs"), Some(1.5));
        assert_eq!(restored.parameter("MidGainDb"), Some(-3.0));
    }

    #[test]
    fn test_restore_reports_missing_files() {
        let mut session = SessionState::default();
        session.slots[0].path = Some(PathBuf::from("/no/such/ir.wav"));
        let mut engine = IrMixEngine::new();
        let failures = engine.restore_session(&session);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, 0);
        assert!(!engine.is_loaded(0));
    }

    #[test]
    fn test_failed_restore_keeps_loaded_slot() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_ir(dir.path(), "a.wav", &spike(10, 0));
        let mut engine = IrMixEngine::new();
        engine.load_impulse(0, &a).unwrap();

        let mut session = SessionState::default();
        session.slots[0].path = Some(dir.path().join("gone.wav"));
        let failures = engine.restore_session(&session);
        assert_eq!(failures.len(), 1);
        assert_eq!(engine.loaded_path(0), Some(a));
    }
}
