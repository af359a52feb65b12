//! Live monitoring: default input -> mixer -> default output
//!
//! The input stream folds to mono and feeds a lock-free ring; the output
//! callback pulls from it and runs the mix processor. The main thread reads
//! simple console commands and drives the engine.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use irmix_audio::{EngineEvent, IrMixEngine, MixProcessor};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use tracing::{error, info, warn};

use crate::setup::{print_slots, run_alignment};

/// Frames the output callback can process per pass
const CALLBACK_FRAMES: usize = 8192;

/// Input ring capacity, in seconds of mono audio
const RING_SECS: f32 = 0.5;

const HELP: &str = "\
commands:
  set NAME VALUE     write a parameter
  get NAME           read a parameter
  load SLOT PATH     load an impulse into slot 1-4
  clear SLOT         empty a slot
  next SLOT | prev SLOT
  align | revert     run or undo auto-alignment
  export PATH [mono] render the mix to a 24-bit WAV
  slots              list slots
  quit";

pub fn run(mut engine: IrMixEngine, max_block: usize) -> anyhow::Result<()> {
    let host = cpal::default_host();
    let output = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no audio output device found"))?;
    let out_config = output.default_output_config().context("querying output config")?;
    let sample_rate = out_config.sample_rate().0;
    let out_channels = out_config.channels() as usize;
    let out_stream_config: cpal::StreamConfig = out_config.into();

    let ring = HeapRb::<f32>::new((sample_rate as f32 * RING_SECS) as usize);
    let (mut producer, mut consumer) = ring.split();

    let input_stream = match host.default_input_device() {
        Some(input) => {
            let in_config = input.default_input_config().context("querying input config")?;
            let in_channels = in_config.channels() as usize;
            if in_config.sample_rate().0 != sample_rate {
                warn!(
                    input_rate = in_config.sample_rate().0,
                    output_rate = sample_rate,
                    "input rate differs from output, requesting output rate"
                );
            }
            let config = cpal::StreamConfig {
                channels: in_config.channels(),
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let stream = input.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    for frame in data.chunks_exact(in_channels) {
                        let mono = frame.iter().sum::<f32>() / in_channels as f32;
                        // Drop input when the output side falls behind
                        let _ = producer.try_push(mono);
                    }
                },
                |err| error!(error = %err, "input stream error"),
                None,
            )?;
            Some(stream)
        }
        None => {
            warn!("no input device, monitoring silence");
            None
        }
    };

    let mut processor = engine.create_processor(sample_rate, max_block)?;
    let mut input_buf = vec![0.0f32; CALLBACK_FRAMES];
    let mut stereo_buf = vec![0.0f32; CALLBACK_FRAMES * 2];

    let output_stream = output.build_output_stream(
        &out_stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            render_output(
                &mut processor,
                &mut consumer,
                &mut input_buf,
                &mut stereo_buf,
                data,
                out_channels,
            );
        },
        |err| error!(error = %err, "output stream error"),
        None,
    )?;

    if let Some(stream) = &input_stream {
        stream.play()?;
    }
    output_stream.play()?;
    info!(sample_rate, max_block, "monitoring started");

    println!("{}", HELP);
    print_slots(&engine);
    console(&mut engine)?;

    drop(output_stream);
    drop(input_stream);
    engine.shutdown();
    Ok(())
}

/// Output callback body. Never allocates.
fn render_output<C: Consumer<Item = f32>>(
    processor: &mut MixProcessor,
    consumer: &mut C,
    input_buf: &mut [f32],
    stereo_buf: &mut [f32],
    data: &mut [f32],
    out_channels: usize,
) {
    let out_channels = out_channels.max(1);
    for chunk in data.chunks_mut(CALLBACK_FRAMES * out_channels) {
        let frames = chunk.len() / out_channels;
        let input = &mut input_buf[..frames];
        let got = consumer.pop_slice(input);
        input[got..].fill(0.0);

        let stereo = &mut stereo_buf[..frames * 2];
        processor.process_block_from(input, 1, stereo);

        for (out, frame) in chunk.chunks_exact_mut(out_channels).zip(stereo.chunks_exact(2)) {
            if out_channels == 1 {
                out[0] = (frame[0] + frame[1]) * 0.5;
            } else {
                out[0] = frame[0];
                out[1] = frame[1];
                out[2..].fill(0.0);
            }
        }
    }
}

fn parse_slot(arg: Option<&str>) -> anyhow::Result<usize> {
    let n: usize = arg
        .ok_or_else(|| anyhow!("missing slot number"))?
        .parse()
        .context("slot must be 1-4")?;
    n.checked_sub(1).ok_or_else(|| anyhow!("slot must be 1-4"))
}

fn console(engine: &mut IrMixEngine) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }

        for event in engine.poll_events() {
            if let EngineEvent::Error(msg) = event {
                println!("error: {}", msg);
            }
        }

        match handle_command(engine, &line) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => println!("error: {:#}", e),
        }
    }
}

/// Run one console line. Returns false when the user asked to quit.
fn handle_command(engine: &mut IrMixEngine, line: &str) -> anyhow::Result<bool> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(true);
    };

    match cmd {
        "quit" | "exit" => return Ok(false),
        "help" => println!("{}", HELP),
        "slots" => print_slots(engine),
        "set" => {
            let name = words.next().ok_or_else(|| anyhow!("missing name"))?;
            let value: f32 = words
                .next()
                .ok_or_else(|| anyhow!("missing value"))?
                .parse()
                .context("value must be a number")?;
            let stored = engine.set_parameter(name, value)?;
            println!("{} = {}", name, stored);
        }
        "get" => {
            let name = words.next().ok_or_else(|| anyhow!("missing name"))?;
            let value = engine
                .parameter(name)
                .ok_or_else(|| anyhow!("unknown parameter {}", name))?;
            println!("{} = {}", name, value);
        }
        "load" => {
            let slot = parse_slot(words.next())?;
            let path = words.next().ok_or_else(|| anyhow!("missing path"))?;
            engine.load_impulse(slot, Path::new(path))?;
            println!("slot {}: {}", slot + 1, engine.slot_name(slot));
        }
        "clear" => {
            let slot = parse_slot(words.next())?;
            engine.clear_impulse(slot)?;
        }
        "next" | "prev" => {
            let slot = parse_slot(words.next())?;
            let step = if cmd == "next" { 1 } else { -1 };
            engine.navigate_to_sibling_impulse(slot, step)?;
            println!("slot {}: {}", slot + 1, engine.slot_name(slot));
        }
        "align" => {
            run_alignment(engine)?;
            print_slots(engine);
        }
        "revert" => {
            engine.revert_alignment();
            print_slots(engine);
        }
        "export" => {
            let path = words.next().ok_or_else(|| anyhow!("missing path"))?;
            let mono = words.next() == Some("mono");
            let rate = engine.processor_sample_rate().unwrap_or(48000);
            engine.export_mixed_impulse(Path::new(path), rate, mono)?;
            println!("exported {}", path);
        }
        other => return Err(anyhow!("unknown command '{}', try help", other)),
    }
    Ok(true)
}
