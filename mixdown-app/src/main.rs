//! mixdown - play an audio file through a master, channel and clip
//!
//! Usage: `mixdown <file> [--loop] [--drive <amount>] [--any-type]` or `mixdown --devices`

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context as _};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::bounded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use tracing_subscriber::EnvFilter;

use mixdown_audio::{
    Channel, ChannelOptions, ClipEvent, ClipEventKind, EffectStage, EngineOptions, Master,
    ModuleRegistry, Renderer, TapPosition,
};
use mixdown_library::{load_audio_source, Config, CpalDevices, DeviceEnumerator, LoadOptions};

/// Frames rendered per block on the render thread
const BLOCK_FRAMES: usize = 512;

/// How often the control loop delivers clip events
const PUMP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Args {
    file: Option<PathBuf>,
    looping: bool,
    drive: Option<f32>,
    allow_foreign_file_types: bool,
    list_devices: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--loop" => args.looping = true,
            "--devices" => args.list_devices = true,
            "--any-type" => args.allow_foreign_file_types = true,
            "--drive" => {
                let value = iter.next().context("--drive needs a value")?;
                args.drive = Some(value.parse().context("--drive must be a number")?);
            }
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            file => args.file = Some(PathBuf::from(file)),
        }
    }
    Ok(args)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = parse_args()?;
    if args.list_devices {
        return list_devices();
    }

    let mut config = Config::load();
    let path = args
        .file
        .or_else(|| config.last_file.clone())
        .context("usage: mixdown <file> [--loop] [--drive <amount>] [--any-type] | --devices")?;

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("No audio output device found")?;
    let stream_config = device
        .default_output_config()
        .context("Failed to get audio config")?;
    let sample_rate = stream_config.sample_rate().0;
    let channels = stream_config.channels() as usize;

    let source = load_audio_source(
        &path,
        LoadOptions {
            allow_foreign_file_types: args.allow_foreign_file_types,
            target_sample_rate: None,
        },
    )?;

    // Graph: clip -> channel (optional drive) -> master
    let master = Master::new(EngineOptions {
        sample_rate,
        ..config.engine.clone()
    });
    let channel = Channel::new(ChannelOptions::labeled("main"));
    master.attach_channel(&channel)?;

    if let Some(drive) = args.drive {
        let module = ModuleRegistry::new().load_module(ModuleRegistry::BUILTIN_PATH)?;
        let stage = EffectStage::new(module, "soft-clip")?.with_label("drive");
        stage.set_parameter("drive", drive)?;
        channel.add_effect(&stage)?;
    }

    let clip = source.to_clip();
    channel.attach_audio_clip(&clip)?;
    clip.set_loop(Some(args.looping));
    clip.enable_tap(TapPosition::Post)?;

    let (ended_tx, ended_rx) = bounded(1);
    clip.once(ClipEventKind::Ended, move |_| {
        let _ = ended_tx.try_send(());
    });
    let total = clip.formatted_duration();
    clip.add_event_listener(ClipEventKind::Progress, move |event| {
        if let ClipEvent::Progress(progress) = event {
            print!("\r{} / {}", progress.formatted, total);
            let _ = io::stdout().flush();
        }
    });

    // 200 ms of stereo between the render thread and the device callback
    let ring = HeapRb::<f32>::new(sample_rate as usize / 5 * 2);
    let (producer, mut consumer) = ring.split();

    let shutdown = Arc::new(AtomicBool::new(false));
    let render_handle = spawn_renderer(master.renderer(), producer, shutdown.clone());

    // Pre-allocated stereo scratch for devices that are not stereo
    let mut stereo = vec![0.0f32; 16384];
    let stream = device
        .build_output_stream(
            &stream_config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if channels == 2 {
                    let read = consumer.pop_slice(data);
                    data[read..].fill(0.0);
                    return;
                }
                let frames = (data.len() / channels).min(stereo.len() / 2);
                let scratch = &mut stereo[..frames * 2];
                let read = consumer.pop_slice(scratch);
                scratch[read..].fill(0.0);
                for (frame, lr) in data.chunks_exact_mut(channels).zip(scratch.chunks_exact(2)) {
                    if channels == 1 {
                        frame[0] = (lr[0] + lr[1]) * 0.5;
                    } else {
                        frame[0] = lr[0];
                        frame[1] = lr[1];
                        frame[2..].fill(0.0);
                    }
                }
            },
            |err| tracing::error!("audio stream error: {err}"),
            None,
        )
        .context("Failed to create audio stream")?;
    stream.play().context("Failed to start audio")?;

    tracing::info!(path = %path.display(), duration = %clip.formatted_duration(), "playing");
    clip.play()?;

    loop {
        master.pump();
        if ended_rx.recv_timeout(PUMP_INTERVAL).is_ok() {
            break;
        }
    }
    println!();

    if let Some(window) = clip.waveform_float_data(TapPosition::Post) {
        let peak = window.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        tracing::info!(peak, "final post-tap peak");
    }

    shutdown.store(true, Ordering::SeqCst);
    drop(stream);
    let _ = render_handle.join();

    config.last_file = Some(path);
    if let Err(e) = config.save() {
        tracing::warn!("could not save config: {e}");
    }
    Ok(())
}

/// Keep the ring topped up from the master's renderer
fn spawn_renderer(
    renderer: Renderer,
    mut producer: HeapProd<f32>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut block = vec![0.0f32; BLOCK_FRAMES * 2];
        while !shutdown.load(Ordering::Relaxed) {
            if producer.vacant_len() < block.len() {
                thread::sleep(Duration::from_millis(2));
                continue;
            }
            renderer.render(&mut block);
            producer.push_slice(&block);
        }
    })
}

fn list_devices() -> anyhow::Result<()> {
    let devices = CpalDevices::new();
    println!("Output devices:");
    for device in devices.list_output_devices()? {
        let marker = if device.is_default { "*" } else { " " };
        println!(" {marker} {} [{}]", device.name, device.id);
    }
    println!("Input devices:");
    for device in devices.list_input_devices()? {
        let marker = if device.is_default { "*" } else { " " };
        println!(" {marker} {} [{}]", device.name, device.id);
    }
    Ok(())
}
