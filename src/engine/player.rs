//! Real-time playback using cpal and midir
//!
//! The audio output stream is only used as a block clock: each callback
//! runs the engine for the callback's frames and writes silence. Inbound
//! MIDI arrives from midir's thread and outbound MIDI leaves through a
//! sender thread; both cross to the audio thread via ringbuf queues.
//!
//! Each outbound message carries a due time derived from its sample offset,
//! and the sender holds it back until then. Inbound bytes the engine does
//! not understand (SysEx, running status) skip the engine and go straight
//! to the sender.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};

use super::midi::{DecodeError, CC_DATA_LSB, CC_DATA_MSB, CC_NRPN_LSB, CC_NRPN_MSB};
use super::{
    ControlSurface, Engine, EngineSettings, MidiBuffer, MidiEvent, MidiMessage, OUTPUT_CAPACITY,
};

/// Inbound messages buffered between blocks
const INPUT_QUEUE: usize = 1024;
/// Outbound messages buffered for the sender thread
const OUTPUT_QUEUE: usize = 8192;
/// Undecoded inbound packets waiting for pass-through
const RAW_QUEUE: usize = 256;
const SETTINGS_QUEUE: usize = 16;

const SENDER_IDLE: Duration = Duration::from_millis(1);
const MONITOR_INTERVAL: Duration = Duration::from_millis(20);

/// Controllers of one NRPN write, in order
const NRPN_GROUP: [u8; 4] = [CC_NRPN_MSB, CC_NRPN_LSB, CC_DATA_MSB, CC_DATA_LSB];

/// Ports and block size for real-time playback
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Substring of the input port name; `None` runs without input
    pub input_port: Option<String>,
    /// Substring of the output port name; `None` uses the first port
    pub output_port: Option<String>,
    pub block_size: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            input_port: None,
            output_port: None,
            block_size: 256,
        }
    }
}

/// An outbound message and when it should leave
#[derive(Debug, Clone, Copy)]
struct Scheduled {
    due: Instant,
    message: MidiMessage,
}

/// Something outbound MIDI bytes can be written to
trait MidiSink {
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()>;
}

impl MidiSink for MidiOutputConnection {
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.send(bytes).map_err(|e| anyhow!("MIDI send failed: {}", e))
    }
}

/// Length of the message group starting at `events[0]`
///
/// A complete NRPN write (same offset and channel, controllers 99, 98, 6,
/// 38) is one group; anything else stands alone.
fn group_len(events: &[MidiEvent]) -> usize {
    let Some(first) = events.first() else {
        return 0;
    };
    let MidiMessage::ControlChange(channel, _, _) = first.message else {
        return 1;
    };

    let matching = events
        .iter()
        .zip(NRPN_GROUP)
        .take_while(|(event, cc)| {
            let same_controller = matches!(
                event.message,
                MidiMessage::ControlChange(ch, n, _) if ch == channel && n == *cc
            );
            event.offset == first.offset && same_controller
        })
        .count();

    if matching == NRPN_GROUP.len() {
        matching
    } else {
        1
    }
}

/// Audio-thread state: the engine plus its queue ends
struct BlockRunner {
    engine: Engine,
    block_size: usize,
    inbound: HeapConsumer<MidiMessage>,
    outbound: HeapProducer<Scheduled>,
    settings: HeapConsumer<EngineSettings>,
    events: Vec<MidiEvent>,
    out: MidiBuffer,
}

impl BlockRunner {
    /// Run `frames` samples whose first sample plays at `started`
    fn run(&mut self, frames: usize, started: Instant) {
        while let Some(settings) = self.settings.pop() {
            self.engine.apply_settings(settings);
        }

        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(self.block_size);

            // Arrival times within the block are unknown; deliver at its start
            self.events.clear();
            while self.events.len() < self.events.capacity() {
                match self.inbound.pop() {
                    Some(message) => self.events.push(MidiEvent::new(0, message)),
                    None => break,
                }
            }

            self.engine.process_block(n, &self.events, &mut self.out);

            let sample_rate = self.engine.settings().sample_rate.max(1.0);
            let events = self.out.events();
            let mut i = 0;
            while i < events.len() {
                let len = group_len(&events[i..]);
                // Whole groups only; dropped if the sender has fallen behind
                if self.outbound.free_len() >= len {
                    for event in &events[i..i + len] {
                        let at = (done + event.offset) as f64 / sample_rate;
                        let due = started + Duration::from_secs_f64(at);
                        let _ = self.outbound.push(Scheduled {
                            due,
                            message: event.message,
                        });
                    }
                }
                i += len;
            }
            done += n;
        }
    }
}

/// Puts each inbound packet on the engine queue or the pass-through queue
struct InboundRouter {
    engine: HeapProducer<MidiMessage>,
    raw: HeapProducer<Vec<u8>>,
}

impl InboundRouter {
    fn route(&mut self, bytes: &[u8]) {
        match MidiMessage::decode(bytes) {
            Ok(message) => {
                if self.engine.push(message).is_err() {
                    log::warn!("Inbound MIDI queue full, dropping message");
                }
            }
            Err(DecodeError::Empty) => {}
            Err(_) => {
                if self.raw.push(bytes.to_vec()).is_err() {
                    log::warn!("Pass-through queue full, dropping {} bytes", bytes.len());
                }
            }
        }
    }
}

/// Sender-thread state
struct Sender {
    queue: HeapConsumer<Scheduled>,
    raw: HeapConsumer<Vec<u8>>,
    /// Popped but not yet due
    held: Option<Scheduled>,
}

impl Sender {
    fn new(queue: HeapConsumer<Scheduled>, raw: HeapConsumer<Vec<u8>>) -> Self {
        Self {
            queue,
            raw,
            held: None,
        }
    }

    /// Send pass-through packets and every message due by `now`
    ///
    /// Returns when the next held message is due, if one is waiting.
    fn pump(&mut self, sink: &mut impl MidiSink, now: Instant) -> Option<Instant> {
        while let Some(bytes) = self.raw.pop() {
            if let Err(e) = sink.send_bytes(&bytes) {
                log::warn!("{}", e);
            }
        }

        loop {
            let next = self.held.take().or_else(|| self.queue.pop())?;
            if next.due > now {
                self.held = Some(next);
                return Some(next.due);
            }
            if let Err(e) = sink.send_bytes(&next.message.to_bytes()) {
                log::warn!("{}", e);
            }
        }
    }
}

/// Real-time MIDI modulation player
pub struct Player {
    stream: Option<Stream>,
    running: Arc<AtomicBool>,
    control: Arc<ControlSurface>,
    settings: Option<HeapProducer<EngineSettings>>,
    /// Device rate the engine was started with
    sample_rate: Option<f64>,
    input: Option<MidiInputConnection<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl Player {
    pub fn new(control: Arc<ControlSurface>) -> Self {
        Self {
            stream: None,
            running: Arc::new(AtomicBool::new(false)),
            control,
            settings: None,
            sample_rate: None,
            input: None,
            threads: Vec::new(),
        }
    }

    /// Connect ports and start running `engine` on the audio clock
    pub fn start(&mut self, mut engine: Engine, config: &PlayerConfig) -> Result<()> {
        if self.is_playing() {
            bail!("Player is already running");
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;

        let device_config = device.default_output_config()?;
        let sample_format = device_config.sample_format();
        let stream_config: StreamConfig = device_config.into();

        let sample_rate = stream_config.sample_rate.0 as f64;
        if (engine.settings().sample_rate - sample_rate).abs() > f64::EPSILON {
            log::info!(
                "Using device sample rate {} Hz instead of {} Hz",
                sample_rate,
                engine.settings().sample_rate
            );
            let settings = EngineSettings {
                sample_rate,
                ..*engine.settings()
            };
            engine.apply_settings(settings);
        }

        let (inbound_tx, inbound_rx) = HeapRb::<MidiMessage>::new(INPUT_QUEUE).split();
        let (outbound_tx, outbound_rx) = HeapRb::<Scheduled>::new(OUTPUT_QUEUE).split();
        let (raw_tx, raw_rx) = HeapRb::<Vec<u8>>::new(RAW_QUEUE).split();
        let (settings_tx, settings_rx) = HeapRb::<EngineSettings>::new(SETTINGS_QUEUE).split();

        let output = connect_output(config.output_port.as_deref())?;
        let input = match config.input_port.as_deref() {
            Some(name) => {
                let router = InboundRouter {
                    engine: inbound_tx,
                    raw: raw_tx,
                };
                Some(connect_input(name, router)?)
            }
            None => None,
        };

        self.running.store(true, Ordering::SeqCst);

        let runner = BlockRunner {
            engine,
            block_size: config.block_size.max(1),
            inbound: inbound_rx,
            outbound: outbound_tx,
            settings: settings_rx,
            events: Vec::with_capacity(INPUT_QUEUE),
            out: MidiBuffer::with_capacity(OUTPUT_CAPACITY),
        };

        let running = self.running.clone();
        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, runner, running)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, runner, running)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, runner, running)?,
            other => {
                self.running.store(false, Ordering::SeqCst);
                bail!("Unsupported sample format {:?}", other);
            }
        };

        let sender = Sender::new(outbound_rx, raw_rx);
        self.threads.push(spawn_sender(output, sender, self.running.clone()));
        self.threads.push(spawn_monitor(self.control.clone(), self.running.clone()));

        stream.play()?;
        self.stream = Some(stream);
        self.input = input;
        self.settings = Some(settings_tx);
        self.sample_rate = Some(sample_rate);

        log::info!(
            "Running at {} Hz, {} samples per block",
            sample_rate,
            config.block_size
        );
        Ok(())
    }

    /// Hand new settings to the audio thread
    ///
    /// The device sample rate chosen at start is kept.
    pub fn update_settings(&mut self, settings: EngineSettings) -> Result<()> {
        let queue = self
            .settings
            .as_mut()
            .ok_or_else(|| anyhow!("Player is not running"))?;
        let settings = EngineSettings {
            sample_rate: self.sample_rate.unwrap_or(settings.sample_rate),
            ..settings
        };
        if queue.push(settings).is_err() {
            bail!("Settings queue is full");
        }
        Ok(())
    }

    /// Stop playback and close ports
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.stream = None;
        if let Some(conn) = self.input.take() {
            conn.close();
        }
        self.settings = None;
        self.sample_rate = None;
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::warn!("Player thread panicked");
            }
        }
    }

    /// Check if currently playing
    pub fn is_playing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream<T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    mut runner: BlockRunner,
    running: Arc<AtomicBool>,
) -> Result<Stream> {
    let channels = (config.channels as usize).max(1);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if running.load(Ordering::Relaxed) {
                runner.run(data.len() / channels, Instant::now());
            }
            for sample in data.iter_mut() {
                *sample = T::from_sample(0.0f32);
            }
        },
        |err| {
            log::error!("Audio stream error: {}", err);
        },
        None,
    )?;

    Ok(stream)
}

fn find_port<P: Clone>(
    ports: &[P],
    name_of: impl Fn(&P) -> Option<String>,
    wanted: &str,
) -> Option<P> {
    ports
        .iter()
        .find(|p| name_of(p).map(|n| n.contains(wanted)).unwrap_or(false))
        .cloned()
}

fn connect_output(port_name: Option<&str>) -> Result<MidiOutputConnection> {
    let midi_out = MidiOutput::new("modgen output")?;
    let ports = midi_out.ports();

    if ports.is_empty() {
        bail!("No MIDI output ports available");
    }

    let port = match port_name {
        Some(name) => find_port(&ports, |p| midi_out.port_name(p).ok(), name)
            .ok_or_else(|| anyhow!("MIDI output port '{}' not found", name))?,
        None => ports[0].clone(),
    };

    let actual = midi_out.port_name(&port)?;
    let conn = midi_out
        .connect(&port, "modgen-output")
        .map_err(|e| anyhow!("Failed to connect MIDI output '{}': {}", actual, e))?;

    log::info!("MIDI output connected to: {}", actual);
    Ok(conn)
}

fn connect_input(port_name: &str, mut router: InboundRouter) -> Result<MidiInputConnection<()>> {
    let mut midi_in = MidiInput::new("modgen input")?;
    midi_in.ignore(Ignore::None);
    let ports = midi_in.ports();

    let port = find_port(&ports, |p| midi_in.port_name(p).ok(), port_name)
        .ok_or_else(|| anyhow!("MIDI input port '{}' not found", port_name))?;
    let actual = midi_in.port_name(&port)?;

    let conn = midi_in
        .connect(
            &port,
            "modgen-input",
            move |_stamp, bytes, _| router.route(bytes),
            (),
        )
        .map_err(|e| anyhow!("Failed to connect MIDI input '{}': {}", actual, e))?;

    log::info!("MIDI input connected to: {}", actual);
    Ok(conn)
}

fn spawn_sender(
    mut conn: MidiOutputConnection,
    mut sender: Sender,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while running.load(Ordering::Relaxed) {
            let wait = match sender.pump(&mut conn, Instant::now()) {
                Some(due) => due.saturating_duration_since(Instant::now()).min(SENDER_IDLE),
                None => SENDER_IDLE,
            };
            thread::sleep(wait);
        }
        conn.close();
        log::debug!("MIDI sender stopped");
    })
}

/// Honour engine-side requests that need the control domain
fn spawn_monitor(control: Arc<ControlSurface>, running: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut was_running = false;
        while running.load(Ordering::Relaxed) {
            if control.take_disable_request() {
                control.set_enabled(false);
                log::info!("One-shot finished, LFO disabled");
            }

            let now_running = control.is_running();
            if now_running != was_running {
                log::info!("LFO {}", if now_running { "running" } else { "stopped" });
                was_running = now_running;
            }
            thread::sleep(MONITOR_INTERVAL);
        }
    })
}
