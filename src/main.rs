//! modgen - Real-time LFO and envelope modulation over MIDI

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use modgen::config::{self, EXAMPLE_CONFIG};
use modgen::engine::{self, Engine, MidiMessage, Player, PlayerConfig, RenderOptions};
use modgen::mapping::{Encoding, PARAMETERS};

mod cli;

use cli::{Cli, Commands, ControlCommand, COMMAND_HELP};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config: config_path } => {
            println!("Loading configuration from {:?}...", config_path);
            let cfg = config::load_config(&config_path)?;
            let settings = cfg.engine_settings()?;
            let control = Arc::new(cfg.control_surface());

            let player_config = PlayerConfig {
                input_port: cfg.midi.input.clone(),
                output_port: cfg.midi.output.clone(),
                block_size: cfg.engine.block_size,
            };

            let mut player = Player::new(control.clone());
            player.start(Engine::new(settings, control.clone()), &player_config)?;

            let quit = Arc::new(AtomicBool::new(false));
            let handler_quit = quit.clone();
            ctrlc::set_handler(move || handler_quit.store(true, Ordering::SeqCst))?;

            let (tx, rx) = mpsc::channel::<String>();
            std::thread::spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });

            println!("Running. Commands: {}", COMMAND_HELP);

            while !quit.load(Ordering::SeqCst) && player.is_playing() {
                let line = match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => line,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        // stdin closed; keep running until Ctrl-C
                        std::thread::sleep(POLL_INTERVAL);
                        continue;
                    }
                };

                match ControlCommand::parse(&line) {
                    Ok(Some(ControlCommand::Start)) => control.set_enabled(true),
                    Ok(Some(ControlCommand::Stop)) => {
                        control.set_enabled(false);
                        control.request_stop();
                    }
                    Ok(Some(ControlCommand::Restart)) => control.request_restart(),
                    Ok(Some(ControlCommand::Rate(hz))) => {
                        let clamped = hz.clamp(engine::MIN_RATE_HZ, engine::MAX_RATE_HZ);
                        if clamped != hz {
                            println!("Rate clamped to {} Hz", clamped);
                        }
                        control.set_rate_hz(clamped);
                    }
                    Ok(Some(ControlCommand::Depth(depth))) => {
                        control.set_depth(depth.clamp(0.0, 1.0))
                    }
                    Ok(Some(ControlCommand::Reload)) => {
                        let reloaded = config::load_config(&config_path)
                            .and_then(|cfg| Ok(cfg.engine_settings()?))
                            .and_then(|settings| player.update_settings(settings));
                        match reloaded {
                            Ok(()) => println!("Reloaded {:?}", config_path),
                            Err(e) => println!("Reload failed: {:#}", e),
                        }
                    }
                    Ok(Some(ControlCommand::Quit)) => break,
                    Ok(None) => {
                        let bpm = control
                            .bpm()
                            .map(|b| format!("{:.1}", b))
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "  running: {}  rate: {:.2} Hz  depth: {:.2}  bpm: {}",
                            control.is_running(),
                            control.rate_hz(),
                            control.depth(),
                            bpm
                        );
                    }
                    Err(e) => println!("{}", e),
                }
            }

            println!("Stopping...");
            player.stop();
        }

        Commands::Render {
            config: config_path,
            seconds,
            note_on,
            note_off,
            velocity,
            bpm,
        } => {
            let cfg = config::load_config(&config_path)?;
            let settings = cfg.engine_settings()?;
            let control = Arc::new(cfg.control_surface());

            let channel = [cfg.trigger.note_source_channel, cfg.envelope.note_source_channel]
                .into_iter()
                .find(|&ch| ch != 0)
                .unwrap_or(1);

            let options = RenderOptions {
                seconds,
                block_size: cfg.engine.block_size,
                note_on,
                note_off,
                velocity,
                channel,
                bpm,
            };

            let events = engine::render(settings, control, &options)?;
            for event in &events {
                match event.message {
                    MidiMessage::ControlChange(ch, cc, value) => {
                        println!(
                            "{:>10.2} ms  ch {:>2}  CC {:>3} = {:>3}",
                            event.time_ms,
                            ch + 1,
                            cc,
                            value
                        );
                    }
                    other => println!("{:>10.2} ms  {:?}", event.time_ms, other),
                }
            }
            println!("{} messages in {}s", events.len(), seconds);
        }

        Commands::Ports => {
            println!("MIDI inputs:");
            match engine::list_input_ports() {
                Ok(ports) if ports.is_empty() => println!("  (none)"),
                Ok(ports) => ports.iter().for_each(|p| println!("  - {}", p)),
                Err(e) => println!("  Error listing ports: {}", e),
            }

            println!("\nMIDI outputs:");
            match engine::list_output_ports() {
                Ok(ports) if ports.is_empty() => println!("  (none)"),
                Ok(ports) => ports.iter().for_each(|p| println!("  - {}", p)),
                Err(e) => println!("  Error listing ports: {}", e),
            }
        }

        Commands::Params => {
            println!("{:<28} {:<12} {:>6}  flags", "name", "message", "max");
            for param in PARAMETERS {
                let message = match param.encoding {
                    Encoding::ControlChange(cc) => format!("CC {}", cc),
                    Encoding::Nrpn { msb, lsb } => format!("NRPN {}:{}", msb, lsb),
                };
                let mut flags = Vec::new();
                if param.bipolar {
                    flags.push("bipolar");
                }
                if param.envelope_destination {
                    flags.push("envelope");
                }
                println!(
                    "{:<28} {:<12} {:>6}  {}",
                    param.name,
                    message,
                    param.max,
                    flags.join(" ")
                );
            }
        }

        Commands::Check { config: config_path } => {
            println!("Checking configuration at {:?}...", config_path);

            match config::load_config(&config_path) {
                Ok(cfg) => {
                    println!("Configuration is valid!");
                    println!("  Sample rate: {} Hz", cfg.engine.sample_rate);
                    println!("  Block size: {}", cfg.engine.block_size);
                    println!(
                        "  LFO: {:?} at {} Hz, depth {:.0}% ({})",
                        cfg.lfo.shape,
                        cfg.lfo.rate_hz,
                        cfg.lfo.depth * 100.0,
                        if cfg.lfo.enabled { "enabled" } else { "disabled" }
                    );
                    println!("  Sync: {:?} {}", cfg.lfo.sync, cfg.lfo.division.label());
                    println!("  Routes: {}", cfg.routes.len());
                    for route in &cfg.routes {
                        println!(
                            "    - ch {} -> {}{}{}{}",
                            route.channel,
                            route.parameter,
                            if route.bipolar { " [bipolar]" } else { "" },
                            if route.invert { " [invert]" } else { "" },
                            if route.one_shot { " [one-shot]" } else { "" }
                        );
                    }
                    if cfg.envelope.enabled {
                        println!("  Envelope -> {:?}", cfg.envelope.destination);
                    }
                }
                Err(e) => {
                    println!("Configuration is invalid: {:#}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Init => {
            let path = "modgen.yaml";
            if std::path::Path::new(path).exists() {
                println!("modgen.yaml already exists. Not overwriting.");
            } else {
                std::fs::write(path, EXAMPLE_CONFIG)?;
                println!("Created modgen.yaml with example configuration.");
            }
        }
    }

    Ok(())
}
