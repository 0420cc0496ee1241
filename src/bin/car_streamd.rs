//! car_streamd - cAR camera streaming daemon
//!
//! This daemon:
//! 1. Loads the stream configuration (`CAR_CONFIG`, `CAR_SINK*` overrides)
//! 2. Registers the cAR elements statically and launches one pipeline per camera
//! 3. Runs until Ctrl-C, or until any pipeline reports an error or end of stream

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use gstcar::config::StreamConfig;
use gstcar::pipeline::{self, PipelineDescription};

const BUS_POLL: gstreamer::ClockTime = gstreamer::ClockTime::from_mseconds(200);

enum Shutdown {
    Signal,
    Eos { camera: String },
    Error { camera: String, message: String },
}

struct Running {
    camera: String,
    pipeline: gstreamer::Pipeline,
    watcher: thread::JoinHandle<()>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = StreamConfig::load()?;
    gstreamer::init().context("initialise GStreamer")?;
    gstcar::plugin_register_static().context("register cAR elements")?;

    let (tx, rx) = mpsc::channel();
    let stop = Arc::new(AtomicBool::new(false));
    let mut running = Vec::new();
    for description in pipeline::describe(&config) {
        match launch(description, tx.clone(), Arc::clone(&stop)) {
            Ok(pipeline) => running.push(pipeline),
            Err(err) => {
                teardown(running, &stop);
                return Err(err);
            }
        }
    }

    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(Shutdown::Signal);
    })
    .context("install Ctrl-C handler")?;
    drop(tx);

    log::info!(
        "car_streamd running {} pipeline(s), waiting for shutdown signal (Ctrl-C)...",
        running.len()
    );
    let outcome = match rx.recv() {
        Ok(Shutdown::Signal) | Err(_) => {
            log::info!("shutdown signal received, stopping pipelines...");
            Ok(())
        }
        Ok(Shutdown::Eos { camera }) => {
            log::warn!("camera {} reached end of stream, stopping pipelines...", camera);
            Ok(())
        }
        Ok(Shutdown::Error { camera, message }) => Err(anyhow!("camera {} failed: {}", camera, message)),
    };
    teardown(running, &stop);
    outcome
}

fn launch(
    description: PipelineDescription,
    tx: mpsc::Sender<Shutdown>,
    stop: Arc<AtomicBool>,
) -> Result<Running> {
    let camera = description.camera;
    log::info!("camera {}: {}", camera, description.launch);
    let pipeline = gstreamer::parse::launch(&description.launch)
        .with_context(|| format!("parse pipeline for camera {}", camera))?
        .downcast::<gstreamer::Pipeline>()
        .map_err(|_| anyhow!("camera {}: description did not produce a pipeline", camera))?;
    let bus = pipeline
        .bus()
        .ok_or_else(|| anyhow!("camera {}: pipeline has no bus", camera))?;

    if let Err(err) = pipeline.set_state(gstreamer::State::Playing) {
        let detail = bus
            .timed_pop_filtered(gstreamer::ClockTime::ZERO, &[gstreamer::MessageType::Error])
            .and_then(|msg| match msg.view() {
                gstreamer::MessageView::Error(error) => Some(error.error().to_string()),
                _ => None,
            })
            .unwrap_or_else(|| err.to_string());
        let _ = pipeline.set_state(gstreamer::State::Null);
        return Err(anyhow!("camera {}: could not start: {}", camera, detail));
    }

    let weak = pipeline.downgrade();
    let watched = camera.clone();
    let watcher = thread::Builder::new()
        .name(format!("bus-{}", camera))
        .spawn(move || {
            while !stop.load(Ordering::Acquire) {
                let Some(msg) = bus.timed_pop(BUS_POLL) else {
                    continue;
                };
                match msg.view() {
                    gstreamer::MessageView::Eos(..) => {
                        let _ = tx.send(Shutdown::Eos { camera: watched });
                        return;
                    }
                    gstreamer::MessageView::Error(error) => {
                        let message = match error.debug() {
                            Some(debug) => format!("{} ({})", error.error(), debug),
                            None => error.error().to_string(),
                        };
                        let _ = tx.send(Shutdown::Error {
                            camera: watched,
                            message,
                        });
                        return;
                    }
                    gstreamer::MessageView::Warning(warning) => {
                        log::warn!("camera {}: {}", watched, warning.error());
                    }
                    gstreamer::MessageView::Latency(..) => {
                        if let Some(pipeline) = weak.upgrade() {
                            if let Err(err) = pipeline.recalculate_latency() {
                                log::warn!("camera {}: latency recalculation failed: {}", watched, err);
                            }
                        }
                    }
                    _ => {}
                }
            }
        })
        .context("spawn bus watcher")?;

    Ok(Running {
        camera,
        pipeline,
        watcher,
    })
}

fn teardown(running: Vec<Running>, stop: &AtomicBool) {
    for entry in &running {
        if let Err(err) = entry.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("camera {}: stopping failed: {}", entry.camera, err);
        }
    }
    stop.store(true, Ordering::Release);
    for entry in running {
        if entry.watcher.join().is_err() {
            log::warn!("camera {}: bus watcher panicked", entry.camera);
        }
    }
}
