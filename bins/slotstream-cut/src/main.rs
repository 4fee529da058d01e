use clap::Parser;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use slotstream_blocks::sample_file::{SampleFile, SampleFileMode, SampleIoError};
use slotstream_blocks::{Pipeline, SlotSelector, StreamWindow, TagLogger, TimeTagShifter};
use slotstream_config::{CutConfig, toml_config};
use slotstream_core::{ComplexSample, StreamTag, debug};

/// Samples per work window
const BLOCK_LEN: usize = 4096;

/// Load configuration file
fn load_config_from_toml(cfg_path: &str) -> CutConfig {
    match toml_config::from_file(cfg_path) {
        Ok(c) => c,
        Err(e) => {
            println!("Failed to load configuration from {}: {}", cfg_path, e);
            std::process::exit(1);
        }
    }
}

/// Builds the shifter → selector pipeline from the configuration
fn build_pipeline(cfg: &CutConfig) -> Pipeline<ComplexSample> {
    let shifter: TimeTagShifter<ComplexSample> = TimeTagShifter::new(true);
    if cfg.time.integer_offset != 0 {
        shifter
            .control()
            .send(cfg.time.integer_offset)
            .expect("control channel cannot be closed here");
    }

    let selector: SlotSelector<ComplexSample> = match SlotSelector::new(
        cfg.schedule.frame_len,
        cfg.schedule.slot_lens.clone(),
        cfg.schedule.slot_offsets.clone(),
        cfg.schedule.frame_t0(),
        cfg.input.start_time(),
        cfg.input.sample_rate,
    ) {
        Ok(s) => s,
        Err(e) => {
            println!("Invalid schedule configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut pipeline = Pipeline::new();
    pipeline.add_stage(Box::new(shifter));
    pipeline.add_stage(Box::new(selector));
    pipeline
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "slotstream cut tool",
    long_about = "Cuts the scheduled TDMA slots out of a timestamped IQ capture"
)]
struct Args {
    /// TOML config with input, schedule and output parameters
    config: String,
}

fn main() {
    let args = Args::parse();
    let cfg = load_config_from_toml(&args.config);
    let _log_guard =
        debug::setup_logging_default(cfg.log.as_ref().and_then(|l| l.debug_file.clone()));

    tracing::info!("slotstream-cut {}", slotstream_core::STACK_VERSION);

    let read_mode = if cfg.input.repeat { SampleFileMode::ReadRepeat } else { SampleFileMode::Read };
    let mut reader = match SampleFile::new(&cfg.input.file, read_mode) {
        Ok(r) => r,
        Err(e) => {
            println!("Failed to open input {}: {}", cfg.input.file, e);
            std::process::exit(1);
        }
    };
    let mut writer = match SampleFile::new(&cfg.output.file, SampleFileMode::Write) {
        Ok(w) => w,
        Err(e) => {
            println!("Failed to open output {}: {}", cfg.output.file, e);
            std::process::exit(1);
        }
    };
    let tag_logger = match &cfg.log {
        Some(log) => match TagLogger::new(&log.tag_file) {
            Ok(logger) => Some(logger),
            Err(e) => {
                println!("Failed to open tag log {}: {}", log.tag_file, e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let mut pipeline = build_pipeline(&cfg);

    // Set up Ctrl+C handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("failed to set Ctrl+C handler");

    let mut buffer = vec![ComplexSample::new(0.0, 0.0); BLOCK_LEN];
    let mut abs_offset: u64 = 0;
    let mut total_out: u64 = 0;

    while running.load(Ordering::SeqCst) {
        match reader.read_block(&mut buffer) {
            Ok(()) => {}
            Err(SampleIoError::Eof) => {
                tracing::info!("end of input reached");
                break;
            }
            Err(e) => {
                tracing::error!("read failed: {}", e);
                break;
            }
        }

        // the receiver's time declaration for the very first sample
        let tags: Vec<StreamTag> = if abs_offset == 0 {
            vec![
                StreamTag::rx_time(0, cfg.input.start_time(), "sample_file"),
                StreamTag::rx_rate(0, cfg.input.sample_rate, "sample_file"),
            ]
        } else {
            Vec::new()
        };

        let (out_samples, out_tags) = pipeline.run(&buffer, &tags);
        abs_offset += BLOCK_LEN as u64;
        total_out += out_samples.len() as u64;

        if let Some(logger) = &tag_logger {
            logger.work(&[StreamWindow::new(
                out_samples.as_slice(),
                total_out - out_samples.len() as u64,
                &out_tags,
            )]);
        }

        if let Err(e) = writer.write_block(&out_samples) {
            tracing::error!("write failed: {}", e);
            break;
        }
    }

    if let Err(e) = writer.flush() {
        tracing::error!("flush failed: {}", e);
    }
    tracing::info!("done: {} samples in, {} samples out", abs_offset, total_out);
}
