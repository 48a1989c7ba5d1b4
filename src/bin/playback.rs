//! strata-playback: Drive a generation playback against the reference model.

use std::path::PathBuf;
use std::process;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;

use strata_viz::cli;
use strata_viz::engine::controller::DEFAULT_STEP_DURATION;
use strata_viz::engine::{PlaybackConfig, SamplingConfig, Session};
use strata_viz::native::NativeModule;
use strata_viz::{ModelShape, ReferenceModel};

#[derive(Parser)]
#[command(name = "strata-playback", about = "Play back token generation phase by phase")]
struct Args {
    /// Model config JSON (GPT- or LLaMA-style keys). Defaults to the nano shape.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Prompt token ids, comma or whitespace separated
    #[arg(long, conflicts_with = "token_file")]
    token_ids: Option<String>,

    /// Read prompt token ids from file
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Tokens to generate
    #[arg(short = 'n', long, default_value = "3")]
    tokens: usize,

    /// Simulated frames per second
    #[arg(long, default_value = "60")]
    fps: f32,

    /// Seconds per phase (default: $STRATA_STEP_DURATION or 1.0)
    #[arg(long)]
    step_duration: Option<f32>,

    /// Temperature (0.0 = greedy)
    #[arg(long, default_value = "0.0")]
    temp: f32,

    /// Top-k sampling (0 = disabled)
    #[arg(long, default_value = "0")]
    top_k: usize,

    /// Top-p (nucleus) sampling
    #[arg(long, default_value = "1.0")]
    top_p: f32,

    /// Penalty for tokens already in the sequence (1.0 = disabled)
    #[arg(long, default_value = "1.0")]
    repetition_penalty: f32,

    /// Random seed for sampling
    #[arg(short = 's', long)]
    seed: Option<u64>,

    /// Seed for the reference model's transition weights
    #[arg(long, default_value = "42")]
    model_seed: u64,

    /// Stop after this many frames even if playback is still active
    #[arg(long, default_value = "1000000")]
    max_frames: u64,

    /// Output format: text or json
    #[arg(long, default_value = "text", value_parser = validate_output_format)]
    output_format: String,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

fn validate_output_format(s: &str) -> Result<String, String> {
    match s {
        "text" | "json" => Ok(s.to_string()),
        _ => Err(format!(
            "Unknown output format '{}'. Options: text, json",
            s
        )),
    }
}

/// One phase entered during playback.
#[derive(Serialize)]
struct PhaseEvent {
    frame: u64,
    time_s: f32,
    phase: String,
    tokens_generated: usize,
}

#[derive(Serialize)]
struct ConfigOutput {
    target_tokens: usize,
    fps: f32,
    step_duration: f32,
    temperature: f32,
    top_k: usize,
    top_p: f32,
    repetition_penalty: f32,
    seed: Option<u64>,
    model_seed: u64,
    sampler: String,
}

#[derive(Serialize)]
struct JsonOutput {
    shape: ModelShape,
    prompt: Vec<u32>,
    generated_tokens: Vec<u32>,
    stop_reason: Option<String>,
    frames: u64,
    wall_ms: f64,
    phases: Vec<PhaseEvent>,
    config: ConfigOutput,
}

fn main() {
    let args = Args::parse();
    cli::init_logging(args.log_disable);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if !args.fps.is_finite() || args.fps <= 0.0 {
        return Err(format!("--fps must be positive, got {}", args.fps).into());
    }

    let shape = cli::load_shape(args.config.as_deref())?;
    let prompt = cli::read_token_ids(args.token_ids.as_deref(), args.token_file.as_deref())?;

    let step_duration = args
        .step_duration
        .or_else(cli::step_duration_from_env)
        .unwrap_or(DEFAULT_STEP_DURATION);

    let config = PlaybackConfig {
        step_duration,
        sampling: SamplingConfig {
            temperature: args.temp,
            top_k: args.top_k,
            top_p: args.top_p,
            seed: args.seed,
            repetition_penalty: args.repetition_penalty,
        },
        ..Default::default()
    };

    let mut session = Session::new(config, 1);
    let model_seed = args.model_seed;
    session.load_model("reference", |_| {
        Ok(Box::new(ReferenceModel::try_new(shape, model_seed)?) as Box<dyn NativeModule>)
    })?;

    let wall_start = Instant::now();
    session.start(Some(&prompt), args.tokens)?;

    let dt = 1.0 / args.fps;
    let mut frame = 0u64;
    let mut phases = vec![PhaseEvent {
        frame,
        time_s: 0.0,
        phase: session.controller().phase().to_string(),
        tokens_generated: 0,
    }];
    let mut last_phase = session.controller().phase();

    while session.state().active && frame < args.max_frames {
        session.frame(dt);
        frame += 1;
        let phase = session.controller().phase();
        if phase != last_phase {
            phases.push(PhaseEvent {
                frame,
                time_s: frame as f32 * dt,
                phase: phase.to_string(),
                tokens_generated: session.state().tokens_generated,
            });
            last_phase = phase;
        }
    }
    if session.state().active {
        session.stop();
    }
    let wall_ms = wall_start.elapsed().as_secs_f64() * 1000.0;

    let state = session.state();
    let stop_reason = session.stop_reason().map(|r| r.to_string());

    match args.output_format.as_str() {
        "json" => {
            let json = JsonOutput {
                shape,
                prompt: state.prompt_tokens.clone().unwrap_or_default(),
                generated_tokens: state.generated_tokens.clone(),
                stop_reason,
                frames: frame,
                wall_ms,
                phases,
                config: ConfigOutput {
                    target_tokens: args.tokens,
                    fps: args.fps,
                    step_duration: session.controller().config().step_duration,
                    temperature: args.temp,
                    top_k: args.top_k,
                    top_p: args.top_p,
                    repetition_penalty: args.repetition_penalty,
                    seed: args.seed,
                    model_seed,
                    sampler: session.controller().sampler_name().to_string(),
                },
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            for event in &phases {
                println!(
                    "{:>7}  {:>8.2}s  {:<16} tokens={}",
                    event.frame, event.time_s, event.phase, event.tokens_generated
                );
            }
            let generated: Vec<String> = state.generated_tokens.iter().map(u32::to_string).collect();
            println!("generated: [{}]", generated.join(", "));
            println!(
                "stop_reason: {}",
                stop_reason.as_deref().unwrap_or("none")
            );
        }
    }

    Ok(())
}
