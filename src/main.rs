//! Simulated alignment scan.
//!
//! Runs the configured position sequence against a simulated Gaussian beam,
//! passes each reading through the validator pipeline and reports the
//! discrete and parabolic optimum.
//!
//! ```bash
//! laser_align --config config/laser_align.toml --beam-centre 0.4,0,0
//! LASER_ALIGN_SCAN__SEQUENCE=fixed_timer laser_align --saturation ignore-all
//! ```

use anyhow::{ensure, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};

use laser_align::config::{ScanConfig, DEFAULT_CONFIG_PATH};
use laser_align::error::{Anomaly, ScanError, ScanResult};
use laser_align::hardware::{
    FixedDecision, OperatorDecision, PromptDecision, SaturationDecision, SensorState,
};
use laser_align::logging;
use laser_align::measurement::{Axis, Position};
use laser_align::optimum::{move_to_discrete_max, parabolic_max, parabolic_max_auto};
use laser_align::pipeline::{bake_noise_check, bake_saturation_check, Pipeline};
use laser_align::sim::{run_scan, MockBeamSensor, MockStage, ScanLimits};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SaturationMode {
    /// Ask on the terminal
    Prompt,
    Retry,
    Ignore,
    IgnoreAll,
}

#[derive(Parser, Debug)]
#[command(name = "laser_align", version, about = "Simulated laser alignment scan")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Axis for the parabolic fit (detected from the results if omitted)
    #[arg(short, long, value_parser = parse_axis)]
    axis: Option<Axis>,

    /// How saturation prompts are answered
    #[arg(long, value_enum, default_value_t = SaturationMode::Prompt)]
    saturation: SaturationMode,

    /// Simulated beam centre as x,y,z
    #[arg(long, value_delimiter = ',', default_values_t = [0.3, 0.0, 0.0])]
    beam_centre: Vec<f64>,

    /// Simulated beam 1/e^2 half-width
    #[arg(long, default_value_t = 1.5)]
    beam_width: f64,

    /// Simulated peak brightness at zero gain
    #[arg(long, default_value_t = 600.0)]
    beam_peak: f64,

    /// Relative noise amplitude of the simulated sensor
    #[arg(long, default_value_t = 0.0)]
    noise: f64,

    /// Print the results table as JSON
    #[arg(long)]
    json: bool,
}

fn parse_axis(s: &str) -> std::result::Result<Axis, String> {
    s.parse().map_err(|e: ScanError| e.to_string())
}

fn decider(mode: SaturationMode) -> Box<dyn OperatorDecision> {
    match mode {
        SaturationMode::Prompt => Box::new(PromptDecision::stdio()),
        SaturationMode::Retry => Box::new(FixedDecision(SaturationDecision::Retry)),
        SaturationMode::Ignore => Box::new(FixedDecision(SaturationDecision::Ignore)),
        SaturationMode::IgnoreAll => Box::new(FixedDecision(SaturationDecision::IgnoreAll)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ScanConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    logging::init_from_config(&config)?;
    info!(name = %config.application.name, sequence = ?config.scan.sequence, "Starting scan");

    ensure!(
        cli.beam_centre.len() == 3,
        "--beam-centre takes exactly three coordinates, got {}",
        cli.beam_centre.len()
    );
    let centre = Position::new(cli.beam_centre[0], cli.beam_centre[1], cli.beam_centre[2]);
    let mut sensor = MockBeamSensor::new(centre, cli.beam_width, cli.beam_peak)
        .with_full_scale(config.sensor.saturation_level)
        .with_noise(cli.noise, 7);
    let state = SensorState::new(config.sensor.initial_gain).into_handle();
    let initial = config.initial_position();
    let mut stage = MockStage::new(initial);

    let mut answers = decider(cli.saturation);
    let mut pipeline = Pipeline::new().with_step(bake_saturation_check(
        state.clone(),
        move |anomaly: Anomaly| -> ScanResult<SaturationDecision> { answers.decide(anomaly) },
        config.saturation_policy(),
    )?);
    if cli.noise > 0.0 {
        pipeline.push(bake_noise_check(config.sensor.max_relative_error)?);
    }

    let results = run_scan(
        &mut stage,
        &mut sensor,
        &state,
        &mut pipeline,
        || config.sequence(),
        ScanLimits::default(),
    )
    .context("scan aborted")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    let optimum = move_to_discrete_max(&mut stage, &results, initial)?;
    if optimum.found {
        println!("Discrete maximum at {}", optimum.position);
    } else {
        println!("No maximum detected, stayed at {}", optimum.position);
    }

    let fit = match cli.axis {
        Some(axis) => parabolic_max(&results, axis),
        None => parabolic_max_auto(&results),
    };
    match fit {
        Ok(fit) => println!(
            "Parabolic maximum along {} at {} (predicted {:.3}, range {:?}, residual {:.3e})",
            fit.axis, fit.position, fit.predicted_peak, fit.axis_range, fit.residual
        ),
        Err(e) => warn!(error = %e, "Parabolic fit unavailable"),
    }

    info!(gain = state.borrow().gain, "Scan finished");
    Ok(())
}
