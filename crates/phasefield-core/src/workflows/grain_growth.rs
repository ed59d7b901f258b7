use super::initialize;
use crate::engine::config::{GrainGrowthConfig, TimeStep};
use crate::engine::domain::{Domain, SerialDomain};
use crate::engine::driving_force::DrivingForce;
use crate::engine::error::EngineError;
use crate::engine::obstacle;
use crate::engine::phase_field::{NormalizationReport, PhaseField};
use crate::engine::progress::{Progress, ProgressReporter};
use nalgebra::DMatrix;
use tracing::{debug, info, instrument};

/// Outcome of a grain-growth run.
#[derive(Debug, Clone, PartialEq)]
pub struct GrowthSummary {
    /// Index of the last completed step, counted from the restart step.
    pub last_step: u64,
    pub steps: u64,
    /// Simulated time covered by this run.
    pub time: f64,
    pub existing_fields: usize,
    pub phase_fractions: Vec<f64>,
    pub energy_density: f64,
    /// Normalization tallies summed over all steps.
    pub normalization: NormalizationReport,
    pub overshoots: u64,
}

/// Runs grain growth on a single worker owning the whole grid.
pub fn run(
    config: &GrainGrowthConfig,
    reporter: &ProgressReporter,
) -> Result<GrowthSummary, EngineError> {
    run_on(config, &SerialDomain::new(config.boundary), reporter)
}

/// Runs grain growth on the sub-volume of `domain`.
#[instrument(skip_all, name = "grain_growth_workflow")]
pub fn run_on(
    config: &GrainGrowthConfig,
    domain: &impl Domain,
    reporter: &ProgressReporter,
) -> Result<GrowthSummary, EngineError> {
    reporter.report(Progress::StageStart {
        name: "Initialization",
    });
    let (mut phase_field, first_step) = prepare(config, domain)?;
    let n_phases = config.phase_field.n_phases;
    let mut driving_force = DrivingForce::new(&config.grid, config.driving_force.clone(), n_phases);
    let locked = DMatrix::from_element(n_phases, n_phases, false);
    reporter.report(Progress::StageFinish);

    info!(
        steps = config.steps,
        first_step,
        fields = phase_field.registry().existing().count(),
        "Starting grain growth"
    );
    reporter.report(Progress::StepsStart {
        total_steps: config.steps,
    });

    let mut time = 0.0;
    let mut normalization = NormalizationReport::default();
    let mut overshoots = 0;
    let mut last_checkpoint = None;
    let last_step = first_step + config.steps;

    for step in first_step + 1..=last_step {
        let dt = advance(config, domain, &mut phase_field, &mut driving_force, &locked, &mut normalization)?;
        time += dt;
        reporter.report(Progress::StepDone { step, time });

        if let (Some(interval), Some(dir)) = (config.checkpoint_interval, &config.output_dir) {
            if step % interval == 0 {
                phase_field.write_checkpoint(dir, step)?;
                last_checkpoint = Some(step);
            }
        }

        if step % config.report_interval == 0 {
            overshoots += report(config, domain, &phase_field, &mut driving_force, step, time, reporter);
        }
    }
    reporter.report(Progress::StepsFinish);

    overshoots += driving_force.report_diagnostics(domain).overshoots;
    if let Some(dir) = &config.output_dir {
        if last_checkpoint != Some(last_step) {
            phase_field.write_checkpoint(dir, last_step)?;
        }
    }

    let summary = GrowthSummary {
        last_step,
        steps: config.steps,
        time,
        existing_fields: phase_field.registry().existing().count(),
        phase_fractions: phase_field.phase_fractions().to_vec(),
        energy_density: obstacle::energy_density(&phase_field, &config.interface, domain),
        normalization,
        overshoots,
    };
    info!(
        steps = summary.steps,
        time = summary.time,
        fields = summary.existing_fields,
        limited = summary.normalization.cells_limited,
        overshoots = summary.overshoots,
        "Grain growth complete"
    );
    Ok(summary)
}

/// Builds the initial microstructure, or loads it from a checkpoint.
fn prepare(
    config: &GrainGrowthConfig,
    domain: &impl Domain,
) -> Result<(PhaseField, u64), EngineError> {
    let mut phase_field = PhaseField::new(config.grid.clone(), config.phase_field.clone());
    match (config.restart_step, &config.output_dir) {
        (Some(step), Some(dir)) => {
            phase_field.read_checkpoint(dir, step, domain)?;
            Ok((phase_field, step))
        }
        (Some(_), None) => Err(EngineError::Internal(
            "restart requested without an output directory".into(),
        )),
        (None, _) => {
            initialize::apply(&mut phase_field, &config.initial, &config.boundary, domain)?;
            Ok((phase_field, 0))
        }
    }
}

/// One time step. Returns the step width used.
fn advance(
    config: &GrainGrowthConfig,
    domain: &impl Domain,
    phase_field: &mut PhaseField,
    driving_force: &mut DrivingForce,
    locked: &DMatrix<bool>,
    normalization: &mut NormalizationReport,
) -> Result<f64, EngineError> {
    let ip = &config.interface;

    driving_force.clear();
    obstacle::curvature_increments(phase_field, ip);
    for force in &config.external_forces {
        driving_force.add_phase_pair_force(phase_field, force.phases[0], force.phases[1], force.value);
    }
    driving_force.average(phase_field, domain);
    if driving_force.config().unifying {
        driving_force.unify(phase_field, domain);
    }
    driving_force.merge_increments(phase_field, ip);

    let dt = match config.time_step {
        TimeStep::Fixed(dt) => dt,
        TimeStep::Adaptive {
            theoretical_limit,
            numerical_limit,
        } => driving_force.max_time_step(ip, theoretical_limit, numerical_limit, domain),
    };
    if !(dt > 0.0 && dt.is_finite()) {
        return Err(EngineError::Numerical {
            stage: "time_step",
            reason: format!("time step {dt} is not positive and finite"),
        });
    }

    if config.keep_phase_volume {
        phase_field.keep_phase_volume(locked, domain);
    }
    let report = phase_field.normalize_increments(dt, domain);
    normalization.cells_limited += report.cells_limited;
    normalization.capped += report.capped;
    normalization.bound_violations += report.bound_violations;

    phase_field.merge_increments(dt, domain);
    if phase_field.phase_fractions().iter().any(|f| !f.is_finite()) {
        return Err(EngineError::Numerical {
            stage: "merge_increments",
            reason: "phase fractions are no longer finite".into(),
        });
    }
    Ok(dt)
}

/// Console diagnostics of one report interval. Returns the overshoots
/// counted since the previous report.
fn report(
    config: &GrainGrowthConfig,
    domain: &impl Domain,
    phase_field: &PhaseField,
    driving_force: &mut DrivingForce,
    step: u64,
    time: f64,
    reporter: &ProgressReporter,
) -> u64 {
    let energy = obstacle::energy_density(phase_field, &config.interface, domain);
    let diagnostics = driving_force.report_diagnostics(domain);
    let global = driving_force.average_global(phase_field, domain);
    let fields = phase_field.registry().existing().count();

    if domain.is_root() {
        info!(step, time, energy, fields, "Interface energy density");
        debug!(?global, fractions = ?phase_field.phase_fractions(), "Average driving force");
        for v in phase_field.volume_report() {
            debug!(raw_id = v.id.to_raw(), phase = v.phase, stage = ?v.stage, volume = v.volume, "Field volume");
        }
    }
    reporter.report(Progress::Message(format!(
        "step {step}: t = {time:.4e}, {fields} fields, interface energy {energy:.4e}"
    )));
    diagnostics.overshoots
}
