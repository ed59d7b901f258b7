use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use phasefield::core::grid::boundary::{BoundaryConditions, BoundaryKind};
use phasefield::core::grid::descriptor::{GridDescriptor, Resolution};
use phasefield::core::grid::stencil::{GradientStencil, LaplacianStencil};
use phasefield::core::params::PairParameters;
use phasefield::engine::config::{self as core_config, InterfaceNormalModel, WeightsMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

const DEFAULT_VORONOI_SEED: u64 = 1;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialGridConfig {
    extent: Option<[i64; 3]>,
    dx: Option<f64>,
    iwidth: Option<f64>,
    bcells: Option<i64>,
    resolution: Option<Resolution>,
}

/// `all` sets every face; a named face overrides it.
#[derive(Deserialize, Debug, Default, Clone, Copy)]
#[serde(deny_unknown_fields)]
struct PartialBoundaryConfig {
    all: Option<BoundaryKind>,
    x0: Option<BoundaryKind>,
    xn: Option<BoundaryKind>,
    y0: Option<BoundaryKind>,
    yn: Option<BoundaryKind>,
    z0: Option<BoundaryKind>,
    zn: Option<BoundaryKind>,
}

impl From<PartialBoundaryConfig> for BoundaryConditions {
    fn from(p: PartialBoundaryConfig) -> Self {
        let base = BoundaryConditions::uniform(p.all.unwrap_or_default());
        Self {
            x0: p.x0.unwrap_or(base.x0),
            xn: p.xn.unwrap_or(base.xn),
            y0: p.y0.unwrap_or(base.y0),
            yn: p.yn.unwrap_or(base.yn),
            z0: p.z0.unwrap_or(base.z0),
            zn: p.zn.unwrap_or(base.zn),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialPhaseFieldConfig {
    n_phases: Option<usize>,
    laplacian_stencil: Option<LaplacianStencil>,
    gradient_stencil: Option<GradientStencil>,
    normal_model: Option<InterfaceNormalModel>,
    #[serde(default)]
    combine: Vec<usize>,
    nucleus_volume_factor: Option<f64>,
    consider_nucleus_volume: Option<bool>,
    max_normalization_iterations: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialInterfaceConfig {
    energy: Option<f64>,
    mobility: Option<f64>,
    regularization_factor: Option<f64>,
    /// Per-pair table, relative to the run file.
    pair_parameters: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialDrivingForceConfig {
    averaging: Option<bool>,
    limiting: Option<bool>,
    unifying: Option<bool>,
    weights_mode: Option<WeightsMode>,
    range: Option<i64>,
    phi_threshold: Option<f64>,
    limit: Option<f64>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(
    deny_unknown_fields,
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "kebab-case"
)]
enum PartialInitialStructure {
    SingleSphere {
        radius: f64,
        inner_phase: usize,
        outer_phase: usize,
    },
    Voronoi {
        grains: usize,
        phase: usize,
        seed: Option<u64>,
    },
    PlantedNucleus {
        matrix_phase: usize,
        nucleus_phase: usize,
        position: [i64; 3],
    },
}

impl From<PartialInitialStructure> for core_config::InitialStructure {
    fn from(p: PartialInitialStructure) -> Self {
        match p {
            PartialInitialStructure::SingleSphere {
                radius,
                inner_phase,
                outer_phase,
            } => Self::SingleSphere {
                radius,
                inner_phase,
                outer_phase,
            },
            PartialInitialStructure::Voronoi {
                grains,
                phase,
                seed,
            } => Self::Voronoi {
                grains,
                phase,
                seed: seed.unwrap_or(DEFAULT_VORONOI_SEED),
            },
            PartialInitialStructure::PlantedNucleus {
                matrix_phase,
                nucleus_phase,
                position,
            } => Self::PlantedNucleus {
                matrix_phase,
                nucleus_phase,
                position,
            },
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialAdaptiveStep {
    theoretical_limit: Option<f64>,
    numerical_limit: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialRunSection {
    steps: Option<u64>,
    dt: Option<f64>,
    adaptive: Option<PartialAdaptiveStep>,
    keep_phase_volume: Option<bool>,
    checkpoint_interval: Option<u64>,
    report_interval: Option<u64>,
    output_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
struct PartialExternalForce {
    phases: [usize; 2],
    value: f64,
}

/// A run file as written by the user, before command-line overrides and
/// core validation.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialRunConfig {
    grid: Option<PartialGridConfig>,
    boundary: Option<PartialBoundaryConfig>,
    phase_field: Option<PartialPhaseFieldConfig>,
    interface: Option<PartialInterfaceConfig>,
    driving_force: Option<PartialDrivingForceConfig>,
    initial: Option<PartialInitialStructure>,
    run: Option<PartialRunSection>,
    #[serde(default)]
    external_force: Vec<PartialExternalForce>,
    #[serde(skip)]
    source_dir: PathBuf,
}

/// The parts of a run file needed to allocate a phase field.
pub struct Layout {
    pub grid: GridDescriptor,
    pub boundary: BoundaryConditions,
    pub phase_field: core_config::PhaseFieldConfig,
}

fn config_error(e: core_config::ConfigError) -> CliError {
    CliError::Config(e.to_string())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        CliError::Config(format!("Invalid value for {}: {}", key, value))
    })
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading run file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        config.source_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn layout(&self) -> Result<Layout> {
        let grid = self
            .grid
            .as_ref()
            .ok_or_else(|| CliError::Config("`[grid]` section is required.".to_string()))?;
        let mut grid_builder = core_config::GridDescriptorBuilder::new();
        if let Some(extent) = grid.extent {
            grid_builder = grid_builder.extent(extent);
        }
        if let Some(dx) = grid.dx {
            grid_builder = grid_builder.dx(dx);
        }
        if let Some(iwidth) = grid.iwidth {
            grid_builder = grid_builder.iwidth(iwidth);
        }
        if let Some(bcells) = grid.bcells {
            grid_builder = grid_builder.bcells(bcells);
        }
        if let Some(resolution) = grid.resolution {
            grid_builder = grid_builder.resolution(resolution);
        }
        let grid = grid_builder.build().map_err(config_error)?;

        let pf = self.phase_field.as_ref().ok_or_else(|| {
            CliError::Config("`[phase-field]` section is required.".to_string())
        })?;
        let mut pf_builder = core_config::PhaseFieldConfigBuilder::new();
        if let Some(n) = pf.n_phases {
            pf_builder = pf_builder.n_phases(n);
        }
        if let Some(stencil) = pf.laplacian_stencil {
            pf_builder = pf_builder.laplacian_stencil(stencil);
        }
        if let Some(stencil) = pf.gradient_stencil {
            pf_builder = pf_builder.gradient_stencil(stencil);
        }
        if let Some(model) = pf.normal_model {
            pf_builder = pf_builder.normal_model(model);
        }
        for &phase in &pf.combine {
            pf_builder = pf_builder.combine(phase);
        }
        if let Some(factor) = pf.nucleus_volume_factor {
            pf_builder = pf_builder.nucleus_volume_factor(factor);
        }
        if let Some(consider) = pf.consider_nucleus_volume {
            pf_builder = pf_builder.consider_nucleus_volume(consider);
        }
        if let Some(iterations) = pf.max_normalization_iterations {
            pf_builder = pf_builder.max_normalization_iterations(iterations);
        }
        let phase_field = pf_builder.build().map_err(config_error)?;

        let boundary = self.boundary.map(Into::into).unwrap_or_default();

        Ok(Layout {
            grid,
            boundary,
            phase_field,
        })
    }

    pub fn merge_with_cli(mut self, args: &RunArgs) -> Result<core_config::GrainGrowthConfig> {
        self.apply_set_values(&args.set_values)?;

        let Layout {
            grid,
            boundary,
            phase_field,
        } = self.layout()?;
        let n_phases = phase_field.n_phases;

        let pair_parameters = match self
            .interface
            .as_ref()
            .and_then(|i| i.pair_parameters.as_ref())
        {
            Some(relative) => {
                let path = self.source_dir.join(relative);
                debug!("Loading pair parameters from {:?}", path);
                Some(
                    PairParameters::load(&path).map_err(|e| CliError::FileParsing {
                        path: path.clone(),
                        source: e.into(),
                    })?,
                )
            }
            None => None,
        };

        let interface = Self::merge_interface(
            self.interface.take().unwrap_or_default(),
            pair_parameters.as_ref(),
            &grid,
            n_phases,
        )?;
        let driving_force = Self::merge_driving_force(
            self.driving_force.take().unwrap_or_default(),
            pair_parameters.as_ref(),
            &grid,
            n_phases,
        )?;

        let initial = self
            .initial
            .take()
            .ok_or_else(|| CliError::Config("`[initial]` section is required.".to_string()))?;

        let run = self.run.take().unwrap_or_default();
        let steps = args
            .steps
            .or(run.steps)
            .ok_or_else(|| CliError::Config("`run.steps` is required.".to_string()))?;
        let time_step = Self::merge_time_step(args.dt, run.dt, run.adaptive)?;

        let mut builder = core_config::GrainGrowthConfigBuilder::new()
            .grid(grid)
            .boundary(boundary)
            .phase_field(phase_field)
            .driving_force(driving_force)
            .interface(interface)
            .initial(initial.into())
            .steps(steps)
            .time_step(time_step)
            .keep_phase_volume(run.keep_phase_volume.unwrap_or(false));

        for force in &self.external_force {
            builder = builder.external_force(core_config::ExternalForce {
                phases: force.phases,
                value: force.value,
            });
        }
        if let Some(interval) = run.checkpoint_interval {
            builder = builder.checkpoint_interval(interval);
        }
        if let Some(interval) = run.report_interval {
            builder = builder.report_interval(interval);
        }
        if let Some(dir) = args.output.clone().or(run.output_dir) {
            builder = builder.output_dir(dir);
        }
        if let Some(step) = args.restart {
            builder = builder.restart_step(step);
        }

        builder.build().map_err(config_error)
    }

    fn merge_interface(
        partial: PartialInterfaceConfig,
        pair_parameters: Option<&PairParameters>,
        grid: &GridDescriptor,
        n_phases: usize,
    ) -> Result<phasefield::engine::interface::InterfaceProperties> {
        let mut builder = core_config::InterfacePropertiesBuilder::new();
        if let Some(energy) = partial.energy {
            builder = builder.default_energy(energy);
        }
        if let Some(mobility) = partial.mobility {
            builder = builder.default_mobility(mobility);
        }
        if let Some(factor) = partial.regularization_factor {
            builder = builder.regularization_factor(factor);
        }
        if let Some(params) = pair_parameters {
            builder = builder.pair_parameters(params);
        }
        builder.build(grid, n_phases).map_err(config_error)
    }

    fn merge_driving_force(
        partial: PartialDrivingForceConfig,
        pair_parameters: Option<&PairParameters>,
        grid: &GridDescriptor,
        n_phases: usize,
    ) -> Result<core_config::DrivingForceConfig> {
        let mut builder = core_config::DrivingForceConfigBuilder::new();
        if let Some(on) = partial.averaging {
            builder = builder.averaging(on);
        }
        if let Some(on) = partial.limiting {
            builder = builder.limiting(on);
        }
        if let Some(on) = partial.unifying {
            builder = builder.unifying(on);
        }
        if let Some(mode) = partial.weights_mode {
            builder = builder.weights_mode(mode);
        }
        if let Some(range) = partial.range {
            builder = builder.range(range);
        }
        if let Some(threshold) = partial.phi_threshold {
            builder = builder.phi_threshold(threshold);
        }
        if let Some(limit) = partial.limit {
            builder = builder.default_limit(limit);
        }
        if let Some(params) = pair_parameters {
            builder = builder.pair_parameters(params);
        }
        builder.build(grid, n_phases).map_err(config_error)
    }

    /// `--dt` wins over the run file. Within the file exactly one of `dt`
    /// and `[run.adaptive]` may be given.
    fn merge_time_step(
        cli_dt: Option<f64>,
        file_dt: Option<f64>,
        adaptive: Option<PartialAdaptiveStep>,
    ) -> Result<core_config::TimeStep> {
        if let Some(dt) = cli_dt {
            return Ok(core_config::TimeStep::Fixed(dt));
        }
        match (file_dt, adaptive) {
            (Some(_), Some(_)) => Err(CliError::Config(
                "`run.dt` and `[run.adaptive]` are mutually exclusive.".to_string(),
            )),
            (Some(dt), None) => Ok(core_config::TimeStep::Fixed(dt)),
            (None, Some(a)) => Ok(core_config::TimeStep::Adaptive {
                theoretical_limit: a.theoretical_limit.ok_or_else(|| {
                    CliError::Config("`run.adaptive` requires `theoretical-limit`".to_string())
                })?,
                numerical_limit: a.numerical_limit.ok_or_else(|| {
                    CliError::Config("`run.adaptive` requires `numerical-limit`".to_string())
                })?,
            }),
            (None, None) => Err(CliError::Config(
                "A time step is required: set `run.dt`, `[run.adaptive]` or `--dt`.".to_string(),
            )),
        }
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "grid.dx" => {
                    self.grid.get_or_insert_with(Default::default).dx = Some(parse_value(key, value)?);
                }
                "grid.iwidth" => {
                    self.grid.get_or_insert_with(Default::default).iwidth =
                        Some(parse_value(key, value)?);
                }
                "interface.energy" => {
                    self.interface.get_or_insert_with(Default::default).energy =
                        Some(parse_value(key, value)?);
                }
                "interface.mobility" => {
                    self.interface.get_or_insert_with(Default::default).mobility =
                        Some(parse_value(key, value)?);
                }
                "driving-force.limit" => {
                    self.driving_force.get_or_insert_with(Default::default).limit =
                        Some(parse_value(key, value)?);
                }
                "driving-force.averaging" => {
                    self.driving_force.get_or_insert_with(Default::default).averaging =
                        Some(parse_value(key, value)?);
                }
                "run.report-interval" => {
                    self.run.get_or_insert_with(Default::default).report_interval =
                        Some(parse_value(key, value)?);
                }
                "run.checkpoint-interval" => {
                    self.run.get_or_insert_with(Default::default).checkpoint_interval =
                        Some(parse_value(key, value)?);
                }
                "run.keep-phase-volume" => {
                    self.run.get_or_insert_with(Default::default).keep_phase_volume =
                        Some(parse_value(key, value)?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use phasefield::engine::config::{InitialStructure, TimeStep};
    use phasefield::engine::interface::InterfaceModel;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const RUN_FILE: &str = r#"
        [grid]
        extent = [32, 32, 1]
        dx = 1.0
        iwidth = 4.0

        [boundary]
        all = "periodic"
        y0 = "no-flux"

        [phase-field]
        n-phases = 2

        [interface]
        energy = 1.0
        mobility = 1.0

        [driving-force]
        limit = 0.9

        [initial]
        type = "single-sphere"
        radius = 8.0
        inner-phase = 1
        outer-phase = 0

        [run]
        steps = 20
        dt = 0.05
        report-interval = 5

        [[external-force]]
        phases = [1, 0]
        value = 0.5
    "#;

    fn write_run_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn run_args(config_path: &Path, extra: &[&str]) -> RunArgs {
        let mut args = vec!["phasefield", "run", "-c", config_path.to_str().unwrap()];
        args.extend_from_slice(extra);
        match Cli::parse_from(args).command {
            Commands::Run(args) => args,
            _ => panic!("Expected 'run' subcommand"),
        }
    }

    #[test]
    fn run_file_values_reach_the_core_config() {
        let dir = tempdir().unwrap();
        let path = write_run_file(&dir, "run.toml", RUN_FILE);
        let args = run_args(&path, &[]);

        let config = PartialRunConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .unwrap();

        assert_eq!(config.grid.extent(), [32, 32, 1]);
        assert_eq!(config.boundary.x0, BoundaryKind::Periodic);
        assert_eq!(config.boundary.y0, BoundaryKind::NoFlux);
        assert_eq!(config.phase_field.n_phases, 2);
        assert_eq!(config.driving_force.limits[(0, 1)], 0.9);
        assert_eq!(config.steps, 20);
        assert_eq!(config.time_step, TimeStep::Fixed(0.05));
        assert_eq!(config.report_interval, 5);
        assert_eq!(config.external_forces.len(), 1);
        assert!(matches!(
            config.initial,
            InitialStructure::SingleSphere { inner_phase: 1, .. }
        ));
        assert_eq!(config.output_dir, None);
    }

    #[test]
    fn cli_arguments_override_file_values() {
        let dir = tempdir().unwrap();
        let path = write_run_file(&dir, "run.toml", RUN_FILE);
        let args = run_args(
            &path,
            &["--steps", "3", "--dt", "0.01", "-o", "out", "--restart", "20"],
        );

        let config = PartialRunConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .unwrap();

        assert_eq!(config.steps, 3);
        assert_eq!(config.time_step, TimeStep::Fixed(0.01));
        assert_eq!(config.output_dir, Some(PathBuf::from("out")));
        assert_eq!(config.restart_step, Some(20));
    }

    #[test]
    fn set_values_override_file_values() {
        let dir = tempdir().unwrap();
        let path = write_run_file(&dir, "run.toml", RUN_FILE);
        let args = run_args(&path, &["-S", "interface.energy=0.25", "-S", "grid.iwidth=6"]);

        let config = PartialRunConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .unwrap();

        assert_eq!(config.interface.energy(0, 1), 0.25);
        assert_eq!(config.grid.iwidth, 6.0);
    }

    #[test]
    fn unsupported_set_key_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_run_file(&dir, "run.toml", RUN_FILE);
        let args = run_args(&path, &["-S", "grid.colour=red"]);

        let result = PartialRunConfig::from_file(&path).unwrap().merge_with_cli(&args);
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("grid.colour")));
    }

    #[test]
    fn adaptive_time_step_is_read_from_its_own_table() {
        let dir = tempdir().unwrap();
        let content = format!(
            "{}\n[run.adaptive]\ntheoretical-limit = 0.25\nnumerical-limit = 1e-3\n",
            RUN_FILE.replace("dt = 0.05", "")
        );
        let path = write_run_file(&dir, "run.toml", &content);
        let args = run_args(&path, &[]);

        let config = PartialRunConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .unwrap();
        assert_eq!(
            config.time_step,
            TimeStep::Adaptive {
                theoretical_limit: 0.25,
                numerical_limit: 1e-3
            }
        );
    }

    #[test]
    fn missing_time_step_is_a_config_error() {
        let dir = tempdir().unwrap();
        let path = write_run_file(&dir, "run.toml", &RUN_FILE.replace("dt = 0.05", ""));
        let args = run_args(&path, &[]);

        let result = PartialRunConfig::from_file(&path).unwrap().merge_with_cli(&args);
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn core_validation_errors_surface_as_config_errors() {
        let dir = tempdir().unwrap();
        let path = write_run_file(&dir, "run.toml", &RUN_FILE.replace("radius = 8.0", "radius = -1.0"));
        let args = run_args(&path, &[]);

        let result = PartialRunConfig::from_file(&path).unwrap().merge_with_cli(&args);
        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("radius")));
    }

    #[test]
    fn unknown_fields_fail_to_parse() {
        let dir = tempdir().unwrap();
        let path = write_run_file(&dir, "run.toml", &format!("{RUN_FILE}\n[extra]\nkey = 1\n"));
        let result = PartialRunConfig::from_file(&path);
        assert!(matches!(result, Err(CliError::FileParsing { .. })));
    }

    #[test]
    fn pair_parameters_resolve_next_to_the_run_file() {
        let dir = tempdir().unwrap();
        write_run_file(
            &dir,
            "pairs.toml",
            "[[pair]]\nphases = [0, 1]\nenergy = 0.3\nmobility = 2.0\nlimit = 0.5\n",
        );
        let content = RUN_FILE.replace(
            "energy = 1.0\n        mobility = 1.0",
            "pair-parameters = \"pairs.toml\"\n        energy = 1.0\n        mobility = 1.0",
        );
        let path = write_run_file(&dir, "run.toml", &content);
        let args = run_args(&path, &[]);

        let config = PartialRunConfig::from_file(&path)
            .unwrap()
            .merge_with_cli(&args)
            .unwrap();

        assert_eq!(config.interface.energy(1, 0), 0.3);
        assert_eq!(config.interface.mobility(0, 1), 2.0);
        assert_eq!(config.interface.energy(0, 0), 1.0);
        assert_eq!(config.driving_force.limits[(0, 1)], 0.5);
    }

    #[test]
    fn missing_pair_parameter_file_names_its_path() {
        let dir = tempdir().unwrap();
        let content = RUN_FILE.replace(
            "energy = 1.0\n        mobility = 1.0",
            "pair-parameters = \"absent.toml\"\n        energy = 1.0\n        mobility = 1.0",
        );
        let path = write_run_file(&dir, "run.toml", &content);
        let args = run_args(&path, &[]);

        let result = PartialRunConfig::from_file(&path).unwrap().merge_with_cli(&args);
        assert!(matches!(
            result,
            Err(CliError::FileParsing { path, .. }) if path.ends_with("absent.toml")
        ));
    }
}
