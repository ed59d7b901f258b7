use crate::core::grid::boundary::BoundaryConditions;
use crate::core::grid::descriptor::{GridDescriptor, Resolution};
use crate::core::grid::stencil::{GradientStencil, LaplacianStencil};
use crate::core::params::PairParameters;
use crate::engine::interface::InterfaceProperties;
use itertools::iproduct;
use nalgebra::DMatrix;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

#[derive(Default)]
pub struct GridDescriptorBuilder {
    extent: Option<[i64; 3]>,
    local_extent: Option<[i64; 3]>,
    offset: Option<[i64; 3]>,
    dx: Option<f64>,
    iwidth: Option<f64>,
    bcells: Option<i64>,
    resolution: Option<Resolution>,
}

impl GridDescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Global extent of the grid in cells.
    pub fn extent(mut self, extent: [i64; 3]) -> Self {
        self.extent = Some(extent);
        self
    }
    /// Sub-volume owned by this worker; defaults to the whole grid.
    pub fn local(mut self, offset: [i64; 3], extent: [i64; 3]) -> Self {
        self.offset = Some(offset);
        self.local_extent = Some(extent);
        self
    }
    pub fn dx(mut self, dx: f64) -> Self {
        self.dx = Some(dx);
        self
    }
    pub fn iwidth(mut self, iwidth: f64) -> Self {
        self.iwidth = Some(iwidth);
        self
    }
    pub fn bcells(mut self, bcells: i64) -> Self {
        self.bcells = Some(bcells);
        self
    }
    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn build(self) -> Result<GridDescriptor, ConfigError> {
        let total = self.extent.ok_or(ConfigError::MissingParameter("extent"))?;
        let dx = self.dx.ok_or(ConfigError::MissingParameter("dx"))?;
        let iwidth = self.iwidth.ok_or(ConfigError::MissingParameter("iwidth"))?;
        let bcells = self.bcells.unwrap_or(1);
        let resolution = self.resolution.unwrap_or_default();
        let local = self.local_extent.unwrap_or(total);
        let offset = self.offset.unwrap_or([0, 0, 0]);

        if total.iter().any(|&n| n < 1) {
            return Err(invalid("extent", format!("{total:?} has an axis below one cell")));
        }
        for axis in 0..3 {
            if local[axis] < 1 || offset[axis] < 0 || offset[axis] + local[axis] > total[axis] {
                return Err(invalid(
                    "local",
                    format!("sub-volume at {offset:?} of size {local:?} leaves the grid {total:?}"),
                ));
            }
        }
        if !(dx > 0.0 && dx.is_finite()) {
            return Err(invalid("dx", format!("{dx} is not a positive spacing")));
        }
        if !(iwidth > 0.0 && iwidth.is_finite()) {
            return Err(invalid("iwidth", format!("{iwidth} is not a positive width")));
        }
        if bcells < 1 {
            return Err(invalid("bcells", "at least one halo layer is required"));
        }
        if resolution == Resolution::Dual && iwidth < 2.0 {
            return Err(invalid(
                "iwidth",
                "dual resolution needs an interface of at least two coarse cells",
            ));
        }

        let active = |n: i64| i64::from(n > 1);
        Ok(GridDescriptor {
            nx: local[0],
            ny: local[1],
            nz: local[2],
            total_nx: total[0],
            total_ny: total[1],
            total_nz: total[2],
            offset_x: offset[0],
            offset_y: offset[1],
            offset_z: offset[2],
            dnx: active(total[0]),
            dny: active(total[1]),
            dnz: active(total[2]),
            dx,
            iwidth,
            bcells,
            resolution,
        })
    }
}

/// How the normal of a pair interface is derived from the field gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceNormalModel {
    /// `∇φβ - ∇φα`, normalized.
    #[default]
    AverageGradient,
    /// `φα ∇φβ - φβ ∇φα`, normalized.
    WeightedGradient,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseFieldConfig {
    pub n_phases: usize,
    pub laplacian_stencil: LaplacianStencil,
    pub gradient_stencil: GradientStencil,
    pub normal_model: InterfaceNormalModel,
    /// Phases whose stable fields are merged into a single field.
    pub combine: Vec<bool>,
    pub nucleus_volume_factor: f64,
    pub consider_nucleus_volume: bool,
    /// Cap on the multi-field limiting loop of increment normalization.
    pub max_normalization_iterations: usize,
}

#[derive(Default)]
pub struct PhaseFieldConfigBuilder {
    n_phases: Option<usize>,
    laplacian_stencil: Option<LaplacianStencil>,
    gradient_stencil: Option<GradientStencil>,
    normal_model: Option<InterfaceNormalModel>,
    combine: Vec<usize>,
    nucleus_volume_factor: Option<f64>,
    consider_nucleus_volume: Option<bool>,
    max_normalization_iterations: Option<usize>,
}

impl PhaseFieldConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_phases(mut self, n: usize) -> Self {
        self.n_phases = Some(n);
        self
    }
    pub fn laplacian_stencil(mut self, stencil: LaplacianStencil) -> Self {
        self.laplacian_stencil = Some(stencil);
        self
    }
    pub fn gradient_stencil(mut self, stencil: GradientStencil) -> Self {
        self.gradient_stencil = Some(stencil);
        self
    }
    pub fn normal_model(mut self, model: InterfaceNormalModel) -> Self {
        self.normal_model = Some(model);
        self
    }
    pub fn combine(mut self, phase: usize) -> Self {
        self.combine.push(phase);
        self
    }
    pub fn nucleus_volume_factor(mut self, factor: f64) -> Self {
        self.nucleus_volume_factor = Some(factor);
        self
    }
    pub fn consider_nucleus_volume(mut self, consider: bool) -> Self {
        self.consider_nucleus_volume = Some(consider);
        self
    }
    pub fn max_normalization_iterations(mut self, iterations: usize) -> Self {
        self.max_normalization_iterations = Some(iterations);
        self
    }

    pub fn build(self) -> Result<PhaseFieldConfig, ConfigError> {
        let n_phases = self
            .n_phases
            .ok_or(ConfigError::MissingParameter("n_phases"))?;
        if n_phases == 0 {
            return Err(invalid("n_phases", "at least one phase is required"));
        }

        let mut combine = vec![false; n_phases];
        for phase in self.combine {
            *combine.get_mut(phase).ok_or_else(|| {
                invalid("combine", format!("phase {phase} is out of range"))
            })? = true;
        }

        let nucleus_volume_factor = self.nucleus_volume_factor.unwrap_or(1.0);
        if !(nucleus_volume_factor > 0.0) {
            return Err(invalid(
                "nucleus_volume_factor",
                format!("{nucleus_volume_factor} is not positive"),
            ));
        }
        let max_normalization_iterations = self.max_normalization_iterations.unwrap_or(24);
        if max_normalization_iterations == 0 {
            return Err(invalid(
                "max_normalization_iterations",
                "at least one limiting pass is required",
            ));
        }

        Ok(PhaseFieldConfig {
            n_phases,
            laplacian_stencil: self.laplacian_stencil.unwrap_or_default(),
            gradient_stencil: self.gradient_stencil.unwrap_or_default(),
            normal_model: self.normal_model.unwrap_or_default(),
            combine,
            nucleus_volume_factor,
            consider_nucleus_volume: self.consider_nucleus_volume.unwrap_or(true),
            max_normalization_iterations,
        })
    }
}

/// Weighting of neighbour samples during driving-force averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeightsMode {
    /// Linear decay with distance.
    Range,
    /// Product of the two field values.
    #[default]
    PhaseFields,
    /// Every contributing neighbour counts once.
    Counter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrivingForceConfig {
    pub averaging: bool,
    pub limiting: bool,
    pub unifying: bool,
    pub weights_mode: WeightsMode,
    /// Averaging radius in cells of the level the forces live on.
    pub range: i64,
    pub phi_threshold: f64,
    /// Allowed driving force per phase pair as a fraction of the maximum
    /// interface energy.
    pub limits: DMatrix<f64>,
}

#[derive(Default)]
pub struct DrivingForceConfigBuilder {
    averaging: Option<bool>,
    limiting: Option<bool>,
    unifying: Option<bool>,
    weights_mode: Option<WeightsMode>,
    range: Option<i64>,
    phi_threshold: Option<f64>,
    default_limit: Option<f64>,
    limits: Vec<(usize, usize, f64)>,
}

impl DrivingForceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn averaging(mut self, on: bool) -> Self {
        self.averaging = Some(on);
        self
    }
    pub fn limiting(mut self, on: bool) -> Self {
        self.limiting = Some(on);
        self
    }
    pub fn unifying(mut self, on: bool) -> Self {
        self.unifying = Some(on);
        self
    }
    pub fn weights_mode(mut self, mode: WeightsMode) -> Self {
        self.weights_mode = Some(mode);
        self
    }
    pub fn range(mut self, cells: i64) -> Self {
        self.range = Some(cells);
        self
    }
    pub fn phi_threshold(mut self, threshold: f64) -> Self {
        self.phi_threshold = Some(threshold);
        self
    }
    pub fn default_limit(mut self, limit: f64) -> Self {
        self.default_limit = Some(limit);
        self
    }
    pub fn limit(mut self, a: usize, b: usize, limit: f64) -> Self {
        self.limits.push((a, b, limit));
        self
    }
    /// Takes the per-pair limits present in a parameter file.
    pub fn pair_parameters(mut self, params: &PairParameters) -> Self {
        for entry in &params.pairs {
            if let Some(limit) = entry.limit {
                self.limits.push((entry.phases[0], entry.phases[1], limit));
            }
        }
        self
    }

    /// Resolves grid-dependent defaults and validates the result.
    pub fn build(
        self,
        grid: &GridDescriptor,
        n_phases: usize,
    ) -> Result<DrivingForceConfig, ConfigError> {
        let dual = grid.resolution == Resolution::Dual;
        let default_range = if dual { grid.iwidth / 2.0 } else { grid.iwidth };
        let range = self.range.unwrap_or(default_range as i64);
        if range < 1 {
            return Err(invalid("range", format!("{range} is below one cell")));
        }

        let default_threshold = match (grid.iwidth < 5.0, dual) {
            (true, false) => grid.iwidth / 15.0,
            (true, true) => grid.iwidth / 30.0,
            (false, false) => 1.0 / 3.0,
            (false, true) => 1.0 / 6.0,
        };
        let phi_threshold = self.phi_threshold.unwrap_or(default_threshold);
        if !(phi_threshold > 0.0 && phi_threshold < 1.0) {
            return Err(invalid(
                "phi_threshold",
                format!("{phi_threshold} is outside (0, 1)"),
            ));
        }

        let mut limits = DMatrix::from_element(n_phases, n_phases, self.default_limit.unwrap_or(0.95));
        for (a, b, limit) in self.limits {
            if a >= n_phases || b >= n_phases {
                return Err(invalid(
                    "limit",
                    format!("phase pair ({a}, {b}) is out of range for {n_phases} phases"),
                ));
            }
            limits[(a, b)] = limit;
            limits[(b, a)] = limit;
        }
        if let Some(bad) = limits.iter().find(|l| !(**l > 0.0)) {
            return Err(invalid(
                "limit",
                format!("{bad} is not a positive driving-force limit"),
            ));
        }

        Ok(DrivingForceConfig {
            averaging: self.averaging.unwrap_or(true),
            limiting: self.limiting.unwrap_or(true),
            unifying: self.unifying.unwrap_or(false),
            weights_mode: self.weights_mode.unwrap_or_default(),
            range,
            phi_threshold,
            limits,
        })
    }
}

#[derive(Default)]
pub struct InterfacePropertiesBuilder {
    default_energy: Option<f64>,
    default_mobility: Option<f64>,
    energies: Vec<(usize, usize, f64)>,
    mobilities: Vec<(usize, usize, f64)>,
    regularization_factor: Option<f64>,
}

impl InterfacePropertiesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_energy(mut self, energy: f64) -> Self {
        self.default_energy = Some(energy);
        self
    }
    pub fn default_mobility(mut self, mobility: f64) -> Self {
        self.default_mobility = Some(mobility);
        self
    }
    pub fn energy(mut self, a: usize, b: usize, energy: f64) -> Self {
        self.energies.push((a, b, energy));
        self
    }
    pub fn mobility(mut self, a: usize, b: usize, mobility: f64) -> Self {
        self.mobilities.push((a, b, mobility));
        self
    }
    pub fn regularization_factor(mut self, factor: f64) -> Self {
        self.regularization_factor = Some(factor);
        self
    }
    pub fn pair_parameters(mut self, params: &PairParameters) -> Self {
        for entry in &params.pairs {
            let [a, b] = entry.phases;
            self.energies.push((a, b, entry.energy));
            self.mobilities.push((a, b, entry.mobility));
        }
        self
    }

    fn matrix(
        name: &'static str,
        default: Option<f64>,
        entries: Vec<(usize, usize, f64)>,
        n_phases: usize,
    ) -> Result<DMatrix<f64>, ConfigError> {
        let mut matrix = DMatrix::from_element(n_phases, n_phases, f64::NAN);
        if let Some(value) = default {
            matrix.fill(value);
        }
        for (a, b, value) in entries {
            if a >= n_phases || b >= n_phases {
                return Err(invalid(
                    name,
                    format!("phase pair ({a}, {b}) is out of range for {n_phases} phases"),
                ));
            }
            matrix[(a, b)] = value;
            matrix[(b, a)] = value;
        }
        if matrix.iter().any(|v| v.is_nan()) {
            return Err(ConfigError::MissingParameter(name));
        }
        if let Some(bad) = matrix.iter().find(|v| **v < 0.0 || !v.is_finite()) {
            return Err(invalid(name, format!("{bad} is not a non-negative value")));
        }
        Ok(matrix)
    }

    pub fn build(
        self,
        grid: &GridDescriptor,
        n_phases: usize,
    ) -> Result<InterfaceProperties, ConfigError> {
        let energy = Self::matrix("energy", self.default_energy, self.energies, n_phases)?;
        let mobility = Self::matrix("mobility", self.default_mobility, self.mobilities, n_phases)?;
        let regularization = self.regularization_factor.unwrap_or(1.0);
        if !(regularization > 0.0) {
            return Err(invalid(
                "regularization_factor",
                format!("{regularization} is not positive"),
            ));
        }
        Ok(InterfaceProperties {
            energy,
            mobility,
            regularization,
            dx: grid.dx,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeStep {
    Fixed(f64),
    /// `min(theoretical_limit · stability limit, numerical_limit / max |dψ/dt|)`,
    /// re-evaluated every step.
    Adaptive {
        theoretical_limit: f64,
        numerical_limit: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitialStructure {
    /// A sphere of `inner_phase` centred in a matrix of `outer_phase`.
    SingleSphere {
        radius: f64,
        inner_phase: usize,
        outer_phase: usize,
    },
    /// Voronoi tessellation of `grains` grains of one phase.
    Voronoi {
        grains: usize,
        phase: usize,
        seed: u64,
    },
    /// A single seed field planted in a matrix.
    PlantedNucleus {
        matrix_phase: usize,
        nucleus_phase: usize,
        position: [i64; 3],
    },
}

impl InitialStructure {
    fn phases(&self) -> Vec<usize> {
        match self {
            Self::SingleSphere {
                inner_phase,
                outer_phase,
                ..
            } => vec![*inner_phase, *outer_phase],
            Self::Voronoi { phase, .. } => vec![*phase],
            Self::PlantedNucleus {
                matrix_phase,
                nucleus_phase,
                ..
            } => vec![*matrix_phase, *nucleus_phase],
        }
    }
}

/// Constant chemical driving force favouring `phases[0]` over `phases[1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExternalForce {
    pub phases: [usize; 2],
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrainGrowthConfig {
    pub grid: GridDescriptor,
    pub boundary: BoundaryConditions,
    pub phase_field: PhaseFieldConfig,
    pub driving_force: DrivingForceConfig,
    pub interface: InterfaceProperties,
    pub initial: InitialStructure,
    pub steps: u64,
    pub time_step: TimeStep,
    pub external_forces: Vec<ExternalForce>,
    pub keep_phase_volume: bool,
    pub checkpoint_interval: Option<u64>,
    pub report_interval: u64,
    pub output_dir: Option<PathBuf>,
    pub restart_step: Option<u64>,
}

#[derive(Default)]
pub struct GrainGrowthConfigBuilder {
    grid: Option<GridDescriptor>,
    boundary: Option<BoundaryConditions>,
    phase_field: Option<PhaseFieldConfig>,
    driving_force: Option<DrivingForceConfig>,
    interface: Option<InterfaceProperties>,
    initial: Option<InitialStructure>,
    steps: Option<u64>,
    time_step: Option<TimeStep>,
    external_forces: Vec<ExternalForce>,
    keep_phase_volume: Option<bool>,
    checkpoint_interval: Option<u64>,
    report_interval: Option<u64>,
    output_dir: Option<PathBuf>,
    restart_step: Option<u64>,
}

impl GrainGrowthConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grid(mut self, grid: GridDescriptor) -> Self {
        self.grid = Some(grid);
        self
    }
    pub fn boundary(mut self, boundary: BoundaryConditions) -> Self {
        self.boundary = Some(boundary);
        self
    }
    pub fn phase_field(mut self, config: PhaseFieldConfig) -> Self {
        self.phase_field = Some(config);
        self
    }
    pub fn driving_force(mut self, config: DrivingForceConfig) -> Self {
        self.driving_force = Some(config);
        self
    }
    pub fn interface(mut self, properties: InterfaceProperties) -> Self {
        self.interface = Some(properties);
        self
    }
    pub fn initial(mut self, initial: InitialStructure) -> Self {
        self.initial = Some(initial);
        self
    }
    pub fn steps(mut self, steps: u64) -> Self {
        self.steps = Some(steps);
        self
    }
    pub fn time_step(mut self, time_step: TimeStep) -> Self {
        self.time_step = Some(time_step);
        self
    }
    pub fn external_force(mut self, force: ExternalForce) -> Self {
        self.external_forces.push(force);
        self
    }
    pub fn keep_phase_volume(mut self, keep: bool) -> Self {
        self.keep_phase_volume = Some(keep);
        self
    }
    pub fn checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = Some(interval);
        self
    }
    pub fn report_interval(mut self, interval: u64) -> Self {
        self.report_interval = Some(interval);
        self
    }
    pub fn output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }
    pub fn restart_step(mut self, step: u64) -> Self {
        self.restart_step = Some(step);
        self
    }

    pub fn build(self) -> Result<GrainGrowthConfig, ConfigError> {
        let grid = self.grid.ok_or(ConfigError::MissingParameter("grid"))?;
        let phase_field = self
            .phase_field
            .ok_or(ConfigError::MissingParameter("phase_field"))?;
        let driving_force = self
            .driving_force
            .ok_or(ConfigError::MissingParameter("driving_force"))?;
        let interface = self
            .interface
            .ok_or(ConfigError::MissingParameter("interface"))?;
        let initial = self.initial.ok_or(ConfigError::MissingParameter("initial"))?;
        let steps = self.steps.ok_or(ConfigError::MissingParameter("steps"))?;
        let time_step = self
            .time_step
            .ok_or(ConfigError::MissingParameter("time_step"))?;

        let n_phases = phase_field.n_phases;
        if interface.n_phases() != n_phases || driving_force.limits.nrows() != n_phases {
            return Err(invalid(
                "interface",
                format!("phase-pair tables must cover exactly {n_phases} phases"),
            ));
        }
        if driving_force.limiting {
            let unbounded = iproduct!(0..n_phases, 0..n_phases)
                .find(|&(a, b)| !(interface.energy[(a, b)] > 0.0));
            if let Some((a, b)) = unbounded {
                return Err(invalid(
                    "energy",
                    format!("phase pair ({a}, {b}) needs a positive energy when limiting is on"),
                ));
            }
        }
        if let Some(phase) = initial.phases().into_iter().find(|&p| p >= n_phases) {
            return Err(invalid("initial", format!("phase {phase} is out of range")));
        }
        match &initial {
            InitialStructure::Voronoi { grains: 0, .. } => {
                return Err(invalid("grains", "at least one grain is required"));
            }
            InitialStructure::SingleSphere { radius, .. } if !(*radius > 0.0) => {
                return Err(invalid("radius", format!("{radius} is not a positive radius")));
            }
            _ => {}
        }
        for force in &self.external_forces {
            if force.phases.iter().any(|&p| p >= n_phases) {
                return Err(invalid(
                    "external_force",
                    format!("phase pair {:?} is out of range", force.phases),
                ));
            }
        }
        match time_step {
            TimeStep::Fixed(dt) if !(dt > 0.0) => {
                return Err(invalid("dt", format!("{dt} is not a positive time step")));
            }
            TimeStep::Adaptive {
                theoretical_limit,
                numerical_limit,
            } if !(theoretical_limit > 0.0 && numerical_limit > 0.0) => {
                return Err(invalid("time_step", "adaptive limits must be positive"));
            }
            _ => {}
        }
        if self.checkpoint_interval == Some(0) || self.report_interval == Some(0) {
            return Err(invalid("interval", "intervals must be at least one step"));
        }
        if self.checkpoint_interval.is_some() && self.output_dir.is_none() {
            return Err(ConfigError::MissingParameter("output_dir"));
        }
        if self.restart_step.is_some() && self.output_dir.is_none() {
            return Err(ConfigError::MissingParameter("output_dir"));
        }

        Ok(GrainGrowthConfig {
            grid,
            boundary: self.boundary.unwrap_or_default(),
            phase_field,
            driving_force,
            interface,
            initial,
            steps,
            time_step,
            external_forces: self.external_forces,
            keep_phase_volume: self.keep_phase_volume.unwrap_or(false),
            checkpoint_interval: self.checkpoint_interval,
            report_interval: self.report_interval.unwrap_or(100),
            output_dir: self.output_dir,
            restart_step: self.restart_step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(iwidth: f64, resolution: Resolution) -> GridDescriptor {
        GridDescriptorBuilder::new()
            .extent([16, 16, 1])
            .dx(1.0)
            .iwidth(iwidth)
            .resolution(resolution)
            .build()
            .unwrap()
    }

    #[test]
    fn grid_builder_requires_extent_spacing_and_width() {
        let result = GridDescriptorBuilder::new().dx(1.0).iwidth(4.0).build();
        assert_eq!(result, Err(ConfigError::MissingParameter("extent")));
        let result = GridDescriptorBuilder::new().extent([4, 4, 1]).iwidth(4.0).build();
        assert_eq!(result, Err(ConfigError::MissingParameter("dx")));
    }

    #[test]
    fn grid_builder_derives_active_axes_from_global_extent() {
        let grid = grid(4.0, Resolution::Single);
        assert_eq!(grid.dn(), [1, 1, 0]);
        assert_eq!(grid.extent(), [16, 16, 1]);
        assert_eq!(grid.bcells, 1);
    }

    #[test]
    fn grid_builder_rejects_non_positive_spacing() {
        let result = GridDescriptorBuilder::new()
            .extent([4, 4, 1])
            .dx(0.0)
            .iwidth(4.0)
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidParameter { name: "dx", .. })));
    }

    #[test]
    fn driving_force_defaults_follow_interface_width() {
        let narrow = DrivingForceConfigBuilder::new()
            .build(&grid(4.0, Resolution::Single), 2)
            .unwrap();
        assert_eq!(narrow.range, 4);
        assert!((narrow.phi_threshold - 4.0 / 15.0).abs() < 1e-12);
        assert!(narrow.averaging && narrow.limiting && !narrow.unifying);
        assert_eq!(narrow.weights_mode, WeightsMode::PhaseFields);
        assert!(narrow.limits.iter().all(|&l| l == 0.95));

        let wide_dual = DrivingForceConfigBuilder::new()
            .build(&grid(6.0, Resolution::Dual), 2)
            .unwrap();
        assert_eq!(wide_dual.range, 3);
        assert!((wide_dual.phi_threshold - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn zero_driving_force_limit_is_rejected() {
        let result = DrivingForceConfigBuilder::new()
            .limit(0, 1, 0.0)
            .build(&grid(4.0, Resolution::Single), 2);
        assert!(matches!(result, Err(ConfigError::InvalidParameter { name: "limit", .. })));
    }

    #[test]
    fn interface_builder_requires_every_pair() {
        let grid = grid(4.0, Resolution::Single);
        let result = InterfacePropertiesBuilder::new()
            .energy(0, 0, 1.0)
            .default_mobility(1.0)
            .build(&grid, 2);
        assert_eq!(result, Err(ConfigError::MissingParameter("energy")));

        let ip = InterfacePropertiesBuilder::new()
            .default_energy(1.0)
            .energy(1, 0, 0.5)
            .default_mobility(2.0)
            .build(&grid, 2)
            .unwrap();
        assert_eq!(ip.energy[(0, 1)], 0.5);
        assert_eq!(ip.energy[(1, 1)], 1.0);
    }

    #[test]
    fn phase_field_builder_fills_defaults() {
        let config = PhaseFieldConfigBuilder::new().n_phases(2).combine(1).build().unwrap();
        assert_eq!(config.combine, vec![false, true]);
        assert_eq!(config.max_normalization_iterations, 24);
        assert_eq!(config.laplacian_stencil, LaplacianStencil::Isotropic);
        assert!(config.consider_nucleus_volume);

        let result = PhaseFieldConfigBuilder::new().n_phases(2).combine(2).build();
        assert!(matches!(result, Err(ConfigError::InvalidParameter { name: "combine", .. })));
    }

    #[test]
    fn grain_growth_builder_checks_phase_counts() {
        let grid = grid(4.0, Resolution::Single);
        let result = GrainGrowthConfigBuilder::new()
            .grid(grid.clone())
            .phase_field(PhaseFieldConfigBuilder::new().n_phases(2).build().unwrap())
            .driving_force(DrivingForceConfigBuilder::new().build(&grid, 2).unwrap())
            .interface(
                InterfacePropertiesBuilder::new()
                    .default_energy(1.0)
                    .default_mobility(1.0)
                    .build(&grid, 3)
                    .unwrap(),
            )
            .initial(InitialStructure::Voronoi {
                grains: 4,
                phase: 0,
                seed: 1,
            })
            .steps(10)
            .time_step(TimeStep::Fixed(0.1))
            .build();
        assert!(matches!(result, Err(ConfigError::InvalidParameter { name: "interface", .. })));
    }

    #[test]
    fn zero_energy_pair_is_rejected_while_limiting() {
        let grid = grid(4.0, Resolution::Single);
        let builder = |limiting: bool| {
            GrainGrowthConfigBuilder::new()
                .grid(grid.clone())
                .phase_field(PhaseFieldConfigBuilder::new().n_phases(2).build().unwrap())
                .driving_force(
                    DrivingForceConfigBuilder::new()
                        .limiting(limiting)
                        .build(&grid, 2)
                        .unwrap(),
                )
                .interface(
                    InterfacePropertiesBuilder::new()
                        .default_energy(1.0)
                        .energy(0, 1, 0.0)
                        .default_mobility(1.0)
                        .build(&grid, 2)
                        .unwrap(),
                )
                .initial(InitialStructure::Voronoi {
                    grains: 4,
                    phase: 0,
                    seed: 1,
                })
                .steps(10)
                .time_step(TimeStep::Fixed(0.1))
                .build()
        };
        assert!(matches!(builder(true), Err(ConfigError::InvalidParameter { name: "energy", .. })));
        assert!(builder(false).is_ok());
    }
}
