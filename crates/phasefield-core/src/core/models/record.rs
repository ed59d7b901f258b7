use super::ids::RawFieldId;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Lifecycle stage of a field. Advances `Seed -> Nucleus -> Stable` and never
/// moves back while the field exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GrainStage {
    /// Freshly planted, may still carry a zero value.
    Seed,
    /// Growing but below its reference volume.
    Nucleus,
    #[default]
    Stable,
}

/// Per-field metadata owned by the [`FieldRegistry`](super::registry::FieldRegistry).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRecord {
    pub phase: usize,
    pub stage: GrainStage,
    pub variant: usize,
    /// Provenance only; may dangle once the parent vanishes.
    pub parent: Option<RawFieldId>,
    pub orientation: UnitQuaternion<f64>,
    /// Global coordinate the field was planted at.
    pub rcm: Vector3<f64>,
    pub volume: f64,
    pub max_volume: f64,
    pub ref_volume: f64,
    pub volume_ratio: f64,
    pub exists: bool,
    pub growth_constraint_violated: bool,
}

impl FieldRecord {
    pub fn new(phase: usize) -> Self {
        Self {
            phase,
            stage: GrainStage::Stable,
            variant: 0,
            parent: None,
            orientation: UnitQuaternion::identity(),
            rcm: Vector3::zeros(),
            volume: 0.0,
            max_volume: 0.0,
            ref_volume: 0.0,
            volume_ratio: 1.0,
            exists: false,
            growth_constraint_violated: false,
        }
    }

    pub fn is_seed(&self) -> bool {
        self.stage == GrainStage::Seed
    }

    pub fn is_stable(&self) -> bool {
        self.stage == GrainStage::Stable
    }
}
