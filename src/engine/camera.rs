//! Camera choreography: phase → desired camera pose.
//!
//! The choreographer only publishes a desired pose. An external camera
//! system eases toward the latest target on its own schedule.

use serde::Serialize;
use tracing::{debug, warn};

use crate::layout::{Layout, Vec3};

use super::phase::{phase_targets, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraPose {
    pub center: Vec3,
    pub angle: Vec3,
}

/// Latest desired pose, with a revision counter the interpolator can watch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CameraTarget {
    desired: Option<CameraPose>,
    revision: u64,
}

impl CameraTarget {
    pub fn desired(&self) -> Option<CameraPose> {
        self.desired
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set(&mut self, pose: CameraPose) {
        self.desired = Some(pose);
        self.revision += 1;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CameraChoreographer;

impl CameraChoreographer {
    pub fn new() -> Self {
        Self
    }

    /// Publish the pose for `phase`. Returns the pose written, or `None` when
    /// the phase presents nothing or its block is missing from the layout.
    pub fn move_to(&self, phase: Phase, layout: &Layout, camera: &mut CameraTarget) -> Option<CameraPose> {
        let targets = phase_targets(phase)?;
        let Some(block) = layout.block(targets.focus) else {
            warn!(%phase, focus = ?targets.focus, "Camera focus block missing from layout");
            return None;
        };
        let pose = CameraPose {
            center: block.center(),
            angle: targets.angle,
        };
        camera.set(pose);
        debug!(%phase, revision = camera.revision(), "Camera target updated");
        Some(pose)
    }
}
