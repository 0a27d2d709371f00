use bevy_math::Vec3;
use rayon::prelude::*;

use crate::rotation::{wrap_positive, yaw_matrix};

/// One integrated root sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootState {
    /// Absolute heading in `[0, 2pi)`.
    pub heading: f32,
    pub position: Vec3,
}

/// Accumulates heading-relative root motion into an absolute path. The
/// heading starts at 0 and the position at the origin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrajectoryIntegrator {
    heading: f32,
    position: Vec3,
    frame: usize,
}

impl TrajectoryIntegrator {
    pub fn new() -> Self {
        TrajectoryIntegrator::default()
    }

    pub fn state(&self) -> RootState {
        RootState {
            heading: self.heading,
            position: self.position,
        }
    }

    /// Advances by one frame. The velocity is expressed in the frame's
    /// heading and is rotated by the heading after `heading_delta` has been
    /// applied. The first frame only records the start state.
    pub fn step(&mut self, velocity: Vec3, heading_delta: f32) -> RootState {
        if self.frame > 0 {
            self.heading = wrap_positive(self.heading + heading_delta);
            self.position += yaw_matrix(self.heading) * velocity;
        }
        self.frame += 1;
        self.state()
    }

    pub fn integrate(velocities: &[Vec3], heading_deltas: &[f32]) -> Vec<RootState> {
        let mut integrator = TrajectoryIntegrator::new();
        velocities
            .iter()
            .zip(heading_deltas)
            .map(|(v, d)| integrator.step(*v, *d))
            .collect()
    }

    /// Integrates independent clips in parallel.
    pub fn integrate_clips(clips: &[(Vec<Vec3>, Vec<f32>)]) -> Vec<Vec<RootState>> {
        clips
            .par_iter()
            .map(|(velocities, deltas)| TrajectoryIntegrator::integrate(velocities, deltas))
            .collect()
    }
}
