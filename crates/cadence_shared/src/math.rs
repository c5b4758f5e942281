//! Orientation math.

/// Client orientation in degrees.
///
/// Yaw is kept in `[-180, 180)`, pitch in `[-90, 90]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rotation {
    /// Horizontal angle.
    pub yaw: f32,
    /// Vertical angle, positive looks down.
    pub pitch: f32,
}

impl Rotation {
    /// Creates a normalised rotation.
    #[must_use]
    pub fn new(yaw: f32, pitch: f32) -> Self {
        Self {
            yaw: wrap_degrees(yaw),
            pitch: pitch.clamp(-90.0, 90.0),
        }
    }

    /// Rotation that looks from `eye` towards `target`.
    #[must_use]
    pub fn looking_at(eye: [f32; 3], target: [f32; 3]) -> Self {
        let dx = target[0] - eye[0];
        let dy = target[1] - eye[1];
        let dz = target[2] - eye[2];
        let horizontal = (dx * dx + dz * dz).sqrt();

        let yaw = dz.atan2(dx).to_degrees() - 90.0;
        let pitch = -dy.atan2(horizontal).to_degrees();
        Self::new(yaw, pitch)
    }

    /// Largest per-axis angular distance to `other`, in degrees.
    #[must_use]
    pub fn angle_to(&self, other: &Self) -> f32 {
        let yaw = wrap_degrees(other.yaw - self.yaw).abs();
        let pitch = (other.pitch - self.pitch).abs();
        yaw.max(pitch)
    }
}

/// Wraps an angle into `[-180, 180)`.
#[must_use]
pub fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}
