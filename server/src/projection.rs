//! Inverse map projection from normalized click position to coordinates.

use shared::Coordinates;

/// Converts a click on the client's map into a point on the globe.
///
/// `x` runs west to east and `y` north to south, both normalized to `[0, 1]`.
pub trait MapProjection: Send {
    fn unproject(&self, x: f64, y: f64) -> Option<Coordinates>;
}

/// Plate carrée: longitude and latitude scale linearly with x and y.
#[derive(Debug, Clone, Copy, Default)]
pub struct Equirectangular;

impl MapProjection for Equirectangular {
    fn unproject(&self, x: f64, y: f64) -> Option<Coordinates> {
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
            return None;
        }
        Some(Coordinates::new(90.0 - y * 180.0, x * 360.0 - 180.0))
    }
}
