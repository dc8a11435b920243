/*
    Quakeloc, robust seismic event relocation
    Copyright (C) 2026 Quakeloc Developers

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

/// WGS-84 `(1 - f)^2`, the flattening factor relating geographic and
/// geocentric latitudes. Matches the constant baked into the travel-time
/// tables.
pub const GEOCENTRIC_FLATTENING: f64 = 0.993_305_620_009_859;

/// Sine and cosine of a point's geocentric colatitude and longitude,
/// precomputed once so the spherical trigonometry below stays cheap.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SphericalTrig {
    pub sin_colat: f64,
    pub cos_colat: f64,
    pub sin_lon: f64,
    pub cos_lon: f64,
}

impl SphericalTrig {
    /// Builds the trig cache from a geocentric colatitude and a longitude,
    /// both in degrees.
    pub fn new(colat_deg: f64, lon_deg: f64) -> Self {
        let colat = colat_deg.to_radians();
        let lon = lon_deg.to_radians();
        Self {
            sin_colat: colat.sin(),
            cos_colat: colat.cos(),
            sin_lon: lon.sin(),
            cos_lon: lon.cos(),
        }
    }
}

/// Converts a geographic latitude in degrees to a geocentric colatitude in
/// degrees.
pub fn geocentric_colatitude_deg(lat_deg: f64) -> f64 {
    90.0 - (GEOCENTRIC_FLATTENING * lat_deg.to_radians().tan())
        .atan()
        .to_degrees()
}

/// Converts a geocentric colatitude in degrees back to a geographic latitude
/// in degrees. Inverse of [`geocentric_colatitude_deg`].
pub fn geographic_latitude_deg(colat_deg: f64) -> f64 {
    ((90.0 - colat_deg).to_radians().tan() / GEOCENTRIC_FLATTENING)
        .atan()
        .to_degrees()
}

/// Great-circle distance and azimuth from a source to a receiver, both given
/// by their precomputed geocentric trig. The azimuth is measured clockwise
/// from geographic north, in degrees in `[0, 360)`. A degenerate, co-located
/// pair returns `(0, 0)`.
pub fn delta_azimuth(source: &SphericalTrig, receiver: &SphericalTrig) -> (f64, f64) {
    // cos and sin of the longitude difference via the cached trig.
    let cos_dlon = receiver.cos_lon * source.cos_lon + receiver.sin_lon * source.sin_lon;
    let sin_dlon = receiver.sin_lon * source.cos_lon - receiver.cos_lon * source.sin_lon;

    let cos_delta = source.cos_colat * receiver.cos_colat
        + source.sin_colat * receiver.sin_colat * cos_dlon;
    let sin_az = receiver.sin_colat * sin_dlon;
    let cos_az =
        source.sin_colat * receiver.cos_colat - source.cos_colat * receiver.sin_colat * cos_dlon;

    if sin_az.abs() < 1e-13 && cos_az.abs() < 1e-13 {
        // Co-located (or antipodal on the pole axis): the azimuth is undefined.
        return (0.0, 0.0);
    }

    let delta_deg = cos_delta.clamp(-1.0, 1.0).acos().to_degrees();
    let mut az_deg = sin_az.atan2(cos_az).to_degrees();
    if az_deg < 0.0 {
        az_deg += 360.0;
    }
    (delta_deg, az_deg)
}

/// Index of the 1x1 degree Marsden square holding `(lat, lon)` in the
/// zone-keys array: colatitude advances along the outer dimension and
/// east longitude along the inner one.
pub fn marsden_index(lat_deg: f64, lon_deg: f64) -> usize {
    let colat = (90.0 - lat_deg).clamp(0.0, 180.0);
    let colat_idx = (colat.floor() as usize).min(179);
    let mut lon = lon_deg % 360.0;
    if lon < 0.0 {
        lon += 360.0;
    }
    let lon_idx = (lon.floor() as usize).min(359);
    colat_idx * 360 + lon_idx
}
