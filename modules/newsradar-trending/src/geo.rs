//! Geo-Bucketer: point → geohash cell, and the set of cells covering a query disc.

use std::collections::BTreeSet;
use std::f64::consts::PI;

use geohash::Coord;

use newsradar_common::{validate_coordinates, CellId, TrendingError, TrendingSettings, EARTH_RADIUS_KM};

/// Kilometers per degree along a meridian.
const KM_PER_DEG_LAT: f64 = EARTH_RADIUS_KM * PI / 180.0;

/// Upper bound on the number of cells in one covering set. A disc that needs
/// more (large radius close to a pole) is rejected instead of partially covered.
pub const MAX_COVERING_CELLS: usize = 50_000;

#[derive(Debug, Clone)]
pub struct GeoBucketer {
    precision: usize,
    max_radius_km: f64,
}

impl GeoBucketer {
    pub fn new(precision: usize, max_radius_km: f64) -> Self {
        Self {
            precision,
            max_radius_km,
        }
    }

    pub fn from_settings(settings: &TrendingSettings) -> Self {
        Self::new(settings.cell_precision, settings.max_radius_km)
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    pub fn max_radius_km(&self) -> f64 {
        self.max_radius_km
    }

    /// Geohash cell of a point at the configured precision.
    pub fn cell_of(&self, lat: f64, lon: f64) -> Result<CellId, TrendingError> {
        validate_coordinates(lat, lon)?;
        geohash::encode(Coord { x: lon, y: lat }, self.precision)
            .map(CellId::new)
            .map_err(|e| TrendingError::Validation(format!("cannot encode ({lat}, {lon}): {e}")))
    }

    /// Cells whose union contains every point within `radius_km` of (lat, lon).
    ///
    /// The query cell and its 8 neighbors are always included. Rings are then
    /// added until the nearest outer edge of the included block is at least
    /// `radius_km` away from the query point. Cells narrow towards the poles, so
    /// the block grows in rows and in columns independently: rows stop once the
    /// north and south edges are clear, columns once the east and west edges are.
    pub fn covering_cells(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> Result<BTreeSet<CellId>, TrendingError> {
        validate_coordinates(lat, lon)?;
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(TrendingError::Validation(format!(
                "radius {radius_km} must be a non-negative number of kilometers"
            )));
        }
        if radius_km > self.max_radius_km {
            return Err(TrendingError::Validation(format!(
                "radius {radius_km} km exceeds the maximum of {} km",
                self.max_radius_km
            )));
        }

        let home = self.cell_of(lat, lon)?;
        let bbox = geohash::decode_bbox(home.as_str())
            .map_err(|e| TrendingError::Validation(format!("cannot decode cell {home}: {e}")))?;
        let block = Block {
            min: bbox.min(),
            max: bbox.max(),
        };

        let mut rows = 1;
        while block.row_clearance_km(lat, rows) < radius_km {
            rows += 1;
        }
        let mut cols = 1;
        while !block.spans_all_longitudes(cols) && block.col_clearance_km(lat, lon, cols) < radius_km {
            cols += 1;
        }

        let fan_out = block.cell_count(rows, cols);
        if fan_out > MAX_COVERING_CELLS {
            return Err(TrendingError::Validation(format!(
                "radius {radius_km} km at ({lat}, {lon}) needs {fan_out} cells, more than the limit of {MAX_COVERING_CELLS}"
            )));
        }

        let mut cells = BTreeSet::new();
        cells.insert(home);
        self.add_block(&mut cells, &block, rows, cols)?;
        tracing::debug!(lat, lon, radius_km, rows, cols, cells = cells.len(), "Covering cells computed");
        Ok(cells)
    }

    /// Add every cell within `rows` rows and `cols` columns of the home cell.
    fn add_block(
        &self,
        cells: &mut BTreeSet<CellId>,
        block: &Block,
        rows: usize,
        cols: usize,
    ) -> Result<(), TrendingError> {
        let (rows, cols) = (rows as i64, cols as i64);
        let (w, h) = (block.width(), block.height());
        let (cx, cy) = block.center();

        for dj in -rows..=rows {
            let y = cy + dj as f64 * h;
            if y.abs() >= 90.0 {
                continue;
            }
            for di in -cols..=cols {
                let x = wrap_lon(cx + di as f64 * w);
                let hash = geohash::encode(Coord { x, y }, self.precision)
                    .map_err(|e| TrendingError::Validation(format!("cannot encode ring cell: {e}")))?;
                cells.insert(CellId::new(hash));
            }
        }
        Ok(())
    }
}

/// Bounding box of the home cell, in degrees.
struct Block {
    min: Coord<f64>,
    max: Coord<f64>,
}

impl Block {
    fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    fn center(&self) -> (f64, f64) {
        ((self.min.x + self.max.x) / 2.0, (self.min.y + self.max.y) / 2.0)
    }

    /// Distance from the query latitude to the nearer of the north and south
    /// edges after `rows` rows. An edge at or past a pole is never reached.
    fn row_clearance_km(&self, lat: f64, rows: usize) -> f64 {
        let k = rows as f64;
        let north = self.max.y + k * self.height();
        let south = self.min.y - k * self.height();
        let north_km = if north >= 90.0 {
            f64::INFINITY
        } else {
            (north - lat) * KM_PER_DEG_LAT
        };
        let south_km = if south <= -90.0 {
            f64::INFINITY
        } else {
            (lat - south) * KM_PER_DEG_LAT
        };
        north_km.min(south_km)
    }

    fn spans_all_longitudes(&self, cols: usize) -> bool {
        (2.0 * cols as f64 + 1.0) * self.width() >= 360.0
    }

    /// Great-circle distance from the query point to the nearer of the east and
    /// west edges after `cols` columns.
    fn col_clearance_km(&self, lat: f64, lon: f64, cols: usize) -> f64 {
        if self.spans_all_longitudes(cols) {
            return f64::INFINITY;
        }
        let k = cols as f64;
        let east = self.max.x + k * self.width() - lon;
        let west = lon - (self.min.x - k * self.width());
        meridian_distance_km(lat, east.min(west))
    }

    /// Distinct cells in the block, counting only rows short of the poles and
    /// at most one full turn of columns.
    fn cell_count(&self, rows: usize, cols: usize) -> usize {
        let (_, cy) = self.center();
        let rows = rows as i64;
        let live_rows = (-rows..=rows)
            .filter(|dj| (cy + *dj as f64 * self.height()).abs() < 90.0)
            .count();
        let full_turn = (360.0 / self.width()).round() as usize;
        live_rows * (2 * cols + 1).min(full_turn)
    }
}

/// Shortest distance from a point at `lat` to the meridian `dlon` degrees away.
fn meridian_distance_km(lat: f64, dlon: f64) -> f64 {
    let dlon = dlon.clamp(0.0, 90.0).to_radians();
    let s = (lat.to_radians().cos() * dlon.sin()).clamp(-1.0, 1.0);
    EARTH_RADIUS_KM * s.asin()
}

fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}
