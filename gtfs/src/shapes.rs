use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShapeID(String);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShapePt {
    pub lon: f64,
    pub lat: f64,
    pub sequence: usize,
    pub dist_traveled: Option<f64>,
}

pub fn load<R: std::io::Read>(reader: R) -> Result<BTreeMap<ShapeID, Vec<ShapePt>>> {
    let mut pts_per_shape: BTreeMap<ShapeID, Vec<ShapePt>> = BTreeMap::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: Record = rec?;
        pts_per_shape
            .entry(rec.shape_id)
            .or_insert_with(Vec::new)
            .push(ShapePt {
                lon: rec.shape_pt_lon,
                lat: rec.shape_pt_lat,
                sequence: rec.shape_pt_sequence,
                dist_traveled: rec.shape_dist_traveled,
            });
    }

    // Sort by shape_pt_sequence, in case the file isn't in order
    for pts in pts_per_shape.values_mut() {
        pts.sort_by_key(|pt| pt.sequence);
    }
    Ok(pts_per_shape)
}

/// Cumulative great-circle length of each shape, in meters.
pub fn measure(shapes: &BTreeMap<ShapeID, Vec<ShapePt>>) -> BTreeMap<ShapeID, f64> {
    let mut distances = BTreeMap::new();
    for (id, pts) in shapes {
        let mut total = 0.0;
        for pair in pts.windows(2) {
            total += haversine(&pair[0], &pair[1]);
        }
        distances.insert(id.clone(), total);
    }
    distances
}

fn haversine(a: &ShapePt, b: &ShapePt) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let x = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * x.sqrt().atan2((1.0 - x).sqrt())
}

#[derive(Deserialize)]
struct Record {
    shape_id: ShapeID,
    shape_pt_lat: f64,
    shape_pt_lon: f64,
    shape_pt_sequence: usize,
    shape_dist_traveled: Option<f64>,
}
