use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StopID(String);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stop {
    pub stop_id: StopID,
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub lon: f64,
    pub lat: f64,
}

pub fn load<R: std::io::Read>(reader: R) -> Result<BTreeMap<StopID, Stop>> {
    let mut stops = BTreeMap::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: Record = rec?;
        if stops.contains_key(&rec.stop_id) {
            bail!("Duplicate {:?}", rec.stop_id);
        }
        stops.insert(
            rec.stop_id.clone(),
            Stop {
                stop_id: rec.stop_id,
                code: rec.stop_code,
                name: rec.stop_name,
                description: rec.stop_desc,
                lon: rec.stop_lon,
                lat: rec.stop_lat,
            },
        );
    }
    Ok(stops)
}

#[derive(Deserialize)]
struct Record {
    stop_id: StopID,
    stop_code: Option<String>,
    stop_name: Option<String>,
    stop_desc: Option<String>,
    stop_lon: f64,
    stop_lat: f64,
    // TODO Assuming location_type = 0 or empty
}
