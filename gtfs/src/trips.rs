use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{RouteID, ServiceID, ShapeID};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TripID(String);

impl TripID {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Trip metadata only. The stop visits for a trip live in the schedule
/// table and are only decoded on request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trip {
    pub trip_id: TripID,
    pub route_id: RouteID,
    pub service_id: ServiceID,
    pub shape_id: Option<ShapeID>,
    pub block_id: Option<String>,
    pub headsign: Option<String>,
    /// true is 0 in GTFS, false is 1. Inbound/outbound are arbitrary.
    pub outbound_direction: bool,
}

pub fn load<R: std::io::Read>(reader: R) -> Result<BTreeMap<TripID, Trip>> {
    let mut trips = BTreeMap::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: Record = rec?;
        if trips.contains_key(&rec.trip_id) {
            bail!("Duplicate {:?}", rec.trip_id);
        }
        trips.insert(
            rec.trip_id.clone(),
            Trip {
                trip_id: rec.trip_id,
                route_id: rec.route_id,
                service_id: rec.service_id,
                shape_id: rec.shape_id,
                block_id: rec.block_id,
                headsign: rec.trip_headsign,
                outbound_direction: match rec.direction_id {
                    Some(0) => true,
                    Some(1) => false,
                    // Only used for grouping, so a missing direction is fine
                    None => true,
                    x => bail!("Unknown direction_id {:?}", x),
                },
            },
        );
    }
    Ok(trips)
}

#[derive(Deserialize)]
struct Record {
    trip_id: TripID,
    route_id: RouteID,
    service_id: ServiceID,
    shape_id: Option<ShapeID>,
    block_id: Option<String>,
    trip_headsign: Option<String>,
    direction_id: Option<usize>,
}
