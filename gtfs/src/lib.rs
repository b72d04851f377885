#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

mod calendar;
mod routes;
mod shapes;
mod stop_times;
mod stops;
mod trips;

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use zip::ZipArchive;

pub use calendar::{Calendar, DaysOfWeek, Service, ServiceID};
pub use routes::{Route, RouteID, RouteType};
pub use shapes::{ShapeID, ShapePt};
pub use stop_times::{
    time_to_seconds, ColumnSchema, ScheduleTable, StopTimeRow, TripByteRange, TripIndex,
};
pub use stops::{Stop, StopID};
pub use trips::{Trip, TripID};

/// Everything parsed eagerly from an archive. Stop-visit rows aren't here;
/// they stay as raw bytes in a ScheduleTable until somebody asks for
/// specific trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GTFS {
    pub stops: BTreeMap<StopID, Stop>,
    pub routes: BTreeMap<RouteID, Route>,
    pub trips: BTreeMap<TripID, Trip>,
    pub shapes: BTreeMap<ShapeID, Vec<ShapePt>>,
    /// Cumulative length of each shape in meters
    pub shape_distances: BTreeMap<ShapeID, f64>,
    pub calendar: Calendar,
}

impl GTFS {
    /// `on_table_loaded` is called with the entry name after each table
    /// finishes parsing.
    pub fn load_from_zip<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        mut on_table_loaded: impl FnMut(&str),
    ) -> Result<(Self, ScheduleTable)> {
        let mut gtfs = Self::empty();

        info!("Parsing stops.txt");
        gtfs.stops = stops::load(get_zip_file(archive, "stops.txt")?)?;
        on_table_loaded("stops.txt");

        info!("Parsing routes.txt");
        gtfs.routes = routes::load(get_zip_file(archive, "routes.txt")?)?;
        on_table_loaded("routes.txt");

        info!("Parsing trips.txt");
        gtfs.trips = trips::load(get_zip_file(archive, "trips.txt")?)?;
        on_table_loaded("trips.txt");

        if let Ok(file) = get_zip_file(archive, "shapes.txt") {
            info!("Parsing shapes.txt");
            gtfs.shapes = shapes::load(file)?;
            gtfs.shape_distances = shapes::measure(&gtfs.shapes);
            on_table_loaded("shapes.txt");
        }

        if let Ok(file) = get_zip_file(archive, "calendar.txt") {
            info!("Parsing calendar.txt");
            gtfs.calendar = calendar::load(file)?;
            on_table_loaded("calendar.txt");
        }
        if let Ok(file) = get_zip_file(archive, "calendar_dates.txt") {
            calendar::load_exceptions(&mut gtfs.calendar, file)?;
            on_table_loaded("calendar_dates.txt");
        }

        // stop_times.txt is by far the largest table. Keep the raw bytes and
        // let ScheduleTable index them lazily on the first query.
        let mut bytes = Vec::new();
        get_zip_file(archive, "stop_times.txt")?.read_to_end(&mut bytes)?;

        Ok((gtfs, ScheduleTable::new(bytes)))
    }

    pub fn load_from_bytes(
        raw: &[u8],
        on_table_loaded: impl FnMut(&str),
    ) -> Result<(Self, ScheduleTable)> {
        let mut archive = ZipArchive::new(Cursor::new(raw))?;
        Self::load_from_zip(&mut archive, on_table_loaded)
    }

    pub fn empty() -> Self {
        Self {
            stops: BTreeMap::new(),
            routes: BTreeMap::new(),
            trips: BTreeMap::new(),
            shapes: BTreeMap::new(),
            shape_distances: BTreeMap::new(),
            calendar: Calendar {
                services: BTreeMap::new(),
            },
        }
    }
}

/// Uncompressed size of every archive entry. Callers use this to weight a
/// progress bar before any parsing starts.
pub fn file_sizes(raw: &[u8]) -> Result<BTreeMap<String, u64>> {
    let mut archive = ZipArchive::new(Cursor::new(raw))?;
    let mut sizes = BTreeMap::new();
    for idx in 0..archive.len() {
        let file = archive.by_index(idx)?;
        sizes.insert(file.name().to_string(), file.size());
    }
    Ok(sizes)
}

// Adds the path in the error message
pub fn get_zip_file<'a, R: Read + Seek>(
    archive: &'a mut ZipArchive<R>,
    path: &str,
) -> Result<zip::read::ZipFile<'a>> {
    archive
        .by_name(path)
        .map_err(|err| anyhow!("{path}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in files {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn load_small_archive() {
        let raw = archive(&[
            (
                "stops.txt",
                "stop_id,stop_name,stop_lat,stop_lon\nS1,First Ave,47.5,-122.3\nS2,Second Ave,47.6,-122.3\n",
            ),
            (
                "routes.txt",
                "route_id,route_type,route_short_name\nR1,3,10\n",
            ),
            (
                "trips.txt",
                "trip_id,route_id,service_id\nA,R1,WEEK\nB,R1,WEEK\n",
            ),
            (
                "shapes.txt",
                "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\nSH,47.5,-122.3,1\nSH,47.6,-122.3,2\n",
            ),
            (
                "calendar.txt",
                "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\nWEEK,1,1,1,1,1,0,0,20240101,20241231\n",
            ),
            (
                "stop_times.txt",
                "trip_id,stop_id,stop_sequence,arrival_time,departure_time\nA,S1,1,08:00:00,08:00:30\nA,S2,2,08:10:00,08:10:30\n",
            ),
        ]);

        let mut loaded = Vec::new();
        let (gtfs, schedule) = GTFS::load_from_bytes(&raw, |file| {
            loaded.push(file.to_string());
        })
        .unwrap();
        assert_eq!(gtfs.stops.len(), 2);
        assert_eq!(gtfs.routes.len(), 1);
        assert_eq!(gtfs.trips.len(), 2);
        assert_eq!(gtfs.shapes.len(), 1);
        assert!(*gtfs.shape_distances.values().next().unwrap() > 0.0);
        assert_eq!(gtfs.calendar.services.len(), 1);
        assert_eq!(
            loaded,
            vec![
                "stops.txt",
                "routes.txt",
                "trips.txt",
                "shapes.txt",
                "calendar.txt"
            ]
        );
        assert!(!schedule.is_empty());

        let sizes = file_sizes(&raw).unwrap();
        assert_eq!(sizes.len(), 6);
        assert!(sizes["stop_times.txt"] > 0);
    }

    #[test]
    fn missing_required_table() {
        let raw = archive(&[("stops.txt", "stop_id,stop_lat,stop_lon\nS1,47.5,-122.3\n")]);
        let err = GTFS::load_from_bytes(&raw, |_| {}).unwrap_err();
        assert!(err.to_string().contains("routes.txt"));
    }
}
