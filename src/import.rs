// 📥 CSV Import - bulk station / pump / expected tag setup
//
// One row per expected child tag:
//
//   station,location,pump_number,main_tag,child_tag,child_description
//   North,Route 9,1,MAIN-1,A,front nozzle
//   North,Route 9,1,MAIN-1,B,rear nozzle
//   North,Route 9,2,MAIN-2,,
//
// A pump without child tags gets a single row with an empty child_tag.
// Stations are matched by name and pumps by (station, number), so running
// the same file twice creates nothing the second time. Every creation goes
// through the service and is audited like any other mutation.

use crate::context::SessionContext;
use crate::entities::{ChildTagSpec, NewPump, NewStation};
use crate::error::{Error, Result};
use crate::service::Service;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImportRow {
    pub station: String,
    pub location: String,
    pub pump_number: i64,
    pub main_tag: String,
    #[serde(default)]
    pub child_tag: String,
    #[serde(default)]
    pub child_description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub stations_created: usize,
    pub pumps_created: usize,
    /// Pumps already present, left untouched
    pub pumps_skipped: usize,
}

/// Parse rows from any CSV source with a header line
pub fn load_rows<R: Read>(reader: R) -> Result<Vec<ImportRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: ImportRow = result?;
        rows.push(row);
    }
    Ok(rows)
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<ImportRow>> {
    let file = std::fs::File::open(csv_path)?;
    load_rows(file)
}

/// A pump assembled from its rows
struct PumpPlan {
    location: String,
    main_tag: String,
    child_tags: Vec<ChildTagSpec>,
}

fn plan(rows: &[ImportRow]) -> Result<BTreeMap<(String, i64), PumpPlan>> {
    let mut pumps: BTreeMap<(String, i64), PumpPlan> = BTreeMap::new();

    for (index, row) in rows.iter().enumerate() {
        let key = (row.station.clone(), row.pump_number);
        let entry = pumps.entry(key).or_insert_with(|| PumpPlan {
            location: row.location.clone(),
            main_tag: row.main_tag.clone(),
            child_tags: Vec::new(),
        });

        if entry.main_tag != row.main_tag {
            return Err(Error::Validation(format!(
                "row {}: pump {} at '{}' is listed with main tags '{}' and '{}'",
                index + 1,
                row.pump_number,
                row.station,
                entry.main_tag,
                row.main_tag
            )));
        }

        if !row.child_tag.is_empty() {
            entry.child_tags.push(ChildTagSpec {
                tag_id: row.child_tag.clone(),
                description: row.child_description.clone(),
            });
        }
    }

    Ok(pumps)
}

/// Create whatever the rows describe that does not exist yet
pub fn import(service: &Service, ctx: &SessionContext, rows: &[ImportRow]) -> Result<ImportSummary> {
    let pumps = plan(rows)?;
    let mut summary = ImportSummary::default();

    for ((station_name, pump_number), pump) in pumps {
        let station = match service.find_station_by_name(&station_name)? {
            Some(station) => station,
            None => {
                summary.stations_created += 1;
                service.create_station(
                    ctx,
                    &NewStation {
                        name: station_name.clone(),
                        location: pump.location.clone(),
                    },
                )?
            }
        };

        if service.find_pump_by_number(station.id, pump_number)?.is_some() {
            debug!(station = %station_name, pump_number, "pump already present, skipping");
            summary.pumps_skipped += 1;
            continue;
        }

        service.create_pump(
            ctx,
            station.id,
            &NewPump {
                pump_number,
                main_rfid_tag: pump.main_tag,
                expected_child_tags: pump.child_tags,
            },
        )?;
        summary.pumps_created += 1;
    }

    info!(
        stations_created = summary.stations_created,
        pumps_created = summary.pumps_created,
        pumps_skipped = summary.pumps_skipped,
        "import finished"
    );
    Ok(summary)
}
