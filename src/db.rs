use crate::types::{Repair, Visit};
use failure::Error;
use log::{info, warn};
use rusqlite::{params, Connection, Result, Transaction};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS visit (
        id INTEGER PRIMARY KEY,
        plate TEXT NOT NULL,
        date TEXT NOT NULL,
        visit_number INTEGER NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS visit_key ON visit(plate, date, visit_number);
    CREATE TABLE IF NOT EXISTS repair (
        visit_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        id TEXT NOT NULL,
        service TEXT NOT NULL,
        parts TEXT NOT NULL,
        cost INTEGER NOT NULL,
        technician TEXT NOT NULL,
        status TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        invoice_number TEXT NOT NULL,
        vehicle TEXT,
        FOREIGN KEY(visit_id) REFERENCES visit(id)
    );
";

pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Inserts a visit and its repairs for `plate`. `total_cost` is not stored.
/// Returns false if the plate already has a visit with the same date and
/// number, in which case nothing is written.
pub fn record_visit(conn: &mut Connection, plate: &str, visit: &Visit) -> Result<bool> {
    let tx = conn.transaction()?;
    let inserted = insert_visit(&tx, plate, visit)?;
    tx.commit()?;
    Ok(inserted)
}

fn insert_visit(tx: &Transaction, plate: &str, visit: &Visit) -> Result<bool> {
    let changed = tx.execute(
        "INSERT OR IGNORE INTO visit(plate, date, visit_number) VALUES (?1, ?2, ?3)",
        params![plate, visit.date, visit.visit_number],
    )?;
    if changed == 0 {
        return Ok(false);
    }
    let visit_id = tx.last_insert_rowid();
    for (position, repair) in visit.repairs.iter().enumerate() {
        tx.execute(
            "INSERT INTO repair(visit_id, position, id, service, parts, cost, technician, status, timestamp, invoice_number, vehicle)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                visit_id,
                position as i64,
                repair.id,
                repair.service,
                to_json(&repair.parts),
                repair.cost as i64,
                repair.technician,
                repair.status.as_str(),
                repair.timestamp,
                repair.invoice_number,
                repair.vehicle_details.as_ref().map(to_json),
            ],
        )?;
    }
    Ok(true)
}

/// Visits for `plate`, newest first.
pub fn service_history(conn: &Connection, plate: &str) -> Result<Vec<Visit>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, visit_number FROM visit WHERE plate = ?1
         ORDER BY date DESC, visit_number ASC",
    )?;
    let rows = stmt.query_map(params![plate], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, u32>(2)?,
        ))
    })?;

    let mut visits = vec![];
    for row in rows {
        let (visit_id, date, visit_number) = row?;
        let repairs = repairs_for_visit(conn, visit_id)?;
        visits.push(Visit {
            date,
            visit_number,
            total_cost: repairs.iter().map(|r| r.cost).sum(),
            repairs,
        });
    }
    Ok(visits)
}

fn repairs_for_visit(conn: &Connection, visit_id: i64) -> Result<Vec<Repair>> {
    let mut stmt = conn.prepare(
        "SELECT id, service, parts, cost, technician, status, timestamp, invoice_number, vehicle
         FROM repair WHERE visit_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![visit_id], |row| {
        let status: String = row.get(5)?;
        let vehicle: Option<String> = row.get(8)?;
        Ok(Repair {
            id: row.get(0)?,
            service: row.get(1)?,
            parts: from_json(&row.get::<_, String>(2)?).unwrap_or_default(),
            cost: row.get::<_, i64>(3)? as u64,
            technician: row.get(4)?,
            status: status.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?,
            timestamp: row.get(6)?,
            invoice_number: row.get(7)?,
            vehicle_details: vehicle.as_deref().and_then(from_json),
        })
    })?;
    rows.collect()
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    // Plain data structs always serialize.
    serde_json::to_string(value).unwrap_or_default()
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Option<T> {
    match serde_json::from_str(s) {
        Ok(x) => Some(x),
        Err(e) => {
            warn!("Ignoring malformed JSON column {:?}: {}", s, e);
            None
        }
    }
}

/// Loads a `{ "PLATE": [visit, ...] }` JSON file into the database in a
/// single transaction. Visits already present are skipped, so importing the
/// same seed on every startup is harmless. Returns the number of new visits.
pub fn import_seed<P: AsRef<Path>>(
    conn: &mut Connection,
    path: P,
) -> std::result::Result<usize, Error> {
    let data = std::fs::read(path.as_ref())?;
    let seed: HashMap<String, Value> = serde_json::from_slice(&data)?;
    let tx = conn.transaction()?;
    let mut count = 0;
    for (plate, visits) in seed {
        let plate = crate::plate::normalize(&plate)
            .ok_or_else(|| format_err!("Seed contains an empty plate key {:?}", plate))?;
        let visits: Vec<Visit> = serde_json::from_value(visits)?;
        let mut added = 0;
        for visit in &visits {
            if insert_visit(&tx, plate.as_str(), visit)? {
                added += 1;
            }
        }
        info!(
            "Imported {} of {} seeded visits for plate {}",
            added,
            visits.len(),
            plate
        );
        count += added;
    }
    tx.commit()?;
    Ok(count)
}
