//! `DuckDB` reads and writes.

use std::collections::BTreeMap;
use std::path::Path;

use duckdb::Connection;
use hydro_map_feature_models::{AttrValue, Crs, Feature, FeatureCollection};

use crate::{CATALOG_TABLE, ExportError, ExportReport, LayerFailure, LayerGroup, LayerInfo};

/// Writes every group as its own layer of the container at `path`.
///
/// The container is created if needed. Layers are written one at a time,
/// each in its own transaction; a failing layer is recorded in the report
/// and the remaining layers are still written.
///
/// Layer names are case-insensitive table names. A group whose name
/// matches an earlier group of the same call, or a layer already in the
/// container under different casing, is refused with
/// [`ExportError::LayerNameCollision`].
///
/// # Errors
///
/// Returns [`ExportError`] only if the container itself cannot be opened
/// or its catalog created.
pub fn export_layers(groups: &[LayerGroup], path: &Path) -> Result<ExportReport, ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    create_catalog(&conn)?;

    let mut report = ExportReport::default();
    let mut claimed: BTreeMap<String, &str> = BTreeMap::new();

    for group in groups {
        let outcome = match claimed.get(&group.name.to_lowercase()) {
            Some(existing) => Err(ExportError::LayerNameCollision {
                name: group.name.clone(),
                existing: (*existing).to_string(),
            }),
            None => {
                claimed.insert(group.name.to_lowercase(), &group.name);
                write_layer(&conn, group)
            }
        };

        match outcome {
            Ok(count) => {
                log::info!("  {}: {count} feature(s)", group.name);
                report.written.push((group.name.clone(), count));
            }
            Err(error) => {
                log::error!("  {}: {error}", group.name);
                report.failures.push(LayerFailure {
                    layer: group.name.clone(),
                    error,
                });
            }
        }
    }

    log::info!(
        "Exported {}/{} layer(s) to {}",
        report.written.len(),
        groups.len(),
        path.display()
    );

    Ok(report)
}

fn create_catalog(conn: &Connection) -> Result<(), ExportError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {CATALOG_TABLE} (
            name TEXT PRIMARY KEY,
            crs TEXT NOT NULL,
            feature_count BIGINT NOT NULL,
            geometry_types TEXT NOT NULL,
            written_at TEXT NOT NULL
        );"
    ))?;
    Ok(())
}

/// Finds a catalog entry that names the same table as `name` with
/// different casing.
fn catalog_collision(conn: &Connection, name: &str) -> Result<Option<String>, ExportError> {
    match conn
        .prepare(&format!(
            "SELECT name FROM {CATALOG_TABLE} WHERE lower(name) = lower(?) AND name <> ? LIMIT 1"
        ))?
        .query_row([name, name], |row| row.get(0))
    {
        Ok(existing) => Ok(Some(existing)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_layer(conn: &Connection, group: &LayerGroup) -> Result<u64, ExportError> {
    let table = table_ident(&group.name)?;

    if let Some(existing) = catalog_collision(conn, &group.name)? {
        return Err(ExportError::LayerNameCollision {
            name: group.name.clone(),
            existing,
        });
    }

    // Encode before opening the transaction so it only spans SQL.
    let rows = group
        .collection
        .iter()
        .map(|feature| -> Result<_, serde_json::Error> {
            let geometry = geojson::Geometry::new(geojson::Value::from(&feature.geometry));
            let properties = feature
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                .collect::<serde_json::Map<_, _>>();
            Ok((
                feature.id.as_str(),
                serde_json::to_string(&geometry)?,
                serde_json::to_string(&properties)?,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let geometry_types = group
        .collection
        .kinds()
        .into_iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(",");

    let write = || -> Result<u64, duckdb::Error> {
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                fid BIGINT PRIMARY KEY,
                id TEXT NOT NULL,
                geometry TEXT NOT NULL,
                properties TEXT NOT NULL
             );"
        ))?;

        let mut stmt = conn.prepare(&format!(
            "INSERT INTO {table} (fid, id, geometry, properties) VALUES (?, ?, ?, ?)"
        ))?;
        let mut fid = 0i64;
        for (id, geometry, properties) in &rows {
            fid += 1;
            stmt.execute(duckdb::params![fid, id, geometry, properties])?;
        }

        let count = u64::try_from(rows.len()).unwrap_or(u64::MAX);
        conn.execute(
            &format!(
                "INSERT INTO {CATALOG_TABLE} (name, crs, feature_count, geometry_types, written_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (name) DO UPDATE SET
                    crs = EXCLUDED.crs,
                    feature_count = EXCLUDED.feature_count,
                    geometry_types = EXCLUDED.geometry_types,
                    written_at = EXCLUDED.written_at"
            ),
            duckdb::params![
                group.name,
                group.collection.crs.to_string(),
                i64::try_from(count).unwrap_or(i64::MAX),
                geometry_types,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(count)
    };

    conn.execute_batch("BEGIN TRANSACTION")?;

    match write() {
        Ok(count) => {
            conn.execute_batch("COMMIT").map_err(|source| ExportError::Write {
                layer: group.name.clone(),
                source,
            })?;
            Ok(count)
        }
        Err(source) => {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                log::error!("Rollback of layer '{}' failed: {e}", group.name);
            }
            Err(ExportError::Write {
                layer: group.name.clone(),
                source,
            })
        }
    }
}

/// Quotes a layer name as a SQL identifier.
fn table_ident(name: &str) -> Result<String, ExportError> {
    if name.trim().is_empty() || name.eq_ignore_ascii_case(CATALOG_TABLE) || name.contains('\0') {
        return Err(ExportError::InvalidLayerName {
            name: name.to_string(),
        });
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

fn open_existing(path: &Path) -> Result<Connection, ExportError> {
    if !path.exists() {
        return Err(ExportError::ContainerNotFound {
            path: path.to_path_buf(),
        });
    }

    Ok(Connection::open_with_flags(
        path,
        duckdb::Config::default().access_mode(duckdb::AccessMode::ReadOnly)?,
    )?)
}

/// Lists the catalog of the container at `path`, ordered by layer name.
///
/// # Errors
///
/// Returns [`ExportError::ContainerNotFound`] if the file does not exist,
/// or a database error if it has no catalog.
pub fn list_layers(path: &Path) -> Result<Vec<LayerInfo>, ExportError> {
    let conn = open_existing(path)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT name, crs, feature_count, geometry_types, written_at
         FROM {CATALOG_TABLE} ORDER BY name"
    ))?;

    let layers = stmt
        .query_map([], |row| {
            let count: i64 = row.get(2)?;
            let types: String = row.get(3)?;
            Ok(LayerInfo {
                name: row.get(0)?,
                crs: row.get(1)?,
                feature_count: u64::try_from(count).unwrap_or_default(),
                geometry_types: types
                    .split(',')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
                written_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(layers)
}

/// Reads one layer back as a collection, in `fid` order.
///
/// # Errors
///
/// * [`ExportError::LayerNotFound`] if the catalog has no such layer
/// * [`ExportError::Geometry`] if a stored geometry cannot be decoded
pub fn read_layer(path: &Path, name: &str) -> Result<FeatureCollection, ExportError> {
    let conn = open_existing(path)?;
    let table = table_ident(name)?;

    let crs: String = match conn
        .prepare(&format!("SELECT crs FROM {CATALOG_TABLE} WHERE name = ?"))?
        .query_row([name], |row| row.get(0))
    {
        Ok(crs) => crs,
        Err(duckdb::Error::QueryReturnedNoRows) => {
            return Err(ExportError::LayerNotFound {
                name: name.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let mut collection = FeatureCollection::new(crs.parse::<Crs>()?);

    let mut stmt = conn.prepare(&format!(
        "SELECT fid, id, geometry, properties FROM {table} ORDER BY fid"
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (fid, id, geometry, properties) in rows {
        let geometry: geojson::Geometry = serde_json::from_str(&geometry)?;
        let geometry =
            geo::Geometry::<f64>::try_from(geometry).map_err(|e| ExportError::Geometry {
                layer: name.to_string(),
                fid,
                message: e.to_string(),
            })?;

        let attributes = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(
            &properties,
        )?
        .into_iter()
        .map(|(k, v)| (k, AttrValue::from(v)))
        .collect::<BTreeMap<_, _>>();

        collection.push(Feature {
            id,
            geometry,
            attributes,
        });
    }

    Ok(collection)
}
