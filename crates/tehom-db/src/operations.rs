use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio_postgres::{GenericClient, Row};

use crate::models::*;

fn span_from_row(r: &Row) -> SpanRow {
    SpanRow {
        id: r.get(0),
        sensor: r.get(1),
        begin_at: r.get(2),
        end_at: r.get(3),
        lat: r.get(4),
        lon: r.get(5),
    }
}

/// Get every progress entry
pub async fn get_all_progress<C: GenericClient + Sync>(client: &C) -> Result<Vec<ProgressEntry>> {
    let rows = client
        .query(
            "SELECT sensor, begin_at, certified_end
             FROM certification_progress
             ORDER BY sensor, begin_at",
            &[],
        )
        .await
        .context("Failed to get certification progress")?;

    Ok(rows
        .iter()
        .map(|r| ProgressEntry {
            sensor: r.get(0),
            begin_at: r.get(1),
            certified_end: r.get(2),
        })
        .collect())
}

/// Insert or advance the progress entry for `(sensor, begin_at)`
pub async fn upsert_progress<C: GenericClient + Sync>(client: &C, progress: &NewProgress) -> Result<()> {
    client
        .execute(
            "INSERT INTO certification_progress (sensor, begin_at, certified_end)
             VALUES ($1, $2, $3)
             ON CONFLICT (sensor, begin_at)
             DO UPDATE SET certified_end = EXCLUDED.certified_end",
            &[&progress.sensor, &progress.begin_at, &progress.certified_end],
        )
        .await
        .context("Failed to upsert certification progress")?;

    Ok(())
}

/// Most recent certified span for a sensor
pub async fn get_last_span<C: GenericClient + Sync>(client: &C, sensor: &str) -> Result<Option<SpanRow>> {
    let row = client
        .query_opt(
            "SELECT id, sensor, begin_at, end_at, lat, lon
             FROM certified_spans
             WHERE sensor = $1
             ORDER BY end_at DESC, id DESC
             LIMIT 1",
            &[&sensor],
        )
        .await
        .context("Failed to get last certified span")?;

    Ok(row.as_ref().map(span_from_row))
}

/// Certified spans, optionally restricted to one sensor
pub async fn get_spans<C: GenericClient + Sync>(client: &C, sensor: Option<&str>) -> Result<Vec<SpanRow>> {
    let rows = match sensor {
        Some(sensor) => {
            client
                .query(
                    "SELECT id, sensor, begin_at, end_at, lat, lon
                     FROM certified_spans
                     WHERE sensor = $1
                     ORDER BY begin_at, id",
                    &[&sensor],
                )
                .await
        }
        None => {
            client
                .query(
                    "SELECT id, sensor, begin_at, end_at, lat, lon
                     FROM certified_spans
                     ORDER BY sensor, begin_at, id",
                    &[],
                )
                .await
        }
    }
    .context("Failed to get certified spans")?;

    Ok(rows.iter().map(span_from_row).collect())
}

/// Insert a certified span
pub async fn insert_span<C: GenericClient + Sync>(client: &C, span: &NewCertifiedSpan) -> Result<i64> {
    let row = client
        .query_one(
            "INSERT INTO certified_spans (sensor, begin_at, end_at, lat, lon)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
            &[&span.sensor, &span.begin_at, &span.end_at, &span.lat, &span.lon],
        )
        .await
        .context("Failed to insert certified span")?;

    Ok(row.get(0))
}

/// Rewrite the bounds of an existing span
pub async fn update_span_bounds<C: GenericClient + Sync>(
    client: &C,
    id: i64,
    begin_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<()> {
    let updated = client
        .execute(
            "UPDATE certified_spans SET begin_at = $2, end_at = $3 WHERE id = $1",
            &[&id, &begin_at, &end_at],
        )
        .await
        .context("Failed to update certified span")?;

    if updated != 1 {
        anyhow::bail!("Certified span {} not found", id);
    }
    Ok(())
}

/// Take the transaction-scoped lock guarding one coverage set.
///
/// Must run inside a transaction; concurrent merges on the same key
/// serialize on it until commit.
pub async fn lock_coverage<C: GenericClient + Sync>(client: &C, sensor: &str, extension: &str) -> Result<()> {
    client
        .execute(
            "SELECT pg_advisory_xact_lock(hashtext($1::TEXT || '/' || $2::TEXT))",
            &[&sensor, &extension],
        )
        .await
        .context("Failed to lock coverage set")?;

    Ok(())
}

/// Ranges of one coverage set, ordered by begin
pub async fn get_coverage<C: GenericClient + Sync>(
    client: &C,
    sensor: &str,
    extension: &str,
) -> Result<Vec<CoverageRange>> {
    let rows = client
        .query(
            "SELECT begin_at, end_at
             FROM coverage_ranges
             WHERE sensor = $1 AND extension = $2
             ORDER BY begin_at",
            &[&sensor, &extension],
        )
        .await
        .context("Failed to get coverage ranges")?;

    Ok(rows
        .iter()
        .map(|r| CoverageRange {
            begin_at: r.get(0),
            end_at: r.get(1),
        })
        .collect())
}

/// Every `(sensor, extension)` pair that has a coverage set
pub async fn get_coverage_keys<C: GenericClient + Sync>(client: &C) -> Result<Vec<(String, String)>> {
    let rows = client
        .query(
            "SELECT DISTINCT sensor, extension
             FROM coverage_ranges
             ORDER BY sensor, extension",
            &[],
        )
        .await
        .context("Failed to get coverage keys")?;

    Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
}

/// Delete a coverage set and insert its replacement using JSONB
pub async fn replace_coverage<C: GenericClient + Sync>(
    client: &C,
    sensor: &str,
    extension: &str,
    ranges: &[CoverageRange],
) -> Result<()> {
    client
        .execute(
            "DELETE FROM coverage_ranges WHERE sensor = $1 AND extension = $2",
            &[&sensor, &extension],
        )
        .await
        .context("Failed to delete coverage ranges")?;

    if ranges.is_empty() {
        return Ok(());
    }

    let json_array = serde_json::to_value(ranges).context("Failed to serialize coverage ranges")?;

    client
        .execute(
            "INSERT INTO coverage_ranges (sensor, extension, begin_at, end_at)
             SELECT
                 $1::TEXT,
                 $2::TEXT,
                 (r->>'begin_at')::TIMESTAMPTZ,
                 (r->>'end_at')::TIMESTAMPTZ
             FROM jsonb_array_elements($3::jsonb) AS r",
            &[&sensor, &extension, &json_array],
        )
        .await
        .context("Failed to insert coverage ranges")?;

    Ok(())
}

/// Delete progress entries (all sensors when `sensor` is `None`)
pub async fn delete_progress<C: GenericClient + Sync>(client: &C, sensor: Option<&str>) -> Result<u64> {
    let deleted = match sensor {
        Some(sensor) => {
            client
                .execute("DELETE FROM certification_progress WHERE sensor = $1", &[&sensor])
                .await
        }
        None => client.execute("DELETE FROM certification_progress", &[]).await,
    }
    .context("Failed to delete certification progress")?;

    Ok(deleted)
}

/// Delete certified spans (all sensors when `sensor` is `None`)
pub async fn delete_spans<C: GenericClient + Sync>(client: &C, sensor: Option<&str>) -> Result<u64> {
    let deleted = match sensor {
        Some(sensor) => {
            client
                .execute("DELETE FROM certified_spans WHERE sensor = $1", &[&sensor])
                .await
        }
        None => client.execute("DELETE FROM certified_spans", &[]).await,
    }
    .context("Failed to delete certified spans")?;

    Ok(deleted)
}

/// Delete coverage sets (all sensors when `sensor` is `None`)
pub async fn delete_coverage<C: GenericClient + Sync>(client: &C, sensor: Option<&str>) -> Result<u64> {
    let deleted = match sensor {
        Some(sensor) => {
            client
                .execute("DELETE FROM coverage_ranges WHERE sensor = $1", &[&sensor])
                .await
        }
        None => client.execute("DELETE FROM coverage_ranges", &[]).await,
    }
    .context("Failed to delete coverage ranges")?;

    Ok(deleted)
}

/// Vessel records inside a time window and bounding box
pub async fn get_vessel_records<C: GenericClient + Sync>(
    client: &C,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    bbox: &BoundingBox,
) -> Result<Vec<VesselRecordRow>> {
    let rows = client
        .query(
            "SELECT mmsi, recorded_at, lat, lon
             FROM vessel_records
             WHERE recorded_at >= $1 AND recorded_at < $2
               AND lat BETWEEN $3 AND $4
               AND lon BETWEEN $5 AND $6
             ORDER BY mmsi, recorded_at",
            &[
                &begin,
                &end,
                &bbox.min_lat,
                &bbox.max_lat,
                &bbox.min_lon,
                &bbox.max_lon,
            ],
        )
        .await
        .context("Failed to get vessel records")?;

    Ok(rows
        .iter()
        .map(|r| VesselRecordRow {
            mmsi: r.get(0),
            recorded_at: r.get(1),
            lat: r.get(2),
            lon: r.get(3),
        })
        .collect())
}

/// Downloaded blocks overlapping a window whose extent contains `bbox`
pub async fn get_vessel_blocks<C: GenericClient + Sync>(
    client: &C,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    bbox: &BoundingBox,
) -> Result<Vec<VesselBlockRow>> {
    let rows = client
        .query(
            "SELECT begin_at, end_at, min_lat, min_lon, max_lat, max_lon
             FROM vessel_blocks
             WHERE begin_at < $2 AND end_at > $1
               AND min_lat <= $3 AND max_lat >= $4
               AND min_lon <= $5 AND max_lon >= $6
             ORDER BY begin_at",
            &[
                &begin,
                &end,
                &bbox.min_lat,
                &bbox.max_lat,
                &bbox.min_lon,
                &bbox.max_lon,
            ],
        )
        .await
        .context("Failed to get vessel blocks")?;

    Ok(rows
        .iter()
        .map(|r| VesselBlockRow {
            begin_at: r.get(0),
            end_at: r.get(1),
            min_lat: r.get(2),
            min_lon: r.get(3),
            max_lat: r.get(4),
            max_lon: r.get(5),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    // Note: These tests require a running PostgreSQL instance. Run with:
    // cargo test --package tehom-db -- --ignored
    use super::*;
    use crate::connection::{create_pool, ensure_schema, local_settings};
    use chrono::TimeZone;

    #[tokio::test]
    #[ignore]
    async fn test_replace_coverage_in_transaction() {
        let pool = create_pool(&local_settings()).unwrap();
        ensure_schema(&pool).await.unwrap();
        let mut client = pool.get().await.unwrap();
        let tx = client.transaction().await.unwrap();

        let ranges = vec![CoverageRange {
            begin_at: Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2016, 1, 1, 0, 15, 0).unwrap(),
        }];
        lock_coverage(&*tx, "TESTHYDROPHONE", "mp3").await.unwrap();
        replace_coverage(&*tx, "TESTHYDROPHONE", "mp3", &ranges).await.unwrap();
        let stored = get_coverage(&*tx, "TESTHYDROPHONE", "mp3").await.unwrap();
        assert_eq!(stored, ranges);

        tx.rollback().await.unwrap();
    }
}
