use crate::ingest::Endpoint;
use crate::store::{
    string_column, timestamp_column, utc_timestamp_type, SnapshotKind, SnapshotRecord,
};
use arrow::array::{ArrayRef, BooleanArray, Int32Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime, Utc};
use collector_core::batch::{Batch, Resource};
use collector_core::config::{CollectConfig, OutputConfig};
use collector_core::dedupe::Dedupe;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

// Upstream payload shapes. Everything except the identity fields is optional
// because TfL omits fields freely.

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineDto {
    id: String,
    name: Option<String>,
    mode_name: Option<String>,
    line_statuses: Option<Vec<LineStatusDto>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineStatusDto {
    id: Option<i64>,
    status_severity: Option<i32>,
    status_severity_description: Option<String>,
    reason: Option<String>,
    created: Option<String>,
    validity_periods: Option<Vec<ValidityPeriodDto>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidityPeriodDto {
    from_date: Option<String>,
    to_date: Option<String>,
    is_now: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictionDto {
    id: Option<String>,
    line_id: String,
    line_name: Option<String>,
    mode_name: Option<String>,
    naptan_id: Option<String>,
    station_name: Option<String>,
    platform_name: Option<String>,
    direction: Option<String>,
    destination_name: Option<String>,
    expected_arrival: String,
    time_to_station: Option<i64>,
    vehicle_id: Option<String>,
    timestamp: Option<String>,
}

/// Parse a TfL timestamp. Offsets are honoured; naive values are taken as UTC.
pub fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Records decoded from one response, plus the count of entries rejected at the boundary.
#[derive(Debug)]
pub struct Parsed<R> {
    pub records: Vec<R>,
    pub quarantined: usize,
}

/// Decode a JSON array entry by entry; entries that do not fit the typed
/// shape are counted and skipped.
fn parse_entries<D, R, F>(body: &[u8], mut convert: F) -> Result<Parsed<R>, serde_json::Error>
where
    D: for<'de> Deserialize<'de>,
    F: FnMut(D) -> Option<Vec<R>>,
{
    let entries: Vec<Value> = serde_json::from_slice(body)?;
    let mut parsed = Parsed {
        records: Vec::with_capacity(entries.len()),
        quarantined: 0,
    };

    for entry in entries {
        match serde_json::from_value::<D>(entry).ok().and_then(&mut convert) {
            Some(rows) => parsed.records.extend(rows),
            None => parsed.quarantined += 1,
        }
    }

    Ok(parsed)
}

/// A line as listed by `/Line/Mode/{modes}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineSummary {
    pub id: String,
    pub name: Option<String>,
    pub mode_name: Option<String>,
}

pub fn parse_lines(body: &[u8]) -> Result<Parsed<LineSummary>, serde_json::Error> {
    parse_entries(body, |line: LineDto| {
        if line.id.is_empty() {
            return None;
        }
        Some(vec![LineSummary {
            id: line.id,
            name: line.name,
            mode_name: line.mode_name,
        }])
    })
}

/// One line status entry for one validity period.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub snapshot_utc: DateTime<Utc>,
    pub line_id: String,
    pub line_name: Option<String>,
    pub mode_name: Option<String>,
    pub status_id: Option<i64>,
    pub status_severity: Option<i32>,
    pub status_severity_description: Option<String>,
    pub reason: Option<String>,
    pub valid_from_utc: Option<DateTime<Utc>>,
    pub valid_to_utc: Option<DateTime<Utc>>,
    pub is_now: Option<bool>,
    pub status_created_utc: Option<DateTime<Utc>>,
}

/// Flatten a status payload into one row per (line, status, validity period).
/// A line without statuses still yields a row so its presence is recorded.
pub fn parse_statuses(
    body: &[u8],
    snapshot_utc: DateTime<Utc>,
) -> Result<Parsed<StatusRecord>, serde_json::Error> {
    parse_entries(body, |line: LineDto| {
        if line.id.is_empty() {
            return None;
        }

        let base = StatusRecord {
            snapshot_utc,
            line_id: line.id,
            line_name: line.name,
            mode_name: line.mode_name,
            status_id: None,
            status_severity: None,
            status_severity_description: None,
            reason: None,
            valid_from_utc: None,
            valid_to_utc: None,
            is_now: None,
            status_created_utc: None,
        };

        let statuses = line.line_statuses.unwrap_or_default();
        if statuses.is_empty() {
            return Some(vec![base]);
        }

        let mut rows = Vec::new();
        for status in statuses {
            let entry = StatusRecord {
                status_id: status.id,
                status_severity: status.status_severity,
                status_severity_description: non_empty(status.status_severity_description),
                reason: non_empty(status.reason),
                status_created_utc: status.created.as_deref().and_then(parse_utc),
                ..base.clone()
            };

            let periods = status.validity_periods.unwrap_or_default();
            if periods.is_empty() {
                rows.push(entry);
                continue;
            }

            for period in periods {
                rows.push(StatusRecord {
                    valid_from_utc: period.from_date.as_deref().and_then(parse_utc),
                    valid_to_utc: period.to_date.as_deref().and_then(parse_utc),
                    is_now: period.is_now,
                    ..entry.clone()
                });
            }
        }
        Some(rows)
    })
}

impl Dedupe for StatusRecord {
    // TfL reports id 0 for most entries, so severity, reason and validity
    // window are part of an entry's identity.
    type Key = (
        String,
        Option<i64>,
        Option<i32>,
        Option<String>,
        Option<DateTime<Utc>>,
        Option<DateTime<Utc>>,
    );

    fn dedup_key(&self) -> Self::Key {
        (
            self.line_id.clone(),
            self.status_id,
            self.status_severity,
            self.reason.clone(),
            self.valid_from_utc,
            self.valid_to_utc,
        )
    }

    fn freshness(&self) -> Option<DateTime<Utc>> {
        self.status_created_utc
    }
}

impl SnapshotRecord for StatusRecord {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("snapshot_utc", utc_timestamp_type(), false),
            Field::new("line_id", DataType::Utf8, false),
            Field::new("line_name", DataType::Utf8, true),
            Field::new("mode_name", DataType::Utf8, true),
            Field::new("status_id", DataType::Int64, true),
            Field::new("status_severity", DataType::Int32, true),
            Field::new("status_severity_description", DataType::Utf8, true),
            Field::new("reason", DataType::Utf8, true),
            Field::new("valid_from_utc", utc_timestamp_type(), true),
            Field::new("valid_to_utc", utc_timestamp_type(), true),
            Field::new("is_now", DataType::Boolean, true),
            Field::new("status_created_utc", utc_timestamp_type(), true),
        ]))
    }

    fn to_record_batch(records: &[Self]) -> Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = vec![
            timestamp_column(records.iter().map(|r| Some(r.snapshot_utc))),
            string_column(records.iter().map(|r| Some(r.line_id.as_str()))),
            string_column(records.iter().map(|r| r.line_name.as_deref())),
            string_column(records.iter().map(|r| r.mode_name.as_deref())),
            Arc::new(records.iter().map(|r| r.status_id).collect::<Int64Array>()),
            Arc::new(records.iter().map(|r| r.status_severity).collect::<Int32Array>()),
            string_column(records.iter().map(|r| r.status_severity_description.as_deref())),
            string_column(records.iter().map(|r| r.reason.as_deref())),
            timestamp_column(records.iter().map(|r| r.valid_from_utc)),
            timestamp_column(records.iter().map(|r| r.valid_to_utc)),
            Arc::new(records.iter().map(|r| r.is_now).collect::<BooleanArray>()),
            timestamp_column(records.iter().map(|r| r.status_created_utc)),
        ];
        RecordBatch::try_new(Self::schema(), columns)
    }
}

/// One arrival prediction for a vehicle at a stop.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalRecord {
    pub snapshot_utc: DateTime<Utc>,
    pub line_id: String,
    pub line_name: Option<String>,
    pub mode_name: Option<String>,
    pub prediction_id: Option<String>,
    pub stop_point_id: Option<String>,
    pub station_name: Option<String>,
    pub platform_name: Option<String>,
    pub direction: Option<String>,
    pub destination_name: Option<String>,
    pub expected_arrival: DateTime<Utc>,
    pub time_to_station_sec: Option<i64>,
    pub vehicle_id: Option<String>,
    pub prediction_utc: Option<DateTime<Utc>>,
}

/// Predictions without a line or a parseable expected arrival are quarantined.
pub fn parse_arrivals(
    body: &[u8],
    snapshot_utc: DateTime<Utc>,
) -> Result<Parsed<ArrivalRecord>, serde_json::Error> {
    parse_entries(body, |p: PredictionDto| {
        if p.line_id.is_empty() {
            return None;
        }
        let expected_arrival = parse_utc(&p.expected_arrival)?;

        Some(vec![ArrivalRecord {
            snapshot_utc,
            line_id: p.line_id,
            line_name: p.line_name,
            mode_name: p.mode_name,
            prediction_id: non_empty(p.id),
            stop_point_id: non_empty(p.naptan_id),
            station_name: p.station_name,
            platform_name: p.platform_name,
            direction: non_empty(p.direction),
            destination_name: p.destination_name,
            expected_arrival,
            time_to_station_sec: p.time_to_station,
            vehicle_id: non_empty(p.vehicle_id),
            prediction_utc: p.timestamp.as_deref().and_then(parse_utc),
        }])
    })
}

impl Dedupe for ArrivalRecord {
    type Key = (
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        DateTime<Utc>,
    );

    // Predictions without a vehicle id fall back to the prediction id.
    fn dedup_key(&self) -> Self::Key {
        (
            self.line_id.clone(),
            self.stop_point_id.clone(),
            self.vehicle_id.clone().or_else(|| self.prediction_id.clone()),
            self.platform_name.clone(),
            self.direction.clone(),
            self.expected_arrival,
        )
    }

    fn freshness(&self) -> Option<DateTime<Utc>> {
        self.prediction_utc
    }
}

impl SnapshotRecord for ArrivalRecord {
    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("snapshot_utc", utc_timestamp_type(), false),
            Field::new("line_id", DataType::Utf8, false),
            Field::new("line_name", DataType::Utf8, true),
            Field::new("mode_name", DataType::Utf8, true),
            Field::new("prediction_id", DataType::Utf8, true),
            Field::new("stop_point_id", DataType::Utf8, true),
            Field::new("station_name", DataType::Utf8, true),
            Field::new("platform_name", DataType::Utf8, true),
            Field::new("direction", DataType::Utf8, true),
            Field::new("destination_name", DataType::Utf8, true),
            Field::new("expected_arrival", utc_timestamp_type(), false),
            Field::new("time_to_station_sec", DataType::Int64, true),
            Field::new("vehicle_id", DataType::Utf8, true),
            Field::new("prediction_utc", utc_timestamp_type(), true),
        ]))
    }

    fn to_record_batch(records: &[Self]) -> Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = vec![
            timestamp_column(records.iter().map(|r| Some(r.snapshot_utc))),
            string_column(records.iter().map(|r| Some(r.line_id.as_str()))),
            string_column(records.iter().map(|r| r.line_name.as_deref())),
            string_column(records.iter().map(|r| r.mode_name.as_deref())),
            string_column(records.iter().map(|r| r.prediction_id.as_deref())),
            string_column(records.iter().map(|r| r.stop_point_id.as_deref())),
            string_column(records.iter().map(|r| r.station_name.as_deref())),
            string_column(records.iter().map(|r| r.platform_name.as_deref())),
            string_column(records.iter().map(|r| r.direction.as_deref())),
            string_column(records.iter().map(|r| r.destination_name.as_deref())),
            timestamp_column(records.iter().map(|r| Some(r.expected_arrival))),
            Arc::new(
                records
                    .iter()
                    .map(|r| r.time_to_station_sec)
                    .collect::<Int64Array>(),
            ),
            string_column(records.iter().map(|r| r.vehicle_id.as_deref())),
            timestamp_column(records.iter().map(|r| r.prediction_utc)),
        ];
        RecordBatch::try_new(Self::schema(), columns)
    }
}

/// What differs between the status and arrivals runs.
pub trait Dataset: Send + Sync + 'static {
    type Record: Dedupe + SnapshotRecord + Send + 'static;

    const KIND: SnapshotKind;
    const RESOURCE: Resource;

    fn endpoint(batch: &Batch) -> Endpoint;

    fn batch_size(config: &CollectConfig) -> usize;

    fn output_dir(config: &OutputConfig) -> PathBuf;

    fn parse(
        body: &[u8],
        snapshot_utc: DateTime<Utc>,
    ) -> Result<Parsed<Self::Record>, serde_json::Error>;

    /// Last touch on the deduplicated records before they are written.
    fn finalize(_records: &mut [Self::Record]) {}
}

pub struct StatusDataset;

impl Dataset for StatusDataset {
    type Record = StatusRecord;

    const KIND: SnapshotKind = SnapshotKind::Status;
    const RESOURCE: Resource = Resource::Status;

    fn endpoint(batch: &Batch) -> Endpoint {
        Endpoint::LineStatus(batch.ids_csv())
    }

    fn batch_size(config: &CollectConfig) -> usize {
        config.status_batch_size
    }

    fn output_dir(config: &OutputConfig) -> PathBuf {
        config.status_dir.clone()
    }

    fn parse(
        body: &[u8],
        snapshot_utc: DateTime<Utc>,
    ) -> Result<Parsed<StatusRecord>, serde_json::Error> {
        parse_statuses(body, snapshot_utc)
    }
}

pub struct ArrivalsDataset;

impl Dataset for ArrivalsDataset {
    type Record = ArrivalRecord;

    const KIND: SnapshotKind = SnapshotKind::Arrivals;
    const RESOURCE: Resource = Resource::Arrivals;

    fn endpoint(batch: &Batch) -> Endpoint {
        Endpoint::LineArrivals(batch.ids_csv())
    }

    fn batch_size(config: &CollectConfig) -> usize {
        config.arrivals_batch_size
    }

    fn output_dir(config: &OutputConfig) -> PathBuf {
        config.arrivals_dir.clone()
    }

    fn parse(
        body: &[u8],
        snapshot_utc: DateTime<Utc>,
    ) -> Result<Parsed<ArrivalRecord>, serde_json::Error> {
        parse_arrivals(body, snapshot_utc)
    }

    /// Order by line, station, direction and expected arrival, missing values last.
    fn finalize(records: &mut [ArrivalRecord]) {
        records.sort_by(|a, b| {
            a.line_id
                .cmp(&b.line_id)
                .then_with(|| nulls_last(&a.station_name, &b.station_name))
                .then_with(|| nulls_last(&a.direction, &b.direction))
                .then_with(|| a.expected_arrival.cmp(&b.expected_arrival))
        });
    }
}

fn nulls_last<T: Ord>(a: &Option<T>, b: &Option<T>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use collector_core::dedupe::dedupe;
    use pretty_assertions::assert_eq;

    fn capture() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 15, 0).unwrap()
    }

    const STATUS_BODY: &str = r#"[
        {
            "id": "central",
            "name": "Central",
            "modeName": "tube",
            "lineStatuses": [
                {
                    "id": 0,
                    "statusSeverity": 6,
                    "statusSeverityDescription": "Severe Delays",
                    "reason": "Signal failure",
                    "created": "2026-10-16T08:00:00",
                    "validityPeriods": [
                        {
                            "fromDate": "2026-10-16T08:00:00Z",
                            "toDate": "2026-10-16T12:00:00Z",
                            "isNow": true
                        }
                    ]
                },
                {
                    "id": 0,
                    "statusSeverity": 3,
                    "statusSeverityDescription": "Part Suspended",
                    "validityPeriods": []
                }
            ]
        },
        {"id": "victoria", "name": "Victoria", "modeName": "tube", "lineStatuses": null},
        {"name": "no id here"},
        42
    ]"#;

    #[test]
    fn flattens_concurrent_statuses_and_quarantines_bad_entries() {
        let parsed = parse_statuses(STATUS_BODY.as_bytes(), capture()).unwrap();

        assert_eq!(parsed.quarantined, 2);
        assert_eq!(parsed.records.len(), 3);

        let central: Vec<_> = parsed
            .records
            .iter()
            .filter(|r| r.line_id == "central")
            .collect();
        assert_eq!(central.len(), 2);
        assert_eq!(central[0].status_severity, Some(6));
        assert_eq!(
            central[0].valid_from_utc,
            Some(Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap())
        );
        assert_eq!(central[0].is_now, Some(true));
        assert_eq!(central[1].valid_from_utc, None);

        let victoria = parsed.records.iter().find(|r| r.line_id == "victoria").unwrap();
        assert_eq!(victoria.status_severity, None);
        assert_eq!(victoria.line_name.as_deref(), Some("Victoria"));
    }

    #[test]
    fn concurrent_statuses_survive_dedupe() {
        let parsed = parse_statuses(STATUS_BODY.as_bytes(), capture()).unwrap();
        let before = parsed.records.len();
        assert_eq!(dedupe(parsed.records).len(), before);
    }

    #[test]
    fn same_severity_closures_with_different_reasons_are_kept() {
        let body = r#"[{
            "id": "district",
            "name": "District",
            "lineStatuses": [
                {
                    "id": 0,
                    "statusSeverity": 5,
                    "statusSeverityDescription": "Part Closure",
                    "reason": "No service Earl's Court to Wimbledon",
                    "validityPeriods": [
                        {"fromDate": "2026-10-17T04:30:00Z", "toDate": "2026-10-19T00:29:00Z"}
                    ]
                },
                {
                    "id": 0,
                    "statusSeverity": 5,
                    "statusSeverityDescription": "Part Closure",
                    "reason": "No service Tower Hill to Upminster",
                    "validityPeriods": [
                        {"fromDate": "2026-10-17T04:30:00Z", "toDate": "2026-10-19T00:29:00Z"}
                    ]
                }
            ]
        }]"#;

        let parsed = parse_statuses(body.as_bytes(), capture()).unwrap();
        assert_eq!(parsed.records.len(), 2);

        let kept = dedupe(parsed.records);
        let reasons: Vec<_> = kept.iter().filter_map(|r| r.reason.as_deref()).collect();
        assert_eq!(
            reasons,
            vec![
                "No service Earl's Court to Wimbledon",
                "No service Tower Hill to Upminster"
            ]
        );
    }

    #[test]
    fn non_array_payload_is_an_error() {
        assert!(parse_statuses(br#"{"message":"oops"}"#, capture()).is_err());
        assert!(parse_arrivals(b"<html>", capture()).is_err());
    }

    const ARRIVALS_BODY: &str = r#"[
        {
            "id": "-1001",
            "lineId": "victoria",
            "lineName": "Victoria",
            "modeName": "tube",
            "naptanId": "940GZZLUOXC",
            "stationName": "Oxford Circus Underground Station",
            "platformName": "Southbound - Platform 4",
            "direction": "outbound",
            "destinationName": "Brixton Underground Station",
            "expectedArrival": "2026-10-16T09:17:30Z",
            "timeToStation": 150,
            "vehicleId": "204",
            "timestamp": "2026-10-16T09:15:00.123Z"
        },
        {
            "lineId": "victoria",
            "naptanId": "940GZZLUOXC",
            "expectedArrival": "not a time",
            "vehicleId": "205"
        },
        {
            "naptanId": "940GZZLUGPK",
            "expectedArrival": "2026-10-16T09:20:00Z"
        }
    ]"#;

    #[test]
    fn parses_predictions_and_quarantines_unusable_ones() {
        let parsed = parse_arrivals(ARRIVALS_BODY.as_bytes(), capture()).unwrap();

        assert_eq!(parsed.quarantined, 2);
        assert_eq!(parsed.records.len(), 1);
        let record = &parsed.records[0];
        assert_eq!(record.stop_point_id.as_deref(), Some("940GZZLUOXC"));
        assert_eq!(record.time_to_station_sec, Some(150));
        assert_eq!(
            record.expected_arrival,
            Utc.with_ymd_and_hms(2026, 10, 16, 9, 17, 30).unwrap()
        );
        assert!(record.prediction_utc.is_some());
    }

    #[test]
    fn parse_utc_accepts_offsets_and_naive_values() {
        assert_eq!(
            parse_utc("2026-10-16T10:00:00+01:00"),
            Some(Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap())
        );
        assert_eq!(
            parse_utc("2026-10-16T09:00:00.5"),
            Some(
                Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
                    + chrono::Duration::milliseconds(500)
            )
        );
        assert_eq!(parse_utc(""), None);
    }

    fn arrival(station: Option<&str>, direction: Option<&str>, minute: u32) -> ArrivalRecord {
        ArrivalRecord {
            snapshot_utc: capture(),
            line_id: "victoria".into(),
            line_name: None,
            mode_name: None,
            prediction_id: None,
            stop_point_id: station.map(str::to_string),
            station_name: station.map(str::to_string),
            platform_name: None,
            direction: direction.map(str::to_string),
            destination_name: None,
            expected_arrival: Utc.with_ymd_and_hms(2026, 10, 16, 9, minute, 0).unwrap(),
            time_to_station_sec: None,
            vehicle_id: None,
            prediction_utc: None,
        }
    }

    #[test]
    fn predictions_without_vehicle_ids_stay_distinct() {
        let body = r#"[
            {
                "id": "111",
                "lineId": "dlr",
                "naptanId": "940GZZDLBNK",
                "platformName": "Platform 9",
                "direction": "outbound",
                "expectedArrival": "2026-10-16T09:20:00Z",
                "vehicleId": ""
            },
            {
                "id": "222",
                "lineId": "dlr",
                "naptanId": "940GZZDLBNK",
                "platformName": "Platform 10",
                "direction": "inbound",
                "expectedArrival": "2026-10-16T09:20:00Z",
                "vehicleId": ""
            }
        ]"#;

        let parsed = parse_arrivals(body.as_bytes(), capture()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert!(parsed.records.iter().all(|r| r.vehicle_id.is_none()));
        assert_eq!(dedupe(parsed.records).len(), 2);
    }

    #[test]
    fn repeated_prediction_ids_collapse_without_vehicle_ids() {
        let mut first = arrival(Some("940GZZDLBNK"), Some("outbound"), 20);
        first.prediction_id = Some("111".into());
        let mut later = first.clone();
        later.prediction_utc = Some(capture());

        let kept = dedupe(vec![first, later]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].prediction_utc, Some(capture()));
    }

    #[test]
    fn arrivals_sort_with_missing_values_last() {
        let mut records = vec![
            arrival(None, Some("inbound"), 20),
            arrival(Some("Victoria"), Some("outbound"), 18),
            arrival(Some("Brixton"), None, 19),
            arrival(Some("Brixton"), Some("inbound"), 25),
            arrival(Some("Brixton"), Some("inbound"), 21),
        ];
        ArrivalsDataset::finalize(&mut records);

        let order: Vec<_> = records
            .iter()
            .map(|r| (r.station_name.clone(), r.expected_arrival.format("%M").to_string()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Some("Brixton".to_string()), "21".to_string()),
                (Some("Brixton".to_string()), "25".to_string()),
                (Some("Brixton".to_string()), "19".to_string()),
                (Some("Victoria".to_string()), "18".to_string()),
                (None, "20".to_string()),
            ]
        );
    }

    #[test]
    fn status_rows_convert_to_record_batch() {
        let parsed = parse_statuses(STATUS_BODY.as_bytes(), capture()).unwrap();
        let batch = StatusRecord::to_record_batch(&parsed.records).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.schema(), StatusRecord::schema());
        assert!(batch.column_by_name("valid_from_utc").is_some());
    }
}
