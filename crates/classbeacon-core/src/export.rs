//! CSV export of the attendance ledger.
//!
//! Fields that contain the delimiter, a quote or a line break are quoted with
//! embedded quotes doubled (RFC 4180).

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::ledger::StudentRecord;

/// MIME type of the export.
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Header row of the export.
pub const CSV_HEADER: [&str; 4] = ["Name", "Roll Number", "Status", "Timestamp"];

/// Rendered in place of a missing arrival time.
pub const MISSING_TIMESTAMP: &str = "N/A";

/// Serialize records to CSV, one row per record in ledger order.
///
/// Arrival times are shown as `hh:mm AM/PM` in `tz`.
#[must_use]
pub fn export_csv(records: &[StudentRecord], tz: Tz) -> String {
    let mut rows = Vec::with_capacity(records.len() + 1);
    rows.push(csv_row(&CSV_HEADER));

    for record in records {
        let timestamp = record.arrived_at_utc.map_or_else(
            || MISSING_TIMESTAMP.to_string(),
            |at| at.with_timezone(&tz).format("%I:%M %p").to_string(),
        );
        rows.push(csv_row(&[
            record.name.as_str(),
            record.roll_number.as_str(),
            record.status.as_str(),
            timestamp.as_str(),
        ]));
    }

    rows.join("\n")
}

/// Download filename for an export taken on `date`.
#[must_use]
pub fn export_filename(date: NaiveDate) -> String {
    format!("attendance-{}.csv", date.format("%Y-%m-%d"))
}

fn csv_row(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| escape_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Quote a field if it needs it.
#[must_use]
pub fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{demo_roster, AttendanceStatus};
    use chrono::{TimeZone, Utc};

    fn record(name: &str, arrived: bool) -> StudentRecord {
        StudentRecord {
            id: "1".into(),
            name: name.into(),
            roll_number: "CS2021001".into(),
            status: if arrived {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Absent
            },
            arrived_at_utc: arrived.then(|| Utc.with_ymd_and_hms(2024, 9, 2, 9, 15, 0).unwrap()),
            rssi_dbm: None,
            pending_since_utc: None,
        }
    }

    #[test]
    fn test_header_only_for_empty_ledger() {
        assert_eq!(export_csv(&[], chrono_tz::UTC), "Name,Roll Number,Status,Timestamp");
    }

    #[test]
    fn test_missing_timestamp_is_na() {
        let csv = export_csv(&[record("Edward Wilson", false)], chrono_tz::UTC);
        let row = csv.lines().nth(1).unwrap();
        assert_eq!(row, "Edward Wilson,CS2021001,absent,N/A");
        assert!(!row.ends_with(','));
    }

    #[test]
    fn test_timestamp_in_configured_timezone() {
        let csv = export_csv(&[record("Alice Johnson", true)], chrono_tz::Asia::Kolkata);
        assert_eq!(csv.lines().nth(1).unwrap(), "Alice Johnson,CS2021001,present,02:45 PM");
    }

    #[test]
    fn test_fields_with_delimiters_are_quoted() {
        let csv = export_csv(&[record("Brown, Charlie \"Chuck\"", false)], chrono_tz::UTC);
        assert_eq!(
            csv.lines().nth(1).unwrap(),
            "\"Brown, Charlie \"\"Chuck\"\"\",CS2021001,absent,N/A"
        );
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a\nb"), "\"a\nb\"");
        assert_eq!(escape_field(""), "");
    }

    #[test]
    fn test_demo_roster_export_in_order() {
        let date = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
        let csv = export_csv(&demo_roster(date, chrono_tz::UTC), chrono_tz::UTC);
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 7);
        assert_eq!(lines[1], "Alice Johnson,CS2021001,present,09:15 AM");
        assert_eq!(lines[3], "Charlie Brown,CS2021003,late,09:25 AM");
        assert_eq!(lines[5], "Edward Wilson,CS2021005,absent,N/A");
    }

    #[test]
    fn test_export_filename() {
        let date = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
        assert_eq!(export_filename(date), "attendance-2024-09-02.csv");
    }
}
