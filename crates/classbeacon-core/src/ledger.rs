//! Per-student attendance for the current class period.
//!
//! Each record follows a forward-only state machine:
//!
//! ```text
//! absent  -> pending   scan-detected signal
//! pending -> present   confirmed within the late threshold
//! pending -> late      confirmed after the late threshold
//! ```
//!
//! `present` and `late` are terminal until the ledger is reset.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;

use crate::clock::SharedClock;

/// Errors raised by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// No student with this id is on the roster.
    #[error("Unknown student: '{0}'")]
    UnknownStudent(String),

    /// The requested transition is not allowed from the current status.
    #[error("Student '{student_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        /// Student id.
        student_id: String,
        /// Current status.
        from: AttendanceStatus,
        /// Requested status.
        to: AttendanceStatus,
    },

    /// Two roster entries share an id.
    #[error("Duplicate student id on roster: '{0}'")]
    DuplicateStudent(String),

    /// The reported signal is too weak to count as in the room.
    #[error("Signal {rssi_dbm} dBm is weaker than the proximity threshold of {threshold_dbm} dBm")]
    OutOfRange {
        /// Reported signal strength.
        rssi_dbm: i16,
        /// Configured threshold.
        threshold_dbm: i16,
    },
}

/// Attendance status of one student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    /// Not detected yet.
    Absent,
    /// Detected, awaiting confirmation.
    Pending,
    /// Confirmed on time.
    Present,
    /// Confirmed after the late threshold.
    Late,
}

impl AttendanceStatus {
    /// Lower-case label used in exports and API payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Pending => "pending",
            Self::Present => "present",
            Self::Late => "late",
        }
    }

    /// Whether this status counts towards attendance.
    #[must_use]
    pub const fn is_attending(self) -> bool {
        matches!(self, Self::Present | Self::Late)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A roster entry as configured, before any attendance is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RosterEntry {
    /// Student id.
    #[schema(example = "7")]
    pub id: String,

    /// Full name.
    #[schema(example = "John Doe")]
    pub name: String,

    /// Institutional roll number.
    #[schema(example = "CS2021007")]
    pub roll_number: String,
}

/// Attendance record for one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "1",
    "name": "Alice Johnson",
    "roll_number": "CS2021001",
    "status": "present",
    "arrived_at_utc": "2024-09-02T09:15:00Z",
    "rssi_dbm": -42,
    "pending_since_utc": null
}))]
pub struct StudentRecord {
    /// Student id.
    pub id: String,

    /// Full name.
    pub name: String,

    /// Institutional roll number.
    pub roll_number: String,

    /// Current status.
    pub status: AttendanceStatus,

    /// When attendance was confirmed.
    pub arrived_at_utc: Option<DateTime<Utc>>,

    /// Signal strength at detection, in dBm.
    pub rssi_dbm: Option<i16>,

    /// When the student entered `pending`.
    pub pending_since_utc: Option<DateTime<Utc>>,
}

impl From<RosterEntry> for StudentRecord {
    fn from(entry: RosterEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            roll_number: entry.roll_number,
            status: AttendanceStatus::Absent,
            arrived_at_utc: None,
            rssi_dbm: None,
            pending_since_utc: None,
        }
    }
}

/// Colour band for the attendance rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RateBand {
    /// 80% and above.
    Good,
    /// 60% to 79%.
    Fair,
    /// Below 60%.
    Poor,
}

impl RateBand {
    /// Band for a percentage.
    #[must_use]
    pub const fn for_rate(rate: u32) -> Self {
        if rate >= 80 {
            Self::Good
        } else if rate >= 60 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// Aggregate numbers over the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "total_students": 6,
    "present_students": 5,
    "late_students": 1,
    "pending_students": 0,
    "absent_students": 1,
    "attendance_rate": 83,
    "rate_band": "good"
}))]
pub struct AttendanceStats {
    /// Students on the roster.
    pub total_students: usize,
    /// Present or late.
    pub present_students: usize,
    /// Late only.
    pub late_students: usize,
    /// Awaiting confirmation.
    pub pending_students: usize,
    /// Not detected.
    pub absent_students: usize,
    /// `round(present_students / total_students * 100)`, 0 when the roster is empty.
    pub attendance_rate: u32,
    /// Colour band of the rate.
    pub rate_band: RateBand,
}

/// Rounded attendance percentage.
#[must_use]
pub fn attendance_rate(present: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let rate = (present * 200 + total) / (total * 2);
    u32::try_from(rate).unwrap_or(u32::MAX)
}

/// Reject signals weaker than `threshold_dbm`.
///
/// # Errors
///
/// Returns [`LedgerError::OutOfRange`] when `rssi_dbm < threshold_dbm`.
pub fn check_proximity(rssi_dbm: i16, threshold_dbm: i16) -> Result<(), LedgerError> {
    if rssi_dbm < threshold_dbm {
        return Err(LedgerError::OutOfRange {
            rssi_dbm,
            threshold_dbm,
        });
    }
    Ok(())
}

/// Ordered attendance records plus the timing rules that derive `late`.
#[derive(Debug)]
pub struct AttendanceLedger {
    records: Vec<StudentRecord>,
    index: HashMap<String, usize>,
    opened_at: DateTime<Utc>,
    late_after: Duration,
    clock: SharedClock,
}

impl AttendanceLedger {
    /// Build a ledger from records, opening it now.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateStudent`] if two records share an id.
    pub fn new(
        records: Vec<StudentRecord>,
        late_after: Duration,
        clock: SharedClock,
    ) -> Result<Self, LedgerError> {
        let mut index = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if index.insert(record.id.clone(), i).is_some() {
                return Err(LedgerError::DuplicateStudent(record.id.clone()));
            }
        }

        Ok(Self {
            records,
            index,
            opened_at: clock.now(),
            late_after,
            clock,
        })
    }

    /// When the current class period opened.
    #[must_use]
    pub const fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// All records in roster order.
    #[must_use]
    pub fn records(&self) -> &[StudentRecord] {
        &self.records
    }

    /// Look up a record.
    #[must_use]
    pub fn get(&self, student_id: &str) -> Option<&StudentRecord> {
        self.index.get(student_id).map(|&i| &self.records[i])
    }

    /// Move an absent student to pending after their signal was detected.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownStudent`] for a missing id,
    /// [`LedgerError::InvalidTransition`] unless the student is absent.
    pub fn mark_pending(
        &mut self,
        student_id: &str,
        rssi_dbm: Option<i16>,
    ) -> Result<&StudentRecord, LedgerError> {
        let now = self.clock.now();
        let record = self.record_mut(student_id)?;

        if record.status != AttendanceStatus::Absent {
            return Err(LedgerError::InvalidTransition {
                student_id: student_id.to_string(),
                from: record.status,
                to: AttendanceStatus::Pending,
            });
        }

        record.status = AttendanceStatus::Pending;
        record.pending_since_utc = Some(now);
        if rssi_dbm.is_some() {
            record.rssi_dbm = rssi_dbm;
        }

        info!(student_id, ?rssi_dbm, "Student pending confirmation");
        Ok(record)
    }

    /// Confirm a pending student, stamping their arrival.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownStudent`] for a missing id,
    /// [`LedgerError::InvalidTransition`] unless the student is pending.
    pub fn confirm(&mut self, student_id: &str) -> Result<&StudentRecord, LedgerError> {
        let now = self.clock.now();
        // No representable deadline means nobody is late.
        let on_time = match self.opened_at.checked_add_signed(self.late_after) {
            Some(deadline) => now <= deadline,
            None => true,
        };
        let record = self.record_mut(student_id)?;

        let next = if on_time {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Late
        };

        if record.status != AttendanceStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                student_id: student_id.to_string(),
                from: record.status,
                to: next,
            });
        }

        record.status = next;
        record.arrived_at_utc = Some(now);
        record.pending_since_utc = None;

        info!(student_id, status = %next, "Attendance confirmed");
        Ok(record)
    }

    /// Start a new class period now without touching the records, so the
    /// late threshold counts from this moment.
    pub fn reopen(&mut self) {
        self.opened_at = self.clock.now();
        info!(opened_at = %self.opened_at, "Class period opened");
    }

    /// Return every student to absent and reopen the ledger now.
    pub fn reset(&mut self) {
        for record in &mut self.records {
            record.status = AttendanceStatus::Absent;
            record.arrived_at_utc = None;
            record.rssi_dbm = None;
            record.pending_since_utc = None;
        }
        self.opened_at = self.clock.now();
        info!(students = self.records.len(), "Ledger reset");
    }

    /// Aggregate counts and rate.
    #[must_use]
    pub fn stats(&self) -> AttendanceStats {
        let count = |status: AttendanceStatus| {
            self.records.iter().filter(|r| r.status == status).count()
        };

        let total = self.records.len();
        let late = count(AttendanceStatus::Late);
        let present = count(AttendanceStatus::Present) + late;
        let rate = attendance_rate(present, total);

        AttendanceStats {
            total_students: total,
            present_students: present,
            late_students: late,
            pending_students: count(AttendanceStatus::Pending),
            absent_students: count(AttendanceStatus::Absent),
            attendance_rate: rate,
            rate_band: RateBand::for_rate(rate),
        }
    }

    /// Copy of the records for export.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StudentRecord> {
        self.records.clone()
    }

    fn record_mut(&mut self, student_id: &str) -> Result<&mut StudentRecord, LedgerError> {
        let i = *self
            .index
            .get(student_id)
            .ok_or_else(|| LedgerError::UnknownStudent(student_id.to_string()))?;
        Ok(&mut self.records[i])
    }
}

/// The six-student sample class, arrival times on `date` in `tz`.
#[must_use]
pub fn demo_roster(date: NaiveDate, tz: Tz) -> Vec<StudentRecord> {
    let at = |h: u32, m: u32| {
        NaiveTime::from_hms_opt(h, m, 0)
            .map(|t| date.and_time(t))
            .and_then(|dt| tz.from_local_datetime(&dt).earliest())
            .map(|dt| dt.with_timezone(&Utc))
    };

    let seed = |id: &str,
                name: &str,
                roll: &str,
                status: AttendanceStatus,
                arrived: Option<DateTime<Utc>>,
                rssi: Option<i16>| StudentRecord {
        id: id.to_string(),
        name: name.to_string(),
        roll_number: roll.to_string(),
        status,
        arrived_at_utc: arrived,
        rssi_dbm: rssi,
        pending_since_utc: None,
    };

    vec![
        seed("1", "Alice Johnson", "CS2021001", AttendanceStatus::Present, at(9, 15), Some(-42)),
        seed("2", "Bob Smith", "CS2021002", AttendanceStatus::Present, at(9, 16), Some(-38)),
        seed("3", "Charlie Brown", "CS2021003", AttendanceStatus::Late, at(9, 25), Some(-55)),
        seed("4", "Diana Prince", "CS2021004", AttendanceStatus::Present, at(9, 14), Some(-45)),
        seed("5", "Edward Wilson", "CS2021005", AttendanceStatus::Absent, None, None),
        seed("6", "Fiona Davis", "CS2021006", AttendanceStatus::Present, at(9, 13), Some(-41)),
    ]
}
