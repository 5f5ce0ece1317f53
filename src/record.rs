use crate::error::{Result, VaultError};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Oldest age the intake form accepts.
pub const MAX_AGE: u8 = 120;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanType {
    Mri,
    Ct,
    Pet,
    Spect,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Mri => "MRI",
            ScanType::Ct => "CT",
            ScanType::Pet => "PET",
            ScanType::Spect => "SPECT",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MRI" => Ok(ScanType::Mri),
            "CT" => Ok(ScanType::Ct),
            "PET" => Ok(ScanType::Pet),
            "SPECT" => Ok(ScanType::Spect),
            other => Err(VaultError::Validation(format!(
                "unknown scan type '{other}' (expected MRI, CT, PET or SPECT)"
            ))),
        }
    }
}

/// Intake form data for one scan, before any diagnosis exists.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PatientInfo {
    pub name: String,
    pub age: u8,
    pub scan_date: NaiveDate,
    pub scan_type: ScanType,
    pub physician: String,
}

impl PatientInfo {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(VaultError::Validation("patient name must not be empty".into()));
        }
        if self.age > MAX_AGE {
            return Err(VaultError::Validation(format!(
                "age {} is out of range 0..={MAX_AGE}",
                self.age
            )));
        }
        Ok(())
    }

    /// Report labels and values in display order.
    pub fn labelled_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Name", self.name.clone()),
            ("Age", self.age.to_string()),
            ("Scan Date", self.scan_date.to_string()),
            ("Scan Type", self.scan_type.to_string()),
            ("Physician", self.physician.clone()),
        ]
    }
}

/// One completed analysis, as stored in a user's history.
///
/// Field order is the canonical serialization order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Record {
    patient_name: String,
    age: u8,
    scan_date: NaiveDate,
    scan_type: ScanType,
    physician: String,
    diagnosis: String,
    timestamp: NaiveDateTime,
}

impl Record {
    /// Creates a record stamped with the current local time.
    pub fn new(info: PatientInfo, diagnosis: impl Into<String>) -> Result<Self> {
        Self::at(info, diagnosis, Local::now().naive_local())
    }

    pub fn at(
        info: PatientInfo,
        diagnosis: impl Into<String>,
        timestamp: NaiveDateTime,
    ) -> Result<Self> {
        info.validate()?;
        Ok(Self {
            patient_name: info.name,
            age: info.age,
            scan_date: info.scan_date,
            scan_type: info.scan_type,
            physician: info.physician,
            diagnosis: diagnosis.into(),
            timestamp,
        })
    }

    pub fn patient_name(&self) -> &str {
        &self.patient_name
    }

    pub fn age(&self) -> u8 {
        self.age
    }

    pub fn scan_date(&self) -> NaiveDate {
        self.scan_date
    }

    pub fn scan_type(&self) -> ScanType {
        self.scan_type
    }

    pub fn physician(&self) -> &str {
        &self.physician
    }

    pub fn diagnosis(&self) -> &str {
        &self.diagnosis
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn patient_info(&self) -> PatientInfo {
        PatientInfo {
            name: self.patient_name.clone(),
            age: self.age,
            scan_date: self.scan_date,
            scan_type: self.scan_type,
            physician: self.physician.clone(),
        }
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| VaultError::Encoding(e.to_string()))
    }

    pub(crate) fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| VaultError::Encoding(format!("malformed record: {e}")))
    }
}
