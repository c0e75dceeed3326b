use serde::{Deserialize, Serialize};

/// Raw scalar as exported by the record source.
pub type Scalar = serde_json::Value;

/// A record field: `{"value": ...}`. A missing member and `null` both mean absent.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Field<T> {
    pub value: Option<T>,
}

impl<T> Field<T> {
    pub fn new(value: T) -> Self {
        Self { value: Some(value) }
    }
}

/// Entry of a user field or a reference list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct UserRef {
    pub code: Option<String>,
    pub name: Option<String>,
}

impl UserRef {
    pub fn named(name: &str) -> Self {
        Self {
            code: None,
            name: Some(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SelfAssessmentRecord {
    pub name: Option<Field<String>>,
    pub evaluation_period: Option<Field<String>>,
    pub root: Option<Field<Scalar>>,
    pub grade: Option<Field<Scalar>>,
    pub skill: Option<Field<Scalar>>,
    pub business: Option<Field<Scalar>>,
    pub team_management: Option<Field<Scalar>>,
    pub total_average: Option<Field<Scalar>>,
    pub comment: Option<Field<Scalar>>,
}

impl SelfAssessmentRecord {
    pub fn employee(&self) -> Option<&str> {
        non_empty_text(&self.name)
    }

    pub fn period(&self) -> Option<&str> {
        non_empty_text(&self.evaluation_period)
    }
}

/// One rater's evaluation of one rated employee ("multi record").
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PeerAssessmentRecord {
    pub created_by: Option<Field<UserRef>>,
    #[serde(rename = "creater_route")]
    pub rater_route: Option<Field<Scalar>>,
    #[serde(rename = "creater_grade")]
    pub rater_grade: Option<Field<Scalar>>,
    pub select_employee: Option<Field<Vec<UserRef>>>,
    pub evaluation_period: Option<Field<String>>,
    pub skill: Option<Field<Scalar>>,
    pub business: Option<Field<Scalar>>,
    pub team_management: Option<Field<Scalar>>,
    pub other_evaluation: Option<Field<Scalar>>,
    pub comment: Option<Field<Scalar>>,
}

impl PeerAssessmentRecord {
    /// The rated employee.
    pub fn employee(&self) -> Option<&str> {
        first_reference_name(&self.select_employee)
    }

    pub fn rater(&self) -> Option<&str> {
        self.created_by
            .as_ref()
            .and_then(|field| field.value.as_ref())
            .and_then(|user| user.name.as_deref())
            .filter(|name| !name.is_empty())
    }

    pub fn period(&self) -> Option<&str> {
        non_empty_text(&self.evaluation_period)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AverageRecord {
    pub select_employee: Option<Field<Vec<UserRef>>>,
    pub evaluation_period: Option<Field<String>>,
    pub evaluation_skill: Option<Field<Scalar>>,
    pub evaluation_business: Option<Field<Scalar>>,
    pub evaluation_management: Option<Field<Scalar>>,
    pub other_evaluation: Option<Field<Scalar>>,
}

impl AverageRecord {
    pub fn employee(&self) -> Option<&str> {
        first_reference_name(&self.select_employee)
    }

    pub fn period(&self) -> Option<&str> {
        non_empty_text(&self.evaluation_period)
    }
}

/// The three record collections of one export run, read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RecordSet {
    #[serde(rename = "selfRecords", default)]
    pub self_records: Vec<SelfAssessmentRecord>,
    #[serde(rename = "multiRecords", default)]
    pub peer_records: Vec<PeerAssessmentRecord>,
    #[serde(rename = "averageRecords", default)]
    pub average_records: Vec<AverageRecord>,
}

fn non_empty_text(field: &Option<Field<String>>) -> Option<&str> {
    field
        .as_ref()
        .and_then(|field| field.value.as_deref())
        .filter(|text| !text.is_empty())
}

fn first_reference_name(field: &Option<Field<Vec<UserRef>>>) -> Option<&str> {
    field
        .as_ref()
        .and_then(|field| field.value.as_ref())
        .and_then(|refs| refs.first())
        .and_then(|user| user.name.as_deref())
        .filter(|name| !name.is_empty())
}

/// A typed cell value. Empty text is the default and clears a cell when written.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn empty() -> Self {
        CellValue::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Text(text) if text.is_empty())
    }
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::empty()
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Number(number) => write!(f, "{number}"),
            CellValue::Text(text) => f.write_str(text),
        }
    }
}

/// Sheet-qualified range plus the row-major values to put there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellBlock {
    pub range: String,
    pub values: Vec<Vec<CellValue>>,
}

pub const SELF_COLUMNS: usize = 7;
pub const AVERAGE_COLUMNS: usize = 4;
pub const PEER_COLUMNS: usize = 8;

/// Values extracted for one employee and period.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetProjection {
    pub self_row: [CellValue; SELF_COLUMNS],
    pub average_row: [CellValue; AVERAGE_COLUMNS],
    pub peer_rows: Vec<[CellValue; PEER_COLUMNS]>,
}
