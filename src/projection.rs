use crate::models::{CellValue, Field, RecordSet, Scalar, SheetProjection};

/// Extract-or-default: the single rule every projected cell goes through.
/// Absent fields and non-scalar values become the empty string. Text holding
/// a finite number (the source exports number fields as strings) becomes a
/// number; formulas are never evaluated.
pub fn cell(field: &Option<Field<Scalar>>) -> CellValue {
    match field.as_ref().and_then(|field| field.value.as_ref()) {
        Some(Scalar::String(text)) => match text.parse::<f64>() {
            Ok(number) if number.is_finite() => CellValue::Number(number),
            _ => CellValue::Text(text.clone()),
        },
        Some(Scalar::Number(number)) => number
            .as_f64()
            .map(CellValue::Number)
            .unwrap_or_else(|| CellValue::Text(number.to_string())),
        Some(Scalar::Bool(flag)) => CellValue::Text(flag.to_string()),
        _ => CellValue::empty(),
    }
}

fn text_cell(text: Option<&str>) -> CellValue {
    text.map(CellValue::from).unwrap_or_default()
}

/// Projects the records matching `employee` and `period` into the fixed
/// value blocks of one sheet. First match wins for self and average rows;
/// every matching peer record becomes a row, in source order.
pub fn project(employee: &str, period: &str, records: &RecordSet) -> SheetProjection {
    let matches = |name: Option<&str>, record_period: Option<&str>| {
        name == Some(employee) && record_period == Some(period)
    };

    let self_row = records
        .self_records
        .iter()
        .find(|record| matches(record.employee(), record.period()))
        .map(|record| {
            [
                cell(&record.root),
                cell(&record.grade),
                cell(&record.skill),
                cell(&record.business),
                cell(&record.team_management),
                cell(&record.total_average),
                cell(&record.comment),
            ]
        })
        .unwrap_or_default();

    let average_row = records
        .average_records
        .iter()
        .find(|record| matches(record.employee(), record.period()))
        .map(|record| {
            [
                cell(&record.evaluation_skill),
                cell(&record.evaluation_business),
                cell(&record.evaluation_management),
                cell(&record.other_evaluation),
            ]
        })
        .unwrap_or_default();

    let peer_rows = records
        .peer_records
        .iter()
        .filter(|record| matches(record.employee(), record.period()))
        .map(|record| {
            [
                text_cell(record.rater()),
                cell(&record.rater_route),
                cell(&record.rater_grade),
                cell(&record.skill),
                cell(&record.business),
                cell(&record.team_management),
                cell(&record.other_evaluation),
                cell(&record.comment),
            ]
        })
        .collect();

    SheetProjection {
        self_row,
        average_row,
        peer_rows,
    }
}
