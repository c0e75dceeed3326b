//! Fixed cell anchors of the per-employee sheet and A1 range helpers.

use crate::models::{CellBlock, CellValue, SheetProjection};

pub const PERIOD_CELL: &str = "C3";
pub const NAME_CELL: &str = "C4";
pub const SELF_RANGE: &str = "C8:I8";
pub const AVERAGE_RANGE: &str = "E9:H9";

/// Peer rows start right below the average row and span columns B through I.
pub const PEER_FIRST_ROW: u32 = 10;
pub const PEER_FIRST_COLUMN: &str = "B";
pub const PEER_LAST_COLUMN: &str = "I";

/// Prefixes an A1 reference with a quoted sheet title: `'Sato'!C3`.
pub fn qualify(sheet_title: &str, a1: &str) -> String {
    format!("'{}'!{}", sheet_title.replace('\'', "''"), a1)
}

/// The peer region sized to exactly `rows` rows, or `None` when there are none.
pub fn peer_range(rows: usize) -> Option<String> {
    if rows == 0 {
        return None;
    }
    let last_row = PEER_FIRST_ROW as usize + rows - 1;
    Some(format!(
        "{PEER_FIRST_COLUMN}{PEER_FIRST_ROW}:{PEER_LAST_COLUMN}{last_row}"
    ))
}

/// Builds every range write for one employee sheet titled `employee`.
pub fn employee_blocks(employee: &str, period: &str, projection: &SheetProjection) -> Vec<CellBlock> {
    let mut blocks = vec![
        CellBlock {
            range: qualify(employee, PERIOD_CELL),
            values: vec![vec![CellValue::from(period)]],
        },
        CellBlock {
            range: qualify(employee, NAME_CELL),
            values: vec![vec![CellValue::from(employee)]],
        },
        CellBlock {
            range: qualify(employee, SELF_RANGE),
            values: vec![projection.self_row.to_vec()],
        },
        CellBlock {
            range: qualify(employee, AVERAGE_RANGE),
            values: vec![projection.average_row.to_vec()],
        },
    ];

    if let Some(range) = peer_range(projection.peer_rows.len()) {
        blocks.push(CellBlock {
            range: qualify(employee, &range),
            values: projection.peer_rows.iter().map(|row| row.to_vec()).collect(),
        });
    }

    blocks
}

/// Splits `'Title'!A1:B2` (or `Title!A1`) into the unquoted title and the A1 part.
pub fn split_qualified(range: &str) -> Option<(String, &str)> {
    let (sheet, a1) = range.rsplit_once('!')?;
    let title = match sheet.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(quoted) => quoted.replace("''", "'"),
        None => sheet.to_string(),
    };
    Some((title, a1))
}

/// Parse a cell reference like "A1" into (col, row), both 0-indexed.
pub fn parse_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let mut col: u32 = 0;
    let mut row: u32 = 0;
    let mut saw_col = false;
    let mut saw_row = false;

    for ch in cell_ref.trim().chars() {
        if ch == '$' {
            continue;
        }
        if ch.is_ascii_alphabetic() && !saw_row {
            let upper = ch.to_ascii_uppercase();
            col = col
                .checked_mul(26)?
                .checked_add(upper as u32 - 'A' as u32 + 1)?;
            saw_col = true;
        } else if ch.is_ascii_digit() {
            row = row.checked_mul(10)?.checked_add(ch as u32 - '0' as u32)?;
            saw_row = true;
        } else {
            return None;
        }
    }

    if !saw_col || !saw_row || row == 0 {
        return None;
    }

    Some((col - 1, row - 1))
}

/// Parse "A1:B10" or "A1" into (start_row, start_col, end_row, end_col).
pub fn parse_cell_range(range: &str) -> Option<(u32, u32, u32, u32)> {
    if let Some((start, end)) = range.split_once(':') {
        let (start_col, start_row) = parse_cell_ref(start)?;
        let (end_col, end_row) = parse_cell_ref(end)?;
        Some((start_row, start_col, end_row, end_col))
    } else {
        let (start_col, start_row) = parse_cell_ref(range)?;
        Some((start_row, start_col, start_row, start_col))
    }
}

/// Formats 0-indexed (col, row) as an A1 reference.
pub fn cell_name(col: u32, row: u32) -> String {
    let mut letters = Vec::new();
    let mut n = col + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect::<String>() + &(row + 1).to_string()
}
