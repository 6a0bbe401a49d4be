use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{ExamDraft, ExamRef, Placement};

/// Parsed command from SQL input. Values are positional, matching the
/// documented column order; column name lists are accepted but not
/// interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        name: String,
        capacity: u32,
        building: Option<String>,
    },
    UpdateRoom {
        id: Ulid,
        name: Option<String>,
        capacity: Option<u32>,
        building: Option<String>,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertModule {
        ordinal: u16,
        start_min: u16,
        end_min: u16,
    },
    InsertExam {
        id: Ulid,
        subject: String,
        modules_required: u16,
    },
    DeleteExam {
        id: Ulid,
    },
    /// One scheduling commit. Multi-row VALUES become one all-or-nothing
    /// batch; every row must target the same exam.
    InsertReservations {
        exam: ExamRef,
        placements: Vec<Placement>,
    },
    MoveReservation {
        id: Ulid,
        room_id: Ulid,
        date: NaiveDate,
        ordinals: Vec<u16>,
    },
    ConfirmReservation {
        id: Ulid,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectRooms {
        id: Option<Ulid>,
    },
    SelectModules,
    SelectExams {
        id: Option<Ulid>,
    },
    SelectReservations {
        room_id: Option<Ulid>,
        date: Option<NaiveDate>,
    },
    SelectAvailability {
        room_id: Ulid,
        date: NaiveDate,
        run: Option<u16>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "rooms" => {
            let values = &rows[0];
            if values.len() < 2 {
                return Err(SqlError::WrongArity("rooms", 2, values.len()));
            }
            Ok(Command::InsertRoom {
                id: parse_ulid_expr(&values[0])?,
                name: parse_string_expr(&values[1])?,
                capacity: if values.len() >= 3 {
                    parse_u32(&values[2])?
                } else {
                    0
                },
                building: if values.len() >= 4 {
                    parse_string_or_null(&values[3])?
                } else {
                    None
                },
            })
        }
        "modules" => {
            let values = &rows[0];
            if values.len() < 3 {
                return Err(SqlError::WrongArity("modules", 3, values.len()));
            }
            Ok(Command::InsertModule {
                ordinal: parse_u16(&values[0])?,
                start_min: parse_u16(&values[1])?,
                end_min: parse_u16(&values[2])?,
            })
        }
        "exams" => {
            let values = &rows[0];
            if values.len() < 3 {
                return Err(SqlError::WrongArity("exams", 3, values.len()));
            }
            Ok(Command::InsertExam {
                id: parse_ulid_expr(&values[0])?,
                subject: parse_string_expr(&values[1])?,
                modules_required: parse_u16(&values[2])?,
            })
        }
        "reservations" => parse_insert_reservations(&rows),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Two row shapes:
/// - 5 values `(id, exam_id, room_id, date, modules)` — existing exam;
/// - 7 values `(id, exam_id, subject, modules_required, room_id, date, modules)`
///   — the exam is created inside the same commit.
/// Every row of a multi-row insert must carry the same exam.
fn parse_insert_reservations(rows: &[Vec<Expr>]) -> Result<Command, SqlError> {
    let mut exam: Option<ExamRef> = None;
    let mut placements = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        let row_err = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
        let (row_exam, placement) = match row.len() {
            5 => {
                let exam_id = parse_ulid_expr(&row[1]).map_err(row_err)?;
                (
                    ExamRef::Existing(exam_id),
                    Placement {
                        reservation_id: parse_ulid_expr(&row[0]).map_err(row_err)?,
                        room_id: parse_ulid_expr(&row[2]).map_err(row_err)?,
                        date: parse_date_expr(&row[3]).map_err(row_err)?,
                        ordinals: parse_ordinals_expr(&row[4]).map_err(row_err)?,
                    },
                )
            }
            7 => (
                ExamRef::Draft(ExamDraft {
                    id: parse_ulid_expr(&row[1]).map_err(row_err)?,
                    subject: parse_string_expr(&row[2]).map_err(row_err)?,
                    modules_required: parse_u16(&row[3]).map_err(row_err)?,
                }),
                Placement {
                    reservation_id: parse_ulid_expr(&row[0]).map_err(row_err)?,
                    room_id: parse_ulid_expr(&row[4]).map_err(row_err)?,
                    date: parse_date_expr(&row[5]).map_err(row_err)?,
                    ordinals: parse_ordinals_expr(&row[6]).map_err(row_err)?,
                },
            ),
            n => return Err(SqlError::WrongArity("reservations", 5, n)),
        };

        match &exam {
            None => exam = Some(row_exam),
            Some(prev) if *prev == row_exam => {}
            Some(_) => {
                return Err(SqlError::Parse(
                    "all reservation rows must target the same exam".into(),
                ));
            }
        }
        placements.push(placement);
    }

    Ok(Command::InsertReservations {
        exam: exam.ok_or(SqlError::Empty)?,
        placements,
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "rooms" => {
            let (mut name, mut capacity, mut building) = (None, None, None);
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "name" => name = Some(parse_string_expr(&assignment.value)?),
                    "capacity" => capacity = Some(parse_u32(&assignment.value)?),
                    "building" => building = parse_string_or_null(&assignment.value)?,
                    col => return Err(SqlError::Unsupported(format!("rooms column: {col}"))),
                }
            }
            Ok(Command::UpdateRoom {
                id,
                name,
                capacity,
                building,
            })
        }
        "reservations" => {
            let (mut room_id, mut date, mut ordinals, mut confirmed) = (None, None, None, None);
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "room_id" => room_id = Some(parse_ulid_expr(&assignment.value)?),
                    "date" => date = Some(parse_date_expr(&assignment.value)?),
                    "modules" => ordinals = Some(parse_ordinals_expr(&assignment.value)?),
                    "confirmed" => confirmed = Some(parse_bool(&assignment.value)?),
                    col => {
                        return Err(SqlError::Unsupported(format!("reservations column: {col}")));
                    }
                }
            }
            match (room_id, date, ordinals, confirmed) {
                (None, None, None, Some(true)) => Ok(Command::ConfirmReservation { id }),
                (None, None, None, Some(false)) => Err(SqlError::Unsupported(
                    "unconfirming a reservation".into(),
                )),
                (Some(room_id), Some(date), Some(ordinals), None) => {
                    Ok(Command::MoveReservation {
                        id,
                        room_id,
                        date,
                        ordinals,
                    })
                }
                _ => Err(SqlError::Parse(
                    "a move sets room_id, date and modules together; confirmed is set alone"
                        .into(),
                )),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "exams" => Ok(Command::DeleteExam { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms { id: filters.id }),
        "modules" => Ok(Command::SelectModules),
        "exams" => Ok(Command::SelectExams { id: filters.id }),
        "reservations" => Ok(Command::SelectReservations {
            room_id: filters.room_id,
            date: filters.date,
        }),
        "availability" => Ok(Command::SelectAvailability {
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
            run: filters.run,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    id: Option<Ulid>,
    room_id: Option<Ulid>,
    date: Option<NaiveDate>,
    run: Option<u16>,
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_filters(left, filters)?;
                extract_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => filters.id = Some(parse_ulid_expr(right)?),
                Some("room_id") => filters.room_id = Some(parse_ulid_expr(right)?),
                Some("date") => filters.date = Some(parse_date_expr(right)?),
                Some("run") => filters.run = Some(parse_u16(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn assignment_column(assignment: &ast::Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string_expr(expr).map(Some)
}

/// Dates travel as `'YYYY-MM-DD'` literals.
fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

/// Module sets travel as `'{3,4}'` (array literal style) or `'3,4'`.
fn parse_ordinals_expr(expr: &Expr) -> Result<Vec<u16>, SqlError> {
    let s = parse_string_expr(expr)?;
    let inner = s.trim().trim_start_matches('{').trim_end_matches('}');
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u16>()
                .map_err(|e| SqlError::Parse(format!("bad module ordinal {part:?}: {e}")))
        })
        .collect()
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64_expr(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const U1: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const U2: &str = "01BX5ZZKBKACTAV9WEVGEMMVRY";

    #[test]
    fn parse_insert_room() {
        let sql = format!("INSERT INTO rooms (id, name) VALUES ('{U1}', 'A-101')");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertRoom {
                id,
                name,
                capacity,
                building,
            } => {
                assert_eq!(id.to_string(), U1);
                assert_eq!(name, "A-101");
                assert_eq!(capacity, 0);
                assert_eq!(building, None);
            }
            _ => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room_full() {
        let sql = format!(
            "INSERT INTO rooms (id, name, capacity, building) VALUES ('{U1}', 'A-101', 40, 'North')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom {
                capacity, building, ..
            } => {
                assert_eq!(capacity, 40);
                assert_eq!(building.as_deref(), Some("North"));
            }
            cmd => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room_null_building() {
        let sql = format!(
            "INSERT INTO rooms (id, name, capacity, building) VALUES ('{U1}', 'A-101', 40, NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { building, .. } => assert_eq!(building, None),
            cmd => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_module() {
        let sql = "INSERT INTO modules (ordinal, start_min, end_min) VALUES (1, 480, 570)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertModule {
                ordinal: 1,
                start_min: 480,
                end_min: 570
            }
        );
    }

    #[test]
    fn parse_insert_exam() {
        let sql = format!("INSERT INTO exams (id, subject, modules_required) VALUES ('{U1}', 'MAT-201', 2)");
        match parse_sql(&sql).unwrap() {
            Command::InsertExam {
                subject,
                modules_required,
                ..
            } => {
                assert_eq!(subject, "MAT-201");
                assert_eq!(modules_required, 2);
            }
            cmd => panic!("expected InsertExam, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_existing_exam() {
        let sql = format!(
            "INSERT INTO reservations (id, exam_id, room_id, date, modules) VALUES ('{U1}', '{U2}', '{U1}', '2025-07-01', '{{3,4}}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservations { exam, placements } => {
                assert_eq!(exam, ExamRef::Existing(Ulid::from_string(U2).unwrap()));
                assert_eq!(placements.len(), 1);
                assert_eq!(placements[0].ordinals, vec![3, 4]);
                assert_eq!(
                    placements[0].date,
                    NaiveDate::parse_from_str("2025-07-01", "%Y-%m-%d").unwrap()
                );
            }
            cmd => panic!("expected InsertReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_with_draft_exam() {
        let sql = format!(
            "INSERT INTO reservations (id, exam_id, subject, modules_required, room_id, date, modules) \
             VALUES ('{U1}', '{U2}', 'MAT-201', 2, '{U1}', '2025-07-01', '3,4')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservations { exam, placements } => {
                match exam {
                    ExamRef::Draft(draft) => {
                        assert_eq!(draft.id.to_string(), U2);
                        assert_eq!(draft.subject, "MAT-201");
                        assert_eq!(draft.modules_required, 2);
                    }
                    other => panic!("expected draft exam, got {other:?}"),
                }
                assert_eq!(placements[0].ordinals, vec![3, 4]);
            }
            cmd => panic!("expected InsertReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_batch_insert_reservations() {
        let sql = format!(
            "INSERT INTO reservations (id, exam_id, room_id, date, modules) VALUES \
             ('{U1}', '{U2}', '{U1}', '2025-07-01', '{{1,2}}'), \
             ('{U2}', '{U2}', '{U2}', '2025-07-01', '{{1,2}}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservations { placements, .. } => {
                assert_eq!(placements.len(), 2);
            }
            cmd => panic!("expected InsertReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_batch_mixed_exams_rejected() {
        let sql = format!(
            "INSERT INTO reservations (id, exam_id, room_id, date, modules) VALUES \
             ('{U1}', '{U1}', '{U1}', '2025-07-01', '{{1,2}}'), \
             ('{U2}', '{U2}', '{U2}', '2025-07-01', '{{1,2}}')"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_move_reservation() {
        let sql = format!(
            "UPDATE reservations SET room_id = '{U2}', date = '2025-07-02', modules = '{{5,6}}' WHERE id = '{U1}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::MoveReservation {
                id,
                room_id,
                date,
                ordinals,
            } => {
                assert_eq!(id.to_string(), U1);
                assert_eq!(room_id.to_string(), U2);
                assert_eq!(
                    date,
                    NaiveDate::parse_from_str("2025-07-02", "%Y-%m-%d").unwrap()
                );
                assert_eq!(ordinals, vec![5, 6]);
            }
            cmd => panic!("expected MoveReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_confirm_reservation() {
        let sql = format!("UPDATE reservations SET confirmed = true WHERE id = '{U1}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::ConfirmReservation {
                id: Ulid::from_string(U1).unwrap()
            }
        );
    }

    #[test]
    fn parse_partial_move_rejected() {
        let sql = format!("UPDATE reservations SET date = '2025-07-02' WHERE id = '{U1}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_delete_commands() {
        let room = format!("DELETE FROM rooms WHERE id = '{U1}'");
        assert!(matches!(
            parse_sql(&room).unwrap(),
            Command::DeleteRoom { .. }
        ));
        let exam = format!("DELETE FROM exams WHERE id = '{U1}'");
        assert!(matches!(
            parse_sql(&exam).unwrap(),
            Command::DeleteExam { .. }
        ));
        let reservation = format!("DELETE FROM reservations WHERE id = '{U1}'");
        assert!(matches!(
            parse_sql(&reservation).unwrap(),
            Command::DeleteReservation { .. }
        ));
    }

    #[test]
    fn parse_select_availability() {
        let sql =
            format!("SELECT * FROM availability WHERE room_id = '{U1}' AND date = '2025-07-01'");
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { room_id, date, run } => {
                assert_eq!(room_id.to_string(), U1);
                assert_eq!(
                    date,
                    NaiveDate::parse_from_str("2025-07-01", "%Y-%m-%d").unwrap()
                );
                assert_eq!(run, None);
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_with_run() {
        let sql = format!(
            "SELECT * FROM availability WHERE room_id = '{U1}' AND date = '2025-07-01' AND run = 3"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { run, .. } => assert_eq!(run, Some(3)),
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_date() {
        let sql = format!("SELECT * FROM availability WHERE room_id = '{U1}'");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingFilter("date"))
        ));
    }

    #[test]
    fn parse_select_catalogs() {
        assert_eq!(
            parse_sql("SELECT * FROM modules").unwrap(),
            Command::SelectModules
        );
        assert_eq!(
            parse_sql("SELECT * FROM rooms").unwrap(),
            Command::SelectRooms { id: None }
        );
        let sql = format!("SELECT * FROM reservations WHERE room_id = '{U1}' AND date = '2025-07-01'");
        match parse_sql(&sql).unwrap() {
            Command::SelectReservations { room_id, date } => {
                assert!(room_id.is_some());
                assert!(date.is_some());
            }
            cmd => panic!("expected SelectReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_listen() {
        let sql = format!("LISTEN room_{U1}");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::Listen {
                channel: format!("room_{U1}")
            }
        );
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{U1}')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
