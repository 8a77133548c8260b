use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::{SlotFilter, SlotUpdate};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSlot {
        id: Ulid,
        caregiver_id: Ulid,
        start: Ms,
        end: Ms,
        capacity: u32,
        rate: i64,
        recurrence: Option<String>,
        notes: Option<String>,
    },
    UpdateSlot {
        id: Ulid,
        update: SlotUpdate,
    },
    DeleteSlot {
        id: Ulid,
    },
    InsertReservation {
        id: Ulid,
        slot_id: Ulid,
        children: u32,
        spots: u32,
    },
    DeleteReservation {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        slot_id: Ulid,
        children: u32,
        address: Option<String>,
        reservation_id: Option<Ulid>,
    },
    InsertDirectBooking {
        id: Ulid,
        caregiver_id: Ulid,
        start: Ms,
        end: Ms,
        children: u32,
        rate: i64,
        address: Option<String>,
        confirmed: bool,
    },
    DeleteBooking {
        id: Ulid,
    },
    InsertPaymentEvent {
        booking_id: Ulid,
        succeeded: bool,
    },
    SelectSlots {
        filter: SlotFilter,
    },
    SelectAvailableSlots {
        filter: SlotFilter,
    },
    SelectRealtimeAvailability {
        caregiver_id: Ulid,
        day: i64,
    },
    SelectReservations {
        slot_id: Ulid,
    },
    SelectBookings {
        caregiver_id: Option<Ulid>,
    },
    SelectDrift {
        caregiver_id: Option<Ulid>,
    },
    ReconcileSlot {
        id: Ulid,
    },
    ReconcileCaregiver {
        id: Ulid,
    },
    ReconcileAll,
    Repair {
        booking_id: Ulid,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();

    // Verbs the SQL grammar doesn't cover are matched on the raw text.
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches(';').to_string();
        if channel == "*" {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten { channel });
    }
    if upper.starts_with("RECONCILE") {
        return parse_reconcile(trimmed);
    }
    if upper.starts_with("REPAIR ") {
        let arg = trimmed[7..].trim().trim_matches(';');
        let booking_id =
            Ulid::from_string(arg).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))?;
        return Ok(Command::Repair { booking_id });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        update @ Statement::Update { .. } => parse_update(update),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_reconcile(trimmed: &str) -> Result<Command, SqlError> {
    let rest = trimmed[9..].trim().trim_matches(';').trim();
    let upper = rest.to_uppercase();
    if upper == "ALL" {
        return Ok(Command::ReconcileAll);
    }
    if upper.starts_with("CAREGIVER ") {
        let arg = rest[10..].trim();
        let id = Ulid::from_string(arg).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))?;
        return Ok(Command::ReconcileCaregiver { id });
    }
    let id = Ulid::from_string(rest).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))?;
    Ok(Command::ReconcileSlot { id })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "slots" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("slots", 6, values.len()));
            }
            Ok(Command::InsertSlot {
                id: parse_ulid(&values[0])?,
                caregiver_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                capacity: parse_u32(&values[4])?,
                rate: parse_i64(&values[5])?,
                recurrence: if values.len() >= 7 {
                    parse_string_or_null(&values[6])?
                } else {
                    None
                },
                notes: if values.len() >= 8 {
                    parse_string_or_null(&values[7])?
                } else {
                    None
                },
            })
        }
        "reservations" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("reservations", 4, values.len()));
            }
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                slot_id: parse_ulid(&values[1])?,
                children: parse_u32(&values[2])?,
                spots: parse_u32(&values[3])?,
            })
        }
        "bookings" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("bookings", 3, values.len()));
            }
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                slot_id: parse_ulid(&values[1])?,
                children: parse_u32(&values[2])?,
                address: if values.len() >= 4 {
                    parse_string_or_null(&values[3])?
                } else {
                    None
                },
                reservation_id: if values.len() >= 5 {
                    parse_ulid_or_null(&values[4])?
                } else {
                    None
                },
            })
        }
        "direct_bookings" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("direct_bookings", 6, values.len()));
            }
            Ok(Command::InsertDirectBooking {
                id: parse_ulid(&values[0])?,
                caregiver_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                children: parse_u32(&values[4])?,
                rate: parse_i64(&values[5])?,
                address: if values.len() >= 7 {
                    parse_string_or_null(&values[6])?
                } else {
                    None
                },
                confirmed: if values.len() >= 8 {
                    parse_bool(&values[7])?
                } else {
                    false
                },
            })
        }
        "payment_events" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("payment_events", 2, values.len()));
            }
            let booking_id = parse_ulid(&values[0])?;
            let succeeded = match parse_string_or_null(&values[1])? {
                Some(outcome) => match outcome.as_str() {
                    "succeeded" => true,
                    "failed" => false,
                    other => {
                        return Err(SqlError::Parse(format!("bad payment outcome: {other}")))
                    }
                },
                None => return Err(SqlError::Parse("payment outcome is NULL".into())),
            };
            Ok(Command::InsertPaymentEvent {
                booking_id,
                succeeded,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(update: &ast::Statement) -> Result<Command, SqlError> {
    let Statement::Update {
        table,
        assignments,
        selection,
        ..
    } = update
    else {
        return Err(SqlError::Unsupported("not an UPDATE".into()));
    };

    let name = table_factor_name(&table.relation)?;
    if name != "slots" {
        return Err(SqlError::UnknownTable(name));
    }
    let id = extract_where_id(selection)?;

    let mut out = SlotUpdate::default();
    let (mut start, mut end) = (None, None);
    for assignment in assignments {
        let col = assignment_column(assignment)?;
        match col.as_str() {
            "start" => start = Some(parse_i64(&assignment.value)?),
            "end" => end = Some(parse_i64(&assignment.value)?),
            "capacity" | "total_capacity" => {
                out.total_capacity = Some(parse_u32(&assignment.value)?)
            }
            "rate" | "base_rate" => out.base_rate = Some(parse_i64(&assignment.value)?),
            "current_rate" => out.current_rate = Some(parse_i64(&assignment.value)?),
            "status" => {
                let s = parse_string_or_null(&assignment.value)?
                    .ok_or_else(|| SqlError::Parse("status is NULL".into()))?;
                out.status = Some(parse_slot_status(&s)?);
            }
            "recurrence" => out.recurrence = parse_string_or_null(&assignment.value)?,
            "notes" => out.notes = parse_string_or_null(&assignment.value)?,
            other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
        }
    }
    // The window moves as a unit.
    out.span = match (start, end) {
        (Some(start), Some(end)) => Some(Span { start, end }),
        (None, None) => None,
        _ => {
            return Err(SqlError::Parse(
                "start and \"end\" must be updated together".into(),
            ))
        }
    };

    Ok(Command::UpdateSlot { id, update: out })
}

fn parse_slot_status(s: &str) -> Result<SlotStatus, SqlError> {
    match s {
        "available" => Ok(SlotStatus::Available),
        "booked" => Ok(SlotStatus::Booked),
        "cancelled" => Ok(SlotStatus::Cancelled),
        "expired" => Ok(SlotStatus::Expired),
        other => Err(SqlError::Parse(format!("bad slot status: {other}"))),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "slots" => Ok(Command::DeleteSlot { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
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

    let mut filters = SelectFilters::default();
    if let Some(selection) = &select.selection {
        extract_select_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            filter: filters.into_slot_filter()?,
        }),
        "available_slots" => Ok(Command::SelectAvailableSlots {
            filter: filters.into_slot_filter()?,
        }),
        "realtime_availability" => Ok(Command::SelectRealtimeAvailability {
            caregiver_id: filters
                .caregiver_id
                .ok_or(SqlError::MissingFilter("caregiver_id"))?,
            day: filters.day.ok_or(SqlError::MissingFilter("day"))?,
        }),
        "reservations" => Ok(Command::SelectReservations {
            slot_id: filters.slot_id.ok_or(SqlError::MissingFilter("slot_id"))?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            caregiver_id: filters.caregiver_id,
        }),
        "drift" => Ok(Command::SelectDrift {
            caregiver_id: filters.caregiver_id,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct SelectFilters {
    caregiver_id: Option<Ulid>,
    slot_id: Option<Ulid>,
    day: Option<i64>,
    day_from: Option<i64>,
    day_to: Option<i64>,
    min_available: Option<u32>,
}

impl SelectFilters {
    fn into_slot_filter(self) -> Result<SlotFilter, SqlError> {
        if let (Some(from), Some(to)) = (self.day_from, self.day_to)
            && to.saturating_sub(from) > crate::limits::MAX_QUERY_WINDOW_MS / MS_PER_DAY
        {
            return Err(SqlError::Unsupported("day range wider than one year".into()));
        }
        Ok(SlotFilter {
            caregiver_id: self.caregiver_id,
            day: self.day,
            day_from: self.day_from,
            day_to: self.day_to,
            min_available: self.min_available,
        })
    }
}

fn extract_select_filters(expr: &Expr, filters: &mut SelectFilters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_select_filters(left, filters)?;
                extract_select_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("caregiver_id") => filters.caregiver_id = Some(parse_ulid_expr(right)?),
                Some("slot_id") => filters.slot_id = Some(parse_ulid_expr(right)?),
                Some("day") => filters.day = Some(parse_i64_expr(right)?),
                _ => {}
            },
            ast::BinaryOperator::GtEq => match expr_column_name(left).as_deref() {
                Some("day") => filters.day_from = Some(parse_i64_expr(right)?),
                Some("available_spots") => filters.min_available = Some(parse_u32(right)?),
                _ => {}
            },
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("day") {
                    filters.day_to = Some(parse_i64_expr(right)?);
                }
            }
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
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(Some(
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))?,
            )),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
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

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_slot() {
        let sql = format!(
            r#"INSERT INTO slots (id, caregiver_id, start, "end", capacity, rate) VALUES ('{ID}', '{ID}', 1000, 2000, 3, 2500)"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertSlot {
                id,
                capacity,
                rate,
                recurrence,
                notes,
                ..
            } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(capacity, 3);
                assert_eq!(rate, 2500);
                assert_eq!(recurrence, None);
                assert_eq!(notes, None);
            }
            _ => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_slot_with_recurrence_and_notes() {
        let sql = format!(
            r#"INSERT INTO slots (id, caregiver_id, start, "end", capacity, rate, recurrence, notes) VALUES ('{ID}', '{ID}', 1000, 2000, 3, 2500, 'weekly', 'bring snacks')"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertSlot { recurrence, notes, .. } => {
                assert_eq!(recurrence.as_deref(), Some("weekly"));
                assert_eq!(notes.as_deref(), Some("bring snacks"));
            }
            _ => panic!("expected InsertSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_slot() {
        let sql = format!("UPDATE slots SET capacity = 5, current_rate = 3000 WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateSlot { id, update } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(update.total_capacity, Some(5));
                assert_eq!(update.current_rate, Some(3000));
                assert_eq!(update.span, None);
            }
            _ => panic!("expected UpdateSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_slot_status_cancelled() {
        let sql = format!("UPDATE slots SET status = 'cancelled' WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateSlot { update, .. } => {
                assert_eq!(update.status, Some(SlotStatus::Cancelled));
            }
            _ => panic!("expected UpdateSlot, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_slot_half_window_errors() {
        let sql = format!("UPDATE slots SET start = 1000 WHERE id = '{ID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_delete_slot() {
        let sql = format!("DELETE FROM slots WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::DeleteSlot { .. }));
    }

    #[test]
    fn parse_insert_reservation() {
        let sql =
            format!("INSERT INTO reservations (id, slot_id, children, spots) VALUES ('{ID}', '{ID}', 2, 2)");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertReservation { children, spots, .. } => {
                assert_eq!(children, 2);
                assert_eq!(spots, 2);
            }
            _ => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_with_reservation() {
        let sql = format!(
            "INSERT INTO bookings (id, slot_id, children, address, reservation_id) VALUES ('{ID}', '{ID}', 2, '12 Oak St', '{ID}')"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking {
                address,
                reservation_id,
                ..
            } => {
                assert_eq!(address.as_deref(), Some("12 Oak St"));
                assert!(reservation_id.is_some());
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_minimal() {
        let sql = format!("INSERT INTO bookings (id, slot_id, children) VALUES ('{ID}', '{ID}', 1)");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking { address, reservation_id, .. } => {
                assert_eq!(address, None);
                assert_eq!(reservation_id, None);
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_direct_booking_confirmed() {
        let sql = format!(
            r#"INSERT INTO direct_bookings (id, caregiver_id, start, "end", children, rate, address, confirmed) VALUES ('{ID}', '{ID}', 1000, 2000, 1, 2500, NULL, true)"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertDirectBooking { confirmed, address, .. } => {
                assert!(confirmed);
                assert_eq!(address, None);
            }
            _ => panic!("expected InsertDirectBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_payment_event() {
        let sql = format!("INSERT INTO payment_events (booking_id, outcome) VALUES ('{ID}', 'succeeded')");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::InsertPaymentEvent { succeeded: true, .. }));

        let sql = format!("INSERT INTO payment_events (booking_id, outcome) VALUES ('{ID}', 'failed')");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::InsertPaymentEvent { succeeded: false, .. }));
    }

    #[test]
    fn parse_select_available_slots_day_range() {
        let sql = format!(
            "SELECT * FROM available_slots WHERE caregiver_id = '{ID}' AND day >= 20000 AND day <= 20006"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailableSlots { filter } => {
                assert!(filter.caregiver_id.is_some());
                assert_eq!(filter.day_from, Some(20000));
                assert_eq!(filter.day_to, Some(20006));
                assert_eq!(filter.day, None);
            }
            _ => panic!("expected SelectAvailableSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_min_available_spots() {
        let sql = "SELECT * FROM available_slots WHERE day = 20000 AND available_spots >= 2";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::SelectAvailableSlots { filter } => {
                assert_eq!(filter.day, Some(20000));
                assert_eq!(filter.min_available, Some(2));
            }
            _ => panic!("expected SelectAvailableSlots, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_day_range_too_wide_errors() {
        let sql = "SELECT * FROM available_slots WHERE day >= 0 AND day <= 100000";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_realtime_availability() {
        let sql = format!(
            "SELECT * FROM realtime_availability WHERE caregiver_id = '{ID}' AND day = 20000"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectRealtimeAvailability { caregiver_id, day } => {
                assert_eq!(caregiver_id.to_string(), ID);
                assert_eq!(day, 20000);
            }
            _ => panic!("expected SelectRealtimeAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_realtime_availability_missing_day_errors() {
        let sql = format!("SELECT * FROM realtime_availability WHERE caregiver_id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("day"))));
    }

    #[test]
    fn parse_select_reservations() {
        let sql = format!("SELECT * FROM reservations WHERE slot_id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::SelectReservations { .. }));
    }

    #[test]
    fn parse_select_drift_unfiltered() {
        let cmd = parse_sql("SELECT * FROM drift").unwrap();
        assert!(matches!(cmd, Command::SelectDrift { caregiver_id: None }));
    }

    #[test]
    fn parse_reconcile_verbs() {
        assert!(matches!(parse_sql("RECONCILE ALL"), Ok(Command::ReconcileAll)));
        assert!(matches!(
            parse_sql(&format!("RECONCILE {ID}")),
            Ok(Command::ReconcileSlot { .. })
        ));
        assert!(matches!(
            parse_sql(&format!("RECONCILE CAREGIVER {ID};")),
            Ok(Command::ReconcileCaregiver { .. })
        ));
    }

    #[test]
    fn parse_repair() {
        let cmd = parse_sql(&format!("REPAIR {ID}")).unwrap();
        match cmd {
            Command::Repair { booking_id } => assert_eq!(booking_id.to_string(), ID),
            _ => panic!("expected Repair, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_listen_unlisten() {
        let cmd = parse_sql(&format!("LISTEN slot_{ID}")).unwrap();
        match cmd {
            Command::Listen { channel } => assert_eq!(channel, format!("slot_{ID}")),
            _ => panic!("expected Listen, got {cmd:?}"),
        }
        assert!(matches!(parse_sql("UNLISTEN *"), Ok(Command::UnlistenAll)));
        assert!(matches!(
            parse_sql(&format!("UNLISTEN caregiver_{ID}")),
            Ok(Command::Unlisten { .. })
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
