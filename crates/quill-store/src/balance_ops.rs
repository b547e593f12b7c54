use rusqlite::{params, Connection};

use quill_core::Usd;

use crate::error::StoreError;
use crate::types::{now_rfc3339, BalanceOperation, OperationType};

fn row_to_op(row: &rusqlite::Row<'_>) -> rusqlite::Result<BalanceOperation> {
    use std::str::FromStr;
    let op_type = OperationType::from_str(&row.get::<_, String>(2)?)
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    let usd = |i: usize| -> rusqlite::Result<Usd> {
        Usd::parse_db(&row.get::<_, String>(i)?).map_err(|_| rusqlite::Error::InvalidQuery)
    };
    Ok(BalanceOperation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        operation_type: op_type,
        amount: usd(3)?,
        balance_before: usd(4)?,
        balance_after: usd(5)?,
        related_payment_id: row.get(6)?,
        related_message_id: row.get(7)?,
        admin_user_id: row.get(8)?,
        description: row.get(9)?,
        created_at: row.get(10)?,
    })
}

const OP_COLS: &str = "id, user_id, operation_type, amount, balance_before, balance_after, \
                       related_payment_id, related_message_id, admin_user_id, description, \
                       created_at";

pub struct NewBalanceOperation<'a> {
    pub user_id: i64,
    pub operation_type: OperationType,
    pub amount: Usd,
    pub balance_before: Usd,
    pub balance_after: Usd,
    pub related_payment_id: Option<i64>,
    pub related_message_id: Option<i64>,
    pub admin_user_id: Option<i64>,
    pub description: Option<&'a str>,
}

pub fn insert(conn: &Connection, op: &NewBalanceOperation<'_>) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO balance_operations (user_id, operation_type, amount, balance_before,
                                         balance_after, related_payment_id, related_message_id,
                                         admin_user_id, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            op.user_id,
            op.operation_type.to_string(),
            op.amount.to_string(),
            op.balance_before.to_string(),
            op.balance_after.to_string(),
            op.related_payment_id,
            op.related_message_id,
            op.admin_user_id,
            op.description,
            now_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Newest first.
pub fn list_for_user(
    conn: &Connection,
    user_id: i64,
    limit: usize,
) -> Result<Vec<BalanceOperation>, StoreError> {
    let sql = format!(
        "SELECT {OP_COLS} FROM balance_operations
         WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id, limit as i64], row_to_op)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Sum of |amount| over USAGE operations at or after `since` (RFC 3339).
/// `since = None` means all time.
pub fn total_usage(
    conn: &Connection,
    user_id: i64,
    since: Option<&str>,
) -> Result<Usd, StoreError> {
    let sql = format!(
        "SELECT {OP_COLS} FROM balance_operations
         WHERE user_id = ?1 AND operation_type = 'usage' AND created_at >= ?2"
    );
    let floor = since.unwrap_or("");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id, floor], row_to_op)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut total = Usd::ZERO;
    for op in rows {
        total += op.amount.abs();
    }
    Ok(total)
}

/// Verify `balance_after = balance_before + amount` for every row.
/// Vacuously true on empty history.
pub fn verify_integrity(conn: &Connection, user_id: i64) -> Result<bool, StoreError> {
    let ops = list_for_user(conn, user_id, i64::MAX as usize)?;
    Ok(ops
        .iter()
        .all(|op| op.balance_after == op.balance_before + op.amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, users};
    use rust_decimal_macros::dec;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        db::init_db(&conn).unwrap();
        users::get_or_create(&mut conn, 1, None, None, None, "m").unwrap();
        conn
    }

    fn op(amount: Usd, before: Usd, after: Usd) -> NewBalanceOperation<'static> {
        NewBalanceOperation {
            user_id: 1,
            operation_type: OperationType::Usage,
            amount,
            balance_before: before,
            balance_after: after,
            related_payment_id: None,
            related_message_id: None,
            admin_user_id: None,
            description: None,
        }
    }

    #[test]
    fn integrity_vacuous_on_empty_history() {
        let conn = test_conn();
        assert!(verify_integrity(&conn, 1).unwrap());
    }

    #[test]
    fn integrity_detects_bad_row() {
        let conn = test_conn();
        insert(
            &conn,
            &op(Usd::new(dec!(-0.05)), Usd::new(dec!(1)), Usd::new(dec!(0.95))),
        )
        .unwrap();
        assert!(verify_integrity(&conn, 1).unwrap());

        insert(
            &conn,
            &op(Usd::new(dec!(-0.05)), Usd::new(dec!(0.95)), Usd::new(dec!(0.91))),
        )
        .unwrap();
        assert!(!verify_integrity(&conn, 1).unwrap());
    }

    #[test]
    fn usage_total_is_absolute_sum() {
        let conn = test_conn();
        insert(
            &conn,
            &op(Usd::new(dec!(-0.05)), Usd::new(dec!(1)), Usd::new(dec!(0.95))),
        )
        .unwrap();
        insert(
            &conn,
            &op(Usd::new(dec!(-0.03)), Usd::new(dec!(0.95)), Usd::new(dec!(0.92))),
        )
        .unwrap();
        let total = total_usage(&conn, 1, None).unwrap();
        assert_eq!(total.to_string(), "0.0800");
    }

    #[test]
    fn history_is_newest_first() {
        let conn = test_conn();
        insert(
            &conn,
            &op(Usd::new(dec!(-0.01)), Usd::new(dec!(1)), Usd::new(dec!(0.99))),
        )
        .unwrap();
        insert(
            &conn,
            &op(Usd::new(dec!(-0.02)), Usd::new(dec!(0.99)), Usd::new(dec!(0.97))),
        )
        .unwrap();
        let ops = list_for_user(&conn, 1, 10).unwrap();
        assert_eq!(ops[0].amount.to_string(), "-0.0200");
        assert_eq!(ops[1].amount.to_string(), "-0.0100");
    }
}
