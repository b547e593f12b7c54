use rusqlite::{params, Connection, OptionalExtension};

use quill_core::Usd;

use crate::error::StoreError;
use crate::types::{now_rfc3339, Payment, PaymentStatus};

fn row_to_payment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Payment> {
    use std::str::FromStr;
    let status = PaymentStatus::from_str(&row.get::<_, String>(9)?)
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    let usd = |i: usize| -> rusqlite::Result<Usd> {
        Usd::parse_db(&row.get::<_, String>(i)?).map_err(|_| rusqlite::Error::InvalidQuery)
    };
    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        charge_id: row.get(2)?,
        stars_amount: row.get(3)?,
        nominal_usd: usd(4)?,
        credited_usd: usd(5)?,
        k1: usd(6)?,
        k2: usd(7)?,
        k3: usd(8)?,
        status,
        invoice_payload: row.get(10)?,
        created_at: row.get(11)?,
        refunded_at: row.get(12)?,
    })
}

const PAY_COLS: &str = "id, user_id, charge_id, stars_amount, nominal_usd, credited_usd, \
                        k1, k2, k3, status, invoice_payload, created_at, refunded_at";

#[allow(clippy::too_many_arguments)]
pub fn insert_completed(
    conn: &Connection,
    user_id: i64,
    charge_id: &str,
    stars_amount: i64,
    nominal_usd: Usd,
    credited_usd: Usd,
    k1: Usd,
    k2: Usd,
    k3: Usd,
    invoice_payload: Option<&str>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO payments (user_id, charge_id, stars_amount, nominal_usd, credited_usd,
                               k1, k2, k3, status, invoice_payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'completed', ?9, ?10)",
        params![
            user_id,
            charge_id,
            stars_amount,
            nominal_usd.to_string(),
            credited_usd.to_string(),
            k1.to_string(),
            k2.to_string(),
            k3.to_string(),
            invoice_payload,
            now_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_by_charge_id(conn: &Connection, charge_id: &str) -> Result<Option<Payment>, StoreError> {
    let sql = format!("SELECT {PAY_COLS} FROM payments WHERE charge_id = ?1");
    Ok(conn
        .query_row(&sql, params![charge_id], row_to_payment)
        .optional()?)
}

pub fn mark_refunded(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let n = conn.execute(
        "UPDATE payments SET status = 'refunded', refunded_at = ?1 WHERE id = ?2",
        params![now_rfc3339(), id],
    )?;
    if n == 0 {
        return Err(StoreError::NotFound(format!("payment {id}")));
    }
    Ok(())
}

pub fn list_for_user(conn: &Connection, user_id: i64, limit: usize) -> Result<Vec<Payment>, StoreError> {
    let sql = format!(
        "SELECT {PAY_COLS} FROM payments WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id, limit as i64], row_to_payment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
