use std::io::Write;

use anyhow::Result;
use chrono::Utc;

use crate::application::{BalanceService, BalanceView, OrderService, Statement};
use crate::domain::{UserId, format_points};

/// Exporter for a user's ledger data
pub struct Exporter<'a> {
    orders: &'a OrderService,
    balance: &'a BalanceService,
}

impl<'a> Exporter<'a> {
    pub fn new(orders: &'a OrderService, balance: &'a BalanceService) -> Self {
        Self { orders, balance }
    }

    /// Collect the balance, orders and withdrawals of a user.
    pub async fn statement(&self, user_id: UserId) -> Result<Statement> {
        let balance = self.balance.balance_snapshot(user_id).await?;
        let orders = self.orders.list_orders(user_id).await?;
        let withdrawals = self.balance.list_withdrawals(user_id).await?;

        Ok(Statement {
            generated_at: Utc::now(),
            balance: BalanceView::from(balance),
            orders,
            withdrawals,
        })
    }

    /// Export the full statement as pretty-printed JSON
    pub async fn export_statement_json<W: Write>(&self, user_id: UserId, mut writer: W) -> Result<()> {
        let statement = self.statement(user_id).await?;
        serde_json::to_writer_pretty(&mut writer, &statement)?;
        writeln!(writer)?;
        Ok(())
    }

    /// Export orders to CSV format
    pub async fn export_orders_csv<W: Write>(&self, user_id: UserId, writer: W) -> Result<usize> {
        let orders = self.orders.list_orders(user_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["number", "status", "accrual", "uploaded_at"])?;

        for order in &orders {
            csv_writer.write_record([
                order.number.clone(),
                order.status.as_str().to_string(),
                order.accrual.map(format_points).unwrap_or_default(),
                order.uploaded_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(orders.len())
    }

    /// Export withdrawals to CSV format
    pub async fn export_withdrawals_csv<W: Write>(
        &self,
        user_id: UserId,
        writer: W,
    ) -> Result<usize> {
        let withdrawals = self.balance.list_withdrawals(user_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["order", "sum", "processed_at"])?;

        for withdrawal in &withdrawals {
            csv_writer.write_record([
                withdrawal.order.clone(),
                format_points(withdrawal.sum),
                withdrawal.processed_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(withdrawals.len())
    }
}
