//! Row shapes stored in partition artifacts.

use serde::{Deserialize, Serialize};

/// One normalized settlement line (`fact_settlement.parquet`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub tenant_id: String,
    pub platform: String,
    pub upload_id: String,
    pub job_id: String,
    pub year: i32,
    pub month: i32,
    pub order_id: String,
    pub line_count: Option<i32>,
    pub line_no: Option<i32>,
    pub internal_sku: String,
    pub fin_code: String,
    pub qty_sold: f64,
    pub recv_customer: f64,
    pub recv_platform: f64,
    pub extra_charge: f64,
    pub fee_platform_comm: f64,
    pub fee_affiliate: f64,
    pub fee_other: f64,
    pub net_received: f64,
    pub source_file: String,
    pub source_line: Option<i32>,
    pub row_key: String,
    pub row_hash: String,
    pub rule_version: String,
    pub validation_status: String,
    /// JSON-encoded list of validation warnings.
    pub validation_warnings: String,
}

impl FactRow {
    pub fn total_fees(&self) -> f64 {
        self.fee_platform_comm + self.fee_affiliate + self.fee_other
    }

    /// Net amount implied by the receivable and fee columns.
    pub fn expected_net(&self) -> f64 {
        self.recv_customer + self.recv_platform + self.extra_charge - self.total_fees()
    }
}

/// Month/SKU aggregate (`agg_month_sku.parquet`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggRow {
    pub tenant_id: String,
    pub platform: String,
    pub upload_id: String,
    pub job_id: String,
    pub year: i32,
    pub month: i32,
    pub internal_sku: String,
    pub qty_sold_sum: f64,
    pub income_total_sum: f64,
    pub fee_platform_comm_sum: f64,
    pub fee_other_sum: f64,
    pub net_received_sum: f64,
    pub record_count: i64,
}

impl AggRow {
    /// Net amount implied by income minus both fee columns.
    pub fn expected_net(&self) -> f64 {
        self.income_total_sum - self.fee_platform_comm_sum - self.fee_other_sum
    }
}
