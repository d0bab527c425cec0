//! Parquet encoding/decoding of partition artifacts.
//!
//! The schemas below are the contract between the worker (writer) and the
//! effective-view resolver (reader). Readers tolerate missing optional columns
//! so that older artifacts stay queryable.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{Array, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use super::rows::{AggRow, FactRow};

/// Artifact encoding/decoding failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("parquet error: {0}")]
    Parquet(String),
    #[error("schema mismatch: {0}")]
    Schema(String),
}

fn utf8(name: &str) -> Field {
    Field::new(name, DataType::Utf8, false)
}

fn fact_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        utf8("tenant_id"),
        utf8("platform"),
        utf8("upload_id"),
        utf8("job_id"),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::Int32, false),
        utf8("order_id"),
        Field::new("line_count", DataType::Int32, true),
        Field::new("line_no", DataType::Int32, true),
        utf8("internal_sku"),
        utf8("fin_code"),
        Field::new("qty_sold", DataType::Float64, false),
        Field::new("recv_customer", DataType::Float64, false),
        Field::new("recv_platform", DataType::Float64, false),
        Field::new("extra_charge", DataType::Float64, false),
        Field::new("fee_platform_comm", DataType::Float64, false),
        Field::new("fee_affiliate", DataType::Float64, false),
        Field::new("fee_other", DataType::Float64, false),
        Field::new("net_received", DataType::Float64, false),
        utf8("source_file"),
        Field::new("source_line", DataType::Int32, true),
        utf8("row_key"),
        utf8("row_hash"),
        utf8("rule_version"),
        utf8("validation_status"),
        utf8("validation_warnings"),
    ]))
}

fn agg_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        utf8("tenant_id"),
        utf8("platform"),
        utf8("upload_id"),
        utf8("job_id"),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::Int32, false),
        utf8("internal_sku"),
        Field::new("qty_sold_sum", DataType::Float64, false),
        Field::new("income_total_sum", DataType::Float64, false),
        Field::new("fee_platform_comm_sum", DataType::Float64, false),
        Field::new("fee_other_sum", DataType::Float64, false),
        Field::new("net_received_sum", DataType::Float64, false),
        Field::new("record_count", DataType::Int64, false),
    ]))
}

fn writer_properties() -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some("settlekit".to_string()),
    };
    WriterProperties::builder()
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

fn write_single_batch(schema: Arc<Schema>, batch: &RecordBatch) -> Result<Bytes, CodecError> {
    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer = ArrowWriter::try_new(&mut cursor, schema, Some(writer_properties()))
        .map_err(|e| CodecError::Parquet(format!("writer init failed: {e}")))?;
    writer
        .write(batch)
        .map_err(|e| CodecError::Parquet(format!("write failed: {e}")))?;
    writer
        .close()
        .map_err(|e| CodecError::Parquet(format!("close failed: {e}")))?;
    Ok(Bytes::from(cursor.into_inner()))
}

fn strings<'a, T>(rows: &'a [T], f: impl Fn(&'a T) -> &'a str) -> Arc<StringArray> {
    Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn floats<T>(rows: &[T], f: impl Fn(&T) -> f64) -> Arc<Float64Array> {
    Arc::new(Float64Array::from(rows.iter().map(f).collect::<Vec<_>>()))
}

/// Encode `fact_settlement.parquet`.
pub fn write_fact_rows(rows: &[FactRow]) -> Result<Bytes, CodecError> {
    let schema = fact_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            strings(rows, |r| r.tenant_id.as_str()),
            strings(rows, |r| r.platform.as_str()),
            strings(rows, |r| r.upload_id.as_str()),
            strings(rows, |r| r.job_id.as_str()),
            Arc::new(Int32Array::from(rows.iter().map(|r| r.year).collect::<Vec<_>>())),
            Arc::new(Int32Array::from(rows.iter().map(|r| r.month).collect::<Vec<_>>())),
            strings(rows, |r| r.order_id.as_str()),
            Arc::new(Int32Array::from(rows.iter().map(|r| r.line_count).collect::<Vec<_>>())),
            Arc::new(Int32Array::from(rows.iter().map(|r| r.line_no).collect::<Vec<_>>())),
            strings(rows, |r| r.internal_sku.as_str()),
            strings(rows, |r| r.fin_code.as_str()),
            floats(rows, |r| r.qty_sold),
            floats(rows, |r| r.recv_customer),
            floats(rows, |r| r.recv_platform),
            floats(rows, |r| r.extra_charge),
            floats(rows, |r| r.fee_platform_comm),
            floats(rows, |r| r.fee_affiliate),
            floats(rows, |r| r.fee_other),
            floats(rows, |r| r.net_received),
            strings(rows, |r| r.source_file.as_str()),
            Arc::new(Int32Array::from(rows.iter().map(|r| r.source_line).collect::<Vec<_>>())),
            strings(rows, |r| r.row_key.as_str()),
            strings(rows, |r| r.row_hash.as_str()),
            strings(rows, |r| r.rule_version.as_str()),
            strings(rows, |r| r.validation_status.as_str()),
            strings(rows, |r| r.validation_warnings.as_str()),
        ],
    )
    .map_err(|e| CodecError::Schema(format!("fact batch build failed: {e}")))?;

    write_single_batch(schema, &batch)
}

/// Encode `agg_month_sku.parquet`.
pub fn write_agg_rows(rows: &[AggRow]) -> Result<Bytes, CodecError> {
    let schema = agg_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            strings(rows, |r| r.tenant_id.as_str()),
            strings(rows, |r| r.platform.as_str()),
            strings(rows, |r| r.upload_id.as_str()),
            strings(rows, |r| r.job_id.as_str()),
            Arc::new(Int32Array::from(rows.iter().map(|r| r.year).collect::<Vec<_>>())),
            Arc::new(Int32Array::from(rows.iter().map(|r| r.month).collect::<Vec<_>>())),
            strings(rows, |r| r.internal_sku.as_str()),
            floats(rows, |r| r.qty_sold_sum),
            floats(rows, |r| r.income_total_sum),
            floats(rows, |r| r.fee_platform_comm_sum),
            floats(rows, |r| r.fee_other_sum),
            floats(rows, |r| r.net_received_sum),
            Arc::new(Int64Array::from(rows.iter().map(|r| r.record_count).collect::<Vec<_>>())),
        ],
    )
    .map_err(|e| CodecError::Schema(format!("agg batch build failed: {e}")))?;

    write_single_batch(schema, &batch)
}

fn read_batches(bytes: Bytes) -> Result<Vec<RecordBatch>, CodecError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| CodecError::Parquet(format!("reader init failed: {e}")))?
        .build()
        .map_err(|e| CodecError::Parquet(format!("reader build failed: {e}")))?;

    reader
        .map(|batch| batch.map_err(|e| CodecError::Parquet(format!("read batch failed: {e}"))))
        .collect()
}

fn column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a A, CodecError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| CodecError::Schema(format!("missing column '{name}'")))?
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| CodecError::Schema(format!("column '{name}' has an unexpected type")))
}

fn optional_column<'a, A: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
) -> Result<Option<&'a A>, CodecError> {
    match batch.column_by_name(name) {
        None => Ok(None),
        Some(col) => col
            .as_any()
            .downcast_ref::<A>()
            .map(Some)
            .ok_or_else(|| CodecError::Schema(format!("column '{name}' has an unexpected type"))),
    }
}

fn opt_i32(col: &Int32Array, row: usize) -> Option<i32> {
    (!col.is_null(row)).then(|| col.value(row))
}

fn opt_string(col: Option<&StringArray>, row: usize) -> String {
    col.filter(|c| !c.is_null(row))
        .map(|c| c.value(row).to_string())
        .unwrap_or_default()
}

/// Decode `fact_settlement.parquet`.
pub fn read_fact_rows(bytes: Bytes) -> Result<Vec<FactRow>, CodecError> {
    let mut out = Vec::new();
    for batch in read_batches(bytes)? {
        let tenant_id = column::<StringArray>(&batch, "tenant_id")?;
        let platform = column::<StringArray>(&batch, "platform")?;
        let upload_id = optional_column::<StringArray>(&batch, "upload_id")?;
        let job_id = column::<StringArray>(&batch, "job_id")?;
        let year = column::<Int32Array>(&batch, "year")?;
        let month = column::<Int32Array>(&batch, "month")?;
        let order_id = column::<StringArray>(&batch, "order_id")?;
        let line_count = column::<Int32Array>(&batch, "line_count")?;
        let line_no = column::<Int32Array>(&batch, "line_no")?;
        let internal_sku = column::<StringArray>(&batch, "internal_sku")?;
        let fin_code = column::<StringArray>(&batch, "fin_code")?;
        let qty_sold = column::<Float64Array>(&batch, "qty_sold")?;
        let recv_customer = column::<Float64Array>(&batch, "recv_customer")?;
        let recv_platform = column::<Float64Array>(&batch, "recv_platform")?;
        let extra_charge = column::<Float64Array>(&batch, "extra_charge")?;
        let fee_platform_comm = column::<Float64Array>(&batch, "fee_platform_comm")?;
        let fee_affiliate = column::<Float64Array>(&batch, "fee_affiliate")?;
        let fee_other = column::<Float64Array>(&batch, "fee_other")?;
        let net_received = column::<Float64Array>(&batch, "net_received")?;
        let source_file = optional_column::<StringArray>(&batch, "source_file")?;
        let source_line = optional_column::<Int32Array>(&batch, "source_line")?;
        let row_key = optional_column::<StringArray>(&batch, "row_key")?;
        let row_hash = optional_column::<StringArray>(&batch, "row_hash")?;
        let rule_version = optional_column::<StringArray>(&batch, "rule_version")?;
        let validation_status = optional_column::<StringArray>(&batch, "validation_status")?;
        let validation_warnings = optional_column::<StringArray>(&batch, "validation_warnings")?;

        for row in 0..batch.num_rows() {
            out.push(FactRow {
                tenant_id: tenant_id.value(row).to_string(),
                platform: platform.value(row).to_string(),
                upload_id: opt_string(upload_id, row),
                job_id: job_id.value(row).to_string(),
                year: year.value(row),
                month: month.value(row),
                order_id: order_id.value(row).to_string(),
                line_count: opt_i32(line_count, row),
                line_no: opt_i32(line_no, row),
                internal_sku: internal_sku.value(row).to_string(),
                fin_code: fin_code.value(row).to_string(),
                qty_sold: qty_sold.value(row),
                recv_customer: recv_customer.value(row),
                recv_platform: recv_platform.value(row),
                extra_charge: extra_charge.value(row),
                fee_platform_comm: fee_platform_comm.value(row),
                fee_affiliate: fee_affiliate.value(row),
                fee_other: fee_other.value(row),
                net_received: net_received.value(row),
                source_file: opt_string(source_file, row),
                source_line: source_line.and_then(|c| opt_i32(c, row)),
                row_key: opt_string(row_key, row),
                row_hash: opt_string(row_hash, row),
                rule_version: opt_string(rule_version, row),
                validation_status: opt_string(validation_status, row),
                validation_warnings: opt_string(validation_warnings, row),
            });
        }
    }
    Ok(out)
}

/// Decode `agg_month_sku.parquet`.
pub fn read_agg_rows(bytes: Bytes) -> Result<Vec<AggRow>, CodecError> {
    let mut out = Vec::new();
    for batch in read_batches(bytes)? {
        let tenant_id = column::<StringArray>(&batch, "tenant_id")?;
        let platform = column::<StringArray>(&batch, "platform")?;
        let upload_id = optional_column::<StringArray>(&batch, "upload_id")?;
        let job_id = column::<StringArray>(&batch, "job_id")?;
        let year = column::<Int32Array>(&batch, "year")?;
        let month = column::<Int32Array>(&batch, "month")?;
        let internal_sku = column::<StringArray>(&batch, "internal_sku")?;
        let qty_sold_sum = column::<Float64Array>(&batch, "qty_sold_sum")?;
        let income_total_sum = column::<Float64Array>(&batch, "income_total_sum")?;
        let fee_platform_comm_sum = column::<Float64Array>(&batch, "fee_platform_comm_sum")?;
        let fee_other_sum = column::<Float64Array>(&batch, "fee_other_sum")?;
        let net_received_sum = column::<Float64Array>(&batch, "net_received_sum")?;
        let record_count = column::<Int64Array>(&batch, "record_count")?;

        for row in 0..batch.num_rows() {
            out.push(AggRow {
                tenant_id: tenant_id.value(row).to_string(),
                platform: platform.value(row).to_string(),
                upload_id: opt_string(upload_id, row),
                job_id: job_id.value(row).to_string(),
                year: year.value(row),
                month: month.value(row),
                internal_sku: internal_sku.value(row).to_string(),
                qty_sold_sum: qty_sold_sum.value(row),
                income_total_sum: income_total_sum.value(row),
                fee_platform_comm_sum: fee_platform_comm_sum.value(row),
                fee_other_sum: fee_other_sum.value(row),
                net_received_sum: net_received_sum.value(row),
                record_count: record_count.value(row),
            });
        }
    }
    Ok(out)
}
