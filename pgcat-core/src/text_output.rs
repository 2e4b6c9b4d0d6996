//! Minimal human-readable output plugin.
//!
//! Used as the base plugin when no shared library is configured. Options:
//! `include-xids` (default on) and `only-local` (default off).

use crate::callbacks::{
    Change, DecodingContext, Lsn, OriginId, OutputPluginCallbacks, OutputType, Transaction,
};
use crate::catalog::QualifiedName;

pub const MODULE: &str = "text_output";

pub fn plugin_init(cb: &mut OutputPluginCallbacks) {
    cb.startup = Some(startup);
    cb.begin = Some(begin);
    cb.change = Some(change);
    cb.truncate = Some(truncate);
    cb.commit = Some(commit);
    cb.message = Some(message);
    cb.filter_by_origin = Some(filter_by_origin);
    cb.shutdown = Some(shutdown);
}

fn enabled(ctx: &DecodingContext, name: &str, default: bool) -> bool {
    match ctx.option(name) {
        Some(value) => matches!(value, "on" | "true" | "1" | "yes"),
        None => default,
    }
}

fn startup(ctx: &mut DecodingContext, _is_init: bool) {
    ctx.output_options.output_type = OutputType::Textual;
    ctx.output_options.receive_rewrites = false;
}

fn begin(ctx: &mut DecodingContext, txn: &Transaction) {
    if enabled(ctx, "include-xids", true) {
        ctx.write(format!("BEGIN {}", txn.xid));
    } else {
        ctx.write("BEGIN");
    }
}

fn change(ctx: &mut DecodingContext, _txn: &Transaction, change: &Change) {
    match &change.tuple {
        Some(tuple) => ctx.write(format!(
            "table {}: {}: {}",
            change.relation,
            change.action.as_str(),
            tuple
        )),
        None => ctx.write(format!(
            "table {}: {}: (no-tuple-data)",
            change.relation,
            change.action.as_str()
        )),
    }
}

fn truncate(ctx: &mut DecodingContext, _txn: &Transaction, relations: &[QualifiedName]) {
    let names: Vec<String> = relations.iter().map(ToString::to_string).collect();
    ctx.write(format!("table {}: TRUNCATE", names.join(", ")));
}

fn commit(ctx: &mut DecodingContext, txn: &Transaction, commit_lsn: Lsn) {
    if enabled(ctx, "include-xids", true) {
        ctx.write(format!("COMMIT {} at {}", txn.xid, commit_lsn));
    } else {
        ctx.write(format!("COMMIT at {commit_lsn}"));
    }
}

fn message(
    ctx: &mut DecodingContext,
    txn: Option<&Transaction>,
    _lsn: Lsn,
    prefix: &str,
    payload: &[u8],
) {
    ctx.write(format!(
        "message: transactional: {} prefix: {}, sz: {} content:{}",
        u8::from(txn.is_some()),
        prefix,
        payload.len(),
        String::from_utf8_lossy(payload)
    ));
}

fn filter_by_origin(ctx: &DecodingContext, origin_id: OriginId) -> bool {
    !enabled(ctx, "only-local", false) || origin_id.is_local()
}

fn shutdown(_ctx: &mut DecodingContext) {}
