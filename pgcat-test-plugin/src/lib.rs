//! Output plugin built as a shared library so the loader can be tested
//! against a real `dlopen`. Fills every slot; its own origin filter accepts
//! everything.

use pgcat_core::callbacks::{
    Change, DecodingContext, Lsn, OriginId, OutputPluginCallbacks, Transaction,
};
use pgcat_core::catalog::QualifiedName;

pub fn plugin_init(cb: &mut OutputPluginCallbacks) {
    cb.startup = Some(startup);
    cb.begin = Some(begin);
    cb.change = Some(change);
    cb.truncate = Some(truncate);
    cb.commit = Some(commit);
    cb.message = Some(message);
    cb.filter_by_origin = Some(any_origin);
    cb.shutdown = Some(shutdown);
}

fn startup(ctx: &mut DecodingContext, is_init: bool) {
    ctx.write(format!("plugin startup init={is_init}"));
}

fn begin(ctx: &mut DecodingContext, txn: &Transaction) {
    ctx.write(format!("plugin begin {}", txn.xid));
}

fn change(ctx: &mut DecodingContext, txn: &Transaction, change: &Change) {
    ctx.write(format!(
        "plugin change {} {} {}",
        txn.xid,
        change.relation,
        change.action.as_str()
    ));
}

fn truncate(ctx: &mut DecodingContext, txn: &Transaction, relations: &[QualifiedName]) {
    ctx.write(format!("plugin truncate {} {}", txn.xid, relations.len()));
}

fn commit(ctx: &mut DecodingContext, txn: &Transaction, lsn: Lsn) {
    ctx.write(format!("plugin commit {} {lsn}", txn.xid));
}

fn message(
    ctx: &mut DecodingContext,
    _txn: Option<&Transaction>,
    lsn: Lsn,
    prefix: &str,
    payload: &[u8],
) {
    ctx.write(format!("plugin message {lsn} {prefix} {}", payload.len()));
}

fn any_origin(_ctx: &DecodingContext, _origin_id: OriginId) -> bool {
    true
}

fn shutdown(ctx: &mut DecodingContext) {
    ctx.write("plugin shutdown");
}

pgcat_core::export_output_plugin!(plugin_init);
