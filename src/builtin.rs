// Predeclared identifiers and builtin functions.
//
// Predeclared names bypass the binding table: the type names resolve
// to their basic-type values, `_` to top, and the function names to
// host-backed lambdas. A builtin evaluates its arguments, checks
// their kinds and runs a native callback whose result is a value or
// an error bottom.

use crate::ast::NodeRef;
use crate::errors::Code;
use crate::instance::Instance;
use crate::kind::{self, Kind};
use crate::number::Num;
use crate::value::{Branch, DisjVal, Value, ValueId};

pub fn predeclared(ctx: &mut Instance, name: &str, src: NodeRef) -> Option<ValueId> {
    let v = match name {
        "_" => ctx.top(src),
        "null" => ctx.alloc(Value::Null, src),
        "bool" => ctx.basic(Kind::Bool),
        "int" => ctx.basic(Kind::Int),
        "float" => ctx.basic(Kind::Float),
        "string" => ctx.basic(Kind::Str),
        "bytes" => ctx.basic(Kind::Bytes),
        "duration" => ctx.basic(Kind::Duration),
        "number" => {
            ctx.alloc(Value::BasicType(kind::number() | Kind::NonGround), src)
        }
        "len" => ctx.alloc(Value::Builtin(&LEN), src),
        "close" => ctx.alloc(Value::Builtin(&CLOSE), src),
        "and" => ctx.alloc(Value::Builtin(&AND), src),
        "or" => ctx.alloc(Value::Builtin(&OR), src),
        _ => return None,
    };
    Some(v)
}

pub static LEN: crate::value::BuiltinDef = crate::value::BuiltinDef {
    name: "len",
    arity: 1,
    func: len_impl,
};

pub static CLOSE: crate::value::BuiltinDef = crate::value::BuiltinDef {
    name: "close",
    arity: 1,
    func: close_impl,
};

pub static AND: crate::value::BuiltinDef = crate::value::BuiltinDef {
    name: "and",
    arity: 1,
    func: and_impl,
};

pub static OR: crate::value::BuiltinDef = crate::value::BuiltinDef {
    name: "or",
    arity: 1,
    func: or_impl,
};

fn len_impl(ctx: &mut Instance, src: NodeRef, args: &[ValueId]) -> ValueId {
    let v = ctx.manifest(args[0]);
    if ctx.is_bottom(v) {
        return v;
    }
    match ctx.value(v).clone() {
        Value::Str(s) => ctx.alloc(Value::Num(Num::int(s.len() as i64)), src),
        Value::Bytes(b) => ctx.alloc(Value::Num(Num::int(b.len() as i64)), src),
        // For an open list this is the length constraint itself.
        Value::List(l) => ctx.manifest(l.len),
        Value::Struct(sv) => {
            let n = sv
                .arcs
                .iter()
                .filter(|a| !a.label.is_hidden() && !a.optional && !a.definition)
                .count();
            ctx.alloc(Value::Num(Num::int(n as i64)), src)
        }
        _ => {
            let msg = format!("invalid argument to len: {}", ctx.show(v));
            ctx.bottom_at(Code::Type, src, msg)
        }
    }
}

fn close_impl(ctx: &mut Instance, src: NodeRef, args: &[ValueId]) -> ValueId {
    let v = ctx.eval_partial(args[0]);
    if ctx.is_bottom(v) {
        return v;
    }
    match ctx.value(v).clone() {
        Value::Struct(sv) => {
            let mut closed = sv;
            closed.closed = true;
            ctx.alloc(Value::Struct(closed), src)
        }
        _ => {
            let msg = format!("close: expected struct, found {}", ctx.show(v));
            ctx.bottom_at(Code::Type, src, msg)
        }
    }
}

// Unify all elements of a list.
fn and_impl(ctx: &mut Instance, src: NodeRef, args: &[ValueId]) -> ValueId {
    let l = match ctx.eval_want(args[0], Kind::List.into(), "argument to and") {
        Ok(l) => l,
        Err(e) => return e,
    };
    let elems = match ctx.value(l) {
        Value::List(l) => l.elems.clone(),
        _ => return ctx.bottom_at(Code::Type, src, "and: expected list"),
    };
    let mut acc = ctx.top(src);
    for e in elems {
        let ev = ctx.eval_partial(e);
        acc = ctx.unify(src, acc, ev);
        if ctx.is_bottom(acc) {
            return acc;
        }
    }
    acc
}

// The disjunction of all elements of a list.
fn or_impl(ctx: &mut Instance, src: NodeRef, args: &[ValueId]) -> ValueId {
    let l = match ctx.eval_want(args[0], Kind::List.into(), "argument to or") {
        Ok(l) => l,
        Err(e) => return e,
    };
    let elems = match ctx.value(l) {
        Value::List(l) => l.elems.clone(),
        _ => return ctx.bottom_at(Code::Type, src, "or: expected list"),
    };
    if elems.is_empty() {
        return ctx.bottom_at(Code::User, src, "empty disjunction");
    }
    let branches = elems
        .into_iter()
        .map(|value| Branch { value, default: false })
        .collect();
    let d = ctx.alloc(
        Value::Disjunction(DisjVal { branches, has_defaults: false }),
        src,
    );
    ctx.eval_partial(d)
}
