// The Instance owns one value graph.
//
// It holds the arena of value cells, the label index chained to the
// shared one, the table from declaration nodes to their arcs, the
// import table, and the list of delayed constraints recorded while
// breaking reference cycles. A graph belongs to exactly one instance;
// evaluation is single-threaded within it. The only cross-instance
// state is the frozen shared label index.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc as SyncArc;

use crate::ast::{Ast, NodeRef};
use crate::errors::{Bottom, Code};
use crate::kind::{self, Kind, KindSet};
use crate::label::{self, Label, LabelIndex};
use crate::lower::Scope;
use crate::number::Num;
use crate::value::{Value, ValueId};

struct Cell {
    val: Value,
    src: NodeRef,
    in_prog: bool,
}

// Where a declaration node leads when referenced.
#[derive(Clone, Debug)]
pub enum Binding {
    Arc { st: ValueId, label: Label },
    Alias { expr: NodeRef, scope: Scope },
    Import(String),
}

// A constraint dropped while pinning a reference cycle: `expr` must
// still agree with `expect` once the cycle is broken.
#[derive(Clone, Debug)]
pub struct Delayed {
    pub expr: ValueId,
    pub expect: ValueId,
    pub src: NodeRef,
}

pub struct Instance {
    pub ast: Rc<Ast>,
    cells: Vec<Cell>,
    pub index: LabelIndex,
    pub bindings: HashMap<NodeRef, Binding>,
    pub imports: HashMap<String, ValueId>,
    pub delayed: Vec<Delayed>,
    cancel: SyncArc<AtomicBool>,
}

impl Instance {
    pub fn new(ast: Rc<Ast>) -> Instance {
        Instance {
            ast,
            cells: Vec::new(),
            index: LabelIndex::child(label::shared()),
            bindings: HashMap::new(),
            imports: HashMap::new(),
            delayed: Vec::new(),
            cancel: SyncArc::new(AtomicBool::new(false)),
        }
    }

    // Register a pre-built package value under an import path.
    pub fn add_import(&mut self, path: &str, value: ValueId) {
        self.imports.insert(path.to_string(), value);
    }

    // The flag a caller may set from outside to abort evaluation at
    // the next entry.
    pub fn cancel_flag(&self) -> SyncArc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn alloc(&mut self, val: Value, src: NodeRef) -> ValueId {
        let id = ValueId(self.cells.len() as u32);
        self.cells.push(Cell { val, src, in_prog: false });
        id
    }

    pub fn value(&self, v: ValueId) -> &Value {
        &self.cells[v.0 as usize].val
    }

    pub fn value_mut(&mut self, v: ValueId) -> &mut Value {
        &mut self.cells[v.0 as usize].val
    }

    pub fn src(&self, v: ValueId) -> NodeRef {
        self.cells[v.0 as usize].src
    }

    pub fn in_prog(&self, v: ValueId) -> bool {
        self.cells[v.0 as usize].in_prog
    }

    pub fn set_in_prog(&mut self, v: ValueId, on: bool) {
        self.cells[v.0 as usize].in_prog = on;
    }

    pub fn bottom_at(&mut self, code: Code, src: NodeRef, msg: impl Into<String>) -> ValueId {
        self.alloc(Value::Bottom(Bottom::new(code, src, msg)), src)
    }

    pub fn bottom_value(&mut self, b: Bottom) -> ValueId {
        let src = b.src;
        self.alloc(Value::Bottom(b), src)
    }

    pub fn as_bottom(&self, v: ValueId) -> Option<&Bottom> {
        match self.value(v) {
            Value::Bottom(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_bottom(&self, v: ValueId) -> bool {
        self.as_bottom(v).is_some()
    }

    pub fn is_incomplete(&self, v: ValueId) -> bool {
        match self.as_bottom(v) {
            Some(b) => b.is_incomplete(),
            None => false,
        }
    }

    pub fn top(&mut self, src: NodeRef) -> ValueId {
        self.alloc(Value::BasicType(kind::top() | Kind::NonGround), src)
    }

    // The kind of a value as far as its outer shape is known.
    pub fn kind(&self, v: ValueId) -> KindSet {
        match self.value(v) {
            Value::Null => Kind::Null.into(),
            Value::Bool(_) => Kind::Bool.into(),
            Value::Num(n) => n.k.into(),
            Value::Str(_) => Kind::Str.into(),
            Value::Bytes(_) => Kind::Bytes.into(),
            Value::Duration(_) => Kind::Duration.into(),
            Value::BasicType(k) => *k,
            Value::Bound { value, .. } => {
                let vk = kind::ordinary(self.kind(*value));
                let base = if vk.intersects(kind::number()) {
                    vk | kind::number()
                } else {
                    vk
                };
                base | Kind::NonGround
            }
            Value::List(_) => Kind::List.into(),
            Value::Struct(_) => Kind::Struct.into(),
            Value::Disjunction(d) => {
                let mut k = KindSet::from_flag(Kind::NonGround);
                for b in &d.branches {
                    k |= self.kind(b.value);
                }
                k
            }
            Value::Lambda(_) | Value::Builtin(_) => Kind::Lambda.into(),
            Value::Bottom(_) => KindSet::empty(),
            _ => kind::top() | Kind::NonGround | Kind::Reference,
        }
    }

    pub fn is_ground(&self, v: ValueId) -> bool {
        kind::is_ground(self.kind(v))
    }

    // Structural equality on evaluated values. Follows shapes, not
    // identities, except that equal indices shortcut.
    pub fn equal(&self, a: ValueId, b: ValueId) -> bool {
        if a == b {
            return true;
        }
        match (self.value(a), self.value(b)) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Num(x), Value::Num(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Bytes(x), Value::Bytes(y)) => x == y,
            (Value::Duration(x), Value::Duration(y)) => x == y,
            (Value::BasicType(x), Value::BasicType(y)) => x == y,
            (Value::Bound { op: xo, value: xv }, Value::Bound { op: yo, value: yv }) => {
                xo == yo && self.equal(*xv, *yv)
            }
            (Value::List(x), Value::List(y)) => {
                x.open == y.open
                    && x.elems.len() == y.elems.len()
                    && self.equal(x.len, y.len)
                    && x.elems
                        .iter()
                        .zip(y.elems.iter())
                        .all(|(ex, ey)| self.equal(*ex, *ey))
            }
            (Value::Struct(x), Value::Struct(y)) => {
                x.closed == y.closed
                    && x.arcs.len() == y.arcs.len()
                    && x.arcs.iter().zip(y.arcs.iter()).all(|(ax, ay)| {
                        ax.label == ay.label
                            && ax.optional == ay.optional
                            && self.equal(ax.value, ay.value)
                    })
            }
            (Value::Disjunction(x), Value::Disjunction(y)) => {
                x.branches.len() == y.branches.len()
                    && x.branches.iter().zip(y.branches.iter()).all(|(bx, by)| {
                        bx.default == by.default && self.equal(bx.value, by.value)
                    })
            }
            (Value::Builtin(x), Value::Builtin(y)) => x.name == y.name,
            (Value::Bottom(x), Value::Bottom(y)) => x.code == y.code,
            _ => false,
        }
    }

    // A short, shallow rendering for diagnostics.
    pub fn show(&self, v: ValueId) -> String {
        match self.value(v) {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => n.to_string(),
            Value::Str(s) => format!("{:?}", s),
            Value::Bytes(b) => format!("'{} bytes'", b.len()),
            Value::Duration(d) => format!("{}ns", d),
            Value::BasicType(k) => kind::kind_name(*k),
            Value::Bound { op, value } => format!("{}{}", op, self.show(*value)),
            Value::List(l) => format!("[{} elements]", l.elems.len()),
            Value::Struct(_) => "struct".to_string(),
            Value::Disjunction(_) => "disjunction".to_string(),
            Value::Lambda(_) => "template".to_string(),
            Value::Builtin(b) => b.name.to_string(),
            Value::Bottom(b) => b.render(),
            _ => "expression".to_string(),
        }
    }

    // Shorthand constructors, mostly for tests and builtins.
    pub fn num_int(&mut self, i: i64) -> ValueId {
        self.alloc(Value::Num(Num::int(i)), NodeRef::NONE)
    }

    pub fn num_float(&mut self, f: f64) -> ValueId {
        self.alloc(Value::Num(Num::float(f)), NodeRef::NONE)
    }

    pub fn str_value(&mut self, s: &str, src: NodeRef) -> ValueId {
        self.alloc(Value::Str(Rc::new(s.to_string())), src)
    }

    pub fn basic(&mut self, k: Kind) -> ValueId {
        self.alloc(Value::BasicType(k | Kind::NonGround), NodeRef::NONE)
    }
}
