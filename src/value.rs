// The value model.
//
// Every runtime value is a node in a graph held by an Instance arena
// and addressed by index; nodes reference each other only through
// indices, since the graph may contain cycles. Each node remembers
// the syntax it was lowered from. Atoms are ready as they are;
// structs, lists, bounds and disjunctions are partially evaluated
// shapes; the expression variants are unevaluated and get driven to
// weak head normal form on demand.

use std::rc::Rc;

use crate::ast::{NodeRef, Op, UnOp};
use crate::errors::Bottom;
use crate::instance::Instance;
use crate::kind::KindSet;
use crate::label::Label;
use crate::lower::Scope;
use crate::number::Num;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

// An arc: one labelled slot of a struct. The value is the lowered
// conjunct chain; the cache records the result of evaluating it and
// is written at most once with a complete result.
#[derive(Clone, Debug)]
pub struct Arc {
    pub label: Label,
    pub value: ValueId,
    pub state: ArcState,
    pub optional: bool,
    pub definition: bool,
    pub doc: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ArcState {
    Todo,
    Busy,
    Done(ValueId),
}

impl Arc {
    pub fn new(label: Label, value: ValueId) -> Arc {
        Arc {
            label,
            value,
            state: ArcState::Todo,
            optional: false,
            definition: false,
            doc: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StructVal {
    pub arcs: Vec<Arc>,
    // Template lambdas, applied to every arc label at evaluation.
    pub templates: Vec<ValueId>,
    // Pending comprehension values, run when the struct is expanded.
    pub comprehensions: Vec<ValueId>,
    pub emit: Option<ValueId>,
    pub closed: bool,
    pub expanded: bool,
    pub expanding: bool,
}

impl StructVal {
    pub fn new() -> StructVal {
        StructVal {
            arcs: Vec::new(),
            templates: Vec::new(),
            comprehensions: Vec::new(),
            emit: None,
            closed: false,
            expanded: false,
            expanding: false,
        }
    }

    pub fn arc(&self, label: Label) -> Option<&Arc> {
        self.arcs.iter().find(|a| a.label == label)
    }

    pub fn arc_index(&self, label: Label) -> Option<usize> {
        self.arcs.iter().position(|a| a.label == label)
    }
}

#[derive(Clone, Debug)]
pub struct ListVal {
    pub elems: Vec<ValueId>,
    // Element constraint for the open tail; None means top.
    pub typ: Option<ValueId>,
    // The length as a value: an int for a closed list, a bound or
    // int type for an open one.
    pub len: ValueId,
    pub open: bool,
}

#[derive(Clone, Debug)]
pub struct Branch {
    pub value: ValueId,
    pub default: bool,
}

#[derive(Clone, Debug)]
pub struct DisjVal {
    pub branches: Vec<Branch>,
    // Set once any branch has carried a default mark; survives
    // refinement so a later elimination of all marked branches can
    // still pick a default layer.
    pub has_defaults: bool,
}

// A parameterised body, lowered at each application site: struct
// templates bind their label pattern, calls bind arguments.
#[derive(Clone, Debug)]
pub struct LambdaVal {
    pub params: Vec<NodeRef>,
    pub body: NodeRef,
    pub scope: Scope,
}

pub struct BuiltinDef {
    pub name: &'static str,
    pub arity: usize,
    pub func: fn(&mut Instance, NodeRef, &[ValueId]) -> ValueId,
}

impl std::fmt::Debug for BuiltinDef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "builtin {}", self.name)
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    // Ground atoms.
    Null,
    Bool(bool),
    Num(Num),
    Str(Rc<String>),
    Bytes(Rc<Vec<u8>>),
    Duration(i64),

    // Partially evaluated shapes.
    BasicType(KindSet),
    Bound { op: Op, value: ValueId },
    List(ListVal),
    Struct(StructVal),
    Disjunction(DisjVal),
    Lambda(LambdaVal),
    Builtin(&'static BuiltinDef),

    // Unevaluated expression nodes.
    Ref { ident: NodeRef, scope: Scope },
    Selector { expr: ValueId, label: Label },
    Index { expr: ValueId, index: ValueId },
    Slice { expr: ValueId, lo: Option<ValueId>, hi: Option<ValueId> },
    Call { func: ValueId, args: Vec<ValueId> },
    Unary { op: UnOp, expr: ValueId },
    Binary { op: Op, lhs: ValueId, rhs: ValueId },
    Interpolation { parts: Vec<ValueId> },
    Comprehension { node: NodeRef, scope: Scope },

    // The error value.
    Bottom(Bottom),
}

impl Value {
    pub fn is_expr(&self) -> bool {
        match self {
            Value::Ref { .. }
            | Value::Selector { .. }
            | Value::Index { .. }
            | Value::Slice { .. }
            | Value::Call { .. }
            | Value::Unary { .. }
            | Value::Binary { .. }
            | Value::Interpolation { .. }
            | Value::Comprehension { .. } => true,
            _ => false,
        }
    }

    pub fn is_atom(&self) -> bool {
        match self {
            Value::Null
            | Value::Bool(_)
            | Value::Num(_)
            | Value::Str(_)
            | Value::Bytes(_)
            | Value::Duration(_) => true,
            _ => false,
        }
    }
}
