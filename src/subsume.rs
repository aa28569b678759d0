// Subsumption: the lattice order.
//
// `subsumes(a, b)` holds when every instance of `b` is an instance of
// `a`: b refines a. Schema checking, redundant-branch elimination in
// disjunctions and default selection all sit on this relation. The
// choose mode resolves defaults on the refining side before
// comparing; the plain mode ignores them.

use crate::kind;
use crate::value::{Value, ValueId};
use crate::instance::Instance;
use crate::ast::NodeRef;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SubMode {
    Default,
    Choose,
}

impl Instance {
    pub fn subsumes(&mut self, a: ValueId, b: ValueId, mode: SubMode) -> bool {
        let a = self.eval_partial(a);
        let b = match mode {
            SubMode::Choose => self.manifest(b),
            SubMode::Default => self.eval_partial(b),
        };
        if a == b {
            return true;
        }
        if self.is_bottom(b) {
            return true;
        }
        if self.is_bottom(a) {
            return false;
        }

        // A disjunction on the refining side must be subsumed branch
        // by branch.
        if let Value::Disjunction(db) = self.value(b).clone() {
            if let Value::Disjunction(_) = self.value(a) {
                // Handled below: every branch of b needs a home in a.
            } else {
                return db
                    .branches
                    .iter()
                    .all(|br| self.subsumes(a, br.value, mode));
            }
        }

        match self.value(a).clone() {
            Value::BasicType(k) => {
                let kb = kind::ordinary(self.kind(b));
                !kb.is_empty() && kind::ordinary(k).contains(kb)
            }
            Value::Bound { .. } | Value::Binary { .. } => {
                // a subsumes b exactly when meeting them changes
                // nothing about b.
                let r = self.unify(NodeRef::NONE, a, b);
                !self.is_bottom(r) && self.equal(r, b)
            }
            v if v.is_atom() => self.equal(a, b),
            Value::Lambda(_) | Value::Builtin(_) => self.equal(a, b),
            Value::Struct(sa) => {
                let sb = match self.value(b).clone() {
                    Value::Struct(sb) => sb,
                    _ => return false,
                };
                for arc in &sa.arcs {
                    if arc.label.is_hidden() {
                        continue;
                    }
                    match sb.arc(arc.label) {
                        Some(other) => {
                            if !arc.optional && other.optional {
                                return false;
                            }
                            let av = self.lookup_arc(a, arc.label, NodeRef::NONE);
                            let bv = self.lookup_arc(b, arc.label, NodeRef::NONE);
                            if !self.subsumes(av, bv, mode) {
                                return false;
                            }
                        }
                        None => {
                            if !arc.optional {
                                return false;
                            }
                        }
                    }
                }
                if sa.closed && sa.templates.is_empty() {
                    for arc in &sb.arcs {
                        if arc.label.is_hidden() || arc.definition {
                            continue;
                        }
                        if sa.arc(arc.label).is_none() {
                            return false;
                        }
                    }
                }
                true
            }
            Value::List(la) => {
                let lb = match self.value(b).clone() {
                    Value::List(lb) => lb,
                    _ => return false,
                };
                if !self.subsumes(la.len, lb.len, mode) {
                    return false;
                }
                for (i, be) in lb.elems.iter().enumerate() {
                    let ae = match la.elems.get(i) {
                        Some(ae) => *ae,
                        None => {
                            if !la.open {
                                return false;
                            }
                            match la.typ {
                                Some(t) => t,
                                None => continue,
                            }
                        }
                    };
                    if !self.subsumes(ae, *be, mode) {
                        return false;
                    }
                }
                true
            }
            Value::Disjunction(da) => {
                let bs: Vec<ValueId> = match self.value(b).clone() {
                    Value::Disjunction(db) => {
                        db.branches.iter().map(|br| br.value).collect()
                    }
                    _ => vec![b],
                };
                bs.iter().all(|bv| {
                    da.branches
                        .iter()
                        .any(|ab| self.subsumes(ab.value, *bv, mode))
                })
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::ast::{Ast, Op};
    use crate::kind::Kind;
    use crate::value::{Arc, Branch, DisjVal, ListVal, StructVal};

    fn ctx() -> Instance {
        Instance::new(Rc::new(Ast::new()))
    }

    fn int(i: &mut Instance, n: i64) -> ValueId {
        i.num_int(n)
    }

    fn str_(i: &mut Instance, s: &str) -> ValueId {
        i.str_value(s, NodeRef::NONE)
    }

    fn bound(i: &mut Instance, op: Op, n: i64) -> ValueId {
        let v = i.num_int(n);
        i.alloc(Value::Bound { op, value: v }, NodeRef::NONE)
    }

    fn top(i: &mut Instance) -> ValueId {
        i.top(NodeRef::NONE)
    }

    #[test]
    fn test_top_and_bottom() {
        let mut i = ctx();
        let t = top(&mut i);
        let five = int(&mut i, 5);
        let bot = i.bottom_at(crate::errors::Code::User, NodeRef::NONE, "boom");
        assert!(i.subsumes(t, five, SubMode::Default));
        assert!(i.subsumes(t, bot, SubMode::Default));
        assert!(i.subsumes(five, bot, SubMode::Default));
        assert!(!i.subsumes(bot, five, SubMode::Default));
    }

    #[test]
    fn test_basic_types() {
        let mut i = ctx();
        let it = i.basic(Kind::Int);
        let five = int(&mut i, 5);
        let s = str_(&mut i, "x");
        assert!(i.subsumes(it, five, SubMode::Default));
        assert!(!i.subsumes(it, s, SubMode::Default));
        assert!(!i.subsumes(five, it, SubMode::Default));
        // A scalar subsumes only itself.
        let five2 = int(&mut i, 5);
        let six = int(&mut i, 6);
        assert!(i.subsumes(five, five2, SubMode::Default));
        assert!(!i.subsumes(five, six, SubMode::Default));
    }

    #[test]
    fn test_bounds() {
        let mut i = ctx();
        let ge5 = bound(&mut i, Op::Ge, 5);
        let ge6 = bound(&mut i, Op::Ge, 6);
        let gt5 = bound(&mut i, Op::Gt, 5);
        let six = int(&mut i, 6);
        let four = int(&mut i, 4);
        assert!(i.subsumes(ge5, six, SubMode::Default));
        assert!(!i.subsumes(ge5, four, SubMode::Default));
        assert!(i.subsumes(ge5, ge6, SubMode::Default));
        assert!(i.subsumes(ge5, gt5, SubMode::Default));
        assert!(!i.subsumes(ge6, ge5, SubMode::Default));
    }

    #[test]
    fn test_struct_subsumption() {
        let mut i = ctx();
        // a: {x: int}     b: {x: 1, y: 2}
        let x = i.index.intern("x", true);
        let y = i.index.intern("y", true);
        let it = i.basic(Kind::Int);
        let mut sa = StructVal::new();
        sa.arcs.push(Arc::new(x, it));
        let a = i.alloc(Value::Struct(sa), NodeRef::NONE);
        let one = int(&mut i, 1);
        let two = int(&mut i, 2);
        let mut sb = StructVal::new();
        sb.arcs.push(Arc::new(x, one));
        sb.arcs.push(Arc::new(y, two));
        let b = i.alloc(Value::Struct(sb), NodeRef::NONE);
        assert!(i.subsumes(a, b, SubMode::Default));
        assert!(!i.subsumes(b, a, SubMode::Default));
    }

    #[test]
    fn test_closed_struct_accounts_for_all_fields() {
        let mut i = ctx();
        let x = i.index.intern("x", true);
        let y = i.index.intern("y", true);
        let it = i.basic(Kind::Int);
        let mut sa = StructVal::new();
        sa.arcs.push(Arc::new(x, it));
        sa.closed = true;
        let a = i.alloc(Value::Struct(sa), NodeRef::NONE);
        let one = int(&mut i, 1);
        let two = int(&mut i, 2);
        let mut sb = StructVal::new();
        sb.arcs.push(Arc::new(x, one));
        sb.arcs.push(Arc::new(y, two));
        let b = i.alloc(Value::Struct(sb), NodeRef::NONE);
        assert!(!i.subsumes(a, b, SubMode::Default));
    }

    #[test]
    fn test_optional_fields() {
        let mut i = ctx();
        let x = i.index.intern("x", true);
        let it = i.basic(Kind::Int);
        let mut sa = StructVal::new();
        let mut arc = Arc::new(x, it);
        arc.optional = true;
        sa.arcs.push(arc);
        let a = i.alloc(Value::Struct(sa), NodeRef::NONE);
        // b has no x at all: still subsumed, x is optional.
        let sb = StructVal::new();
        let b = i.alloc(Value::Struct(sb), NodeRef::NONE);
        assert!(i.subsumes(a, b, SubMode::Default));
    }

    #[test]
    fn test_list_subsumption() {
        let mut i = ctx();
        let it = i.basic(Kind::Int);
        let blen = bound(&mut i, Op::Ge, 0);
        let open_ints = i.alloc(
            Value::List(ListVal {
                elems: vec![],
                typ: Some(it),
                len: blen,
                open: true,
            }),
            NodeRef::NONE,
        );
        let one = int(&mut i, 1);
        let two = int(&mut i, 2);
        let len2 = int(&mut i, 2);
        let concrete = i.alloc(
            Value::List(ListVal {
                elems: vec![one, two],
                typ: None,
                len: len2,
                open: false,
            }),
            NodeRef::NONE,
        );
        assert!(i.subsumes(open_ints, concrete, SubMode::Default));
        assert!(!i.subsumes(concrete, open_ints, SubMode::Default));
        let s = str_(&mut i, "a");
        let len1 = int(&mut i, 1);
        let strs = i.alloc(
            Value::List(ListVal {
                elems: vec![s],
                typ: None,
                len: len1,
                open: false,
            }),
            NodeRef::NONE,
        );
        assert!(!i.subsumes(open_ints, strs, SubMode::Default));
    }

    #[test]
    fn test_disjunction_subsumption() {
        let mut i = ctx();
        let one = int(&mut i, 1);
        let two = int(&mut i, 2);
        let d = i.alloc(
            Value::Disjunction(DisjVal {
                branches: vec![
                    Branch { value: one, default: false },
                    Branch { value: two, default: false },
                ],
                has_defaults: false,
            }),
            NodeRef::NONE,
        );
        let one2 = int(&mut i, 1);
        let three = int(&mut i, 3);
        assert!(i.subsumes(d, one2, SubMode::Default));
        assert!(!i.subsumes(d, three, SubMode::Default));
    }

    // The Galois check: subsumption agrees with unification.
    #[test]
    fn test_subsume_iff_meet_is_identity() {
        let mut i = ctx();
        let it = i.basic(Kind::Int);
        let ge5 = bound(&mut i, Op::Ge, 5);
        let six = int(&mut i, 6);
        let nine = int(&mut i, 9);
        for &(a, b) in &[(it, six), (ge5, six), (ge5, nine), (it, nine)] {
            let meet = i.unify(NodeRef::NONE, a, b);
            let agrees = !i.is_bottom(meet) && i.equal(meet, b);
            assert_eq!(i.subsumes(a, b, SubMode::Default), agrees);
        }
    }
}
