// Binary operations on values.
//
// Unification is the lattice meet: kind pre-check, then a structural
// merge per variant pair. Bottom is absorbing. Disjunctions
// distribute over unification and prune branches that collapse to
// bottom eagerly, so deeply nested alternatives cannot blow up.
// The remaining operators (arithmetic, comparison, replication,
// matching) work on manifested operands.

use std::cmp::Ordering;
use std::rc::Rc;

use regex::Regex;

use crate::ast::{NodeRef, Op};
use crate::errors::{most_specific, Bottom, Code};
use crate::instance::Instance;
use crate::kind::{self, match_bin_op, Kind};
use crate::number::NumError;
use crate::value::{Arc, ArcState, Branch, DisjVal, ListVal, StructVal, Value, ValueId};

impl Instance {
    // Dispatch an operator over two evaluated operands.
    pub fn bin_op(&mut self, src: NodeRef, op: Op, a: ValueId, b: ValueId) -> ValueId {
        match op {
            Op::Unify => self.unify(src, a, b),
            Op::Disjoin => {
                let branches = vec![
                    Branch { value: a, default: false },
                    Branch { value: b, default: false },
                ];
                self.alloc(
                    Value::Disjunction(DisjVal { branches, has_defaults: false }),
                    src,
                )
            }
            _ => self.concrete_op(src, op, a, b),
        }
    }

    // The lattice meet of two evaluated values.
    pub fn unify(&mut self, src: NodeRef, a: ValueId, b: ValueId) -> ValueId {
        if a == b {
            return a;
        }

        // Bottom absorbs; a fatal error wins over an incomplete one.
        match (self.is_bottom(a), self.is_bottom(b)) {
            (true, true) => {
                return if !self.is_incomplete(a) { a } else { b };
            }
            (true, false) => return a,
            (false, true) => return b,
            _ => {}
        }

        // Distribute over disjunctions, preferring to keep the marks
        // of a defaulted operand on the outside.
        let a_disj = match self.value(a) {
            Value::Disjunction(d) => Some(d.has_defaults),
            _ => None,
        };
        let b_disj = match self.value(b) {
            Value::Disjunction(d) => Some(d.has_defaults),
            _ => None,
        };
        match (a_disj, b_disj) {
            (Some(_), Some(true)) => return self.distribute(src, b, a),
            (Some(_), _) => return self.distribute(src, a, b),
            (None, Some(_)) => return self.distribute(src, b, a),
            _ => {}
        }

        let (ka, kb) = (self.kind(a), self.kind(b));
        if match_bin_op(Op::Unify, ka, kb).is_none() {
            let msg = format!(
                "conflicting values {} and {} (mismatched types {} and {})",
                self.show(a),
                self.show(b),
                kind::kind_name(ka),
                kind::kind_name(kb),
            );
            let err = Bottom::new(Code::Type, src, msg)
                .caused_by(Bottom::new(Code::Type, self.src(a), self.show(a)))
                .caused_by(Bottom::new(Code::Type, self.src(b), self.show(b)));
            return self.bottom_value(err);
        }

        // Flatten residual conjunctions on both sides and fold the
        // leaves pairwise. A pair either merges to something smaller
        // or is irreducible and stays side by side, so the fold
        // terminates.
        let mut leaves = Vec::new();
        self.conjunct_leaves(a, &mut leaves);
        self.conjunct_leaves(b, &mut leaves);
        let mut acc: Vec<ValueId> = Vec::new();
        for leaf in leaves {
            let mut cur = leaf;
            let mut scan = true;
            while scan {
                scan = false;
                for i in 0..acc.len() {
                    if let Some(r) = self.combine(src, acc[i], cur) {
                        if self.is_bottom(r) {
                            return r;
                        }
                        acc.remove(i);
                        cur = r;
                        scan = true;
                        break;
                    }
                }
            }
            acc.push(cur);
        }
        let mut out = acc[0];
        for part in acc.into_iter().skip(1) {
            out = self.alloc(Value::Binary { op: Op::Unify, lhs: out, rhs: part }, src);
        }
        out
    }

    fn conjunct_leaves(&self, v: ValueId, out: &mut Vec<ValueId>) {
        if let Value::Binary { op: Op::Unify, lhs, rhs } = *self.value(v) {
            self.conjunct_leaves(lhs, out);
            self.conjunct_leaves(rhs, out);
        } else {
            out.push(v);
        }
    }

    // The meet of two conjunct leaves, or None when the pair cannot
    // be reduced and remains a conjunction.
    fn combine(&mut self, src: NodeRef, a: ValueId, b: ValueId) -> Option<ValueId> {
        if a == b {
            return Some(a);
        }
        let (ka, kb) = (self.kind(a), self.kind(b));
        if match_bin_op(Op::Unify, ka, kb).is_none() {
            return Some(self.conflict(src, a, b));
        }
        let av = self.value(a).clone();
        let bv = self.value(b).clone();
        match (av, bv) {
            (Value::Disjunction(_), _) => Some(self.distribute(src, a, b)),
            (_, Value::Disjunction(_)) => Some(self.distribute(src, b, a)),

            (Value::BasicType(x), Value::BasicType(y)) => {
                let i = kind::ordinary(x) & kind::ordinary(y);
                Some(if i.is_empty() {
                    self.conflict(src, a, b)
                } else {
                    self.alloc(Value::BasicType(i | Kind::NonGround), src)
                })
            }
            (Value::BasicType(_), Value::Bound { .. })
            | (Value::Bound { .. }, Value::BasicType(_)) => None,
            (Value::BasicType(x), _) => self.narrow(src, x, b),
            (_, Value::BasicType(y)) => self.narrow(src, y, a),

            (Value::Bound { op: oa, value: pa }, Value::Bound { op: ob, value: pb }) => {
                self.combine_bounds(src, (a, oa, pa), (b, ob, pb))
            }
            (Value::Bound { op, value }, other) => {
                if other.is_expr() || !self.is_ground(b) {
                    None
                } else {
                    Some(self.bound_check(src, op, value, b))
                }
            }
            (other, Value::Bound { op, value }) => {
                if other.is_expr() || !self.is_ground(a) {
                    None
                } else {
                    Some(self.bound_check(src, op, value, a))
                }
            }

            (Value::Num(x), Value::Num(y)) => {
                Some(if x == y {
                    let k = if x.is_int() || y.is_int() { Kind::Int } else { Kind::Float };
                    let mut n = x;
                    n.k = k;
                    self.alloc(Value::Num(n), src)
                } else {
                    self.conflict(src, a, b)
                })
            }
            (Value::Null, Value::Null) => Some(a),
            (Value::Bool(x), Value::Bool(y)) => {
                Some(if x == y { a } else { self.conflict(src, a, b) })
            }
            (Value::Str(x), Value::Str(y)) => {
                Some(if x == y { a } else { self.conflict(src, a, b) })
            }
            (Value::Bytes(x), Value::Bytes(y)) => {
                Some(if x == y { a } else { self.conflict(src, a, b) })
            }
            (Value::Duration(x), Value::Duration(y)) => {
                Some(if x == y { a } else { self.conflict(src, a, b) })
            }

            (Value::List(x), Value::List(y)) => Some(self.unify_lists(src, a, x, b, y)),
            (Value::Struct(_), Value::Struct(_)) => Some(self.unify_structs(src, a, b)),

            (Value::Builtin(x), Value::Builtin(y)) => {
                Some(if x.name == y.name { a } else { self.conflict(src, a, b) })
            }
            (Value::Lambda(x), Value::Lambda(y)) => {
                Some(if x.body == y.body && x.params == y.params {
                    a
                } else {
                    self.conflict(src, a, b)
                })
            }

            (x, y) => {
                // Opaque expression leaves wait for evaluation.
                if x.is_expr() || y.is_expr() {
                    None
                } else {
                    Some(self.conflict(src, a, b))
                }
            }
        }
    }

    fn conflict(&mut self, src: NodeRef, a: ValueId, b: ValueId) -> ValueId {
        let msg = format!("conflicting values {} and {}", self.show(a), self.show(b));
        let err = Bottom::new(Code::Type, src, msg)
            .caused_by(Bottom::new(Code::Type, self.src(a), self.show(a)))
            .caused_by(Bottom::new(Code::Type, self.src(b), self.show(b)));
        self.bottom_value(err)
    }

    // A basic type against a more specific value: keep the value,
    // narrowing its numeric kind if needed. None for opaque operands.
    fn narrow(&mut self, src: NodeRef, mask: kind::KindSet, v: ValueId) -> Option<ValueId> {
        let mask = kind::ordinary(mask);
        let vk = kind::ordinary(self.kind(v));
        if mask.contains(vk) {
            return Some(v);
        }
        match self.value(v).clone() {
            Value::Num(n) => {
                if mask.contains(Kind::Int) && !mask.contains(Kind::Float) {
                    if n.v.is_integer() {
                        let mut n = n;
                        n.k = Kind::Int;
                        return Some(self.alloc(Value::Num(n), src));
                    }
                    let msg = format!("{} is not an integer", self.show(v));
                    Some(self.bottom_at(Code::Type, src, msg))
                } else if mask.contains(Kind::Float) && !mask.contains(Kind::Int) {
                    let mut n = n;
                    n.k = Kind::Float;
                    Some(self.alloc(Value::Num(n), src))
                } else {
                    Some(v)
                }
            }
            other => {
                if other.is_expr() {
                    None
                } else if vk.intersects(mask) {
                    Some(v)
                } else {
                    let basic =
                        self.alloc(Value::BasicType(mask | Kind::NonGround), src);
                    Some(self.conflict(src, basic, v))
                }
            }
        }
    }

    fn distribute(&mut self, src: NodeRef, d: ValueId, other: ValueId) -> ValueId {
        let dv = match self.value(d).clone() {
            Value::Disjunction(dv) => dv,
            _ => unreachable!("distribute over non-disjunction"),
        };
        let mut branches = Vec::new();
        let mut errors = Vec::new();
        for br in dv.branches {
            let r = self.unify(src, br.value, other);
            match self.as_bottom(r) {
                Some(b) => errors.push(b.clone()),
                None => branches.push(Branch { value: r, default: br.default }),
            }
        }
        match branches.len() {
            0 => self.bottom_value(most_specific(errors)),
            1 => branches[0].value,
            _ => self.alloc(
                Value::Disjunction(DisjVal {
                    branches,
                    has_defaults: dv.has_defaults,
                }),
                src,
            ),
        }
    }

    fn combine_bounds(
        &mut self,
        src: NodeRef,
        (a, oa, pa): (ValueId, Op, ValueId),
        (b, ob, pb): (ValueId, Op, ValueId),
    ) -> Option<ValueId> {
        enum Dir {
            Upper,
            Lower,
            Other,
        }
        fn dir(op: Op) -> Dir {
            match op {
                Op::Lt | Op::Le => Dir::Upper,
                Op::Gt | Op::Ge => Dir::Lower,
                _ => Dir::Other,
            }
        }

        let va = self.manifest(pa);
        let vb = self.manifest(pb);
        if self.is_bottom(va) {
            return Some(va);
        }
        if self.is_bottom(vb) {
            return Some(vb);
        }
        if oa == ob && self.equal(va, vb) {
            return Some(a);
        }
        let cmp = self.cmp_atoms(va, vb);
        match (dir(oa), dir(ob), cmp) {
            (Dir::Upper, Dir::Upper, Some(ord)) => Some(match ord {
                Ordering::Less => a,
                Ordering::Greater => b,
                Ordering::Equal => {
                    if oa == Op::Lt { a } else { b }
                }
            }),
            (Dir::Lower, Dir::Lower, Some(ord)) => Some(match ord {
                Ordering::Greater => a,
                Ordering::Less => b,
                Ordering::Equal => {
                    if oa == Op::Gt { a } else { b }
                }
            }),
            (Dir::Lower, Dir::Upper, Some(ord)) => {
                self.bound_overlap(src, a, b, oa, ob, va, ord)
            }
            (Dir::Upper, Dir::Lower, Some(ord)) => {
                self.bound_overlap(src, b, a, ob, oa, vb, ord.reverse())
            }
            _ => None,
        }
    }

    // `lo` is the lower bound, `up` the upper; `ord` compares the
    // lower payload against the upper payload. None when the range is
    // non-empty and the pair stays a conjunction.
    fn bound_overlap(
        &mut self,
        src: NodeRef,
        lo: ValueId,
        up: ValueId,
        lo_op: Op,
        up_op: Op,
        lo_payload: ValueId,
        ord: Ordering,
    ) -> Option<ValueId> {
        match ord {
            Ordering::Greater => {
                let msg = format!(
                    "non-overlapping ranges {} and {}",
                    self.show(lo),
                    self.show(up)
                );
                Some(self.bottom_at(Code::Type, src, msg))
            }
            Ordering::Equal => {
                if lo_op == Op::Ge && up_op == Op::Le {
                    // Pinched to a single value.
                    let v = self.value(lo_payload).clone();
                    Some(self.alloc(v, src))
                } else {
                    let msg = format!(
                        "non-overlapping ranges {} and {}",
                        self.show(lo),
                        self.show(up)
                    );
                    Some(self.bottom_at(Code::Type, src, msg))
                }
            }
            Ordering::Less => None,
        }
    }

    // A bound against a concrete value keeps the value iff it
    // satisfies the bound.
    fn bound_check(&mut self, src: NodeRef, op: Op, payload: ValueId, v: ValueId) -> ValueId {
        let p = self.manifest(payload);
        if self.is_bottom(p) {
            return p;
        }
        let sat = match op {
            Op::Lt | Op::Le | Op::Gt | Op::Ge => match self.cmp_atoms(v, p) {
                Some(ord) => match op {
                    Op::Lt => ord == Ordering::Less,
                    Op::Le => ord != Ordering::Greater,
                    Op::Gt => ord == Ordering::Greater,
                    Op::Ge => ord != Ordering::Less,
                    _ => unreachable!(),
                },
                None => {
                    let bound = self.alloc(Value::Bound { op, value: p }, src);
                    return self.conflict(src, bound, v);
                }
            },
            Op::Ne => !self.equal(v, p),
            Op::Match | Op::NotMatch => match self.regex_match(src, v, p) {
                Ok(m) => m == (op == Op::Match),
                Err(err) => return err,
            },
            _ => {
                let bound = self.alloc(Value::Bound { op, value: p }, src);
                return self.conflict(src, bound, v);
            }
        };
        if sat {
            v
        } else {
            let msg = format!(
                "invalid value {} (out of bound {}{})",
                self.show(v),
                op,
                self.show(p)
            );
            self.bottom_at(Code::Range, src, msg)
        }
    }

    fn regex_match(
        &mut self,
        src: NodeRef,
        v: ValueId,
        pat: ValueId,
    ) -> Result<bool, ValueId> {
        let (s, p) = match (self.value(v), self.value(pat)) {
            (Value::Str(s), Value::Str(p)) => (s.clone(), p.clone()),
            _ => {
                let bound = self.alloc(Value::Bound { op: Op::Match, value: pat }, src);
                return Err(self.conflict(src, bound, v));
            }
        };
        match Regex::new(&p) {
            Ok(re) => Ok(re.is_match(&s)),
            Err(e) => {
                let msg = format!("invalid regular expression {:?}: {}", &*p, e);
                Err(self.bottom_at(Code::User, src, msg))
            }
        }
    }

    fn unify_lists(
        &mut self,
        src: NodeRef,
        a: ValueId,
        la: ListVal,
        b: ValueId,
        lb: ListVal,
    ) -> ValueId {
        let len = self.unify(src, la.len, lb.len);
        if let Some(cause) = self.as_bottom(len).cloned() {
            let msg = format!(
                "incompatible list lengths ({} and {} elements)",
                self.show(a),
                self.show(b)
            );
            return self.bottom_value(Bottom::new(Code::Type, src, msg).caused_by(cause));
        }
        let n = la.elems.len().max(lb.elems.len());
        let mut elems = Vec::with_capacity(n);
        for i in 0..n {
            let ea = la.elems.get(i).cloned().or(if la.open { la.typ } else { None });
            let eb = lb.elems.get(i).cloned().or(if lb.open { lb.typ } else { None });
            let e = match (ea, eb, i < la.elems.len(), i < lb.elems.len()) {
                (Some(x), Some(y), _, _) => self.unify(src, x, y),
                (Some(x), None, _, _) => x,
                (None, Some(y), _, _) => y,
                (None, None, _, _) => unreachable!("element beyond both lists"),
            };
            if self.is_bottom(e) {
                return e;
            }
            elems.push(e);
        }
        let open = la.open && lb.open;
        let typ = match (la.open, la.typ, lb.open, lb.typ) {
            (true, Some(x), true, Some(y)) => {
                let t = self.unify(src, x, y);
                if self.is_bottom(t) {
                    return t;
                }
                Some(t)
            }
            (true, Some(x), true, None) => Some(x),
            (true, None, true, Some(y)) => Some(y),
            _ => None,
        };
        let len = if open {
            len
        } else {
            self.num_int(elems.len() as i64)
        };
        self.alloc(Value::List(ListVal { elems, typ, len, open }), src)
    }

    fn unify_structs(&mut self, src: NodeRef, a: ValueId, b: ValueId) -> ValueId {
        self.expand_struct(a);
        self.expand_struct(b);
        let sa = match self.value(a).clone() {
            Value::Struct(s) => s,
            _ => unreachable!(),
        };
        let sb = match self.value(b).clone() {
            Value::Struct(s) => s,
            _ => unreachable!(),
        };

        // A template admits arbitrary labels, which reopens the
        // result; otherwise closedness of either side sticks.
        let templated = !sa.templates.is_empty() || !sb.templates.is_empty();
        let closed = (sa.closed || sb.closed) && !templated;

        let mut out = StructVal::new();
        out.closed = closed;
        out.templates = sa.templates.iter().chain(sb.templates.iter()).cloned().collect();
        out.comprehensions = sa
            .comprehensions
            .iter()
            .chain(sb.comprehensions.iter())
            .cloned()
            .collect();
        out.expanded = out.comprehensions.is_empty();
        out.emit = match (sa.emit, sb.emit) {
            (Some(x), Some(y)) => {
                Some(self.alloc(Value::Binary { op: Op::Unify, lhs: x, rhs: y }, src))
            }
            (x, None) => x,
            (None, y) => y,
        };

        for arc in &sa.arcs {
            match sb.arc(arc.label) {
                Some(other) => {
                    let merged = self.alloc(
                        Value::Binary { op: Op::Unify, lhs: arc.value, rhs: other.value },
                        src,
                    );
                    let mut m = arc.clone();
                    m.value = merged;
                    m.state = ArcState::Todo;
                    m.optional = arc.optional && other.optional;
                    m.definition = arc.definition || other.definition;
                    m.doc = match (arc.doc.clone(), other.doc.clone()) {
                        (Some(x), Some(y)) => Some(format!("{}\n{}", x, y)),
                        (x, None) => x,
                        (None, y) => y,
                    };
                    out.arcs.push(m);
                }
                None => {
                    if let Some(err) = self.closed_reject(src, &sb, b, arc) {
                        return err;
                    }
                    let mut m = arc.clone();
                    m.state = ArcState::Todo;
                    out.arcs.push(m);
                }
            }
        }
        for arc in &sb.arcs {
            if sa.arc(arc.label).is_none() {
                if let Some(err) = self.closed_reject(src, &sa, a, arc) {
                    return err;
                }
                let mut m = arc.clone();
                m.state = ArcState::Todo;
                out.arcs.push(m);
            }
        }
        self.alloc(Value::Struct(out), src)
    }

    // Does the closed struct `st` reject an arc coming from the other
    // operand? Hidden fields and definitions are exempt.
    fn closed_reject(
        &mut self,
        src: NodeRef,
        st: &StructVal,
        st_id: ValueId,
        arc: &Arc,
    ) -> Option<ValueId> {
        if !st.closed || !st.templates.is_empty() {
            return None;
        }
        if arc.label.is_hidden() || arc.definition {
            return None;
        }
        let name = self.index.name(arc.label);
        let msg = format!("field {:?} not allowed in closed struct", name);
        let err = Bottom::new(Code::Type, src, msg)
            .caused_by(Bottom::new(Code::Type, self.src(st_id), "closed here"));
        Some(self.bottom_value(err))
    }

    // Comparison on concrete atoms; None for unordered pairings.
    pub fn cmp_atoms(&self, a: ValueId, b: ValueId) -> Option<Ordering> {
        match (self.value(a), self.value(b)) {
            (Value::Num(x), Value::Num(y)) => x.partial_cmp(y),
            (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
            (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
            (Value::Duration(x), Value::Duration(y)) => Some(x.cmp(y)),
            _ => None,
        }
    }

    // Arithmetic, comparison and replication on manifested operands.
    fn concrete_op(&mut self, src: NodeRef, op: Op, a: ValueId, b: ValueId) -> ValueId {
        // Nothing to compute until both operands are pinned down.
        if !self.is_ground(a) || !self.is_ground(b) {
            let msg = format!("operand of {} is not yet concrete", op);
            return self.bottom_at(Code::Incomplete, src, msg);
        }
        // Restricted legacy forms get a precise error.
        let (ka, kb) = (self.kind(a), self.kind(b));
        let numeric =
            ka.intersects(kind::number()) && kb.intersects(kind::number());
        if op == Op::Mul
            && ((ka.contains(Kind::Int) && kb.contains(Kind::List))
                || (ka.contains(Kind::List) && kb.contains(Kind::Int)))
        {
            return self.bottom_at(
                Code::Type,
                src,
                "list multiplication is no longer supported",
            );
        }
        if let Op::IQuo | Op::IRem | Op::IDiv | Op::IMod = op {
            if numeric && (ka.contains(Kind::Float) || kb.contains(Kind::Float)) {
                let msg = format!("operator {} is not defined on floats", op);
                return self.bottom_at(Code::Type, src, msg);
            }
        }
        if op == Op::Add && ka.contains(Kind::List) && kb.contains(Kind::List) {
            return self.bottom_at(
                Code::Type,
                src,
                "lists cannot be added with +; use a list builtin",
            );
        }

        let (_, swap) = match match_bin_op(op, ka, kb) {
            Some(r) => r,
            None => {
                let msg = format!(
                    "invalid operation {} on {} and {}",
                    op,
                    kind::kind_name(ka),
                    kind::kind_name(kb)
                );
                let err = Bottom::new(Code::Type, src, msg)
                    .caused_by(Bottom::new(Code::Type, self.src(a), self.show(a)))
                    .caused_by(Bottom::new(Code::Type, self.src(b), self.show(b)));
                return self.bottom_value(err);
            }
        };
        let (a, b) = if swap { (b, a) } else { (a, b) };

        match op {
            Op::Eq => {
                let r = self.equal(a, b);
                self.alloc(Value::Bool(r), src)
            }
            Op::Ne => {
                let r = !self.equal(a, b);
                self.alloc(Value::Bool(r), src)
            }
            Op::Lt | Op::Le | Op::Gt | Op::Ge => match self.cmp_atoms(a, b) {
                Some(ord) => {
                    let r = match op {
                        Op::Lt => ord == Ordering::Less,
                        Op::Le => ord != Ordering::Greater,
                        Op::Gt => ord == Ordering::Greater,
                        Op::Ge => ord != Ordering::Less,
                        _ => unreachable!(),
                    };
                    self.alloc(Value::Bool(r), src)
                }
                None => self.conflict(src, a, b),
            },
            Op::Match | Op::NotMatch => match self.regex_match(src, a, b) {
                Ok(m) => self.alloc(Value::Bool(m == (op == Op::Match)), src),
                Err(err) => err,
            },
            Op::LAnd | Op::LOr => match (self.value(a), self.value(b)) {
                (Value::Bool(x), Value::Bool(y)) => {
                    let r = if op == Op::LAnd { *x && *y } else { *x || *y };
                    self.alloc(Value::Bool(r), src)
                }
                _ => self.conflict(src, a, b),
            },
            Op::Add | Op::Sub | Op::Mul | Op::Div
            | Op::IQuo | Op::IRem | Op::IDiv | Op::IMod => {
                self.arith(src, op, a, b)
            }
            Op::Unify | Op::Disjoin => unreachable!(),
        }
    }

    fn arith(&mut self, src: NodeRef, op: Op, a: ValueId, b: ValueId) -> ValueId {
        let av = self.value(a).clone();
        let bv = self.value(b).clone();
        match (av, bv) {
            (Value::Num(x), Value::Num(y)) => {
                let r = match op {
                    Op::Add => Ok(x.add(&y)),
                    Op::Sub => Ok(x.sub(&y)),
                    Op::Mul => Ok(x.mul(&y)),
                    Op::Div => x.div(&y),
                    Op::IQuo => x.quo(&y),
                    Op::IRem => x.rem(&y),
                    Op::IDiv => x.div_floor(&y),
                    Op::IMod => x.mod_floor(&y),
                    _ => unreachable!(),
                };
                match r {
                    Ok(n) => self.alloc(Value::Num(n), src),
                    Err(NumError::DivByZero) => {
                        self.bottom_at(Code::Range, src, "division by zero")
                    }
                    Err(_) => self.bottom_at(Code::Range, src, "number out of range"),
                }
            }
            (Value::Str(x), Value::Str(y)) => match op {
                Op::Add => {
                    let s = format!("{}{}", x, y);
                    self.alloc(Value::Str(Rc::new(s)), src)
                }
                _ => self.conflict(src, a, b),
            },
            (Value::Str(x), Value::Num(n)) if op == Op::Mul => {
                match self.repeat_count(src, &n) {
                    Ok(count) => {
                        let s = x.repeat(count);
                        self.alloc(Value::Str(Rc::new(s)), src)
                    }
                    Err(err) => err,
                }
            }
            (Value::Bytes(x), Value::Bytes(y)) => match op {
                Op::Add => {
                    let mut out = (*x).clone();
                    out.extend_from_slice(&y);
                    self.alloc(Value::Bytes(Rc::new(out)), src)
                }
                _ => self.conflict(src, a, b),
            },
            (Value::Bytes(x), Value::Num(n)) if op == Op::Mul => {
                match self.repeat_count(src, &n) {
                    Ok(count) => {
                        let mut out = Vec::with_capacity(x.len() * count);
                        for _ in 0..count {
                            out.extend_from_slice(&x);
                        }
                        self.alloc(Value::Bytes(Rc::new(out)), src)
                    }
                    Err(err) => err,
                }
            }
            (Value::Duration(x), Value::Duration(y)) => match op {
                Op::Add => match x.checked_add(y) {
                    Some(d) => self.alloc(Value::Duration(d), src),
                    None => self.bottom_at(Code::Range, src, "duration out of range"),
                },
                Op::Sub => match x.checked_sub(y) {
                    Some(d) => self.alloc(Value::Duration(d), src),
                    None => self.bottom_at(Code::Range, src, "duration out of range"),
                },
                Op::Div => {
                    if y == 0 {
                        return self.bottom_at(Code::Range, src, "division by zero");
                    }
                    let n = crate::number::Num::int(x)
                        .div(&crate::number::Num::int(y))
                        .unwrap();
                    self.alloc(Value::Num(n), src)
                }
                Op::IQuo => {
                    if y == 0 {
                        return self.bottom_at(Code::Range, src, "division by zero");
                    }
                    self.alloc(Value::Num(crate::number::Num::int(x / y)), src)
                }
                Op::IMod => {
                    if y == 0 {
                        return self.bottom_at(Code::Range, src, "division by zero");
                    }
                    // Floored remainder takes the sign of the divisor.
                    let m = x.rem_euclid(y.abs());
                    let m = if y < 0 && m != 0 { m - y.abs() } else { m };
                    self.alloc(Value::Duration(m), src)
                }
                _ => self.conflict(src, a, b),
            },
            (Value::Duration(d), Value::Num(n)) if op == Op::Mul => {
                let scaled = bigdecimal::BigDecimal::from(d) * &n.v;
                let (digits, _) = scaled.with_scale(0).as_bigint_and_exponent();
                match num_traits::ToPrimitive::to_i64(&digits) {
                    Some(ns) => self.alloc(Value::Duration(ns), src),
                    None => self.bottom_at(Code::Range, src, "duration out of range"),
                }
            }
            _ => self.conflict(src, a, b),
        }
    }

    fn repeat_count(
        &mut self,
        src: NodeRef,
        n: &crate::number::Num,
    ) -> Result<usize, ValueId> {
        match n.as_usize() {
            Ok(c) => Ok(c),
            Err(_) => Err(self.bottom_at(
                Code::Range,
                src,
                format!("invalid replication count {}", n),
            )),
        }
    }
}
