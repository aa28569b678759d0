// The lazy evaluator.
//
// `eval_partial` drives a value to weak head normal form: references
// are chased through the binding table, selections and calls are
// forced, struct expansion runs pending comprehensions, disjunctions
// are pruned. `manifest` additionally picks default layers and forces
// list lengths. Arc results are memoised write-once; incomplete
// results are handed back but never cached, so a value pinned later
// by a concrete conjunct gets another chance. Re-entering a node that
// is already being evaluated yields a cycle error, which unification
// against a concrete operand may turn into a delayed constraint.

use crate::ast::{Clause, NodeRef, Op, Syntax, UnOp};
use crate::errors::{most_specific, Bottom, Code};
use crate::instance::{Binding, Delayed, Instance};
use crate::kind::{self, KindSet};
use crate::label::Label;
use crate::lower::{scope_lookup, scope_push, Scope};
use crate::subsume::SubMode;
use crate::value::{ArcState, Branch, DisjVal, ListVal, StructVal, Value, ValueId};

// An arc produced by a comprehension, waiting to be merged.
struct YieldedArc {
    label: Label,
    value: ValueId,
    optional: bool,
    definition: bool,
    doc: Option<String>,
    src: NodeRef,
}

// What a comprehension body yields.
enum Gather<'a> {
    Arcs(&'a mut Vec<YieldedArc>),
    Elems(&'a mut Vec<ValueId>),
}

impl Instance {
    // Drive a value to weak head normal form.
    pub fn eval_partial(&mut self, v: ValueId) -> ValueId {
        if self.cancelled() {
            let src = self.src(v);
            return self.bottom_at(Code::Cancelled, src, "evaluation cancelled");
        }
        if !self.value(v).is_expr() {
            return match self.value(v) {
                Value::Struct(_) => {
                    self.expand_struct(v);
                    v
                }
                Value::Disjunction(_) => self.simplify_disjunction(v),
                _ => v,
            };
        }
        if self.in_prog(v) {
            let src = self.src(v);
            return self.bottom_at(Code::Cycle, src, "cycle detected");
        }
        self.set_in_prog(v, true);
        let r = self.eval_expr(v);
        self.set_in_prog(v, false);
        r
    }

    // Force until ready to emit: pick default layers of disjunctions,
    // resolve emit values, manifest list lengths.
    pub fn manifest(&mut self, v: ValueId) -> ValueId {
        let mut cur = self.eval_partial(v);
        loop {
            match self.value(cur).clone() {
                Value::Disjunction(d) => {
                    let marked: Vec<Branch> =
                        d.branches.iter().filter(|b| b.default).cloned().collect();
                    if marked.len() == 1 {
                        cur = self.eval_partial(marked[0].value);
                    } else if !marked.is_empty() {
                        if marked.len() == d.branches.len() {
                            return cur;
                        }
                        let src = self.src(cur);
                        return self.alloc(
                            Value::Disjunction(DisjVal {
                                branches: marked,
                                has_defaults: true,
                            }),
                            src,
                        );
                    } else if d.has_defaults && !d.branches.is_empty() {
                        // Every marked branch was eliminated; the
                        // first remaining branch takes over as the
                        // default layer.
                        cur = self.eval_partial(d.branches[0].value);
                    } else {
                        return cur;
                    }
                }
                Value::Struct(sv) => {
                    if sv.emit.is_some() {
                        let next = self.manifest_emit(cur, sv);
                        if next == cur {
                            return cur;
                        }
                        cur = next;
                    } else {
                        return cur;
                    }
                }
                Value::List(l) => {
                    let ml = self.manifest(l.len);
                    if let Value::List(lv) = self.value_mut(cur) {
                        lv.len = ml;
                    }
                    return cur;
                }
                _ => return cur,
            }
        }
    }

    // A struct with an embedded value manifests as the value unified
    // with its regular fields; a struct of only hidden fields and
    // definitions manifests as the value alone.
    fn manifest_emit(&mut self, st: ValueId, sv: StructVal) -> ValueId {
        let emit = match sv.emit {
            Some(e) => e,
            None => return st,
        };
        let e = self.eval_partial(emit);
        if self.is_bottom(e) {
            return e;
        }
        let has_regular = sv
            .arcs
            .iter()
            .any(|a| !a.label.is_hidden() && !a.definition);
        if !has_regular {
            return e;
        }
        let mut stripped = sv;
        stripped.emit = None;
        let src = self.src(st);
        let plain = self.alloc(Value::Struct(stripped), src);
        self.unify(src, e, plain)
    }

    fn eval_expr(&mut self, v: ValueId) -> ValueId {
        let src = self.src(v);
        match self.value(v).clone() {
            Value::Ref { ident, scope } => self.eval_ref(v, ident, &scope),
            Value::Selector { expr, label } => {
                let e = self.manifest(expr);
                if self.is_bottom(e) {
                    return e;
                }
                match self.value(e) {
                    Value::Struct(_) => self.lookup_arc(e, label, src),
                    _ => {
                        let name = self.index.name(label);
                        if !self.is_ground(e) {
                            let msg = format!("field {:?} not yet resolvable", name);
                            self.bottom_at(Code::Incomplete, src, msg)
                        } else {
                            let msg = format!(
                                "cannot select field {:?} from {}",
                                name,
                                self.show(e)
                            );
                            self.bottom_at(Code::Type, src, msg)
                        }
                    }
                }
            }
            Value::Index { expr, index } => self.eval_index(src, expr, index),
            Value::Slice { expr, lo, hi } => self.eval_slice(src, expr, lo, hi),
            Value::Call { func, args } => self.eval_call(src, func, &args),
            Value::Unary { op, expr } => self.eval_unary(src, op, expr),
            Value::Binary { op, lhs, rhs } => self.eval_binary(src, op, lhs, rhs),
            Value::Interpolation { parts } => {
                let mut out = String::new();
                for p in parts {
                    let e = self.manifest(p);
                    if self.is_bottom(e) {
                        return e;
                    }
                    match self.value(e) {
                        Value::Str(s) => out.push_str(s),
                        _ => {
                            return if !self.is_ground(e) {
                                self.bottom_at(
                                    Code::Incomplete,
                                    src,
                                    "interpolated part is not concrete",
                                )
                            } else {
                                let msg = format!(
                                    "invalid interpolation part {}",
                                    self.show(e)
                                );
                                self.bottom_at(Code::Type, src, msg)
                            };
                        }
                    }
                }
                self.str_value(&out, src)
            }
            Value::Comprehension { node, scope } => {
                self.eval_list_comprehension(v, node, &scope)
            }
            _ => v,
        }
    }

    fn eval_ref(&mut self, v: ValueId, ident: NodeRef, scope: &Scope) -> ValueId {
        let src = self.src(v);
        let ast = self.ast.clone();
        let (name, binding) = match ast.node(ident) {
            Syntax::Ident { name, binding } => (name.clone(), binding.get()),
            _ => {
                return self.bottom_at(Code::Reference, src, "malformed reference");
            }
        };
        let target = match binding {
            Some(t) => t,
            None => {
                return match crate::builtin::predeclared(self, &name, src) {
                    Some(val) => val,
                    None => {
                        let msg = format!("reference {:?} not found", name);
                        self.bottom_at(Code::Reference, src, msg)
                    }
                };
            }
        };
        if let Some(bound) = scope_lookup(scope, target) {
            return self.eval_partial(bound);
        }
        match self.bindings.get(&target).cloned() {
            Some(Binding::Arc { st, label }) => self.lookup_arc(st, label, src),
            Some(Binding::Alias { expr, scope: captured }) => {
                let e = match ast.node(expr) {
                    Syntax::Alias { expr, .. } => *expr,
                    _ => expr,
                };
                let lowered = self.lower_expr(e, &captured);
                self.eval_partial(lowered)
            }
            Some(Binding::Import(path)) => match self.imports.get(&path).cloned() {
                Some(pkg) => self.eval_partial(pkg),
                None => {
                    let msg = format!("package {:?} not loaded", path);
                    self.bottom_at(Code::Reference, src, msg)
                }
            },
            None => {
                let msg = format!("reference {:?} not found", name);
                self.bottom_at(Code::Reference, src, msg)
            }
        }
    }

    // Evaluate the arc for `label`, applying the struct's templates
    // and caching the result on the arc.
    pub fn lookup_arc(&mut self, st: ValueId, label: Label, src: NodeRef) -> ValueId {
        self.expand_struct(st);
        if let Some(b) = self.as_bottom(st) {
            let b = b.clone();
            return self.bottom_value(b);
        }
        let (idx, pending) = match self.value(st) {
            Value::Struct(sv) => {
                (sv.arc_index(label), !sv.comprehensions.is_empty())
            }
            _ => {
                return self.bottom_at(Code::Type, src, "field lookup on non-struct");
            }
        };
        let i = match idx {
            Some(i) => i,
            None => {
                let name = self.index.name(label);
                return if pending {
                    let msg = format!("field {:?} not yet known", name);
                    self.bottom_at(Code::Incomplete, src, msg)
                } else {
                    let msg = format!("field {:?} not found", name);
                    self.bottom_at(Code::NotFound, src, msg)
                };
            }
        };

        let (state, base, definition, templates) = match self.value(st) {
            Value::Struct(sv) => (
                sv.arcs[i].state,
                sv.arcs[i].value,
                sv.arcs[i].definition,
                sv.templates.clone(),
            ),
            _ => unreachable!(),
        };
        match state {
            ArcState::Done(r) => return r,
            ArcState::Busy => {
                return self.bottom_at(Code::Cycle, src, "cycle detected");
            }
            ArcState::Todo => {}
        }
        self.set_arc_state(st, i, ArcState::Busy);

        let mut cur = base;
        if !label.is_hidden() && !definition {
            for t in templates {
                let tv = self.apply_template(t, label, src);
                cur = self.alloc(
                    Value::Binary { op: Op::Unify, lhs: cur, rhs: tv },
                    src,
                );
            }
        }
        let r = self.eval_partial(cur);
        if self.is_incomplete(r) {
            self.set_arc_state(st, i, ArcState::Todo);
        } else {
            self.set_arc_state(st, i, ArcState::Done(r));
        }
        r
    }

    fn set_arc_state(&mut self, st: ValueId, i: usize, state: ArcState) {
        if let Value::Struct(sv) = self.value_mut(st) {
            sv.arcs[i].state = state;
        }
    }

    fn apply_template(&mut self, t: ValueId, label: Label, src: NodeRef) -> ValueId {
        let lam = match self.value(t).clone() {
            Value::Lambda(lam) => lam,
            _ => return t,
        };
        let name = self.index.name(label);
        let arg = self.str_value(&name, src);
        let scope = scope_push(&lam.scope, lam.params[0], arg);
        self.lower_expr(lam.body, &scope)
    }

    // Run the struct's pending comprehensions, merging generated arcs
    // in. Incomplete sources stay pending; fatal errors replace the
    // struct.
    pub fn expand_struct(&mut self, v: ValueId) {
        let comprehensions = match self.value_mut(v) {
            Value::Struct(sv) => {
                if sv.expanded || sv.expanding {
                    return;
                }
                sv.expanding = true;
                std::mem::take(&mut sv.comprehensions)
            }
            _ => return,
        };

        let mut yielded = Vec::new();
        let mut remaining = Vec::new();
        let mut fatal = None;
        for c in comprehensions {
            match self.comprehension_arcs(c) {
                Ok(mut s) => yielded.append(&mut s),
                Err(b) => {
                    if b.is_incomplete() {
                        remaining.push(c);
                    } else {
                        fatal = Some(b);
                        break;
                    }
                }
            }
        }
        if let Some(b) = fatal {
            *self.value_mut(v) = Value::Bottom(b);
            return;
        }

        let mut sv = match self.value(v).clone() {
            Value::Struct(sv) => sv,
            _ => return,
        };
        for y in yielded {
            self.merge_arc(
                &mut sv, y.label, y.value, y.optional, y.definition,
                y.doc, y.src,
            );
        }
        sv.comprehensions = remaining;
        sv.expanding = false;
        sv.expanded = sv.comprehensions.is_empty();
        *self.value_mut(v) = Value::Struct(sv);
    }

    fn comprehension_arcs(&mut self, c: ValueId) -> Result<Vec<YieldedArc>, Bottom> {
        let (node, scope) = match self.value(c).clone() {
            Value::Comprehension { node, scope } => (node, scope),
            _ => return Ok(Vec::new()),
        };
        let ast = self.ast.clone();
        match ast.node(node) {
            // A field whose label is computed at evaluation time.
            Syntax::Field { label, value, optional, definition, doc } => {
                let key = self.lower_expr(*label, &scope);
                let key = self.manifest(key);
                if let Some(b) = self.as_bottom(key) {
                    return Err(b.clone());
                }
                let s = match self.value(key) {
                    Value::Str(s) => s.clone(),
                    _ => {
                        return Err(if !self.is_ground(key) {
                            Bottom::new(
                                Code::Incomplete,
                                node,
                                "field label is not concrete",
                            )
                        } else {
                            Bottom::new(Code::Type, node, "field label must be a string")
                        });
                    }
                };
                let lab = self.index.intern(&s, false);
                let val = self.lower_expr(*value, &scope);
                Ok(vec![YieldedArc {
                    label: lab,
                    value: val,
                    optional: *optional,
                    definition: *definition,
                    doc: doc.clone(),
                    src: node,
                }])
            }
            Syntax::ComprehensionDecl { clauses, body } => {
                let clauses = clauses.clone();
                let body = *body;
                let mut out = Vec::new();
                self.drive(&clauses, 0, &scope, body, &mut Gather::Arcs(&mut out))?;
                Ok(out)
            }
            _ => Ok(Vec::new()),
        }
    }

    fn eval_list_comprehension(
        &mut self,
        v: ValueId,
        node: NodeRef,
        scope: &Scope,
    ) -> ValueId {
        let src = self.src(v);
        let ast = self.ast.clone();
        let (clauses, expr) = match ast.node(node) {
            Syntax::ListComprehension { clauses, expr } => (clauses.clone(), *expr),
            _ => {
                return self.bottom_at(Code::Type, src, "malformed comprehension");
            }
        };
        let mut elems = Vec::new();
        let run = self.drive(&clauses, 0, scope, expr, &mut Gather::Elems(&mut elems));
        if let Err(b) = run {
            return self.bottom_value(b);
        }
        let len = self.num_int(elems.len() as i64);
        self.alloc(
            Value::List(ListVal { elems, typ: None, len, open: false }),
            src,
        )
    }

    // The clause driver: iterate sources, bind loop variables, test
    // guards, and yield the body once per matching binding.
    fn drive(
        &mut self,
        clauses: &[Clause],
        i: usize,
        scope: &Scope,
        body: NodeRef,
        out: &mut Gather,
    ) -> Result<(), Bottom> {
        if i == clauses.len() {
            return self.yield_body(scope, body, out);
        }
        match &clauses[i] {
            Clause::If { cond } => {
                let c = self.lower_expr(*cond, scope);
                let c = self.manifest(c);
                if let Some(b) = self.as_bottom(c) {
                    return Err(b.clone());
                }
                match self.value(c) {
                    Value::Bool(true) => self.drive(clauses, i + 1, scope, body, out),
                    Value::Bool(false) => Ok(()),
                    _ => Err(if !self.is_ground(c) {
                        Bottom::new(Code::Incomplete, *cond, "guard is not concrete")
                    } else {
                        Bottom::new(Code::Type, *cond, "guard must be a bool")
                    }),
                }
            }
            Clause::For { key, value, src } => {
                let s = self.lower_expr(*src, scope);
                let s = self.manifest(s);
                if let Some(b) = self.as_bottom(s) {
                    return Err(b.clone());
                }
                match self.value(s).clone() {
                    Value::List(l) => {
                        for (n, elem) in l.elems.iter().enumerate() {
                            let mut sc = scope.clone();
                            if let Some(k) = key {
                                let kv = self.num_int(n as i64);
                                sc = scope_push(&sc, *k, kv);
                            }
                            sc = scope_push(&sc, *value, *elem);
                            self.drive(clauses, i + 1, &sc, body, out)?;
                        }
                        Ok(())
                    }
                    Value::Struct(sv) => {
                        for arc in &sv.arcs {
                            if arc.label.is_hidden() || arc.optional || arc.definition {
                                continue;
                            }
                            let val = self.lookup_arc(s, arc.label, *src);
                            if let Some(b) = self.as_bottom(val) {
                                return Err(b.clone());
                            }
                            let mut sc = scope.clone();
                            if let Some(k) = key {
                                let name = self.index.name(arc.label);
                                let kv = self.str_value(&name, *src);
                                sc = scope_push(&sc, *k, kv);
                            }
                            sc = scope_push(&sc, *value, val);
                            self.drive(clauses, i + 1, &sc, body, out)?;
                        }
                        Ok(())
                    }
                    _ => Err(if !self.is_ground(s) {
                        Bottom::new(
                            Code::Incomplete,
                            *src,
                            "iteration source is not concrete",
                        )
                    } else {
                        Bottom::new(
                            Code::Type,
                            *src,
                            "cannot iterate over non-list, non-struct value",
                        )
                    }),
                }
            }
        }
    }

    fn yield_body(
        &mut self,
        scope: &Scope,
        body: NodeRef,
        out: &mut Gather,
    ) -> Result<(), Bottom> {
        match out {
            Gather::Elems(elems) => {
                let e = self.lower_expr(body, scope);
                elems.push(e);
                Ok(())
            }
            Gather::Arcs(arcs) => {
                let b = self.lower_expr(body, scope);
                let b = self.eval_partial(b);
                if let Some(bot) = self.as_bottom(b) {
                    return Err(bot.clone());
                }
                let sv = match self.value(b) {
                    Value::Struct(sv) => sv.clone(),
                    _ => {
                        return Err(Bottom::new(
                            Code::Type,
                            body,
                            "comprehension body must be a struct",
                        ));
                    }
                };
                for arc in sv.arcs {
                    arcs.push(YieldedArc {
                        label: arc.label,
                        value: arc.value,
                        optional: arc.optional,
                        definition: arc.definition,
                        doc: arc.doc,
                        src: body,
                    });
                }
                Ok(())
            }
        }
    }

    // Evaluate branches, flatten nested alternatives, drop bottoms,
    // and deduplicate branches another non-default branch subsumes.
    fn simplify_disjunction(&mut self, v: ValueId) -> ValueId {
        let dv = match self.value(v).clone() {
            Value::Disjunction(dv) => dv,
            _ => return v,
        };
        let src = self.src(v);
        let mut has_defaults = dv.has_defaults;
        let mut flat: Vec<Branch> = Vec::new();
        let mut errors = Vec::new();
        for br in dv.branches {
            let e = self.eval_partial(br.value);
            match self.value(e).clone() {
                Value::Bottom(b) => errors.push(b),
                Value::Disjunction(inner) => {
                    has_defaults |= inner.has_defaults;
                    for ib in inner.branches {
                        flat.push(Branch {
                            value: ib.value,
                            default: ib.default || br.default,
                        });
                    }
                }
                _ => flat.push(Branch { value: e, default: br.default }),
            }
        }

        let mut uniq: Vec<Branch> = Vec::new();
        for br in flat {
            let mut merged = false;
            for u in uniq.iter_mut() {
                if self.equal(u.value, br.value) {
                    u.default |= br.default;
                    merged = true;
                    break;
                }
            }
            if !merged {
                uniq.push(br);
            }
        }

        let mut keep = vec![true; uniq.len()];
        for x in 0..uniq.len() {
            if uniq[x].default {
                continue;
            }
            for y in 0..uniq.len() {
                if y == x || !keep[y] || uniq[y].default {
                    continue;
                }
                if self.subsumes(uniq[y].value, uniq[x].value, SubMode::Default) {
                    keep[x] = false;
                    break;
                }
            }
        }
        let branches: Vec<Branch> = uniq
            .into_iter()
            .zip(keep.into_iter())
            .filter(|(_, k)| *k)
            .map(|(b, _)| b)
            .collect();

        match branches.len() {
            0 => {
                let b = most_specific(errors);
                self.bottom_value(b)
            }
            1 => branches[0].value,
            _ => self.alloc(
                Value::Disjunction(DisjVal { branches, has_defaults }),
                src,
            ),
        }
    }

    fn eval_index(&mut self, src: NodeRef, expr: ValueId, index: ValueId) -> ValueId {
        let e = self.manifest(expr);
        if self.is_bottom(e) {
            return e;
        }
        let i = self.manifest(index);
        if self.is_bottom(i) {
            return i;
        }
        match (self.value(e).clone(), self.value(i).clone()) {
            (Value::List(l), Value::Num(n)) => match n.as_usize() {
                Ok(idx) if idx < l.elems.len() => self.eval_partial(l.elems[idx]),
                Ok(idx) => {
                    let msg = format!("index {} out of range", idx);
                    self.bottom_at(Code::Range, src, msg)
                }
                Err(_) => {
                    let msg = format!("invalid index {}", n);
                    self.bottom_at(Code::Range, src, msg)
                }
            },
            (Value::Struct(_), Value::Str(s)) => {
                let label = self.index.intern(&s, false);
                self.lookup_arc(e, label, src)
            }
            (Value::Bytes(b), Value::Num(n)) => match n.as_usize() {
                Ok(idx) if idx < b.len() => {
                    self.alloc(Value::Num(crate::number::Num::int(b[idx] as i64)), src)
                }
                _ => self.bottom_at(Code::Range, src, "index out of range"),
            },
            (Value::Str(s), Value::Num(n)) => match n.as_usize() {
                Ok(idx) if idx < s.len() => {
                    if !s.is_char_boundary(idx) {
                        return self.bottom_at(
                            Code::Range,
                            src,
                            "index not on a character boundary",
                        );
                    }
                    let c = s[idx..].chars().next().unwrap();
                    self.str_value(&c.to_string(), src)
                }
                _ => self.bottom_at(Code::Range, src, "index out of range"),
            },
            _ => {
                if !self.is_ground(e) {
                    self.bottom_at(Code::Incomplete, src, "index on non-concrete value")
                } else {
                    let msg = format!("cannot index {}", self.show(e));
                    self.bottom_at(Code::Type, src, msg)
                }
            }
        }
    }

    fn eval_slice(
        &mut self,
        src: NodeRef,
        expr: ValueId,
        lo: Option<ValueId>,
        hi: Option<ValueId>,
    ) -> ValueId {
        let e = self.manifest(expr);
        if self.is_bottom(e) {
            return e;
        }
        let lo = match lo {
            Some(l) => match self.slice_pos(src, l) {
                Ok(p) => Some(p),
                Err(err) => return err,
            },
            None => None,
        };
        let hi = match hi {
            Some(h) => match self.slice_pos(src, h) {
                Ok(p) => Some(p),
                Err(err) => return err,
            },
            None => None,
        };
        match self.value(e).clone() {
            Value::List(l) => {
                let n = l.elems.len();
                let (a, b) = (lo.unwrap_or(0), hi.unwrap_or(n));
                if a > b || b > n {
                    return self.bottom_at(Code::Range, src, "slice out of range");
                }
                let elems: Vec<ValueId> = l.elems[a..b].to_vec();
                let len = self.num_int(elems.len() as i64);
                self.alloc(
                    Value::List(ListVal { elems, typ: None, len, open: false }),
                    src,
                )
            }
            Value::Str(s) => {
                let n = s.len();
                let (a, b) = (lo.unwrap_or(0), hi.unwrap_or(n));
                if a > b || b > n {
                    return self.bottom_at(Code::Range, src, "slice out of range");
                }
                if !s.is_char_boundary(a) || !s.is_char_boundary(b) {
                    return self.bottom_at(
                        Code::Range,
                        src,
                        "slice not on a character boundary",
                    );
                }
                self.str_value(&s[a..b], src)
            }
            Value::Bytes(bytes) => {
                let n = bytes.len();
                let (a, b) = (lo.unwrap_or(0), hi.unwrap_or(n));
                if a > b || b > n {
                    return self.bottom_at(Code::Range, src, "slice out of range");
                }
                self.alloc(Value::Bytes(std::rc::Rc::new(bytes[a..b].to_vec())), src)
            }
            _ => {
                let msg = format!("cannot slice {}", self.show(e));
                self.bottom_at(Code::Type, src, msg)
            }
        }
    }

    fn slice_pos(&mut self, src: NodeRef, v: ValueId) -> Result<usize, ValueId> {
        let m = self.manifest(v);
        if self.is_bottom(m) {
            return Err(m);
        }
        match self.value(m) {
            Value::Num(n) => match n.as_usize() {
                Ok(p) => Ok(p),
                Err(_) => Err(self.bottom_at(Code::Range, src, "invalid slice position")),
            },
            _ => Err(self.bottom_at(Code::Type, src, "slice position must be an int")),
        }
    }

    fn eval_call(&mut self, src: NodeRef, func: ValueId, args: &[ValueId]) -> ValueId {
        let f = self.manifest(func);
        if self.is_bottom(f) {
            return f;
        }
        match self.value(f).clone() {
            Value::Builtin(def) => {
                if args.len() != def.arity {
                    let msg = format!(
                        "{} takes {} arguments, got {}",
                        def.name,
                        def.arity,
                        args.len()
                    );
                    return self.bottom_at(Code::Type, src, msg);
                }
                (def.func)(self, src, args)
            }
            Value::Lambda(lam) => {
                if args.len() != lam.params.len() {
                    let msg = format!(
                        "template takes {} arguments, got {}",
                        lam.params.len(),
                        args.len()
                    );
                    return self.bottom_at(Code::Type, src, msg);
                }
                let mut sc = lam.scope.clone();
                for (p, a) in lam.params.iter().zip(args.iter()) {
                    sc = scope_push(&sc, *p, *a);
                }
                let lowered = self.lower_expr(lam.body, &sc);
                self.eval_partial(lowered)
            }
            _ => {
                let msg = format!("{} is not callable", self.show(f));
                self.bottom_at(Code::Type, src, msg)
            }
        }
    }

    fn eval_unary(&mut self, src: NodeRef, op: UnOp, expr: ValueId) -> ValueId {
        let e = self.manifest(expr);
        if self.is_bottom(e) {
            return e;
        }
        match (op, self.value(e).clone()) {
            (UnOp::Pos, Value::Num(_)) | (UnOp::Pos, Value::Duration(_)) => e,
            (UnOp::Neg, Value::Num(n)) => self.alloc(Value::Num(n.neg()), src),
            (UnOp::Neg, Value::Duration(d)) => self.alloc(Value::Duration(-d), src),
            (UnOp::Not, Value::Bool(b)) => self.alloc(Value::Bool(!b), src),
            _ => {
                if !self.is_ground(e) {
                    self.bottom_at(Code::Incomplete, src, "operand is not concrete")
                } else {
                    let msg = format!("invalid unary operand {}", self.show(e));
                    self.bottom_at(Code::Type, src, msg)
                }
            }
        }
    }

    fn eval_binary(
        &mut self,
        src: NodeRef,
        op: Op,
        lhs: ValueId,
        rhs: ValueId,
    ) -> ValueId {
        match op {
            Op::Unify => {
                let ea = self.eval_partial(lhs);
                let eb = self.eval_partial(rhs);
                // A cycle pinned down by a concrete conjunct: take
                // the concrete side now and re-check the dropped
                // expression once the cycle is broken.
                let a_cycle = self
                    .as_bottom(ea)
                    .map(|b| b.code == Code::Cycle)
                    .unwrap_or(false);
                let b_cycle = self
                    .as_bottom(eb)
                    .map(|b| b.code == Code::Cycle)
                    .unwrap_or(false);
                if a_cycle && !self.is_bottom(eb) && self.is_ground(eb) {
                    eval_trace!("pinning cycle to {}", self.show(eb));
                    self.delayed.push(Delayed { expr: lhs, expect: eb, src });
                    return eb;
                }
                if b_cycle && !self.is_bottom(ea) && self.is_ground(ea) {
                    eval_trace!("pinning cycle to {}", self.show(ea));
                    self.delayed.push(Delayed { expr: rhs, expect: ea, src });
                    return ea;
                }
                self.unify(src, ea, eb)
            }
            Op::Disjoin => {
                let ea = self.eval_partial(lhs);
                let eb = self.eval_partial(rhs);
                let d = self.bin_op(src, Op::Disjoin, ea, eb);
                self.eval_partial(d)
            }
            _ => {
                let ea = self.manifest(lhs);
                if self.is_bottom(ea) {
                    return ea;
                }
                let eb = self.manifest(rhs);
                if self.is_bottom(eb) {
                    return eb;
                }
                self.bin_op(src, op, ea, eb)
            }
        }
    }

    // Force a value and check its kind; used by builtins and the
    // emitter to produce typed errors.
    pub fn eval_want(
        &mut self,
        v: ValueId,
        want: KindSet,
        what: &str,
    ) -> Result<ValueId, ValueId> {
        let m = self.manifest(v);
        if self.is_bottom(m) {
            return Err(m);
        }
        let k = self.kind(m);
        if !kind::ordinary(k).intersects(kind::ordinary(want)) {
            let msg = format!(
                "{}: expected {}, found {}",
                what,
                kind::kind_name(want),
                kind::kind_name(k)
            );
            let src = self.src(m);
            return Err(self.bottom_at(Code::Type, src, msg));
        }
        if !kind::is_ground(k) {
            let msg = format!("{} is not concrete", what);
            let src = self.src(m);
            return Err(self.bottom_at(Code::Incomplete, src, msg));
        }
        Ok(m)
    }

    // Re-check constraints dropped while pinning cycles. Returns the
    // first conflict, or an unresolved-cycle error if no progress can
    // be made.
    pub fn drain_delayed(&mut self) -> Option<Bottom> {
        while !self.delayed.is_empty() {
            let pending = std::mem::take(&mut self.delayed);
            eval_trace!("re-checking {} delayed constraints", pending.len());
            let mut progressed = false;
            for d in pending {
                let r = self.manifest(d.expr);
                match self.as_bottom(r).cloned() {
                    Some(b) => {
                        if b.is_incomplete() {
                            self.delayed.push(d);
                        } else {
                            return Some(b);
                        }
                    }
                    None => {
                        if !self.equal(r, d.expect) {
                            let msg = format!(
                                "conflicting values {} and {} after cycle resolution",
                                self.show(r),
                                self.show(d.expect)
                            );
                            return Some(Bottom::new(Code::Type, d.src, msg));
                        }
                        progressed = true;
                    }
                }
            }
            if !progressed {
                if let Some(d) = self.delayed.first() {
                    return Some(Bottom::new(Code::Cycle, d.src, "unresolved cycle"));
                }
                break;
            }
        }
        None
    }
}
