// Lowering: resolved syntax to value graph.
//
// Files and struct literals become struct values; fields become arcs,
// with duplicate labels merged into a conjunct chain. Embedded
// expressions become the struct's emit value. Dynamic labels and
// `for`/`if` blocks become pending comprehensions run when the struct
// is expanded; template labels become lambdas applied per arc label.
// Aliases are not lowered at all: each reference site lowers the
// aliased expression afresh. Comprehension and template bodies keep
// their syntax and are lowered at every application with the lexical
// scope captured here.

use std::rc::Rc;

use crate::ast::{NodeRef, Op, Syntax};
use crate::errors::{Bottom, Code};
use crate::instance::{Binding, Instance};
use crate::label::Label;
use crate::value::{
    Arc, Branch, DisjVal, LambdaVal, ListVal, StructVal, Value, ValueId,
};

// Lexical scope: a chain of binder-node/value pairs, pushed by
// comprehension clauses, template labels and calls. Struct fields are
// not here; they resolve through the instance binding table.
pub type Scope = Option<Rc<ScopeLink>>;

#[derive(Debug)]
pub struct ScopeLink {
    pub binder: NodeRef,
    pub value: ValueId,
    pub parent: Scope,
}

pub fn scope_push(scope: &Scope, binder: NodeRef, value: ValueId) -> Scope {
    Some(Rc::new(ScopeLink { binder, value, parent: scope.clone() }))
}

pub fn scope_lookup(scope: &Scope, binder: NodeRef) -> Option<ValueId> {
    let mut cur = scope;
    while let Some(link) = cur {
        if link.binder == binder {
            return Some(link.value);
        }
        cur = &link.parent;
    }
    None
}

impl Instance {
    // Lower a file into the root struct value.
    pub fn compile(&mut self, root: NodeRef) -> ValueId {
        self.lower_expr(root, &None)
    }

    pub fn lower_expr(&mut self, n: NodeRef, scope: &Scope) -> ValueId {
        let ast = self.ast.clone();
        match ast.node(n) {
            Syntax::Null => self.alloc(Value::Null, n),
            Syntax::Bool(b) => self.alloc(Value::Bool(*b), n),
            Syntax::Num(num) => self.alloc(Value::Num(num.clone()), n),
            Syntax::Str(s) => self.alloc(Value::Str(Rc::new(s.clone())), n),
            Syntax::Bytes(b) => self.alloc(Value::Bytes(Rc::new(b.clone())), n),
            Syntax::Duration(d) => self.alloc(Value::Duration(*d), n),
            Syntax::Bottom => {
                let b = Bottom::new(Code::User, n, "explicit error in source");
                self.alloc(Value::Bottom(b), n)
            }
            Syntax::Ident { .. } => {
                self.alloc(Value::Ref { ident: n, scope: scope.clone() }, n)
            }
            Syntax::Selector { expr, name } => {
                let e = self.lower_expr(*expr, scope);
                let label = self.index.intern(name, true);
                self.alloc(Value::Selector { expr: e, label }, n)
            }
            Syntax::Index { expr, index } => {
                let e = self.lower_expr(*expr, scope);
                let i = self.lower_expr(*index, scope);
                self.alloc(Value::Index { expr: e, index: i }, n)
            }
            Syntax::Slice { expr, lo, hi } => {
                let e = self.lower_expr(*expr, scope);
                let lo = lo.map(|l| self.lower_expr(l, scope));
                let hi = hi.map(|h| self.lower_expr(h, scope));
                self.alloc(Value::Slice { expr: e, lo, hi }, n)
            }
            Syntax::Call { func, args } => {
                let f = self.lower_expr(*func, scope);
                let args: Vec<ValueId> =
                    args.clone().iter().map(|a| self.lower_expr(*a, scope)).collect();
                self.alloc(Value::Call { func: f, args }, n)
            }
            Syntax::Unary { op, expr } => {
                let e = self.lower_expr(*expr, scope);
                self.alloc(Value::Unary { op: *op, expr: e }, n)
            }
            Syntax::Bound { op, expr } => {
                let e = self.lower_expr(*expr, scope);
                self.alloc(Value::Bound { op: *op, value: e }, n)
            }
            Syntax::Binary { op: Op::Disjoin, .. } => self.lower_disjunction(n, scope),
            Syntax::Binary { op, lhs, rhs } => {
                let l = self.lower_expr(*lhs, scope);
                let r = self.lower_expr(*rhs, scope);
                self.alloc(Value::Binary { op: *op, lhs: l, rhs: r }, n)
            }
            Syntax::Default { expr } => {
                // A stray default mark outside a disjunction is just
                // its expression.
                self.lower_expr(*expr, scope)
            }
            Syntax::Interpolation { parts } => {
                let parts: Vec<ValueId> =
                    parts.clone().iter().map(|p| self.lower_expr(*p, scope)).collect();
                self.alloc(Value::Interpolation { parts }, n)
            }
            Syntax::List { elems, ellipsis } => {
                let elems: Vec<ValueId> =
                    elems.clone().iter().map(|e| self.lower_expr(*e, scope)).collect();
                let (open, typ) = match ellipsis {
                    None => (false, None),
                    Some(t) => (true, t.map(|t| self.lower_expr(t, scope))),
                };
                let len = if open {
                    let min = self.num_int(elems.len() as i64);
                    self.alloc(Value::Bound { op: Op::Ge, value: min }, n)
                } else {
                    self.num_int(elems.len() as i64)
                };
                self.alloc(Value::List(ListVal { elems, typ, len, open }), n)
            }
            Syntax::StructLit { decls } => self.lower_struct(n, &decls.clone(), scope),
            Syntax::File { decls } => self.lower_struct(n, &decls.clone(), scope),
            Syntax::ListComprehension { .. } => {
                self.alloc(Value::Comprehension { node: n, scope: scope.clone() }, n)
            }
            _ => {
                let msg = format!("declaration {} in expression position",
                                  ast.describe(n));
                self.bottom_at(Code::Type, n, msg)
            }
        }
    }

    fn lower_struct(&mut self, n: NodeRef, decls: &[NodeRef], scope: &Scope) -> ValueId {
        let ast = self.ast.clone();
        let vid = self.alloc(Value::Struct(StructVal::new()), n);
        let mut st = StructVal::new();
        for d in decls {
            match ast.node(*d) {
                Syntax::Field { label, value, optional, definition, doc } => {
                    match ast.node(*label) {
                        Syntax::TemplateLabel { .. } => {
                            let lambda = self.alloc(
                                Value::Lambda(LambdaVal {
                                    params: vec![*label],
                                    body: *value,
                                    scope: scope.clone(),
                                }),
                                *d,
                            );
                            st.templates.push(lambda);
                        }
                        Syntax::Interpolation { .. } => {
                            let c = self.alloc(
                                Value::Comprehension { node: *d, scope: scope.clone() },
                                *d,
                            );
                            st.comprehensions.push(c);
                        }
                        _ => {
                            let lab = match self.index.node_label(&ast, *label) {
                                Some(lab) => lab,
                                None => {
                                    // Unusable label node; record the
                                    // error as the struct's emit.
                                    let msg = format!(
                                        "invalid label {}",
                                        ast.describe(*label)
                                    );
                                    let b = self.bottom_at(Code::Type, *label, msg);
                                    st.emit = Some(b);
                                    continue;
                                }
                            };
                            let val = self.lower_expr(*value, scope);
                            if *definition {
                                self.close_literals(val);
                            }
                            self.bindings.insert(
                                *d,
                                Binding::Arc { st: vid, label: lab },
                            );
                            self.merge_arc(
                                &mut st, lab, val, *optional, *definition,
                                doc.clone(), *d,
                            );
                        }
                    }
                }
                Syntax::Embed { expr } => {
                    let e = self.lower_expr(*expr, scope);
                    st.emit = Some(match st.emit {
                        None => e,
                        Some(prev) => self.alloc(
                            Value::Binary { op: Op::Unify, lhs: prev, rhs: e },
                            *d,
                        ),
                    });
                }
                Syntax::ComprehensionDecl { .. } => {
                    let c = self.alloc(
                        Value::Comprehension { node: *d, scope: scope.clone() },
                        *d,
                    );
                    st.comprehensions.push(c);
                }
                Syntax::Alias { .. } => {
                    self.bindings.insert(
                        *d,
                        Binding::Alias { expr: *d, scope: scope.clone() },
                    );
                }
                Syntax::Import { path, .. } => {
                    self.bindings.insert(*d, Binding::Import(path.clone()));
                }
                _ => {
                    // An expression at declaration level is an embed.
                    let e = self.lower_expr(*d, scope);
                    st.emit = Some(match st.emit {
                        None => e,
                        Some(prev) => self.alloc(
                            Value::Binary { op: Op::Unify, lhs: prev, rhs: e },
                            *d,
                        ),
                    });
                }
            }
        }
        *self.value_mut(vid) = Value::Struct(st);
        vid
    }

    // Insert an arc, or extend the conjunct chain of an existing one.
    pub fn merge_arc(
        &mut self,
        st: &mut StructVal,
        label: Label,
        value: ValueId,
        optional: bool,
        definition: bool,
        doc: Option<String>,
        src: NodeRef,
    ) {
        if let Some(i) = st.arc_index(label) {
            let prev = st.arcs[i].value;
            let merged = self.alloc(
                Value::Binary { op: Op::Unify, lhs: prev, rhs: value },
                src,
            );
            let arc = &mut st.arcs[i];
            arc.value = merged;
            arc.optional = arc.optional && optional;
            arc.definition = arc.definition || definition;
            if let Some(doc) = doc {
                match &mut arc.doc {
                    Some(prev) => {
                        prev.push('\n');
                        prev.push_str(&doc);
                    }
                    None => arc.doc = Some(doc),
                }
            }
        } else {
            let mut arc = Arc::new(label, value);
            arc.optional = optional;
            arc.definition = definition;
            arc.doc = doc;
            st.arcs.push(arc);
        }
    }

    // A definition closes the struct literals of its value subtree:
    // nested literal structs, disjunction branches and unification
    // operands, but never anything behind a reference.
    fn close_literals(&mut self, v: ValueId) {
        let inner: Vec<ValueId> = match self.value_mut(v) {
            Value::Struct(st) => {
                st.closed = true;
                st.arcs.iter().map(|a| a.value).collect()
            }
            Value::Disjunction(d) => d.branches.iter().map(|b| b.value).collect(),
            Value::Binary { op: Op::Unify, lhs, rhs } => vec![*lhs, *rhs],
            _ => return,
        };
        for i in inner {
            self.close_literals(i);
        }
    }

    // Flatten a `|` tree into one disjunction, keeping default marks.
    fn lower_disjunction(&mut self, n: NodeRef, scope: &Scope) -> ValueId {
        let mut leaves = Vec::new();
        self.collect_disjuncts(n, false, &mut leaves);
        let mut has_defaults = false;
        let branches: Vec<Branch> = leaves
            .into_iter()
            .map(|(leaf, default)| {
                has_defaults |= default;
                let value = self.lower_expr(leaf, scope);
                Branch { value, default }
            })
            .collect();
        self.alloc(Value::Disjunction(DisjVal { branches, has_defaults }), n)
    }

    fn collect_disjuncts(
        &mut self,
        n: NodeRef,
        default: bool,
        out: &mut Vec<(NodeRef, bool)>,
    ) {
        let ast = self.ast.clone();
        match ast.node(n) {
            Syntax::Binary { op: Op::Disjoin, lhs, rhs } => {
                self.collect_disjuncts(*lhs, default, out);
                self.collect_disjuncts(*rhs, default, out);
            }
            Syntax::Default { expr } => self.collect_disjuncts(*expr, true, out),
            _ => out.push((n, default)),
        }
    }
}
