// Lexical resolution.
//
// Links every identifier to the declaration that binds it: fields and
// aliases of the enclosing structs, comprehension loop variables,
// template label binders, imports. Names that stay unbound are left
// for the evaluator, which knows the predeclared ones and reports the
// rest as reference errors. Embedders with their own front-end may
// resolve trees themselves; the core only requires that bindings are
// set before lowering.

use std::collections::HashMap;

use crate::ast::{Ast, Clause, NodeRef, Syntax};

pub fn resolve(ast: &Ast, root: NodeRef) {
    let mut r = Resolver { ast, scopes: Vec::new() };
    r.expr(root);
}

struct Resolver<'a> {
    ast: &'a Ast,
    scopes: Vec<HashMap<String, NodeRef>>,
}

impl<'a> Resolver<'a> {
    fn lookup(&self, name: &str) -> Option<NodeRef> {
        for scope in self.scopes.iter().rev() {
            if let Some(n) = scope.get(name) {
                return Some(*n);
            }
        }
        None
    }

    // The names a block of declarations brings into scope.
    fn collect(&self, decls: &[NodeRef]) -> HashMap<String, NodeRef> {
        let mut names = HashMap::new();
        for d in decls {
            match self.ast.node(*d) {
                Syntax::Field { label, .. } => {
                    if let Syntax::Ident { name, .. } = self.ast.node(*label) {
                        names.insert(name.clone(), *d);
                    }
                }
                Syntax::Alias { name, .. } => {
                    names.insert(name.clone(), *d);
                }
                Syntax::Import { name, .. } => {
                    names.insert(name.clone(), *d);
                }
                _ => {}
            }
        }
        names
    }

    fn block(&mut self, decls: &[NodeRef]) {
        self.scopes.push(self.collect(decls));
        for d in decls {
            self.decl(*d);
        }
        self.scopes.pop();
    }

    fn decl(&mut self, n: NodeRef) {
        match self.ast.node(n) {
            Syntax::Field { label, value, .. } => match self.ast.node(*label) {
                Syntax::TemplateLabel { name, .. } => {
                    let mut scope = HashMap::new();
                    scope.insert(name.clone(), *label);
                    self.scopes.push(scope);
                    self.expr(*value);
                    self.scopes.pop();
                }
                Syntax::Interpolation { parts } => {
                    for p in parts.clone() {
                        self.expr(p);
                    }
                    self.expr(*value);
                }
                _ => self.expr(*value),
            },
            Syntax::Embed { expr } => self.expr(*expr),
            Syntax::Alias { expr, .. } => self.expr(*expr),
            Syntax::Import { .. } => {}
            Syntax::ComprehensionDecl { clauses, body } => {
                let pushed = self.clauses(clauses);
                self.expr(*body);
                for _ in 0..pushed {
                    self.scopes.pop();
                }
            }
            _ => self.expr(n),
        }
    }

    // Each `for` clause opens a scope visible to the clauses after it
    // and to the body. Returns how many scopes were pushed.
    fn clauses(&mut self, clauses: &[Clause]) -> usize {
        let mut pushed = 0;
        for clause in clauses {
            match clause {
                Clause::For { key, value, src } => {
                    self.expr(*src);
                    let mut scope = HashMap::new();
                    if let Some(k) = key {
                        if let Syntax::Ident { name, .. } = self.ast.node(*k) {
                            scope.insert(name.clone(), *k);
                        }
                    }
                    if let Syntax::Ident { name, .. } = self.ast.node(*value) {
                        scope.insert(name.clone(), *value);
                    }
                    self.scopes.push(scope);
                    pushed += 1;
                }
                Clause::If { cond } => self.expr(*cond),
            }
        }
        pushed
    }

    fn expr(&mut self, n: NodeRef) {
        match self.ast.node(n) {
            Syntax::Ident { name, binding } => {
                if let Some(target) = self.lookup(name) {
                    binding.set(Some(target));
                }
            }
            Syntax::Selector { expr, .. } => self.expr(*expr),
            Syntax::Index { expr, index } => {
                self.expr(*expr);
                self.expr(*index);
            }
            Syntax::Slice { expr, lo, hi } => {
                self.expr(*expr);
                if let Some(lo) = lo {
                    self.expr(*lo);
                }
                if let Some(hi) = hi {
                    self.expr(*hi);
                }
            }
            Syntax::Call { func, args } => {
                self.expr(*func);
                for a in args.clone() {
                    self.expr(a);
                }
            }
            Syntax::Unary { expr, .. }
            | Syntax::Bound { expr, .. }
            | Syntax::Default { expr } => self.expr(*expr),
            Syntax::Binary { lhs, rhs, .. } => {
                self.expr(*lhs);
                self.expr(*rhs);
            }
            Syntax::Interpolation { parts } => {
                for p in parts.clone() {
                    self.expr(p);
                }
            }
            Syntax::List { elems, ellipsis } => {
                for e in elems.clone() {
                    self.expr(e);
                }
                if let Some(Some(t)) = ellipsis {
                    self.expr(*t);
                }
            }
            Syntax::StructLit { decls } => self.block(&decls.clone()),
            Syntax::File { decls } => self.block(&decls.clone()),
            Syntax::ListComprehension { clauses, expr } => {
                let (clauses, expr) = (clauses.clone(), *expr);
                let pushed = self.clauses(&clauses);
                self.expr(expr);
                for _ in 0..pushed {
                    self.scopes.pop();
                }
            }
            _ => {}
        }
    }
}
