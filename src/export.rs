// The emitter-facing surface.
//
// Emitters traverse the value graph through manifest/lookup and
// decide what to drop; this module provides the common policy: hidden
// fields, definitions and optional arcs are not emitted, everything
// else must be ground. The deep walk re-checks delayed constraints,
// reports the most telling error per struct (fatal first, then
// structural cycles, then incompleteness) and renders ground values
// as JSON trees.

use serde_json::{Map, Number, Value as Json};

use num_traits::ToPrimitive;

use crate::errors::{Bottom, Code};
use crate::instance::Instance;
use crate::kind;
use crate::value::{Value, ValueId};

impl Instance {
    // Is the value ready to emit at its outer level?
    pub fn is_concrete(&mut self, v: ValueId) -> bool {
        let m = self.manifest(v);
        !self.is_bottom(m) && kind::is_ground(self.kind(m))
    }

    // The error of a value, if manifesting it produces one.
    pub fn err(&mut self, v: ValueId) -> Option<Bottom> {
        let m = self.manifest(v);
        self.as_bottom(m).cloned()
    }

    // Deep check: every emitted part must resolve and be ground.
    pub fn validate(&mut self, v: ValueId) -> Option<Bottom> {
        if let Some(b) = self.drain_delayed() {
            return Some(b);
        }
        let mut path = Vec::new();
        if let Err(b) = self.deep(v, &mut path) {
            return Some(b);
        }
        self.drain_delayed()
    }

    pub fn export(&mut self, v: ValueId) -> Result<Json, Bottom> {
        if let Some(b) = self.drain_delayed() {
            return Err(b);
        }
        let mut path = Vec::new();
        let out = self.deep(v, &mut path)?;
        match self.drain_delayed() {
            Some(b) => Err(b),
            None => Ok(out),
        }
    }

    // Render a value the way the emitter prints it: JSON for ground
    // values, `_|_(...)` with the cause chain for errors.
    pub fn render(&mut self, v: ValueId) -> String {
        match self.export(v) {
            Ok(j) => j.to_string(),
            Err(b) => b.render(),
        }
    }

    fn deep(&mut self, v: ValueId, path: &mut Vec<ValueId>) -> Result<Json, Bottom> {
        let m = self.manifest(v);
        match self.value(m).clone() {
            Value::Bottom(b) => Err(b),
            Value::Null => Ok(Json::Null),
            Value::Bool(b) => Ok(Json::Bool(b)),
            Value::Num(n) => {
                if n.is_int() {
                    if let Ok(i) = n.as_i64() {
                        return Ok(Json::Number(Number::from(i)));
                    }
                }
                match n.v.to_f64().and_then(Number::from_f64) {
                    Some(f) => Ok(Json::Number(f)),
                    None => Ok(Json::String(n.to_string())),
                }
            }
            Value::Str(s) => Ok(Json::String((*s).clone())),
            Value::Bytes(b) => match String::from_utf8((*b).clone()) {
                Ok(s) => Ok(Json::String(s)),
                Err(_) => Err(Bottom::new(
                    Code::Type,
                    self.src(m),
                    "cannot emit non-text bytes",
                )),
            },
            Value::Duration(d) => Ok(Json::Number(Number::from(d))),
            Value::List(l) => {
                if l.open {
                    return Err(Bottom::new(
                        Code::Incomplete,
                        self.src(m),
                        "open list is not concrete",
                    ));
                }
                if path.contains(&m) {
                    return Err(Bottom::new(Code::Cycle, self.src(m), "structural cycle"));
                }
                path.push(m);
                let mut out = Vec::with_capacity(l.elems.len());
                for e in l.elems {
                    match self.deep(e, path) {
                        Ok(j) => out.push(j),
                        Err(b) => {
                            path.pop();
                            return Err(b);
                        }
                    }
                }
                path.pop();
                Ok(Json::Array(out))
            }
            Value::Struct(sv) => {
                if path.contains(&m) {
                    return Err(Bottom::new(Code::Cycle, self.src(m), "structural cycle"));
                }
                path.push(m);
                let mut out = Map::new();
                let mut errors: Vec<Bottom> = Vec::new();
                for arc in &sv.arcs {
                    if arc.label.is_hidden() || arc.definition || arc.optional {
                        continue;
                    }
                    let name = self.index.name(arc.label);
                    let val = self.lookup_arc(m, arc.label, self.src(m));
                    match self.deep(val, path) {
                        Ok(j) => {
                            out.insert(name, j);
                        }
                        Err(b) => {
                            let wrapped =
                                Bottom::new(b.code, self.src(m), format!("field {:?}", name))
                                    .caused_by(b);
                            errors.push(wrapped);
                        }
                    }
                }
                path.pop();
                if let Some(b) = pick_error(errors) {
                    return Err(b);
                }
                Ok(Json::Object(out))
            }
            _ => Err(Bottom::new(
                Code::Incomplete,
                self.src(m),
                format!("value {} is not concrete", self.show(m)),
            )),
        }
    }
}

// The error that best explains a failed struct: a fatal error first,
// then a structural cycle, then plain incompleteness.
fn pick_error(errors: Vec<Bottom>) -> Option<Bottom> {
    if errors.is_empty() {
        return None;
    }
    if let Some(b) = errors.iter().find(|b| !b.is_incomplete()) {
        return Some(b.clone());
    }
    if let Some(b) = errors.iter().find(|b| b.mentions("structural cycle")) {
        return Some(b.clone());
    }
    errors.into_iter().next()
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::ast::{Ast, NodeRef, Op, UnOp};
    use crate::resolve::resolve;

    fn eval_file(build: impl FnOnce(&mut Ast) -> NodeRef) -> (Instance, ValueId) {
        let mut ast = Ast::new();
        let root = build(&mut ast);
        resolve(&ast, root);
        let mut inst = Instance::new(Rc::new(ast));
        let v = inst.compile(root);
        (inst, v)
    }

    fn field(inst: &mut Instance, root: ValueId, name: &str) -> Result<Json, Bottom> {
        let root = inst.eval_partial(root);
        let lab = inst.index.intern(name, true);
        let v = inst.lookup_arc(root, lab, NodeRef::NONE);
        inst.export(v)
    }

    #[test]
    fn test_arithmetic_and_groundness() {
        let (mut inst, root) = eval_file(|ast| {
            let mut decls = Vec::new();

            // sum: -1 + +2
            let one = ast.int(1);
            let neg = ast.unary(UnOp::Neg, one);
            let two = ast.int(2);
            let pos = ast.unary(UnOp::Pos, two);
            let sum = ast.binary(Op::Add, neg, pos);
            let l = ast.ident("sum");
            decls.push(ast.field(l, sum));

            // str: "foo" + "bar"
            let foo = ast.str_("foo");
            let bar = ast.str_("bar");
            let cat = ast.binary(Op::Add, foo, bar);
            let l = ast.ident("str");
            decls.push(ast.field(l, cat));

            // div1: 2.0 / 3 * 6
            let f2 = ast.float(2.0);
            let i3 = ast.int(3);
            let div = ast.binary(Op::Div, f2, i3);
            let i6 = ast.int(6);
            let mul = ast.binary(Op::Mul, div, i6);
            let l = ast.ident("div1");
            decls.push(ast.field(l, mul));

            // rem: 2 % 3
            let i2 = ast.int(2);
            let i3 = ast.int(3);
            let rem = ast.binary(Op::IRem, i2, i3);
            let l = ast.ident("rem");
            decls.push(ast.field(l, rem));

            // e: 2 + "a"
            let i2 = ast.int(2);
            let a = ast.str_("a");
            let bad = ast.binary(Op::Add, i2, a);
            let l = ast.ident("e");
            decls.push(ast.field(l, bad));

            // b: 1 != 4
            let i1 = ast.int(1);
            let i4 = ast.int(4);
            let ne = ast.binary(Op::Ne, i1, i4);
            let l = ast.ident("b");
            decls.push(ast.field(l, ne));

            ast.file(decls)
        });

        assert_eq!(field(&mut inst, root, "sum").unwrap(), json!(1));
        assert_eq!(field(&mut inst, root, "str").unwrap(), json!("foobar"));
        let div1 = field(&mut inst, root, "div1").unwrap();
        assert!((div1.as_f64().unwrap() - 4.0).abs() < 1e-9);
        assert_eq!(field(&mut inst, root, "rem").unwrap(), json!(2));
        let e = field(&mut inst, root, "e").unwrap_err();
        assert_eq!(e.code, Code::Type);
        assert!(e.mentions("invalid operation +"));
        assert_eq!(field(&mut inst, root, "b").unwrap(), json!(true));
    }

    #[test]
    fn test_integer_division_family() {
        let cases: &[(Op, i64, i64, i64)] = &[
            (Op::IQuo, 5, 2, 2),
            (Op::IQuo, 5, -2, -2),
            (Op::IQuo, -5, 2, -2),
            (Op::IRem, -5, 2, -1),
            (Op::IDiv, 5, 2, 2),
            (Op::IDiv, -5, 2, -3),
            (Op::IMod, -5, 2, 1),
        ];
        for &(op, a, b, want) in cases {
            let (mut inst, root) = eval_file(|ast| {
                let x = ast.int(a);
                let y = ast.int(b);
                let e = ast.binary(op, x, y);
                let l = ast.ident("r");
                let f = ast.field(l, e);
                ast.file(vec![f])
            });
            assert_eq!(
                field(&mut inst, root, "r").unwrap(),
                json!(want),
                "{} {} {}",
                a,
                op,
                b
            );
        }
    }

    #[test]
    fn test_list_unification() {
        // [1, 2, 3] & [_, 2, _]
        let (mut inst, root) = eval_file(|ast| {
            let (a1, a2, a3) = (ast.int(1), ast.int(2), ast.int(3));
            let concrete = ast.list(vec![a1, a2, a3]);
            let (t1, b2, t2) = (ast.ident("_"), ast.int(2), ast.ident("_"));
            let pattern = ast.list(vec![t1, b2, t2]);
            let u = ast.binary(Op::Unify, concrete, pattern);
            let l = ast.ident("r");
            let f = ast.field(l, u);
            ast.file(vec![f])
        });
        assert_eq!(field(&mut inst, root, "r").unwrap(), json!([1, 2, 3]));

        // [1, 2, 3] & ["c", "d"]: incompatible lengths.
        let (mut inst, root) = eval_file(|ast| {
            let (a1, a2, a3) = (ast.int(1), ast.int(2), ast.int(3));
            let nums = ast.list(vec![a1, a2, a3]);
            let (c, d) = (ast.str_("c"), ast.str_("d"));
            let strs = ast.list(vec![c, d]);
            let u = ast.binary(Op::Unify, nums, strs);
            let l = ast.ident("r");
            let f = ast.field(l, u);
            ast.file(vec![f])
        });
        let e = field(&mut inst, root, "r").unwrap_err();
        assert!(e.mentions("incompatible list lengths"));

        // [...int] & ["foo"]: element type mismatch.
        let (mut inst, root) = eval_file(|ast| {
            let int = ast.ident("int");
            let open = ast.open_list(vec![], Some(int));
            let foo = ast.str_("foo");
            let strs = ast.list(vec![foo]);
            let u = ast.binary(Op::Unify, open, strs);
            let l = ast.ident("r");
            let f = ast.field(l, u);
            ast.file(vec![f])
        });
        let e = field(&mut inst, root, "r").unwrap_err();
        assert_eq!(e.code, Code::Type);
    }

    #[test]
    fn test_closed_struct_rejects_new_field() {
        // #A: {a: int}; x: #A & {b: 1}
        let (mut inst, root) = eval_file(|ast| {
            let int = ast.ident("int");
            let la = ast.ident("a");
            let fa = ast.field(la, int);
            let inner = ast.struct_(vec![fa]);
            let ld = ast.ident("#A");
            let fd = ast.definition(ld, inner);

            let one = ast.int(1);
            let lb = ast.ident("b");
            let fb = ast.field(lb, one);
            let with_b = ast.struct_(vec![fb]);
            let refa = ast.ident("#A");
            let u = ast.binary(Op::Unify, refa, with_b);
            let lx = ast.ident("x");
            let fx = ast.field(lx, u);

            ast.file(vec![fd, fx])
        });
        let e = field(&mut inst, root, "x").unwrap_err();
        assert!(e.mentions("not allowed"));
    }

    #[test]
    fn test_open_struct_accepts_new_field() {
        // A: {a: int}; x: A & {b: 1}
        let (mut inst, root) = eval_file(|ast| {
            let int = ast.ident("int");
            let la = ast.ident("a");
            let fa = ast.field(la, int);
            let inner = ast.struct_(vec![fa]);
            let ld = ast.ident("A");
            let fd = ast.field(ld, inner);

            let one = ast.int(1);
            let lb = ast.ident("b");
            let fb = ast.field(lb, one);
            let with_b = ast.struct_(vec![fb]);
            let refa = ast.ident("A");
            let u = ast.binary(Op::Unify, refa, with_b);
            let lx = ast.ident("x");
            let fx = ast.field(lx, u);

            ast.file(vec![fd, fx])
        });
        // The result keeps both arcs: a stays int (not emittable), b
        // is concrete.
        let rootv = inst.eval_partial(root);
        let lx = inst.index.intern("x", true);
        let x = inst.lookup_arc(rootv, lx, NodeRef::NONE);
        let x = inst.eval_partial(x);
        match inst.value(x).clone() {
            Value::Struct(sv) => {
                let names: Vec<String> =
                    sv.arcs.iter().map(|a| inst.index.name(a.label)).collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            other => panic!("expected struct, got {:?}", other),
        }
        let la = inst.index.intern("a", true);
        let a = inst.lookup_arc(x, la, NodeRef::NONE);
        assert!(!inst.is_concrete(a));
        let lb = inst.index.intern("b", true);
        let b = inst.lookup_arc(x, lb, NodeRef::NONE);
        assert_eq!(inst.export(b).unwrap(), json!(1));
    }

    #[test]
    fn test_default_reselection() {
        // x: *1 | 2 | 3; y: x & >=2  =>  y manifests to 2.
        let (mut inst, root) = eval_file(|ast| {
            let one = ast.int(1);
            let star = ast.default(one);
            let two = ast.int(2);
            let three = ast.int(3);
            let d23 = ast.binary(Op::Disjoin, two, three);
            let d = ast.binary(Op::Disjoin, star, d23);
            let lx = ast.ident("x");
            let fx = ast.field(lx, d);

            let rx = ast.ident("x");
            let two2 = ast.int(2);
            let ge2 = ast.bound(Op::Ge, two2);
            let u = ast.binary(Op::Unify, rx, ge2);
            let ly = ast.ident("y");
            let fy = ast.field(ly, u);

            ast.file(vec![fx, fy])
        });
        assert_eq!(field(&mut inst, root, "y").unwrap(), json!(2));
        // x itself still manifests to its own default.
        assert_eq!(field(&mut inst, root, "x").unwrap(), json!(1));
    }

    #[test]
    fn test_cycle_resolution_by_pinning() {
        // a: b - 100; b: a + 100; b: 200
        let (mut inst, root) = eval_file(|ast| {
            let rb = ast.ident("b");
            let c100 = ast.int(100);
            let sub = ast.binary(Op::Sub, rb, c100);
            let la = ast.ident("a");
            let fa = ast.field(la, sub);

            let ra = ast.ident("a");
            let c100b = ast.int(100);
            let add = ast.binary(Op::Add, ra, c100b);
            let lb = ast.ident("b");
            let fb = ast.field(lb, add);

            let c200 = ast.int(200);
            let lb2 = ast.ident("b");
            let fb2 = ast.field(lb2, c200);

            ast.file(vec![fa, fb, fb2])
        });
        assert_eq!(inst.export(root).unwrap(), json!({"a": 100, "b": 200}));
    }

    #[test]
    fn test_conflicting_cycle_pin_is_reported() {
        // a: b - 100; b: a + 100; b: 200; a: 50  =>  50 != 100.
        let (mut inst, root) = eval_file(|ast| {
            let rb = ast.ident("b");
            let c100 = ast.int(100);
            let sub = ast.binary(Op::Sub, rb, c100);
            let la = ast.ident("a");
            let fa = ast.field(la, sub);

            let ra = ast.ident("a");
            let c100b = ast.int(100);
            let add = ast.binary(Op::Add, ra, c100b);
            let lb = ast.ident("b");
            let fb = ast.field(lb, add);

            let c200 = ast.int(200);
            let lb2 = ast.ident("b");
            let fb2 = ast.field(lb2, c200);

            let c50 = ast.int(50);
            let la2 = ast.ident("a");
            let fa2 = ast.field(la2, c50);

            ast.file(vec![fa, fb, fb2, fa2])
        });
        assert!(inst.export(root).is_err());
    }

    #[test]
    fn test_structural_cycle() {
        // #L: {value: _, next: #L}; a: b: #L
        let (mut inst, root) = eval_file(|ast| {
            let top = ast.ident("_");
            let lv = ast.ident("value");
            let fv = ast.field(lv, top);
            let rl = ast.ident("#L");
            let ln = ast.ident("next");
            let fn_ = ast.field(ln, rl);
            let inner = ast.struct_(vec![fv, fn_]);
            let ld = ast.ident("#L");
            let fd = ast.definition(ld, inner);

            let rl2 = ast.ident("#L");
            let fab = ast.nested_field(&["a", "b"], rl2);

            ast.file(vec![fd, fab])
        });
        let e = field(&mut inst, root, "a").unwrap_err();
        assert!(e.mentions("structural cycle"), "got: {}", e.render());
    }

    #[test]
    fn test_manifest_idempotent() {
        let (mut inst, root) = eval_file(|ast| {
            let one = ast.int(1);
            let star = ast.default(one);
            let two = ast.int(2);
            let d = ast.binary(Op::Disjoin, star, two);
            let lx = ast.ident("x");
            let fx = ast.field(lx, d);
            ast.file(vec![fx])
        });
        let rootv = inst.eval_partial(root);
        let lx = inst.index.intern("x", true);
        let x = inst.lookup_arc(rootv, lx, NodeRef::NONE);
        let m1 = inst.manifest(x);
        let m2 = inst.manifest(m1);
        assert!(inst.equal(m1, m2));
    }

    #[test]
    fn test_arc_results_are_memoised() {
        let (mut inst, root) = eval_file(|ast| {
            let one = ast.int(1);
            let two = ast.int(2);
            let sum = ast.binary(Op::Add, one, two);
            let lx = ast.ident("x");
            let fx = ast.field(lx, sum);
            ast.file(vec![fx])
        });
        let rootv = inst.eval_partial(root);
        let lx = inst.index.intern("x", true);
        let first = inst.lookup_arc(rootv, lx, NodeRef::NONE);
        let second = inst.lookup_arc(rootv, lx, NodeRef::NONE);
        assert_eq!(first, second);
    }

    #[test]
    fn test_hidden_and_optional_are_not_emitted() {
        let (mut inst, root) = eval_file(|ast| {
            let one = ast.int(1);
            let la = ast.ident("a");
            let fa = ast.field(la, one);
            let two = ast.int(2);
            let lh = ast.ident("_h");
            let fh = ast.field(lh, two);
            let int = ast.ident("int");
            let lo = ast.ident("maybe");
            let fo = ast.optional_field(lo, int);
            ast.file(vec![fa, fh, fo])
        });
        assert_eq!(inst.export(root).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_emit_value() {
        // a: 1, "hello"  =>  emit unifies away when only hidden
        // fields remain; with a regular field the emit must unify.
        let (mut inst, root) = eval_file(|ast| {
            let one = ast.int(1);
            let lh = ast.ident("_a");
            let fh = ast.field(lh, one);
            let hello = ast.str_("hello");
            let em = ast.embed(hello);
            ast.file(vec![fh, em])
        });
        let rootv = inst.eval_partial(root);
        let m = inst.manifest(rootv);
        assert_eq!(inst.export(m).unwrap(), json!("hello"));
    }

    #[test]
    fn test_field_comprehension() {
        // xs: {a: 1, b: 2}; out: {"\(k)-copy": v for k, v in xs}
        let (mut inst, root) = eval_file(|ast| {
            let one = ast.int(1);
            let la = ast.ident("a");
            let fa = ast.field(la, one);
            let two = ast.int(2);
            let lb = ast.ident("b");
            let fb = ast.field(lb, two);
            let xs = ast.struct_(vec![fa, fb]);
            let lxs = ast.ident("xs");
            let fxs = ast.field(lxs, xs);

            let k = ast.ident("k");
            let v = ast.ident("v");
            let src = ast.ident("xs");
            let rk = ast.ident("k");
            let suffix = ast.str_("-copy");
            let key = ast.interpolation(vec![rk, suffix]);
            let rv = ast.ident("v");
            let f = ast.field(key, rv);
            let body = ast.struct_(vec![f]);
            let comp = ast.comprehension(
                vec![crate::ast::Clause::For { key: Some(k), value: v, src }],
                body,
            );
            let inner = ast.struct_(vec![comp]);
            let lout = ast.ident("out");
            let fout = ast.field(lout, inner);

            ast.file(vec![fxs, fout])
        });
        assert_eq!(
            field(&mut inst, root, "out").unwrap(),
            json!({"a-copy": 1, "b-copy": 2})
        );
    }

    #[test]
    fn test_guarded_comprehension() {
        // xs: [1, 2, 3]; out: {"big": x for x in xs if x > 2}
        let (mut inst, root) = eval_file(|ast| {
            let (a, b, c) = (ast.int(1), ast.int(2), ast.int(3));
            let xs = ast.list(vec![a, b, c]);
            let lxs = ast.ident("xs");
            let fxs = ast.field(lxs, xs);

            let x = ast.ident("x");
            let src = ast.ident("xs");
            let rx = ast.ident("x");
            let two = ast.int(2);
            let cond = ast.binary(Op::Gt, rx, two);
            let lbig = ast.ident("big");
            let rx2 = ast.ident("x");
            let f = ast.field(lbig, rx2);
            let body = ast.struct_(vec![f]);
            let comp = ast.comprehension(
                vec![
                    crate::ast::Clause::For { key: None, value: x, src },
                    crate::ast::Clause::If { cond },
                ],
                body,
            );
            let inner = ast.struct_(vec![comp]);
            let lout = ast.ident("out");
            let fout = ast.field(lout, inner);

            ast.file(vec![fxs, fout])
        });
        assert_eq!(field(&mut inst, root, "out").unwrap(), json!({"big": 3}));
    }

    #[test]
    fn test_list_comprehension() {
        // xs: [1, 2, 3]; out: [x + 1 for x in xs]
        let (mut inst, root) = eval_file(|ast| {
            let (a, b, c) = (ast.int(1), ast.int(2), ast.int(3));
            let xs = ast.list(vec![a, b, c]);
            let lxs = ast.ident("xs");
            let fxs = ast.field(lxs, xs);

            let x = ast.ident("x");
            let src = ast.ident("xs");
            let rx = ast.ident("x");
            let one = ast.int(1);
            let expr = ast.binary(Op::Add, rx, one);
            let comp = ast.list_comprehension(
                vec![crate::ast::Clause::For { key: None, value: x, src }],
                expr,
            );
            let lout = ast.ident("out");
            let fout = ast.field(lout, comp);

            ast.file(vec![fxs, fout])
        });
        assert_eq!(field(&mut inst, root, "out").unwrap(), json!([2, 3, 4]));
    }

    #[test]
    fn test_template_applies_to_all_arcs() {
        // out: {[name]: {tag: name}, a: {}, b: {}}
        let (mut inst, root) = eval_file(|ast| {
            let tl = ast.template_label("name");
            let ltag = ast.ident("tag");
            let rname = ast.ident("name");
            let ftag = ast.field(ltag, rname);
            let tbody = ast.struct_(vec![ftag]);
            let tmpl = ast.field(tl, tbody);

            let ea = ast.struct_(vec![]);
            let la = ast.ident("a");
            let fa = ast.field(la, ea);
            let eb = ast.struct_(vec![]);
            let lb = ast.ident("b");
            let fb = ast.field(lb, eb);

            let inner = ast.struct_(vec![tmpl, fa, fb]);
            let lout = ast.ident("out");
            let fout = ast.field(lout, inner);
            ast.file(vec![fout])
        });
        assert_eq!(
            field(&mut inst, root, "out").unwrap(),
            json!({"a": {"tag": "a"}, "b": {"tag": "b"}})
        );
    }

    #[test]
    fn test_import_table() {
        let (mut inst, root) = eval_file(|ast| {
            let imp = ast.import("lib", "example.com/lib");
            let rlib = ast.ident("lib");
            let sel = ast.selector(rlib, "answer");
            let lx = ast.ident("x");
            let fx = ast.field(lx, sel);
            ast.file(vec![imp, fx])
        });
        // Build the package value in the same instance and register
        // it under the import path.
        let answer = inst.num_int(42);
        let lab = inst.index.intern("answer", true);
        let mut sv = crate::value::StructVal::new();
        sv.arcs.push(crate::value::Arc::new(lab, answer));
        let pkg = inst.alloc(Value::Struct(sv), NodeRef::NONE);
        inst.add_import("example.com/lib", pkg);
        assert_eq!(field(&mut inst, root, "x").unwrap(), json!(42));
    }

    #[test]
    fn test_cancellation() {
        let (mut inst, root) = eval_file(|ast| {
            let one = ast.int(1);
            let lx = ast.ident("x");
            let fx = ast.field(lx, one);
            ast.file(vec![fx])
        });
        inst.cancel_flag().store(true, std::sync::atomic::Ordering::Relaxed);
        let rootv = inst.eval_partial(root);
        match inst.as_bottom(rootv) {
            Some(b) => assert_eq!(b.code, Code::Cancelled),
            None => {
                // The root was already evaluated; a fresh expression
                // must still observe the flag.
                let lx = inst.index.intern("x", true);
                let x = inst.lookup_arc(rootv, lx, NodeRef::NONE);
                let b = inst.as_bottom(x).expect("expected cancellation");
                assert_eq!(b.code, Code::Cancelled);
            }
        }
    }

    #[test]
    fn test_explicit_bottom() {
        let (mut inst, root) = eval_file(|ast| {
            let bot = ast.bottom();
            let lx = ast.ident("x");
            let fx = ast.field(lx, bot);
            ast.file(vec![fx])
        });
        let e = field(&mut inst, root, "x").unwrap_err();
        assert_eq!(e.code, Code::User);
        assert!(e.render().starts_with("_|_("));
    }

    #[test]
    fn test_alias_inlines_at_reference_site() {
        let (mut inst, root) = eval_file(|ast| {
            let one = ast.int(1);
            let two = ast.int(2);
            let sum = ast.binary(Op::Add, one, two);
            let al = ast.alias("S", sum);
            let rs = ast.ident("S");
            let lx = ast.ident("x");
            let fx = ast.field(lx, rs);
            let rs2 = ast.ident("S");
            let ly = ast.ident("y");
            let fy = ast.field(ly, rs2);
            ast.file(vec![al, fx, fy])
        });
        assert_eq!(inst.export(root).unwrap(), json!({"x": 3, "y": 3}));
    }

    #[test]
    fn test_duration_arithmetic() {
        const SEC: i64 = 1_000_000_000;
        let (mut inst, root) = eval_file(|ast| {
            let mut decls = Vec::new();
            let a = ast.duration(90 * SEC);
            let b = ast.duration(30 * SEC);
            let sum = ast.binary(Op::Add, a, b);
            let l = ast.ident("sum");
            decls.push(ast.field(l, sum));

            let a = ast.duration(90 * SEC);
            let b = ast.duration(30 * SEC);
            let ratio = ast.binary(Op::Div, a, b);
            let l = ast.ident("ratio");
            decls.push(ast.field(l, ratio));

            let a = ast.duration(90 * SEC);
            let b = ast.duration(60 * SEC);
            let q = ast.binary(Op::IQuo, a, b);
            let l = ast.ident("quo");
            decls.push(ast.field(l, q));

            let a = ast.duration(90 * SEC);
            let b = ast.duration(60 * SEC);
            let m = ast.binary(Op::IMod, a, b);
            let l = ast.ident("rest");
            decls.push(ast.field(l, m));

            let a = ast.duration(30 * SEC);
            let n = ast.int(3);
            let scaled = ast.binary(Op::Mul, a, n);
            let l = ast.ident("scaled");
            decls.push(ast.field(l, scaled));

            ast.file(decls)
        });
        assert_eq!(field(&mut inst, root, "sum").unwrap(), json!(120 * SEC));
        let ratio = field(&mut inst, root, "ratio").unwrap();
        assert!((ratio.as_f64().unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(field(&mut inst, root, "quo").unwrap(), json!(1));
        assert_eq!(field(&mut inst, root, "rest").unwrap(), json!(30 * SEC));
        assert_eq!(field(&mut inst, root, "scaled").unwrap(), json!(90 * SEC));
    }
}
