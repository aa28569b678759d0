// The kind algebra.
//
// Every value has a kind: a bit-set over the base type kinds plus two
// control bits. `NonGround` marks a value that is not yet specific
// enough to emit; `Reference` marks a value whose shape still depends
// on an unresolved reference. The bit-set forms a Boolean algebra
// under `&`/`|`; the error value has the empty kind.

use enumflags2::BitFlags;

use crate::ast::Op;

#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u16)]
pub enum Kind {
    Null      = 0b0000_0000_0001,
    Bool      = 0b0000_0000_0010,
    Int       = 0b0000_0000_0100,
    Float     = 0b0000_0000_1000,
    Str       = 0b0000_0001_0000,
    Bytes     = 0b0000_0010_0000,
    Duration  = 0b0000_0100_0000,
    List      = 0b0000_1000_0000,
    Struct    = 0b0001_0000_0000,
    Lambda    = 0b0010_0000_0000,
    NonGround = 0b0100_0000_0000,
    Reference = 0b1000_0000_0000,
}

pub type KindSet = BitFlags<Kind>;

pub fn number() -> KindSet {
    Kind::Int | Kind::Float
}

// The concrete scalar kinds.
pub fn atom() -> KindSet {
    Kind::Null | Kind::Bool | Kind::Int | Kind::Float | Kind::Str
        | Kind::Bytes | Kind::Duration
}

// Kinds with a defined ordering, for the relational operators.
pub fn ordered() -> KindSet {
    Kind::Int | Kind::Float | Kind::Str | Kind::Bytes | Kind::Duration
}

// The union of all ordinary kinds: the kind of top.
pub fn top() -> KindSet {
    atom() | Kind::List | Kind::Struct | Kind::Lambda
}

fn ctrl() -> KindSet {
    Kind::NonGround | Kind::Reference
}

// The ordinary (non-control) part of a kind.
pub fn ordinary(k: KindSet) -> KindSet {
    k & top()
}

pub fn is_ground(k: KindSet) -> bool {
    !k.intersects(ctrl())
}

// Render a kind for diagnostics: the widest named set that matches,
// else the base kinds joined with `|`.
pub fn kind_name(k: KindSet) -> String {
    let k = ordinary(k);
    if k.is_empty() {
        return "_|_".to_string();
    }
    if k == top() {
        return "_".to_string();
    }
    if k == number() {
        return "number".to_string();
    }
    let names = [
        (Kind::Null, "null"),
        (Kind::Bool, "bool"),
        (Kind::Int, "int"),
        (Kind::Float, "float"),
        (Kind::Str, "string"),
        (Kind::Bytes, "bytes"),
        (Kind::Duration, "duration"),
        (Kind::List, "list"),
        (Kind::Struct, "struct"),
        (Kind::Lambda, "lambda"),
    ];
    let mut parts = Vec::new();
    for (bit, name) in names.iter() {
        if k.contains(*bit) {
            parts.push(*name);
        }
    }
    parts.join("|")
}

// Numeric operands mix int and float freely; everything else must
// actually overlap.
fn overlap(a: KindSet, b: KindSet) -> bool {
    a.intersects(b) || (a.intersects(number()) && b.intersects(number()))
}

// For each binary operator and operand kind pair, the kind of the
// result, or None when the combination is illegal. The second result
// is a swap hint: true means the canonical form has the operands the
// other way around (used by replication, where the payload comes
// first).
pub fn match_bin_op(op: Op, a: KindSet, b: KindSet) -> Option<(KindSet, bool)> {
    let ctrl_bits = (a | b) & ctrl();
    let va = ordinary(a);
    let vb = ordinary(b);
    if va.is_empty() || vb.is_empty() {
        return None;
    }
    let done = |k: KindSet| Some((k | ctrl_bits, false));
    match op {
        Op::Unify => {
            let i = va & vb;
            if !i.is_empty() {
                done(i)
            } else if overlap(va, vb) {
                // int against float: numeric value equality decides.
                done(va | vb)
            } else {
                None
            }
        }
        Op::Disjoin => done(va | vb | Kind::NonGround),
        Op::LAnd | Op::LOr => {
            if va.contains(Kind::Bool) && vb.contains(Kind::Bool) {
                done(BitFlags::from_flag(Kind::Bool))
            } else {
                None
            }
        }
        Op::Eq | Op::Ne => {
            let ok = (va.intersects(atom()) && vb.intersects(atom()))
                && (overlap(va, vb)
                    || va.contains(Kind::Null)
                    || vb.contains(Kind::Null));
            if ok {
                done(BitFlags::from_flag(Kind::Bool))
            } else {
                None
            }
        }
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            if va.intersects(ordered()) && vb.intersects(ordered())
                && overlap(va & ordered(), vb & ordered())
            {
                done(BitFlags::from_flag(Kind::Bool))
            } else {
                None
            }
        }
        Op::Match | Op::NotMatch => {
            if va.contains(Kind::Str) && vb.contains(Kind::Str) {
                done(BitFlags::from_flag(Kind::Bool))
            } else {
                None
            }
        }
        Op::Add => {
            if va.intersects(number()) && vb.intersects(number()) {
                done((va | vb) & number())
            } else if va.contains(Kind::Str) && vb.contains(Kind::Str) {
                done(BitFlags::from_flag(Kind::Str))
            } else if va.contains(Kind::Bytes) && vb.contains(Kind::Bytes) {
                done(BitFlags::from_flag(Kind::Bytes))
            } else if va.contains(Kind::Duration) && vb.contains(Kind::Duration) {
                done(BitFlags::from_flag(Kind::Duration))
            } else {
                None
            }
        }
        Op::Sub => {
            if va.intersects(number()) && vb.intersects(number()) {
                done((va | vb) & number())
            } else if va.contains(Kind::Duration) && vb.contains(Kind::Duration) {
                done(BitFlags::from_flag(Kind::Duration))
            } else {
                None
            }
        }
        Op::Mul => {
            if va.intersects(number()) && vb.intersects(number()) {
                done((va | vb) & number())
            } else if va.contains(Kind::Str) && vb.contains(Kind::Int) {
                done(BitFlags::from_flag(Kind::Str))
            } else if va.contains(Kind::Int) && vb.contains(Kind::Str) {
                Some((BitFlags::from_flag(Kind::Str) | ctrl_bits, true))
            } else if va.contains(Kind::Bytes) && vb.contains(Kind::Int) {
                done(BitFlags::from_flag(Kind::Bytes))
            } else if va.contains(Kind::Int) && vb.contains(Kind::Bytes) {
                Some((BitFlags::from_flag(Kind::Bytes) | ctrl_bits, true))
            } else if va.contains(Kind::Duration) && vb.intersects(number()) {
                done(BitFlags::from_flag(Kind::Duration))
            } else if va.intersects(number()) && vb.contains(Kind::Duration) {
                Some((BitFlags::from_flag(Kind::Duration) | ctrl_bits, true))
            } else {
                None
            }
        }
        Op::Div => {
            if va.intersects(number()) && vb.intersects(number()) {
                done(BitFlags::from_flag(Kind::Float))
            } else if va.contains(Kind::Duration) && vb.contains(Kind::Duration) {
                done(BitFlags::from_flag(Kind::Float))
            } else {
                None
            }
        }
        Op::IQuo | Op::IRem | Op::IDiv | Op::IMod => {
            if va.contains(Kind::Int) && vb.contains(Kind::Int) {
                done(BitFlags::from_flag(Kind::Int))
            } else if va.contains(Kind::Duration) && vb.contains(Kind::Duration) {
                match op {
                    Op::IQuo => done(BitFlags::from_flag(Kind::Int)),
                    Op::IMod => done(BitFlags::from_flag(Kind::Duration)),
                    _ => None,
                }
            } else {
                None
            }
        }
    }
}
