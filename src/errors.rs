// Bottom: the error value.
//
// Errors are ordinary values in the lattice, absorbing under
// unification and eliminated by disjunction. A bottom carries an
// error code, a rendered message, a back-reference to the syntax it
// arose from, and a chain of causes. Incomplete codes signal "not
// decidable yet" and may be recovered from; the rest are fatal.

use crate::ast::NodeRef;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Code {
    Type,
    Reference,
    NotFound,
    Range,
    Cycle,
    Incomplete,
    User,
    Cancelled,
}

impl Code {
    pub fn is_incomplete(self) -> bool {
        match self {
            Code::Cycle | Code::Incomplete => true,
            _ => false,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Code::Type => "type error",
            Code::Reference => "reference error",
            Code::NotFound => "not found",
            Code::Range => "range error",
            Code::Cycle => "cycle",
            Code::Incomplete => "incomplete",
            Code::User => "user error",
            Code::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bottom {
    pub code: Code,
    pub msg: String,
    pub src: NodeRef,
    pub causes: Vec<Bottom>,
}

impl Bottom {
    pub fn new(code: Code, src: NodeRef, msg: impl Into<String>) -> Bottom {
        Bottom { code, msg: msg.into(), src, causes: Vec::new() }
    }

    pub fn caused_by(mut self, cause: Bottom) -> Bottom {
        self.causes.push(cause);
        self
    }

    pub fn is_incomplete(&self) -> bool {
        self.code.is_incomplete()
    }

    // True if the message or any cause mentions `needle`; used by
    // callers matching on classes of failure.
    pub fn mentions(&self, needle: &str) -> bool {
        self.msg.contains(needle) || self.causes.iter().any(|c| c.mentions(needle))
    }

    // Rendered as the emitter prints it: `_|_` plus the cause chain.
    pub fn render(&self) -> String {
        let mut out = format!("_|_({}: {}", self.code.name(), self.msg);
        for cause in &self.causes {
            out.push_str("; ");
            out.push_str(&cause.render());
        }
        out.push(')');
        out
    }
}

impl std::fmt::Display for Bottom {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

// Pick the error that best explains a set of failures: the first
// fatal cause if any, else the first incomplete one.
pub fn most_specific(causes: Vec<Bottom>) -> Bottom {
    let mut first_incomplete = None;
    for c in causes {
        if !c.is_incomplete() {
            return c;
        }
        if first_incomplete.is_none() {
            first_incomplete = Some(c);
        }
    }
    first_incomplete
        .unwrap_or_else(|| Bottom::new(Code::User, NodeRef::NONE, "empty disjunction"))
}
