// Interned field names.
//
// A label is a small integer standing for a field name. The two low
// bits carry metadata: bit 0 marks hidden identifiers (names starting
// with `_`), bit 1 is reserved. The remaining bits are an index into
// a chain of interning tables: the process-wide shared table holds
// predeclared names at stable codes and is frozen after startup;
// every runtime extends it with its own child table, so labels from
// different runtimes never collide on shared codes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ast::{Ast, NodeRef, Syntax};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

impl Label {
    fn new(index: usize, hidden: bool) -> Label {
        Label(((index as u32) << 2) | hidden as u32)
    }

    // The empty string, interned at slot zero of the shared table.
    pub fn empty() -> Label {
        Label(0)
    }

    pub fn index(self) -> usize {
        (self.0 >> 2) as usize
    }

    pub fn is_hidden(self) -> bool {
        self.0 & 1 != 0
    }
}

struct Table {
    by_name: HashMap<String, usize>,
    names: Vec<String>,
    frozen: bool,
}

pub struct LabelIndex {
    parent: Option<Arc<LabelIndex>>,
    offset: usize,
    inner: Mutex<Table>,
}

// Names every runtime can rely on having stable codes.
const PREDECLARED: &[&str] = &[
    "", "_", "bool", "bytes", "duration", "float", "int", "number",
    "string", "len", "close", "and", "or",
];

lazy_static! {
    static ref SHARED: Arc<LabelIndex> = {
        let index = LabelIndex::root();
        for name in PREDECLARED {
            index.intern(name, true);
        }
        index.freeze();
        Arc::new(index)
    };
}

// The shared, frozen table of predeclared names.
pub fn shared() -> Arc<LabelIndex> {
    SHARED.clone()
}

impl LabelIndex {
    fn root() -> LabelIndex {
        LabelIndex {
            parent: None,
            offset: 0,
            inner: Mutex::new(Table {
                by_name: HashMap::new(),
                names: Vec::new(),
                frozen: false,
            }),
        }
    }

    // A per-runtime extension of `parent`. The parent must not grow
    // afterwards, or codes would collide; freezing enforces this.
    pub fn child(parent: Arc<LabelIndex>) -> LabelIndex {
        let offset = parent.len();
        LabelIndex {
            parent: Some(parent),
            offset,
            inner: Mutex::new(Table {
                by_name: HashMap::new(),
                names: Vec::new(),
                frozen: false,
            }),
        }
    }

    pub fn freeze(&self) {
        self.inner.lock().unwrap().frozen = true;
    }

    fn len(&self) -> usize {
        self.offset + self.inner.lock().unwrap().names.len()
    }

    fn find(&self, name: &str) -> Option<usize> {
        if let Some(parent) = &self.parent {
            if let Some(i) = parent.find(name) {
                return Some(i);
            }
        }
        self.inner.lock().unwrap().by_name.get(name).cloned()
    }

    // Return the existing label for `name` or allocate the next code.
    // `is_ident` marks names that came from identifier position; only
    // those get the hidden bit for a leading underscore.
    pub fn intern(&self, name: &str, is_ident: bool) -> Label {
        let hidden = is_ident && name.starts_with('_') && name != "_";
        if let Some(i) = self.find(name) {
            return Label::new(i, hidden);
        }
        let mut inner = self.inner.lock().unwrap();
        // Double-checked: another thread may have raced us here.
        if let Some(i) = inner.by_name.get(name) {
            return Label::new(*i, hidden);
        }
        if inner.frozen {
            panic!("intern of {:?} on frozen label index", name);
        }
        let i = self.offset + inner.names.len();
        inner.names.push(name.to_string());
        inner.by_name.insert(name.to_string(), i);
        Label::new(i, hidden)
    }

    // Reverse lookup. A label that is in no table of the chain is a
    // programmer error.
    pub fn name(&self, label: Label) -> String {
        let i = label.index();
        if i < self.offset {
            match &self.parent {
                Some(parent) => parent.name(label),
                None => panic!("label {} below index offset", i),
            }
        } else {
            let inner = self.inner.lock().unwrap();
            match inner.names.get(i - self.offset) {
                Some(name) => name.clone(),
                None => panic!("label {} not in index chain", i),
            }
        }
    }

    // Resolve a syntactic label node to a label. Dynamic labels
    // (interpolations) and template labels have no static code.
    pub fn node_label(&self, ast: &Ast, n: NodeRef) -> Option<Label> {
        match ast.node(n) {
            Syntax::Ident { name, .. } => Some(self.intern(name, true)),
            Syntax::Str(s) => Some(self.intern(s, false)),
            _ => None,
        }
    }
}
