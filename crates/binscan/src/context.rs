//! Scoped attribute-value storage
//!
//! While a result decodes, bound attributes publish their values into the
//! innermost frame of a [`ScopeStack`]. When the result finishes, its frame is
//! frozen into a [`ResultContext`] that travels with the frozen result so
//! rendering can read the same values back later.

use ahash::AHashMap;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Process-unique identity of an attribute. Two attributes with the same name
/// are still two attributes; lookups go by id, never by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttrId(u64);

impl AttrId {
    /// Issues a fresh id. Identity is issuance order and never repeats for
    /// the life of the process.
    pub fn next() -> Self {
        static NEXT_ATTR_ID: AtomicU64 = AtomicU64::new(0);
        Self(NEXT_ATTR_ID.fetch_add(1, Ordering::SeqCst))
    }
}

/// A decoded scalar, tagged with its runtime width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
}

impl Value {
    /// Widens to u64. Signed values must be non-negative.
    pub fn as_u64(self) -> Option<u64> {
        match self {
            Value::U8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::U64(v) => Some(v),
            Value::I8(v) => u64::try_from(v).ok(),
            Value::I16(v) => u64::try_from(v).ok(),
            Value::I32(v) => u64::try_from(v).ok(),
            Value::I64(v) => u64::try_from(v).ok(),
        }
    }

    /// Widens to i64. u64 values above `i64::MAX` don't fit.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Value::U8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::U64(v) => i64::try_from(v).ok(),
            Value::I8(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::I64(v) => Some(v),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

value_from! {
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
}

/// Anything attribute values can be resolved against: the live scope stack
/// during decode, a frozen [`ResultContext`] during render.
pub trait ValueLookup {
    fn lookup(&self, id: AttrId) -> Option<Value>;
}

/// Frozen attribute values of one finished result scope, plus the frozen
/// scopes of its child results in the order they finished.
#[derive(Debug, Default)]
pub struct ResultContext {
    values: AHashMap<AttrId, Value>,
    children: Vec<Arc<ResultContext>>,
}

impl ResultContext {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.children.is_empty()
    }

    pub fn children(&self) -> &[Arc<ResultContext>] {
        &self.children
    }
}

impl ValueLookup for ResultContext {
    fn lookup(&self, id: AttrId) -> Option<Value> {
        self.values.get(&id).copied().or_else(|| {
            // Most recently merged child scope wins
            self.children.iter().rev().find_map(|child| child.lookup(id))
        })
    }
}

/// Decode-time scope stack, one frame per open result builder.
///
/// `push` opens a frame when a nested result starts decoding; `pop` freezes
/// the frame into a [`ResultContext`] and merges it into the child list of the
/// frame below. Lookups walk innermost frame first.
#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<ResultContext>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self) {
        self.frames.push(ResultContext::default());
    }

    /// Freezes and returns the innermost frame.
    ///
    /// ## Panics
    /// Panics if no frame is open; stack discipline is on the driver.
    pub fn pop(&mut self) -> Arc<ResultContext> {
        let frame = self.frames.pop().expect("scope stack underflow");
        let frozen = Arc::new(frame);
        if let Some(parent) = self.frames.last_mut() {
            parent.children.push(frozen.clone());
        }
        frozen
    }

    /// Binds a value in the innermost frame.
    ///
    /// ## Panics
    /// Panics if the attribute is already bound in this frame; binding twice
    /// is a broken spec.
    pub fn bind(&mut self, id: AttrId, value: Value) {
        let frame = self.frames.last_mut().expect("bind outside any scope");
        let previous = frame.values.insert(id, value);
        assert!(previous.is_none(), "attribute bound twice in one scope");
    }
}

impl ValueLookup for ScopeStack {
    fn lookup(&self, id: AttrId) -> Option<Value> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.values.get(&id) {
                return Some(*value);
            }
            // Finished sibling scopes hang off this frame already
            if let Some(value) = frame.children.iter().rev().find_map(|c| c.lookup(id)) {
                return Some(value);
            }
        }
        None
    }
}

/// A lazily evaluated value: either a literal or a thunk reading bound
/// attributes from whatever scope is active when it runs.
#[derive(Clone)]
pub enum ValueExpression<T> {
    Literal(T),
    Thunk(Arc<dyn Fn(&dyn ValueLookup) -> Option<T> + Send + Sync>),
}

impl<T: Clone> ValueExpression<T> {
    pub fn eval(&self, scope: &dyn ValueLookup) -> Option<T> {
        match self {
            ValueExpression::Literal(value) => Some(value.clone()),
            ValueExpression::Thunk(thunk) => thunk(scope),
        }
    }
}

impl<T> ValueExpression<T> {
    pub fn thunk(f: impl Fn(&dyn ValueLookup) -> Option<T> + Send + Sync + 'static) -> Self {
        ValueExpression::Thunk(Arc::new(f))
    }
}

impl<T> From<T> for ValueExpression<T> {
    fn from(value: T) -> Self {
        ValueExpression::Literal(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueExpression<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueExpression::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            ValueExpression::Thunk(_) => f.write_str("Thunk(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AttrId, ScopeStack, Value, ValueExpression, ValueLookup};

    #[test]
    fn innermost_scope_wins() {
        let id = AttrId::next();
        let mut scope = ScopeStack::new();

        scope.push();
        scope.bind(id, Value::U32(1));
        scope.push();
        assert_eq!(scope.lookup(id), Some(Value::U32(1)));

        // Shadow in the inner frame
        scope.bind(id, Value::U32(2));
        assert_eq!(scope.lookup(id), Some(Value::U32(2)));

        scope.pop();
        assert_eq!(scope.lookup(id), Some(Value::U32(2)));
    }

    #[test]
    fn finished_child_scopes_stay_readable() {
        let id = AttrId::next();
        let mut scope = ScopeStack::new();

        scope.push();
        scope.push();
        scope.bind(id, Value::U16(7));
        let frozen = scope.pop();
        assert_eq!(frozen.lookup(id), Some(Value::U16(7)));

        // The parent frame sees the merged child scope
        assert_eq!(scope.lookup(id), Some(Value::U16(7)));

        let root = scope.pop();
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.lookup(id), Some(Value::U16(7)));
    }

    #[test]
    #[should_panic]
    fn double_bind_panics() {
        let id = AttrId::next();
        let mut scope = ScopeStack::new();
        scope.push();
        scope.bind(id, Value::U8(1));
        scope.bind(id, Value::U8(2));
    }

    #[test]
    fn expressions_evaluate_lazily() {
        let id = AttrId::next();
        let mut scope = ScopeStack::new();
        scope.push();

        let expr = ValueExpression::thunk(move |scope| {
            scope.lookup(id).and_then(Value::as_u64).map(|v| v * 2)
        });
        assert_eq!(expr.eval(&scope), None);

        scope.bind(id, Value::U32(21));
        assert_eq!(expr.eval(&scope), Some(42));
        assert_eq!(ValueExpression::from(5u64).eval(&scope), Some(5));
    }

    #[test]
    fn value_widening() {
        assert_eq!(Value::I8(-1).as_u64(), None);
        assert_eq!(Value::U64(u64::MAX).as_i64(), None);
        assert_eq!(Value::U16(0x1234).as_u64(), Some(0x1234));
    }
}
