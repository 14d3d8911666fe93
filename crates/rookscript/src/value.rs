//! The tagged dynamic value that every RookScript operand, variable, and
//! container element is made of.
//!
//! Scalars (`Null`, `Bool`, `Int`, `Float`) are stored inline and copied by
//! value. `String`, `List`, `Map`, `Buffer`, `Error`, and `ObjectRef` are
//! reference-counted: assignment and argument passing copy the handle, not
//! the contents, exactly as cloning an `Rc` does. Lists and maps are
//! additionally interior-mutable (`RefCell`) since any holder of a reference
//! may mutate the shared container.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use indexmap::IndexMap;

/// A case-insensitive map key. Hashing and equality fold ASCII case so
/// `"Foo"` and `"foo"` land in the same slot; the first-inserted casing is
/// what iteration and display see.
#[derive(Debug, Clone)]
pub struct MapKey(pub String);

impl MapKey {
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    fn folded(&self) -> String {
        self.0.to_lowercase()
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded() == other.folded()
    }
}
impl Eq for MapKey {}

impl std::hash::Hash for MapKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.folded().hash(state);
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type RsList = Rc<RefCell<Vec<Value>>>;
pub type RsMap = Rc<RefCell<IndexMap<MapKey, Value>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug)]
pub struct BufferData {
    pub bytes: Vec<u8>,
    pub order: ByteOrder,
    pub cursor: usize,
}

pub type RsBuffer = Rc<RefCell<BufferData>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorData {
    pub error_type: String,
    pub message: String,
    pub localized_message: String,
}

pub type RsError = Rc<ErrorData>;

/// An opaque host-owned handle. Identity is by `Rc` pointer; RookScript
/// never inspects the payload, it only carries it around.
#[derive(Clone)]
pub struct ObjectRef(pub Rc<dyn Any>);

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef(@{:p})", Rc::as_ptr(&self.0))
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for ObjectRef {}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Rc<str>),
    Buffer(RsBuffer),
    List(RsList),
    Map(RsMap),
    Error(RsError),
    ObjectRef(ObjectRef),
}

impl Value {
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(Rc::from(s.into()))
    }

    #[must_use]
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn map(entries: IndexMap<MapKey, Value>) -> Self {
        Self::Map(Rc::new(RefCell::new(entries)))
    }

    #[must_use]
    pub fn error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Error(Rc::new(ErrorData {
            error_type: error_type.into(),
            localized_message: message.clone(),
            message,
        }))
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::String(_) => "STRING",
            Self::Buffer(_) => "BUFFER",
            Self::List(_) => "LIST",
            Self::Map(_) => "MAP",
            Self::Error(_) => "ERROR",
            Self::ObjectRef(_) => "OBJECTREF",
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Coercion rank used to decide which side of a binary arithmetic op
    /// gets widened: `BOOL < INT < FLOAT < STRING`.
    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) => 1,
            Self::Float(_) => 2,
            Self::String(_) => 3,
            _ => 4,
        }
    }

    fn is_raw(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::Float(_))
    }

    #[must_use]
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0 && !f.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Buffer(_) | Self::List(_) | Self::Map(_) | Self::Error(_) | Self::ObjectRef(_) => true,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> i64 {
        match self {
            Self::Null => 0,
            Self::Bool(b) => i64::from(*b),
            Self::Int(i) => *i,
            Self::Float(f) => *f as i64,
            Self::String(s) => s.trim().parse::<i64>().unwrap_or(0),
            Self::Buffer(_) | Self::List(_) | Self::Map(_) | Self::Error(_) | Self::ObjectRef(_) => 0,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
            Self::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            Self::Buffer(_) | Self::List(_) | Self::Map(_) | Self::Error(_) | Self::ObjectRef(_) => f64::NAN,
        }
    }

    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
            Self::String(s) => s.to_string(),
            Self::Buffer(buf) => format!("<buffer:{}>", buf.borrow().bytes.len()),
            Self::List(list) => {
                let mut seen = AHashSet::default();
                display_list(list, &mut seen)
            }
            Self::Map(map) => {
                let mut seen = AHashSet::default();
                display_map(map, &mut seen)
            }
            Self::Error(e) => format!("{}: {}", e.error_type, e.message),
            Self::ObjectRef(o) => format!("{:p}", Rc::as_ptr(&o.0)),
        }
    }

    #[must_use]
    pub fn as_string(&self) -> Rc<str> {
        match self {
            Self::String(s) => s.clone(),
            other => Rc::from(other.to_display_string()),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else {
        let mut buf = ryu::Buffer::new();
        buf.format(f).to_string()
    }
}

fn display_list(list: &RsList, seen: &mut AHashSet<usize>) -> String {
    let ptr = Rc::as_ptr(list) as usize;
    if !seen.insert(ptr) {
        return "[...]".to_string();
    }
    let items = list.borrow();
    let parts: Vec<String> = items
        .iter()
        .map(|v| match v {
            Value::List(inner) => display_list(inner, seen),
            Value::Map(inner) => display_map(inner, seen),
            Value::String(s) => format!("\"{s}\""),
            other => other.to_display_string(),
        })
        .collect();
    let out = format!("[{}]", parts.join(", "));
    seen.remove(&ptr);
    out
}

fn display_map(map: &RsMap, seen: &mut AHashSet<usize>) -> String {
    let ptr = Rc::as_ptr(map) as usize;
    if !seen.insert(ptr) {
        return "{...}".to_string();
    }
    let entries = map.borrow();
    let parts: Vec<String> = entries
        .iter()
        .map(|(k, v)| {
            let vs = match v {
                Value::List(inner) => display_list(inner, seen),
                Value::Map(inner) => display_map(inner, seen),
                Value::String(s) => format!("\"{s}\""),
                other => other.to_display_string(),
            };
            format!("{k}: {vs}")
        })
        .collect();
    let out = format!("{{{}}}", parts.join(", "));
    seen.remove(&ptr);
    out
}

fn reference_identity(v: &Value) -> Option<usize> {
    match v {
        Value::List(l) => Some(Rc::as_ptr(l) as usize),
        Value::Map(m) => Some(Rc::as_ptr(m) as usize),
        Value::Buffer(b) => Some(Rc::as_ptr(b) as usize),
        Value::Error(e) => Some(Rc::as_ptr(e) as *const () as usize),
        Value::ObjectRef(o) => Some(Rc::as_ptr(&o.0) as *const () as usize),
        _ => None,
    }
}

/// Total-order "equal" relation used by `==`/`!=` and by ordering
/// comparisons (`§4.1`). NULL sorts below everything non-NULL; numerics
/// compare as doubles; if either side is a string, both sides compare
/// lexicographically as strings; anything else falls back to reference
/// identity.
#[must_use]
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::String(_), _) | (_, Value::String(_)) => {
            a.as_string().as_ref().cmp(b.as_string().as_ref())
        }
        (a, b) if a.is_raw() && b.is_raw() => {
            a.as_float().partial_cmp(&b.as_float()).unwrap_or(Ordering::Equal)
        }
        _ => {
            let (ia, ib) = (reference_identity(a), reference_identity(b));
            if ia.is_some() && ia == ib {
                Ordering::Equal
            } else {
                Ordering::Less
            }
        }
    }
}

#[must_use]
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        strict_eq(self, other)
    }
}

#[must_use]
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::String(x), Value::String(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::Buffer(x), Value::Buffer(y)) => Rc::ptr_eq(x, y),
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Map(x), Value::Map(y)) => Rc::ptr_eq(x, y),
        (Value::Error(x), Value::Error(y)) => Rc::ptr_eq(x, y),
        (Value::ObjectRef(x), Value::ObjectRef(y)) => x == y,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    ShiftRightUnsigned,
}

/// Binary arithmetic/bitwise ops per `§4.1`: if either operand is non-raw
/// (and the op isn't `+` on strings) the result is float NaN; otherwise
/// both operands are widened to the higher-ranked type and the operation
/// is performed there. `+` concatenates when either side is a string.
#[must_use]
pub fn arith(op: ArithOp, a: &Value, b: &Value) -> Value {
    if op == ArithOp::Add && (matches!(a, Value::String(_)) || matches!(b, Value::String(_))) {
        return Value::string(format!("{}{}", a.as_string(), b.as_string()));
    }
    if !a.is_raw() || !b.is_raw() {
        return Value::Float(f64::NAN);
    }
    let rank = a.rank().max(b.rank());
    match op {
        ArithOp::BitAnd | ArithOp::BitOr | ArithOp::BitXor | ArithOp::ShiftLeft | ArithOp::ShiftRight
        | ArithOp::ShiftRightUnsigned => {
            let (x, y) = (a.as_int(), b.as_int());
            let result = match op {
                ArithOp::BitAnd => x & y,
                ArithOp::BitOr => x | y,
                ArithOp::BitXor => x ^ y,
                ArithOp::ShiftLeft => x.wrapping_shl((y & 63) as u32),
                ArithOp::ShiftRight => x.wrapping_shr((y & 63) as u32),
                ArithOp::ShiftRightUnsigned => ((x as u64).wrapping_shr((y & 63) as u32)) as i64,
                _ => unreachable!(),
            };
            Value::Int(result)
        }
        _ if rank <= 1 => {
            let (x, y) = (a.as_int(), b.as_int());
            match op {
                ArithOp::Add => Value::Int(x.wrapping_add(y)),
                ArithOp::Sub => Value::Int(x.wrapping_sub(y)),
                ArithOp::Mul => Value::Int(x.wrapping_mul(y)),
                ArithOp::Div => {
                    if y == 0 {
                        Value::Float(f64::NAN)
                    } else {
                        Value::Int(x.wrapping_div(y))
                    }
                }
                ArithOp::Mod => {
                    if y == 0 {
                        Value::Float(f64::NAN)
                    } else {
                        Value::Int(x.wrapping_rem(y))
                    }
                }
                _ => unreachable!(),
            }
        }
        _ => {
            let (x, y) = (a.as_float(), b.as_float());
            match op {
                ArithOp::Add => Value::Float(x + y),
                ArithOp::Sub => Value::Float(x - y),
                ArithOp::Mul => Value::Float(x * y),
                ArithOp::Div => Value::Float(x / y),
                ArithOp::Mod => Value::Float(x % y),
                _ => unreachable!(),
            }
        }
    }
}

#[must_use]
pub fn negate(v: &Value) -> Value {
    if !v.is_raw() {
        return Value::Float(f64::NAN);
    }
    match v {
        Value::Float(f) => Value::Float(-f),
        _ => Value::Int(-v.as_int()),
    }
}

#[must_use]
pub fn bit_not(v: &Value) -> Value {
    if !v.is_raw() {
        return Value::Float(f64::NAN);
    }
    Value::Int(!v.as_int())
}

#[must_use]
pub fn absolute(v: &Value) -> Value {
    if !v.is_raw() {
        return Value::Float(f64::NAN);
    }
    match v {
        Value::Float(f) => Value::Float(f.abs()),
        _ => Value::Int(v.as_int().wrapping_abs()),
    }
}

/// Sorts a list in place per the ordering in [`compare`], stable so ties
/// preserve first-seen order, as required for set-mode operations.
pub fn sort_list(list: &RsList) {
    list.borrow_mut().sort_by(compare);
}

pub fn set_add(list: &RsList, value: Value) {
    let mut items = list.borrow_mut();
    match items.binary_search_by(|probe| compare(probe, &value)) {
        Ok(_) => {}
        Err(idx) => items.insert(idx, value),
    }
}

pub fn set_remove(list: &RsList, value: &Value) {
    let mut items = list.borrow_mut();
    if let Ok(idx) = items.binary_search_by(|probe| compare(probe, value)) {
        items.remove(idx);
    }
}

#[must_use]
pub fn set_contains(list: &RsList, value: &Value) -> bool {
    let items = list.borrow();
    items.binary_search_by(|probe| compare(probe, value)).is_ok()
}

#[must_use]
pub fn set_search(list: &RsList, value: &Value) -> i64 {
    let items = list.borrow();
    match items.binary_search_by(|probe| compare(probe, value)) {
        Ok(idx) | Err(idx) => idx as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_coercions_follow_table() {
        assert_eq!(Value::Null.as_bool(), false);
        assert_eq!(Value::Int(0).as_bool(), false);
        assert_eq!(Value::Int(5).as_bool(), true);
        assert_eq!(Value::string("").as_bool(), false);
        assert_eq!(Value::string("x").as_bool(), true);
        assert_eq!(Value::Float(f64::NAN).as_bool(), false);
    }

    #[test]
    fn string_coercion_uses_display() {
        assert_eq!(Value::Null.as_string().as_ref(), "null");
        assert_eq!(Value::Bool(true).as_string().as_ref(), "true");
        assert_eq!(Value::Int(7).as_string().as_ref(), "7");
    }

    #[test]
    fn division_by_zero_integer_yields_nan_float() {
        let r = arith(ArithOp::Div, &Value::Int(1), &Value::Int(0));
        match r {
            Value::Float(f) => assert!(f.is_nan()),
            _ => panic!("expected float NaN"),
        }
    }

    #[test]
    fn addition_with_string_concatenates() {
        let r = arith(ArithOp::Add, &Value::string("a"), &Value::Int(1));
        assert_eq!(r.as_string().as_ref(), "a1");
    }

    #[test]
    fn arithmetic_with_non_raw_operand_is_nan() {
        let list = Value::list(vec![]);
        let r = arith(ArithOp::Add, &list, &Value::Int(1));
        match r {
            Value::Float(f) => assert!(f.is_nan()),
            _ => panic!("expected float NaN"),
        }
    }

    #[test]
    fn ordering_places_null_below_everything() {
        assert_eq!(compare(&Value::Null, &Value::Int(-1000)), Ordering::Less);
        assert_eq!(compare(&Value::Int(1), &Value::Float(1.0)), Ordering::Equal);
    }

    #[test]
    fn map_key_is_case_insensitive() {
        let mut m = IndexMap::new();
        m.insert(MapKey::new("Foo"), Value::Int(1));
        match m.get(&MapKey::new("foo")) {
            Some(Value::Int(1)) => {}
            other => panic!("expected Some(Int(1)), got {other:?}"),
        }
    }

    #[test]
    fn set_operations_keep_sorted_dedup_order() {
        let list: RsList = Rc::new(RefCell::new(vec![]));
        set_add(&list, Value::Int(3));
        set_add(&list, Value::Int(1));
        set_add(&list, Value::Int(2));
        set_add(&list, Value::Int(1));
        assert!(set_contains(&list, &Value::Int(2)));
        set_remove(&list, &Value::Int(2));
        assert!(!set_contains(&list, &Value::Int(2)));
        let items = list.borrow();
        assert_eq!(items.len(), 2);
    }
}
