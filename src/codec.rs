//! Textual serializer used for values the cache cannot hold structurally.
//!
//! Format, one value at a time:
//!
//! ```text
//! N;                       null
//! b:1;                     bool
//! i:42;                    int
//! d:0.5;  d:INF;  d:NAN;   double
//! s:3:"abc";               string, length in bytes
//! a:2:{<key><value>...}    array
//! O:5:"Point":1:{...}      object: class, then properties
//! V:6:"Vector":1:{...}     collection: kind, then items
//! R:1;                     the n-th container opened so far (1-based)
//! ```
//!
//! Keys are `i:` or `s:` values. Containers are numbered in the order they
//! are opened, so a graph that reaches the same container twice (including
//! through a cycle) decodes back into the same shape. Resources encode as
//! `i:0;`.
//!
//! Decoding rejects containers nested deeper than [`MAX_DEPTH`].

use crate::error::{DecodeError, DecodeErrorKind};
use crate::value::{Array, ArrayKey, Collection, CollectionKind, Object, Value};
use core::fmt::Write as _;
use hashbrown::HashMap;
use indexmap::IndexMap;
use std::sync::Arc;

/// Deepest container nesting `unserialize` accepts.
pub const MAX_DEPTH: usize = 256;

/// Encode `value` and everything reachable from it.
pub fn serialize(value: &Value) -> Vec<u8> {
    let mut s = Serializer::default();
    s.value(value);
    s.out.into_bytes()
}

/// Encode an array that is not (or not known to be) behind a `Value`.
pub(crate) fn serialize_array(arr: &Array) -> Vec<u8> {
    let mut s = Serializer::default();
    s.array(arr);
    s.out.into_bytes()
}

/// Decode one value; the whole input must be consumed.
pub fn unserialize(input: &[u8]) -> Result<Value, DecodeError> {
    let mut p = Parser {
        input,
        pos: 0,
        containers: Vec::new(),
        depth: 0,
    };
    let v = p.value()?;
    if p.pos != input.len() {
        return Err(p.error(DecodeErrorKind::TrailingBytes));
    }
    Ok(v)
}

#[derive(Default)]
struct Serializer {
    out: String,
    // Container address -> 1-based open order.
    ids: HashMap<usize, usize>,
    // Containers produced while iterating shared views. Holding them keeps
    // their addresses from being reused while `ids` refers to them.
    pinned: Vec<Value>,
}

impl Serializer {
    /// Record a container; returns false and writes a back-reference if it
    /// was already opened.
    fn open(&mut self, id: usize) -> bool {
        if let Some(n) = self.ids.get(&id) {
            let _ = write!(self.out, "R:{n};");
            return false;
        }
        let n = self.ids.len() + 1;
        self.ids.insert(id, n);
        true
    }

    fn value(&mut self, v: &Value) {
        match v {
            Value::Null => self.out.push_str("N;"),
            Value::Bool(b) => {
                let _ = write!(self.out, "b:{};", u8::from(*b));
            }
            Value::Int(i) => {
                let _ = write!(self.out, "i:{i};");
            }
            Value::Double(d) => self.double(*d),
            Value::Str(s) => self.string(s),
            Value::Array(a) => self.array(&a.borrow()),
            Value::Object(o) => {
                if self.open(o.as_ptr() as *const () as usize) {
                    let o = o.borrow();
                    self.named("O", &o.class);
                    self.map(&o.props);
                }
            }
            Value::Resource(_) => self.out.push_str("i:0;"),
            Value::Collection(c) => {
                if self.open(c.as_ptr() as *const () as usize) {
                    let c = c.borrow();
                    self.named("V", c.kind.name());
                    self.map(&c.items);
                }
            }
        }
    }

    fn double(&mut self, d: f64) {
        let _ = if d.is_nan() {
            write!(self.out, "d:NAN;")
        } else if d.is_infinite() {
            write!(self.out, "d:{}INF;", if d < 0.0 { "-" } else { "" })
        } else {
            write!(self.out, "d:{d:?};")
        };
    }

    fn string(&mut self, s: &str) {
        let _ = write!(self.out, "s:{}:\"{}\";", s.len(), s);
    }

    fn key(&mut self, k: &ArrayKey) {
        match k {
            ArrayKey::Int(i) => {
                let _ = write!(self.out, "i:{i};");
            }
            ArrayKey::Str(s) => self.string(s),
        }
    }

    fn named(&mut self, tag: &str, name: &str) {
        let _ = write!(self.out, "{tag}:{}:\"{name}\":", name.len());
    }

    fn array(&mut self, arr: &Array) {
        if !self.open(arr as *const Array as *const () as usize) {
            return;
        }
        let _ = write!(self.out, "a:{}:{{", arr.len());
        for (k, v) in arr.iter() {
            self.key(&k);
            self.value(&v);
            if arr.is_shared() && v.is_container() {
                self.pinned.push(v);
            }
        }
        self.out.push('}');
    }

    fn map(&mut self, map: &IndexMap<ArrayKey, Value>) {
        let _ = write!(self.out, "{}:{{", map.len());
        for (k, v) in map {
            self.key(k);
            self.value(v);
        }
        self.out.push('}');
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    // Every container opened so far, for `R:n;`.
    containers: Vec<Value>,
    // Containers currently open.
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, kind: DecodeErrorKind) -> DecodeError {
        DecodeError::new(self.pos, kind)
    }

    fn peek(&self) -> Result<u8, DecodeError> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error(DecodeErrorKind::UnexpectedEnd))
    }

    fn bump(&mut self) -> Result<u8, DecodeError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, want: u8) -> Result<(), DecodeError> {
        if self.peek()? != want {
            return Err(self.error(DecodeErrorKind::Expected(want)));
        }
        self.pos += 1;
        Ok(())
    }

    /// Bytes up to (not including) `end`, which is consumed.
    fn until(&mut self, end: u8) -> Result<&'a [u8], DecodeError> {
        let rest = &self.input[self.pos..];
        let n = rest
            .iter()
            .position(|&b| b == end)
            .ok_or_else(|| DecodeError::new(self.input.len(), DecodeErrorKind::UnexpectedEnd))?;
        self.pos += n + 1;
        Ok(&rest[..n])
    }

    fn number<T: core::str::FromStr>(&mut self, end: u8) -> Result<T, DecodeError> {
        let start = self.pos;
        let raw = self.until(end)?;
        core::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DecodeError::new(start, DecodeErrorKind::InvalidNumber))
    }

    /// `<len>:"<bytes>"` followed by `end`.
    fn quoted(&mut self, end: u8) -> Result<&'a str, DecodeError> {
        let len: usize = self.number(b':')?;
        self.expect(b'"')?;
        let start = self.pos;
        let stop = start
            .checked_add(len)
            .filter(|&s| s <= self.input.len())
            .ok_or_else(|| DecodeError::new(self.input.len(), DecodeErrorKind::UnexpectedEnd))?;
        let s = core::str::from_utf8(&self.input[start..stop])
            .map_err(|_| DecodeError::new(start, DecodeErrorKind::InvalidUtf8))?;
        self.pos = stop;
        self.expect(b'"')?;
        self.expect(end)?;
        Ok(s)
    }

    fn key(&mut self) -> Result<ArrayKey, DecodeError> {
        let start = self.pos;
        match self.bump()? {
            b'i' => {
                self.expect(b':')?;
                Ok(ArrayKey::Int(self.number(b';')?))
            }
            b's' => {
                self.expect(b':')?;
                Ok(ArrayKey::Str(Arc::from(self.quoted(b';')?)))
            }
            _ => Err(DecodeError::new(start, DecodeErrorKind::InvalidKey)),
        }
    }

    fn entries(
        &mut self,
        mut put: impl FnMut(ArrayKey, Value),
    ) -> Result<(), DecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error(DecodeErrorKind::TooDeep));
        }
        let n: usize = self.number(b':')?;
        self.expect(b'{')?;
        self.depth += 1;
        for _ in 0..n {
            let k = self.key()?;
            let v = self.value()?;
            put(k, v);
        }
        self.depth -= 1;
        self.expect(b'}')
    }

    fn value(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        let tag = self.bump()?;
        if tag == b'N' {
            self.expect(b';')?;
            return Ok(Value::Null);
        }
        self.expect(b':')?;
        match tag {
            b'b' => match self.number::<u8>(b';')? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                _ => Err(DecodeError::new(start, DecodeErrorKind::InvalidNumber)),
            },
            b'i' => Ok(Value::Int(self.number(b';')?)),
            b'd' => {
                let at = self.pos;
                let d = match self.until(b';')? {
                    b"INF" => f64::INFINITY,
                    b"-INF" => f64::NEG_INFINITY,
                    b"NAN" => f64::NAN,
                    raw => core::str::from_utf8(raw)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| DecodeError::new(at, DecodeErrorKind::InvalidNumber))?,
                };
                Ok(Value::Double(d))
            }
            b's' => Ok(Value::str(self.quoted(b';')?)),
            b'a' => {
                let v = Value::new_array();
                self.containers.push(v.clone());
                if let Value::Array(a) = &v {
                    self.entries(|k, x| a.borrow_mut().set(k, x))?;
                }
                Ok(v)
            }
            b'O' => {
                let class = self.quoted(b':')?;
                let v = Value::object(Object::new(class));
                self.containers.push(v.clone());
                if let Value::Object(o) = &v {
                    self.entries(|k, x| {
                        o.borrow_mut().props.insert(k, x);
                    })?;
                }
                Ok(v)
            }
            b'V' => {
                let at = self.pos;
                let kind = CollectionKind::from_name(self.quoted(b':')?)
                    .ok_or_else(|| DecodeError::new(at, DecodeErrorKind::UnknownCollection))?;
                let v = Value::collection(Collection::new(kind));
                self.containers.push(v.clone());
                if let Value::Collection(c) = &v {
                    self.entries(|k, x| {
                        c.borrow_mut().items.insert(k, x);
                    })?;
                }
                Ok(v)
            }
            b'R' => {
                let n: usize = self.number(b';')?;
                n.checked_sub(1)
                    .and_then(|i| self.containers.get(i))
                    .cloned()
                    .ok_or_else(|| DecodeError::new(start, DecodeErrorKind::BadBackReference(n)))
            }
            other => Err(DecodeError::new(start, DecodeErrorKind::UnknownTag(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn roundtrip(v: &Value) -> Value {
        unserialize(&serialize(v)).unwrap()
    }

    #[test]
    fn scalars_encode_in_classic_form() {
        assert_eq!(serialize(&Value::Null), b"N;");
        assert_eq!(serialize(&Value::Bool(true)), b"b:1;");
        assert_eq!(serialize(&Value::Int(-7)), b"i:-7;");
        assert_eq!(serialize(&Value::Double(0.5)), b"d:0.5;");
        assert_eq!(serialize(&Value::str("h\u{e9}")), "s:3:\"h\u{e9}\";".as_bytes());
        assert_eq!(serialize(&Value::Resource(9)), b"i:0;");
    }

    #[test]
    fn array_layout() {
        let mut a = Array::new();
        a.set(0i64, Value::Int(1));
        a.set("k", Value::Null);
        assert_eq!(
            serialize(&Value::array(a)),
            b"a:2:{i:0;i:1;s:1:\"k\";N;}".to_vec()
        );
    }

    #[test]
    fn special_doubles_survive() {
        for d in [f64::INFINITY, f64::NEG_INFINITY, 1e300, -0.25, 3.0] {
            assert_eq!(roundtrip(&Value::Double(d)), Value::Double(d));
        }
        assert!(matches!(roundtrip(&Value::Double(f64::NAN)), Value::Double(d) if d.is_nan()));
    }

    #[test]
    fn strings_with_delimiters_survive() {
        let v = Value::str("a\";b:{c}");
        assert_eq!(roundtrip(&v), v);
    }

    #[test]
    fn objects_and_collections_survive() {
        let obj = Value::object(Object::new("Point").with_prop("x", Value::Int(3)));
        assert_eq!(roundtrip(&obj), obj);

        let mut c = Collection::new(CollectionKind::Map);
        c.items.insert(ArrayKey::from("a"), Value::Int(1));
        let c = Value::collection(c);
        assert_eq!(roundtrip(&c), c);
    }

    #[test]
    fn cycle_decodes_to_cycle() {
        let v = Value::new_array();
        let a = v.as_array().unwrap().clone();
        a.borrow_mut().push(Value::Int(5));
        a.borrow_mut().push(v.clone());
        assert_eq!(serialize(&v), b"a:2:{i:0;i:5;i:1;R:1;}".to_vec());

        let back = roundtrip(&v);
        let b = back.as_array().unwrap();
        let inner = b.borrow().get(1i64).unwrap();
        assert!(Rc::ptr_eq(b, inner.as_array().unwrap()));
    }

    #[test]
    fn malformed_input_is_rejected() {
        let cases: &[(&[u8], DecodeErrorKind)] = &[
            (&b""[..], DecodeErrorKind::UnexpectedEnd),
            (&b"i:12"[..], DecodeErrorKind::UnexpectedEnd),
            (&b"i:x;"[..], DecodeErrorKind::InvalidNumber),
            (&b"q:1;"[..], DecodeErrorKind::UnknownTag(b'q')),
            (&b"a:1:{d:1.0;N;}"[..], DecodeErrorKind::InvalidKey),
            (&b"R:1;"[..], DecodeErrorKind::BadBackReference(1)),
            (&b"N;N;"[..], DecodeErrorKind::TrailingBytes),
            (&b"s:9:\"abc\";"[..], DecodeErrorKind::UnexpectedEnd),
            (&b"V:3:\"Bag\":0:{}"[..], DecodeErrorKind::UnknownCollection),
        ];
        for (input, kind) in cases {
            let err = unserialize(input).unwrap_err();
            assert_eq!(&err.kind, kind, "input {:?}", String::from_utf8_lossy(input));
        }
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = |levels: usize| {
            let mut input = "a:1:{i:0;".repeat(levels);
            input.push_str("N;");
            input.push_str(&"}".repeat(levels));
            input
        };
        assert!(unserialize(deep(MAX_DEPTH).as_bytes()).is_ok());

        let err = unserialize(deep(MAX_DEPTH + 1).as_bytes()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TooDeep);

        // Truncated, far past the limit: still an error, not a crash.
        let err = unserialize("a:1:{i:0;".repeat(100_000).as_bytes()).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TooDeep);
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let err = unserialize(b"s:1:\"\xff\";").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidUtf8);
    }
}
