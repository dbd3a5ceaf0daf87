//! Heap object model
//!
//! Objects are shared, interiorly-mutable property maps. Property order is
//! tracked for enumeration, and a slot is either plain data or a
//! getter/setter pair installed by `CallBuiltinDefineGetterSetter`.
//! Function objects and the for-in name iterator are object kinds rather
//! than separate value variants, which keeps the value enum at the shape
//! the interpreter needs.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::vm::context::ExecutionContext;
use crate::vm::function::CompiledFunction;
use crate::vm::unwind::Thrown;
use crate::vm::value::Value;

/// Shared handle to a heap object
pub type ObjectRef = Rc<RefCell<Object>>;

/// Host-implemented callable
pub type NativeFn = Rc<dyn Fn(&ExecutionContext, Value, &[Value]) -> Result<Value, Thrown>>;

/// One property slot
#[derive(Debug, Clone)]
pub enum PropertySlot {
    /// Plain data property
    Data(Value),
    /// Accessor property; absent halves read as undefined / ignore writes
    Accessor {
        /// Getter function value
        getter: Option<Value>,
        /// Setter function value
        setter: Option<Value>,
    },
}

/// What an object is, beyond its property map
pub enum ObjectKind {
    /// Ordinary object
    Plain,
    /// Closure over a compiled function and its defining scope
    Function {
        /// The compiled function body
        func: Rc<CompiledFunction>,
        /// Scope chain captured at closure creation
        scope: ExecutionContext,
    },
    /// Host-implemented function
    Native(NativeFn),
    /// For-in property-name iterator state
    NameIterator {
        /// Snapshot of enumerable names
        names: Vec<Rc<str>>,
        /// Next position
        pos: usize,
    },
}

impl fmt::Debug for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "Plain"),
            Self::Function { func, .. } => write!(f, "Function({})", func.name),
            Self::Native(_) => write!(f, "Native"),
            Self::NameIterator { names, pos } => {
                write!(f, "NameIterator({}/{})", pos, names.len())
            }
        }
    }
}

/// A heap object: kind plus ordered property map
#[derive(Debug)]
pub struct Object {
    /// Object kind
    pub kind: ObjectKind,
    props: FxHashMap<Rc<str>, PropertySlot>,
    order: Vec<Rc<str>>,
}

impl Object {
    /// Allocate an ordinary object
    pub fn plain() -> ObjectRef {
        Rc::new(RefCell::new(Self {
            kind: ObjectKind::Plain,
            props: FxHashMap::default(),
            order: Vec::new(),
        }))
    }

    /// Allocate a closure object
    pub fn closure(func: Rc<CompiledFunction>, scope: ExecutionContext) -> ObjectRef {
        Rc::new(RefCell::new(Self {
            kind: ObjectKind::Function { func, scope },
            props: FxHashMap::default(),
            order: Vec::new(),
        }))
    }

    /// Allocate a host-function object
    pub fn native(f: NativeFn) -> ObjectRef {
        Rc::new(RefCell::new(Self {
            kind: ObjectKind::Native(f),
            props: FxHashMap::default(),
            order: Vec::new(),
        }))
    }

    /// Allocate a name iterator over a snapshot of enumerable names
    pub fn name_iterator(names: Vec<Rc<str>>) -> ObjectRef {
        Rc::new(RefCell::new(Self {
            kind: ObjectKind::NameIterator { names, pos: 0 },
            props: FxHashMap::default(),
            order: Vec::new(),
        }))
    }

    /// Whether this object is callable
    pub fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function { .. } | ObjectKind::Native(_))
    }

    /// Look up a property slot
    pub fn get(&self, name: &str) -> Option<&PropertySlot> {
        self.props.get(name)
    }

    /// Whether the object has a property
    pub fn has(&self, name: &str) -> bool {
        self.props.contains_key(name)
    }

    /// Define or overwrite a data property
    pub fn set_data(&mut self, name: Rc<str>, value: Value) {
        match self.props.get_mut(&name) {
            Some(slot) => *slot = PropertySlot::Data(value),
            None => {
                self.order.push(name.clone());
                self.props.insert(name, PropertySlot::Data(value));
            }
        }
    }

    /// Install a getter/setter pair
    pub fn set_accessor(&mut self, name: Rc<str>, getter: Option<Value>, setter: Option<Value>) {
        let slot = PropertySlot::Accessor { getter, setter };
        if self.props.insert(name.clone(), slot).is_none() {
            self.order.push(name);
        }
    }

    /// Remove a property; true when the property existed
    pub fn delete(&mut self, name: &str) -> bool {
        if self.props.remove(name).is_some() {
            self.order.retain(|k| k.as_ref() != name);
            true
        } else {
            false
        }
    }

    /// Enumerable property names in insertion order
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.order.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_properties_keep_insertion_order() {
        let obj = Object::plain();
        {
            let mut o = obj.borrow_mut();
            o.set_data(Rc::from("b"), Value::Number(1.0));
            o.set_data(Rc::from("a"), Value::Number(2.0));
            o.set_data(Rc::from("b"), Value::Number(3.0));
        }
        let o = obj.borrow();
        let all_keys = o.keys();
        let keys: Vec<&str> = all_keys.iter().map(|k| k.as_ref() as &str).collect::<Vec<_>>();
        assert_eq!(keys, vec!["b", "a"]);
        assert!(matches!(
            o.get("b"),
            Some(PropertySlot::Data(Value::Number(n))) if *n == 3.0
        ));
    }

    #[test]
    fn test_delete_removes_from_order() {
        let obj = Object::plain();
        {
            let mut o = obj.borrow_mut();
            o.set_data(Rc::from("x"), Value::Null);
            o.set_data(Rc::from("y"), Value::Null);
            assert!(o.delete("x"));
            assert!(!o.delete("x"));
        }
        assert_eq!(obj.borrow().keys().len(), 1);
    }

    #[test]
    fn test_callable_kinds() {
        assert!(!Object::plain().borrow().is_callable());
        let f = Object::native(Rc::new(|_, _, _| Ok(Value::Undefined)));
        assert!(f.borrow().is_callable());
    }
}
