//! Execution contexts and the scope chain
//!
//! A context is a cheap handle (`Rc`) to an immutable-once-built scope
//! chain node. Pushing a `with` or catch scope yields a *new* context
//! wrapping the previous one; popping returns the parent handle. Nodes are
//! never mutated structurally — only the cells holding argument, local and
//! binding values are interior-mutable.
//!
//! Call-chain-global state (the exception-handler stack and the current
//! exception) is shared by every context derived within one chain, so
//! nested interpreter invocations push and pop the same handler stack.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::vm::unwind::Handler;
use crate::vm::value::Value;

/// A named binding created by `DeclareVar` or implicit global assignment
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    /// Bound value
    pub value: Value,
    /// Whether `delete` may remove the binding
    pub deletable: bool,
}

/// Function-activation storage: receiver, arguments, locals, and the
/// dynamic named bindings name-based instructions resolve against.
#[derive(Debug)]
pub(crate) struct CallScope {
    pub this: Value,
    pub args: RefCell<Vec<Value>>,
    pub locals: RefCell<Vec<Value>>,
    pub vars: RefCell<FxHashMap<Rc<str>, Binding>>,
}

/// One scope-chain node body
#[derive(Debug)]
pub(crate) enum Scope {
    /// Function activation
    Call(CallScope),
    /// `with` scope over a subject value
    With { subject: Value },
    /// Catch scope binding one name to the caught exception
    Catch {
        name: Rc<str>,
        value: RefCell<Value>,
    },
}

/// State shared by every context in one call chain
#[derive(Debug, Default)]
struct SharedState {
    unwind: RefCell<Vec<Handler>>,
    exception: RefCell<Value>,
}

#[derive(Debug)]
struct ContextNode {
    parent: Option<ExecutionContext>,
    scope: Scope,
    state: Rc<SharedState>,
}

/// Handle to the current scope-chain node
///
/// Cloning is an `Rc` clone; scope push/pop instructions reassign the
/// interpreter's current handle rather than mutating any node in place.
#[derive(Clone)]
pub struct ExecutionContext {
    node: Rc<ContextNode>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.node.scope {
            Scope::Call(_) => "call",
            Scope::With { .. } => "with",
            Scope::Catch { .. } => "catch",
        };
        write!(f, "ExecutionContext({kind}, depth {})", self.depth())
    }
}

impl ExecutionContext {
    /// Create a root context for a fresh call chain
    pub fn new(this: Value, args: Vec<Value>, local_count: usize) -> Self {
        Self {
            node: Rc::new(ContextNode {
                parent: None,
                scope: Scope::Call(CallScope {
                    this,
                    args: RefCell::new(args),
                    locals: RefCell::new(vec![Value::Undefined; local_count]),
                    vars: RefCell::new(FxHashMap::default()),
                }),
                state: Rc::new(SharedState::default()),
            }),
        }
    }

    /// Create the activation for a nested function call
    ///
    /// The scope chain continues at `scope_parent` (the closure's captured
    /// chain); the handler stack and exception cell stay shared with
    /// `self`, the context current at the call site.
    pub fn function_call(
        &self,
        scope_parent: Option<&ExecutionContext>,
        this: Value,
        args: Vec<Value>,
        local_count: usize,
    ) -> Self {
        Self {
            node: Rc::new(ContextNode {
                parent: scope_parent.cloned(),
                scope: Scope::Call(CallScope {
                    this,
                    args: RefCell::new(args),
                    locals: RefCell::new(vec![Value::Undefined; local_count]),
                    vars: RefCell::new(FxHashMap::default()),
                }),
                state: Rc::clone(&self.node.state),
            }),
        }
    }

    /// Push a `with` scope; the returned context becomes current
    pub fn push_with(&self, subject: Value) -> Self {
        Self {
            node: Rc::new(ContextNode {
                parent: Some(self.clone()),
                scope: Scope::With { subject },
                state: Rc::clone(&self.node.state),
            }),
        }
    }

    /// Push a catch scope binding `name` to the current exception
    pub fn push_catch(&self, name: Rc<str>) -> Self {
        let caught = self.exception();
        Self {
            node: Rc::new(ContextNode {
                parent: Some(self.clone()),
                scope: Scope::Catch {
                    name,
                    value: RefCell::new(caught),
                },
                state: Rc::clone(&self.node.state),
            }),
        }
    }

    /// Pop the innermost scope, restoring the parent context
    ///
    /// Panics on a root context; the compiler keeps push/pop balanced.
    pub fn pop(&self) -> Self {
        self.node
            .parent
            .clone()
            .expect("scope pop on a root context")
    }

    /// Parent context, when one exists
    pub fn parent(&self) -> Option<&ExecutionContext> {
        self.node.parent.as_ref()
    }

    pub(crate) fn scope_ref(&self) -> &Scope {
        &self.node.scope
    }

    fn depth(&self) -> usize {
        let mut n = 1;
        let mut cur = self;
        while let Some(parent) = cur.parent() {
            n += 1;
            cur = parent;
        }
        n
    }

    /// Nearest enclosing function activation
    fn call_scope(&self) -> &CallScope {
        let mut cur = self;
        loop {
            if let Scope::Call(cs) = &cur.node.scope {
                return cs;
            }
            cur = cur
                .node
                .parent
                .as_ref()
                .expect("scope chain without a call scope");
        }
    }

    // ===== Activation storage =====

    /// The receiver of the nearest function activation
    pub fn this_value(&self) -> Value {
        self.call_scope().this.clone()
    }

    /// Declared argument count
    pub fn arg_count(&self) -> usize {
        self.call_scope().args.borrow().len()
    }

    /// Read argument `index`
    pub fn arg(&self, index: u32) -> Value {
        let args = self.call_scope().args.borrow();
        debug_assert!(
            (index as usize) < args.len(),
            "arg a{} outside arity {}",
            index,
            args.len()
        );
        args[index as usize].clone()
    }

    /// Write argument `index`
    pub fn set_arg(&self, index: u32, value: Value) {
        let mut args = self.call_scope().args.borrow_mut();
        debug_assert!(
            (index as usize) < args.len(),
            "arg a{} outside arity {}",
            index,
            args.len()
        );
        args[index as usize] = value;
    }

    /// Declared local-variable count
    pub fn local_count(&self) -> usize {
        self.call_scope().locals.borrow().len()
    }

    /// Read local `index`
    pub fn local(&self, index: u32) -> Value {
        let locals = self.call_scope().locals.borrow();
        debug_assert!(
            (index as usize) < locals.len(),
            "local l{} outside {} locals",
            index,
            locals.len()
        );
        locals[index as usize].clone()
    }

    /// Write local `index`
    pub fn set_local(&self, index: u32, value: Value) {
        let mut locals = self.call_scope().locals.borrow_mut();
        debug_assert!(
            (index as usize) < locals.len(),
            "local l{} outside {} locals",
            index,
            locals.len()
        );
        locals[index as usize] = value;
    }

    /// Bind a name in the nearest function activation
    ///
    /// This is also the embedder's hook for seeding globals on a root
    /// context before execution.
    pub fn declare(&self, name: Rc<str>, value: Value, deletable: bool) {
        self.call_scope()
            .vars
            .borrow_mut()
            .insert(name, Binding { value, deletable });
    }

    // ===== Handler stack =====

    /// Install a handler
    pub fn push_handler(&self, handler: Handler) {
        self.node.state.unwind.borrow_mut().push(handler);
    }

    /// Uninstall the innermost handler
    pub fn pop_handler(&self) -> Option<Handler> {
        self.node.state.unwind.borrow_mut().pop()
    }

    /// Innermost handler, left installed
    pub fn top_handler(&self) -> Option<Handler> {
        self.node.state.unwind.borrow().last().cloned()
    }

    /// Number of installed handlers
    pub fn handler_depth(&self) -> usize {
        self.node.state.unwind.borrow().len()
    }

    // ===== Current exception =====

    /// Record a thrown value as the current exception
    pub fn set_exception(&self, value: Value) {
        *self.node.state.exception.borrow_mut() = value;
    }

    /// Read back the current exception
    pub fn exception(&self) -> Value {
        self.node.state.exception.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_bytecode::Param;

    #[test]
    fn test_args_and_locals() {
        let ctx = ExecutionContext::new(
            Value::Undefined,
            vec![Value::Number(1.0), Value::Number(2.0)],
            3,
        );
        assert_eq!(ctx.arg_count(), 2);
        assert_eq!(ctx.local_count(), 3);
        assert_eq!(ctx.arg(1), Value::Number(2.0));
        assert!(ctx.local(0).is_undefined());

        ctx.set_local(2, Value::str("x"));
        assert_eq!(ctx.local(2), Value::str("x"));
        ctx.set_arg(0, Value::Bool(true));
        assert_eq!(ctx.arg(0), Value::Bool(true));
    }

    #[test]
    fn test_scope_push_pop_restores_parent() {
        let root = ExecutionContext::new(Value::Undefined, vec![], 0);
        let with = root.push_with(Value::Null);
        assert!(with.parent().is_some());
        let back = with.pop();
        assert!(back.parent().is_none());
    }

    #[test]
    fn test_inner_scopes_resolve_activation_through_chain() {
        let root = ExecutionContext::new(Value::Number(7.0), vec![Value::Bool(true)], 1);
        let inner = root.push_with(Value::Null).push_catch(Rc::from("e"));
        assert_eq!(inner.this_value(), Value::Number(7.0));
        assert_eq!(inner.arg(0), Value::Bool(true));
        inner.set_local(0, Value::Number(3.0));
        assert_eq!(root.local(0), Value::Number(3.0));
    }

    #[test]
    fn test_handler_stack_is_shared_across_scopes() {
        let root = ExecutionContext::new(Value::Undefined, vec![], 0);
        let inner = root.push_with(Value::Null);
        inner.push_handler(Handler {
            target: Param::Temp(0),
            resume: 10,
            scope: inner.clone(),
        });
        assert_eq!(root.handler_depth(), 1);
        let top = root.top_handler().unwrap();
        assert_eq!(top.resume, 10);
        assert_eq!(root.handler_depth(), 1);
        root.pop_handler().unwrap();
        assert_eq!(inner.handler_depth(), 0);
    }

    #[test]
    fn test_catch_scope_binds_current_exception() {
        let root = ExecutionContext::new(Value::Undefined, vec![], 0);
        root.set_exception(Value::Number(99.0));
        let caught = root.push_catch(Rc::from("e"));
        match caught.scope_ref() {
            Scope::Catch { name, value } => {
                assert_eq!(name.as_ref(), "e");
                assert_eq!(value.borrow().clone(), Value::Number(99.0));
            }
            _ => panic!("expected catch scope"),
        }
    }

    #[test]
    fn test_nested_call_shares_state_but_not_scope() {
        let root = ExecutionContext::new(Value::Undefined, vec![], 0);
        let callee = root.function_call(None, Value::Undefined, vec![], 2);
        root.set_exception(Value::Number(5.0));
        assert_eq!(callee.exception(), Value::Number(5.0));
        assert!(callee.parent().is_none());
        assert_eq!(callee.local_count(), 2);
    }
}
