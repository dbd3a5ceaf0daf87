//! Reference runtime
//!
//! [`StdRuntime`] implements the [`Primitives`] table over the engine's
//! dynamic object model, enough to exercise every instruction end to end:
//! scope-chain name resolution, property and element access with accessor
//! support, closure calls that re-enter the dispatch loop, constructor
//! semantics, for-in iteration, and the typeof/delete/postfix/declare
//! family. Embedders with their own object model supply their own table;
//! this one is what the test suites and small hosts run on.
//!
//! A failed operation records a string exception (`"TypeError: ..."`,
//! `"ReferenceError: ..."`) on the context and signals [`Thrown`]; the
//! dispatch loop routes it to the innermost installed handler.

mod ops;

use std::rc::Rc;

use vireo_bytecode::{BinaryOp, UnaryOp};

use crate::vm::context::{Binding, ExecutionContext, Scope};
use crate::vm::dispatch::{execute, DispatchMode};
use crate::vm::function::CompiledFunction;
use crate::vm::object::{NativeFn, Object, ObjectKind, PropertySlot};
use crate::vm::primitives::{PrimResult, PrimUnit, Primitives};
use crate::vm::unwind::Thrown;
use crate::vm::value::Value;
use crate::vm::VmError;

/// Where a scope-chain name resolved
enum NameSlot {
    /// The context whose catch scope binds the name
    Catch(ExecutionContext),
    /// The `with` subject owning the property
    With(Value),
    /// The context whose activation holds the binding
    Binding(ExecutionContext),
}

/// Resolved callable, extracted before the object borrow is released
enum Callee {
    Compiled(Rc<CompiledFunction>, ExecutionContext),
    Native(NativeFn),
}

/// Reference implementation of the primitive-operation table
///
/// Interpreted closures re-enter the dispatch loop with the mode the
/// runtime was built with, so a whole call tree runs on one strategy.
pub struct StdRuntime {
    mode: DispatchMode,
}

impl StdRuntime {
    /// Build a runtime whose nested invocations use `mode`
    pub fn new(mode: DispatchMode) -> Self {
        Self { mode }
    }

    // ===== Exception helpers =====

    fn raise(&mut self, ctx: &ExecutionContext, message: String) -> Thrown {
        ctx.set_exception(Value::str(message));
        Thrown
    }

    fn type_error(&mut self, ctx: &ExecutionContext, message: &str) -> Thrown {
        self.raise(ctx, format!("TypeError: {message}"))
    }

    fn reference_error(&mut self, ctx: &ExecutionContext, name: &str) -> Thrown {
        self.raise(ctx, format!("ReferenceError: {name} is not defined"))
    }

    // ===== Scope-chain walking =====

    fn find_name(&self, ctx: &ExecutionContext, name: &Rc<str>) -> Option<NameSlot> {
        let mut cur = Some(ctx.clone());
        while let Some(c) = cur {
            match c.scope_ref() {
                Scope::Catch { name: bound, .. } if bound.as_ref() == name.as_ref() => {
                    return Some(NameSlot::Catch(c.clone()));
                }
                Scope::With { subject } => {
                    if let Value::Object(obj) = subject {
                        if obj.borrow().has(name) {
                            return Some(NameSlot::With(subject.clone()));
                        }
                    }
                }
                Scope::Call(cs) => {
                    if cs.vars.borrow().contains_key(name) {
                        return Some(NameSlot::Binding(c.clone()));
                    }
                }
                _ => {}
            }
            cur = c.parent().cloned();
        }
        None
    }

    fn outermost(ctx: &ExecutionContext) -> ExecutionContext {
        let mut cur = ctx.clone();
        loop {
            let next = match cur.parent() {
                Some(parent) => parent.clone(),
                None => break,
            };
            cur = next;
        }
        cur
    }

    // ===== Invocation =====

    /// Invoke `callee` with an explicit receiver
    fn call_function(
        &mut self,
        ctx: &ExecutionContext,
        callee: &Value,
        this: Value,
        args: &[Value],
    ) -> PrimResult {
        let Some(obj) = callee.as_object() else {
            return Err(self.type_error(ctx, "value is not a function"));
        };
        let target = {
            let o = obj.borrow();
            match &o.kind {
                ObjectKind::Function { func, scope } => {
                    Callee::Compiled(Rc::clone(func), scope.clone())
                }
                ObjectKind::Native(f) => Callee::Native(Rc::clone(f)),
                _ => return Err(self.type_error(ctx, "value is not a function")),
            }
        };
        match target {
            Callee::Compiled(func, scope) => {
                let mut argv = args.to_vec();
                // Missing declared parameters read as undefined
                if argv.len() < func.arg_count as usize {
                    argv.resize(func.arg_count as usize, Value::Undefined);
                }
                let callee_ctx =
                    ctx.function_call(Some(&scope), this, argv, func.local_count as usize);
                let mode = self.mode;
                match execute(&func, callee_ctx, self, mode) {
                    Ok(value) => Ok(value),
                    Err(VmError::Unhandled(value)) => {
                        // Re-signal in the caller's loop, which owns the
                        // next handler out.
                        ctx.set_exception(value);
                        Err(Thrown)
                    }
                    // Encoder defects in a nested stream abort the VM
                    // instance; they are never catchable by script code.
                    Err(fatal) => panic!("nested invocation failed: {fatal}"),
                }
            }
            Callee::Native(f) => f(ctx, this, args),
        }
    }

    /// Constructor semantics: allocate, invoke with the fresh receiver,
    /// keep an explicit object return over the allocation.
    fn construct(&mut self, ctx: &ExecutionContext, callee: &Value, args: &[Value]) -> PrimResult {
        let callable = callee
            .as_object()
            .map_or(false, |o| o.borrow().is_callable());
        if !callable {
            return Err(self.type_error(ctx, "value is not a constructor"));
        }
        let created = Object::plain();
        created
            .borrow_mut()
            .set_data(Rc::from("constructor"), callee.clone());
        let this = Value::Object(Rc::clone(&created));
        let returned = self.call_function(ctx, callee, this.clone(), args)?;
        Ok(match returned {
            Value::Object(_) => returned,
            _ => this,
        })
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new(DispatchMode::Switch)
    }
}

impl Primitives for StdRuntime {
    // ===== Scope-chain name access =====

    fn get_activation_property(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> PrimResult {
        match self.find_name(ctx, name) {
            Some(NameSlot::Catch(scope)) => {
                if let Scope::Catch { value, .. } = scope.scope_ref() {
                    Ok(value.borrow().clone())
                } else {
                    Ok(Value::Undefined)
                }
            }
            Some(NameSlot::With(subject)) => self.get_property(ctx, &subject, name),
            Some(NameSlot::Binding(scope)) => {
                if let Scope::Call(cs) = scope.scope_ref() {
                    Ok(cs
                        .vars
                        .borrow()
                        .get(name)
                        .map(|b| b.value.clone())
                        .unwrap_or_default())
                } else {
                    Ok(Value::Undefined)
                }
            }
            None => Err(self.reference_error(ctx, name)),
        }
    }

    fn set_activation_property(
        &mut self,
        ctx: &ExecutionContext,
        name: &Rc<str>,
        value: Value,
    ) -> PrimUnit {
        match self.find_name(ctx, name) {
            Some(NameSlot::Catch(scope)) => {
                if let Scope::Catch { value: cell, .. } = scope.scope_ref() {
                    *cell.borrow_mut() = value;
                }
                Ok(())
            }
            Some(NameSlot::With(subject)) => self.set_property(ctx, &subject, name, value),
            Some(NameSlot::Binding(scope)) => {
                if let Scope::Call(cs) = scope.scope_ref() {
                    if let Some(binding) = cs.vars.borrow_mut().get_mut(name) {
                        binding.value = value;
                    }
                }
                Ok(())
            }
            None => {
                // Implicit global: bind on the outermost activation
                Self::outermost(ctx).declare(Rc::clone(name), value, true);
                Ok(())
            }
        }
    }

    // ===== Property and element access =====

    fn get_property(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
    ) -> PrimResult {
        match base {
            Value::Object(obj) => {
                let slot = obj.borrow().get(name).cloned();
                match slot {
                    Some(PropertySlot::Data(value)) => Ok(value),
                    Some(PropertySlot::Accessor {
                        getter: Some(getter),
                        ..
                    }) => self.call_function(ctx, &getter, base.clone(), &[]),
                    Some(PropertySlot::Accessor { getter: None, .. }) | None => {
                        Ok(Value::Undefined)
                    }
                }
            }
            Value::Str(s) if name.as_ref() == "length" => {
                Ok(Value::Number(s.chars().count() as f64))
            }
            Value::Undefined | Value::Null => Err(self.type_error(
                ctx,
                &format!("cannot read property '{name}' of {}", ops::type_of(base)),
            )),
            _ => Ok(Value::Undefined),
        }
    }

    fn set_property(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
        value: Value,
    ) -> PrimUnit {
        match base {
            Value::Object(obj) => {
                let accessor = match obj.borrow().get(name) {
                    Some(PropertySlot::Accessor { setter, .. }) => Some(setter.clone()),
                    _ => None,
                };
                match accessor {
                    Some(Some(setter)) => {
                        self.call_function(ctx, &setter, base.clone(), &[value])?;
                        Ok(())
                    }
                    // Accessor without a setter drops the write
                    Some(None) => Ok(()),
                    None => {
                        obj.borrow_mut().set_data(Rc::clone(name), value);
                        Ok(())
                    }
                }
            }
            Value::Undefined | Value::Null => Err(self.type_error(
                ctx,
                &format!("cannot set property '{name}' of {}", ops::type_of(base)),
            )),
            // Writes to primitive bases are dropped
            _ => Ok(()),
        }
    }

    fn get_element(&mut self, ctx: &ExecutionContext, base: &Value, index: &Value) -> PrimResult {
        let key = ops::to_property_key(index);
        self.get_property(ctx, base, &key)
    }

    fn set_element(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
        value: Value,
    ) -> PrimUnit {
        let key = ops::to_property_key(index);
        self.set_property(ctx, base, &key, value)
    }

    // ===== Closures and the receiver =====

    fn init_closure(&mut self, ctx: &ExecutionContext, func: &Rc<CompiledFunction>) -> PrimResult {
        Ok(Value::Object(Object::closure(Rc::clone(func), ctx.clone())))
    }

    fn this_object(&mut self, ctx: &ExecutionContext) -> PrimResult {
        Ok(ctx.this_value())
    }

    // ===== Calls =====

    fn call_value(&mut self, ctx: &ExecutionContext, func: &Value, args: &[Value]) -> PrimResult {
        self.call_function(ctx, func, Value::Undefined, args)
    }

    fn call_property(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
        args: &[Value],
    ) -> PrimResult {
        let callee = self.get_property(ctx, base, name)?;
        self.call_function(ctx, &callee, base.clone(), args)
    }

    fn call_element(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
        args: &[Value],
    ) -> PrimResult {
        let callee = self.get_element(ctx, base, index)?;
        self.call_function(ctx, &callee, base.clone(), args)
    }

    fn call_activation_property(
        &mut self,
        ctx: &ExecutionContext,
        name: &Rc<str>,
        args: &[Value],
    ) -> PrimResult {
        // A name found in a `with` scope is invoked with the subject as
        // its receiver.
        let (callee, this) = match self.find_name(ctx, name) {
            Some(NameSlot::With(subject)) => {
                let callee = self.get_property(ctx, &subject, name)?;
                (callee, subject)
            }
            Some(_) => (self.get_activation_property(ctx, name)?, Value::Undefined),
            None => return Err(self.reference_error(ctx, name)),
        };
        self.call_function(ctx, &callee, this, args)
    }

    // ===== Construction =====

    fn construct_value(
        &mut self,
        ctx: &ExecutionContext,
        func: &Value,
        args: &[Value],
    ) -> PrimResult {
        self.construct(ctx, func, args)
    }

    fn construct_property(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
        args: &[Value],
    ) -> PrimResult {
        let callee = self.get_property(ctx, base, name)?;
        self.construct(ctx, &callee, args)
    }

    fn construct_activation_property(
        &mut self,
        ctx: &ExecutionContext,
        name: &Rc<str>,
        args: &[Value],
    ) -> PrimResult {
        let callee = self.get_activation_property(ctx, name)?;
        self.construct(ctx, &callee, args)
    }

    // ===== Exceptions =====

    fn throw(&mut self, ctx: &ExecutionContext, value: Value) -> Thrown {
        ctx.set_exception(value);
        Thrown
    }

    fn get_exception(&mut self, ctx: &ExecutionContext) -> Value {
        ctx.exception()
    }

    // ===== Scopes =====

    fn push_with_scope(
        &mut self,
        ctx: &ExecutionContext,
        subject: Value,
    ) -> Result<ExecutionContext, Thrown> {
        match subject {
            Value::Undefined | Value::Null => {
                Err(self.type_error(ctx, "cannot use null or undefined as a scope subject"))
            }
            _ => Ok(ctx.push_with(subject)),
        }
    }

    fn push_catch_scope(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> ExecutionContext {
        ctx.push_catch(Rc::clone(name))
    }

    fn pop_scope(&mut self, ctx: &ExecutionContext) -> ExecutionContext {
        ctx.pop()
    }

    // ===== Property enumeration =====

    fn foreach_iterator_object(&mut self, _ctx: &ExecutionContext, value: &Value) -> PrimResult {
        let names = match value {
            Value::Object(obj) => obj.borrow().keys(),
            _ => Vec::new(),
        };
        Ok(Value::Object(Object::name_iterator(names)))
    }

    fn foreach_next_property_name(&mut self, ctx: &ExecutionContext, iter: &Value) -> PrimResult {
        let Some(obj) = iter.as_object() else {
            return Err(self.type_error(ctx, "value is not a property iterator"));
        };
        let mut o = obj.borrow_mut();
        match &mut o.kind {
            ObjectKind::NameIterator { names, pos } => {
                if *pos < names.len() {
                    let name = Rc::clone(&names[*pos]);
                    *pos += 1;
                    Ok(Value::Str(name))
                } else {
                    Ok(Value::Undefined)
                }
            }
            _ => {
                drop(o);
                Err(self.type_error(ctx, "value is not a property iterator"))
            }
        }
    }

    // ===== Deletion =====

    fn delete_member(
        &mut self,
        _ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
    ) -> PrimResult {
        if let Value::Object(obj) = base {
            obj.borrow_mut().delete(name);
        }
        Ok(Value::Bool(true))
    }

    fn delete_subscript(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
    ) -> PrimResult {
        let key = ops::to_property_key(index);
        self.delete_member(ctx, base, &key)
    }

    fn delete_name(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> PrimResult {
        match self.find_name(ctx, name) {
            // Catch bindings are never deletable
            Some(NameSlot::Catch(_)) => Ok(Value::Bool(false)),
            Some(NameSlot::With(subject)) => self.delete_member(ctx, &subject, name),
            Some(NameSlot::Binding(scope)) => {
                let mut deleted = false;
                if let Scope::Call(cs) = scope.scope_ref() {
                    let mut vars = cs.vars.borrow_mut();
                    if vars.get(name).map_or(false, |b| b.deletable) {
                        vars.remove(name);
                        deleted = true;
                    }
                }
                Ok(Value::Bool(deleted))
            }
            None => Ok(Value::Bool(true)),
        }
    }

    // ===== typeof =====

    fn typeof_value(&mut self, _ctx: &ExecutionContext, value: &Value) -> PrimResult {
        Ok(Value::str(ops::type_of(value)))
    }

    fn typeof_member(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
    ) -> PrimResult {
        let value = self.get_property(ctx, base, name)?;
        self.typeof_value(ctx, &value)
    }

    fn typeof_subscript(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
    ) -> PrimResult {
        let value = self.get_element(ctx, base, index)?;
        self.typeof_value(ctx, &value)
    }

    fn typeof_name(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> PrimResult {
        // typeof never throws on an unresolvable name
        match self.find_name(ctx, name) {
            Some(_) => {
                let value = self.get_activation_property(ctx, name)?;
                self.typeof_value(ctx, &value)
            }
            None => Ok(Value::str("undefined")),
        }
    }

    // ===== Postfix increment / decrement =====

    fn post_increment(
        &mut self,
        _ctx: &ExecutionContext,
        value: &Value,
    ) -> Result<(Value, Value), Thrown> {
        let old = ops::to_number(value);
        Ok((Value::Number(old), Value::Number(old + 1.0)))
    }

    fn post_decrement(
        &mut self,
        _ctx: &ExecutionContext,
        value: &Value,
    ) -> Result<(Value, Value), Thrown> {
        let old = ops::to_number(value);
        Ok((Value::Number(old), Value::Number(old - 1.0)))
    }

    fn post_increment_member(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
    ) -> PrimResult {
        let old = ops::to_number(&self.get_property(ctx, base, name)?);
        self.set_property(ctx, base, name, Value::Number(old + 1.0))?;
        Ok(Value::Number(old))
    }

    fn post_increment_subscript(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
    ) -> PrimResult {
        let key = ops::to_property_key(index);
        self.post_increment_member(ctx, base, &key)
    }

    fn post_increment_name(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> PrimResult {
        let old = ops::to_number(&self.get_activation_property(ctx, name)?);
        self.set_activation_property(ctx, name, Value::Number(old + 1.0))?;
        Ok(Value::Number(old))
    }

    fn post_decrement_member(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        name: &Rc<str>,
    ) -> PrimResult {
        let old = ops::to_number(&self.get_property(ctx, base, name)?);
        self.set_property(ctx, base, name, Value::Number(old - 1.0))?;
        Ok(Value::Number(old))
    }

    fn post_decrement_subscript(
        &mut self,
        ctx: &ExecutionContext,
        base: &Value,
        index: &Value,
    ) -> PrimResult {
        let key = ops::to_property_key(index);
        self.post_decrement_member(ctx, base, &key)
    }

    fn post_decrement_name(&mut self, ctx: &ExecutionContext, name: &Rc<str>) -> PrimResult {
        let old = ops::to_number(&self.get_activation_property(ctx, name)?);
        self.set_activation_property(ctx, name, Value::Number(old - 1.0))?;
        Ok(Value::Number(old))
    }

    // ===== Declarations and property definition =====

    fn declare_var(
        &mut self,
        ctx: &ExecutionContext,
        deletable: bool,
        name: &Rc<str>,
    ) -> PrimUnit {
        // Declared in the nearest activation; an existing binding keeps
        // its value.
        let mut cur = ctx.clone();
        loop {
            if let Scope::Call(cs) = cur.scope_ref() {
                let mut vars = cs.vars.borrow_mut();
                if !vars.contains_key(name) {
                    vars.insert(
                        Rc::clone(name),
                        Binding {
                            value: Value::Undefined,
                            deletable,
                        },
                    );
                }
                return Ok(());
            }
            let next = match cur.parent() {
                Some(parent) => parent.clone(),
                None => return Ok(()),
            };
            cur = next;
        }
    }

    fn define_getter_setter(
        &mut self,
        ctx: &ExecutionContext,
        object: &Value,
        name: &Rc<str>,
        getter: Value,
        setter: Value,
    ) -> PrimUnit {
        let Some(obj) = object.as_object() else {
            return Err(self.type_error(ctx, "cannot define an accessor on a primitive"));
        };
        let getter = (!getter.is_undefined()).then_some(getter);
        let setter = (!setter.is_undefined()).then_some(setter);
        obj.borrow_mut().set_accessor(Rc::clone(name), getter, setter);
        Ok(())
    }

    fn define_property(
        &mut self,
        ctx: &ExecutionContext,
        object: &Value,
        name: &Rc<str>,
        value: Value,
    ) -> PrimUnit {
        let Some(obj) = object.as_object() else {
            return Err(self.type_error(ctx, "cannot define a property on a primitive"));
        };
        obj.borrow_mut().set_data(Rc::clone(name), value);
        Ok(())
    }

    fn define_array_property(
        &mut self,
        ctx: &ExecutionContext,
        object: &Value,
        index: u32,
        value: Value,
    ) -> PrimUnit {
        let Some(obj) = object.as_object() else {
            return Err(self.type_error(ctx, "cannot define an element on a primitive"));
        };
        obj.borrow_mut().set_data(Rc::from(index.to_string()), value);
        Ok(())
    }

    // ===== Selected arithmetic =====

    fn unop(&mut self, _ctx: &ExecutionContext, op: UnaryOp, value: &Value) -> PrimResult {
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.to_boolean()),
            UnaryOp::Neg => Value::Number(-ops::to_number(value)),
            UnaryOp::Plus => Value::Number(ops::to_number(value)),
            UnaryOp::Compl => Value::Number(f64::from(!ops::to_int32(ops::to_number(value)))),
            UnaryOp::PreInc => Value::Number(ops::to_number(value) + 1.0),
            UnaryOp::PreDec => Value::Number(ops::to_number(value) - 1.0),
        })
    }

    fn binop(
        &mut self,
        ctx: &ExecutionContext,
        op: BinaryOp,
        lhs: &Value,
        rhs: &Value,
    ) -> PrimResult {
        use std::cmp::Ordering;

        let value = match op {
            BinaryOp::Add => ops::add(lhs, rhs),
            BinaryOp::Sub => Value::Number(ops::to_number(lhs) - ops::to_number(rhs)),
            BinaryOp::Mul => Value::Number(ops::to_number(lhs) * ops::to_number(rhs)),
            BinaryOp::Div => Value::Number(ops::to_number(lhs) / ops::to_number(rhs)),
            BinaryOp::Mod => Value::Number(ops::to_number(lhs) % ops::to_number(rhs)),
            BinaryOp::Shl => Value::Number(f64::from(
                ops::to_int32(ops::to_number(lhs)) << (ops::to_uint32(ops::to_number(rhs)) & 31),
            )),
            BinaryOp::Shr => Value::Number(f64::from(
                ops::to_int32(ops::to_number(lhs)) >> (ops::to_uint32(ops::to_number(rhs)) & 31),
            )),
            BinaryOp::UShr => Value::Number(f64::from(
                ops::to_uint32(ops::to_number(lhs)) >> (ops::to_uint32(ops::to_number(rhs)) & 31),
            )),
            BinaryOp::BitAnd => Value::Number(f64::from(
                ops::to_int32(ops::to_number(lhs)) & ops::to_int32(ops::to_number(rhs)),
            )),
            BinaryOp::BitOr => Value::Number(f64::from(
                ops::to_int32(ops::to_number(lhs)) | ops::to_int32(ops::to_number(rhs)),
            )),
            BinaryOp::BitXor => Value::Number(f64::from(
                ops::to_int32(ops::to_number(lhs)) ^ ops::to_int32(ops::to_number(rhs)),
            )),
            BinaryOp::Eq => Value::Bool(ops::loose_eq(lhs, rhs)),
            BinaryOp::Ne => Value::Bool(!ops::loose_eq(lhs, rhs)),
            BinaryOp::StrictEq => Value::Bool(ops::strict_eq(lhs, rhs)),
            BinaryOp::StrictNe => Value::Bool(!ops::strict_eq(lhs, rhs)),
            BinaryOp::Lt => Value::Bool(matches!(ops::relational(lhs, rhs), Some(Ordering::Less))),
            BinaryOp::Le => Value::Bool(matches!(
                ops::relational(lhs, rhs),
                Some(Ordering::Less | Ordering::Equal)
            )),
            BinaryOp::Gt => Value::Bool(matches!(
                ops::relational(lhs, rhs),
                Some(Ordering::Greater)
            )),
            BinaryOp::Ge => Value::Bool(matches!(
                ops::relational(lhs, rhs),
                Some(Ordering::Greater | Ordering::Equal)
            )),
            BinaryOp::InstanceOf => {
                let callable = rhs
                    .as_object()
                    .map_or(false, |o| o.borrow().is_callable());
                if !callable {
                    return Err(
                        self.type_error(ctx, "right-hand side of 'instanceof' is not callable")
                    );
                }
                let ctor = lhs.as_object().and_then(|obj| {
                    match obj.borrow().get("constructor") {
                        Some(PropertySlot::Data(v)) => Some(v.clone()),
                        _ => None,
                    }
                });
                match (ctor, rhs) {
                    (Some(Value::Object(a)), Value::Object(b)) => {
                        Value::Bool(Rc::ptr_eq(&a, b))
                    }
                    _ => Value::Bool(false),
                }
            }
            BinaryOp::In => {
                let Some(obj) = rhs.as_object() else {
                    return Err(self.type_error(ctx, "'in' requires an object operand"));
                };
                Value::Bool(obj.borrow().has(&ops::to_property_key(lhs)))
            }
        };
        Ok(value)
    }

    fn inplace_element(
        &mut self,
        ctx: &ExecutionContext,
        op: BinaryOp,
        base: &Value,
        index: &Value,
        source: &Value,
    ) -> PrimUnit {
        let current = self.get_element(ctx, base, index)?;
        let value = self.binop(ctx, op, &current, source)?;
        self.set_element(ctx, base, index, value)
    }

    fn inplace_member(
        &mut self,
        ctx: &ExecutionContext,
        op: BinaryOp,
        base: &Value,
        name: &Rc<str>,
        source: &Value,
    ) -> PrimUnit {
        let current = self.get_property(ctx, base, name)?;
        let value = self.binop(ctx, op, &current, source)?;
        self.set_property(ctx, base, name, value)
    }

    fn inplace_name(
        &mut self,
        ctx: &ExecutionContext,
        op: BinaryOp,
        name: &Rc<str>,
        source: &Value,
    ) -> PrimUnit {
        let current = self.get_activation_property(ctx, name)?;
        let value = self.binop(ctx, op, &current, source)?;
        self.set_activation_property(ctx, name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> StdRuntime {
        StdRuntime::default()
    }

    fn root() -> ExecutionContext {
        ExecutionContext::new(Value::Undefined, vec![], 0)
    }

    #[test]
    fn test_name_resolution_through_scopes() {
        let mut rt = runtime();
        let ctx = root();
        ctx.declare(Rc::from("x"), Value::Number(1.0), false);

        let shadow = Object::plain();
        shadow
            .borrow_mut()
            .set_data(Rc::from("x"), Value::Number(2.0));
        let with = ctx.push_with(Value::Object(shadow));

        // The with subject shadows the outer binding
        assert_eq!(
            rt.get_activation_property(&with, &Rc::from("x")).unwrap(),
            Value::Number(2.0)
        );
        assert_eq!(
            rt.get_activation_property(&ctx, &Rc::from("x")).unwrap(),
            Value::Number(1.0)
        );
    }

    #[test]
    fn test_unresolved_name_throws_reference_error() {
        let mut rt = runtime();
        let ctx = root();
        assert_eq!(
            rt.get_activation_property(&ctx, &Rc::from("missing")),
            Err(Thrown)
        );
        assert_eq!(
            ctx.exception(),
            Value::str("ReferenceError: missing is not defined")
        );
    }

    #[test]
    fn test_implicit_global_lands_on_outermost_activation() {
        let mut rt = runtime();
        let ctx = root();
        let inner = ctx.push_with(Value::Object(Object::plain()));
        rt.set_activation_property(&inner, &Rc::from("g"), Value::Number(9.0))
            .unwrap();
        assert_eq!(
            rt.get_activation_property(&ctx, &Rc::from("g")).unwrap(),
            Value::Number(9.0)
        );
    }

    #[test]
    fn test_catch_binding_reads_and_writes() {
        let mut rt = runtime();
        let ctx = root();
        ctx.set_exception(Value::Number(13.0));
        let caught = rt.push_catch_scope(&ctx, &Rc::from("e"));
        assert_eq!(
            rt.get_activation_property(&caught, &Rc::from("e")).unwrap(),
            Value::Number(13.0)
        );
        rt.set_activation_property(&caught, &Rc::from("e"), Value::Null)
            .unwrap();
        assert_eq!(
            rt.get_activation_property(&caught, &Rc::from("e")).unwrap(),
            Value::Null
        );
        // Catch bindings resist deletion
        assert_eq!(
            rt.delete_name(&caught, &Rc::from("e")).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_declare_var_keeps_existing_value() {
        let mut rt = runtime();
        let ctx = root();
        rt.declare_var(&ctx, true, &Rc::from("v")).unwrap();
        rt.set_activation_property(&ctx, &Rc::from("v"), Value::Number(4.0))
            .unwrap();
        rt.declare_var(&ctx, true, &Rc::from("v")).unwrap();
        assert_eq!(
            rt.get_activation_property(&ctx, &Rc::from("v")).unwrap(),
            Value::Number(4.0)
        );
        assert_eq!(
            rt.delete_name(&ctx, &Rc::from("v")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            rt.typeof_name(&ctx, &Rc::from("v")).unwrap(),
            Value::str("undefined")
        );
    }

    #[test]
    fn test_accessor_property_roundtrip() {
        let mut rt = runtime();
        let ctx = root();
        let store = Object::plain();
        store
            .borrow_mut()
            .set_data(Rc::from("backing"), Value::Number(0.0));
        let target = Value::Object(Object::plain());

        let store_for_get = store.clone();
        let getter = Value::Object(Object::native(Rc::new(move |_, _, _| {
            match store_for_get.borrow().get("backing") {
                Some(PropertySlot::Data(v)) => Ok(v.clone()),
                _ => Ok(Value::Undefined),
            }
        })));
        let store_for_set = store.clone();
        let setter = Value::Object(Object::native(Rc::new(move |_, _, args: &[Value]| {
            store_for_set
                .borrow_mut()
                .set_data(Rc::from("backing"), args[0].clone());
            Ok(Value::Undefined)
        })));

        rt.define_getter_setter(&ctx, &target, &Rc::from("x"), getter, setter)
            .unwrap();
        rt.set_property(&ctx, &target, &Rc::from("x"), Value::Number(5.0))
            .unwrap();
        assert_eq!(
            rt.get_property(&ctx, &target, &Rc::from("x")).unwrap(),
            Value::Number(5.0)
        );
    }

    #[test]
    fn test_element_access_canonicalizes_keys() {
        let mut rt = runtime();
        let ctx = root();
        let arr = Value::Object(Object::plain());
        rt.define_array_property(&ctx, &arr, 0, Value::str("a"))
            .unwrap();
        assert_eq!(
            rt.get_element(&ctx, &arr, &Value::Number(0.0)).unwrap(),
            Value::str("a")
        );
        assert_eq!(
            rt.get_element(&ctx, &arr, &Value::str("0")).unwrap(),
            Value::str("a")
        );
    }

    #[test]
    fn test_binop_selectors() {
        let mut rt = runtime();
        let ctx = root();
        let n = Value::Number;
        assert_eq!(
            rt.binop(&ctx, BinaryOp::Mod, &n(7.0), &n(4.0)).unwrap(),
            n(3.0)
        );
        assert_eq!(
            rt.binop(&ctx, BinaryOp::Shl, &n(1.0), &n(33.0)).unwrap(),
            n(2.0)
        );
        assert_eq!(
            rt.binop(&ctx, BinaryOp::UShr, &n(-1.0), &n(0.0)).unwrap(),
            n(4_294_967_295.0)
        );
        assert_eq!(
            rt.binop(&ctx, BinaryOp::Lt, &Value::str("a"), &Value::str("b"))
                .unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            rt.binop(&ctx, BinaryOp::Ge, &Value::Undefined, &n(0.0))
                .unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_in_requires_object() {
        let mut rt = runtime();
        let ctx = root();
        let obj = Value::Object(Object::plain());
        rt.define_property(&ctx, &obj, &Rc::from("k"), Value::Null)
            .unwrap();
        assert_eq!(
            rt.binop(&ctx, BinaryOp::In, &Value::str("k"), &obj).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            rt.binop(&ctx, BinaryOp::In, &Value::str("k"), &Value::Number(1.0)),
            Err(Thrown)
        );
    }

    #[test]
    fn test_construct_tracks_constructor_for_instanceof() {
        let mut rt = runtime();
        let ctx = root();
        let ctor = Value::Object(Object::native(Rc::new(|_, _, _| Ok(Value::Undefined))));
        let other = Value::Object(Object::native(Rc::new(|_, _, _| Ok(Value::Undefined))));
        let made = rt.construct_value(&ctx, &ctor, &[]).unwrap();
        assert_eq!(
            rt.binop(&ctx, BinaryOp::InstanceOf, &made, &ctor).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            rt.binop(&ctx, BinaryOp::InstanceOf, &made, &other).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_foreach_iterates_insertion_order() {
        let mut rt = runtime();
        let ctx = root();
        let obj = Value::Object(Object::plain());
        for key in ["a", "b", "c"] {
            rt.define_property(&ctx, &obj, &Rc::from(key), Value::Null)
                .unwrap();
        }
        let iter = rt.foreach_iterator_object(&ctx, &obj).unwrap();
        let mut seen = Vec::new();
        loop {
            let name = rt.foreach_next_property_name(&ctx, &iter).unwrap();
            match name {
                Value::Str(s) => seen.push(s.to_string()),
                _ => break,
            }
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_post_increment_member() {
        let mut rt = runtime();
        let ctx = root();
        let obj = Value::Object(Object::plain());
        rt.define_property(&ctx, &obj, &Rc::from("n"), Value::Number(5.0))
            .unwrap();
        let old = rt
            .post_increment_member(&ctx, &obj, &Rc::from("n"))
            .unwrap();
        assert_eq!(old, Value::Number(5.0));
        assert_eq!(
            rt.get_property(&ctx, &obj, &Rc::from("n")).unwrap(),
            Value::Number(6.0)
        );
    }
}
