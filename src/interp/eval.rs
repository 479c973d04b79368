//! Tree-walking evaluator.

use std::rc::Rc;

use indexmap::IndexMap;

use super::ast::{
    target_names, Arg, ExceptHandler, Expr, ExprKind, FStringPart, FunctionDef, ParamKind, Stmt,
    StmtKind, UnaryOp,
};
use super::builtins;
use super::error::{type_error, ExcType, ExceptionValue, PyException, PyResult, SourceText};
use super::format::convert_and_format;
use super::ops;
use super::value::{
    normalize_index, slice_indices, Args, BoundMethod, Dict, Function, Namespace,
    Scope, TypeTag, Value,
};

pub const DEFAULT_RECURSION_LIMIT: usize = 100;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

enum FrameScope {
    Module,
    Function {
        locals: Scope,
        closure: Vec<Scope>,
        def: Rc<FunctionDef>,
    },
}

struct Frame {
    name: Rc<str>,
    line: usize,
    source: Rc<SourceText>,
    globals: Namespace,
    scope: FrameScope,
}

/// A subscript after evaluation.
enum Index {
    Item(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
}

pub struct Interpreter {
    base: Frame,
    frames: Vec<Frame>,
    handling: Vec<PyException>,
    recursion_limit: usize,
}

impl Interpreter {
    pub fn new(globals: Namespace) -> Self {
        Self {
            base: Frame {
                name: Rc::from("<module>"),
                line: 1,
                source: SourceText::new("<console>", ""),
                globals,
                scope: FrameScope::Module,
            },
            frames: Vec::new(),
            handling: Vec::new(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit.max(1);
        self
    }

    pub fn globals(&self) -> &Namespace {
        &self.frame().globals
    }

    fn frame(&self) -> &Frame {
        self.frames.last().unwrap_or(&self.base)
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().unwrap_or(&mut self.base)
    }

    fn set_line(&mut self, line: usize) {
        self.frame_mut().line = line;
    }

    /// Runs a parsed module body against the global namespace.
    pub fn run_module(&mut self, body: &[Stmt], source: &Rc<SourceText>) -> PyResult<()> {
        self.base.source = source.clone();
        match self.exec_block(body) {
            Ok(_) => Ok(()),
            Err(mut exc) => {
                exc.push_frame(self.base.name.clone(), self.base.line, source.clone());
                Err(exc)
            }
        }
    }

    /// Evaluates a top-level expression, as the interactive prompt does.
    pub fn eval_expression(&mut self, expr: &Expr, source: &Rc<SourceText>) -> PyResult<Value> {
        self.base.source = source.clone();
        self.base.line = expr.line;
        self.eval(expr).map_err(|mut exc| {
            exc.push_frame(self.base.name.clone(), self.base.line, source.clone());
            exc
        })
    }

    /// Names visible in the innermost scope, for `dir()`.
    pub fn scope_names(&self) -> Vec<String> {
        match &self.frame().scope {
            FrameScope::Module => self.frame().globals.names(),
            FrameScope::Function { locals, .. } => locals.borrow().keys().cloned().collect(),
        }
    }

    // Statements.

    fn exec_block(&mut self, body: &[Stmt]) -> PyResult<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> PyResult<Flow> {
        self.set_line(stmt.line);
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target)?;
                let rhs = self.eval(value)?;
                let updated = ops::inplace(*op, current, &rhs)?;
                self.assign(target, updated)?;
            }
            StmtKind::If { test, body, orelse } => {
                return if self.eval(test)?.truthy() {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                };
            }
            StmtKind::While { test, body, orelse } => loop {
                self.set_line(stmt.line);
                if !self.eval(test)?.truthy() {
                    return self.exec_block(orelse);
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let items = self.eval(iter)?.iter()?;
                for item in items {
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def)?;
                self.store_name(&def.name, function);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Raise(None) => {
                return Err(self.handling.last().cloned().unwrap_or_else(|| {
                    PyException::new(ExcType::RuntimeError, "No active exception to reraise")
                }));
            }
            StmtKind::Raise(Some(expr)) => {
                let value = self.eval(expr)?;
                return Err(raised(value));
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody),
            StmtKind::Global(_) => {}
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let args = match msg {
                        Some(expr) => vec![self.eval(expr)?],
                        None => Vec::new(),
                    };
                    return Err(PyException::from_value(Rc::new(ExceptionValue::new(
                        ExcType::AssertionError,
                        args,
                    ))));
                }
            }
            StmtKind::Import(names) => {
                for (module, alias) in names {
                    let value = builtins::import_module(module)?;
                    self.store_name(alias.as_deref().unwrap_or(module), value);
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let value = builtins::import_module(module)?;
                let Value::Module(m) = &value else {
                    return type_error(format!("'{}' is not a module", module));
                };
                for (name, alias) in names {
                    if name == "*" {
                        let attrs: Vec<(String, Value)> = m
                            .attrs
                            .borrow()
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        for (attr, item) in attrs {
                            self.store_name(&attr, item);
                        }
                        continue;
                    }
                    let item = m.attrs.borrow().get(name).cloned().ok_or_else(|| {
                        PyException::new(
                            ExcType::ImportError,
                            format!("cannot import name '{}' from '{}'", name, module),
                        )
                    })?;
                    self.store_name(alias.as_deref().unwrap_or(name), item);
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> PyResult<Flow> {
        let outcome = match self.exec_block(body) {
            Ok(Flow::Normal) => self.exec_block(orelse),
            Ok(flow) => Ok(flow),
            Err(exc) => self.handle(exc, handlers),
        };
        if finalbody.is_empty() {
            return outcome;
        }
        match self.exec_block(finalbody)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, exc: PyException, handlers: &[ExceptHandler]) -> PyResult<Flow> {
        for handler in handlers {
            if let Some(expr) = &handler.typ {
                let class = self.eval(expr)?;
                if !exception_matches(&exc, &class)? {
                    continue;
                }
            }
            self.set_line(handler.line);
            if let Some(name) = &handler.name {
                self.store_name(name, Value::Exception(exc.value.clone()));
            }
            self.handling.push(exc);
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                self.discard_name(name);
            }
            return result;
        }
        Err(exc)
    }

    // Names.

    fn load_name(&self, name: &str) -> PyResult<Value> {
        let frame = self.frame();
        if let FrameScope::Function {
            locals,
            closure,
            def,
        } = &frame.scope
        {
            if let Some(value) = locals.borrow().get(name) {
                return Ok(value.clone());
            }
            if def.locals.contains(name) {
                return Err(PyException::new(
                    ExcType::UnboundLocalError,
                    format!(
                        "cannot access local variable '{}' where it is not associated with a value",
                        name
                    ),
                ));
            }
            if !def.globals.contains(name) {
                for scope in closure.iter().rev() {
                    if let Some(value) = scope.borrow().get(name) {
                        return Ok(value.clone());
                    }
                }
            }
        }
        if let Some(value) = frame.globals.get(name) {
            return Ok(value);
        }
        builtins::lookup(name).ok_or_else(|| {
            PyException::new(
                ExcType::NameError,
                format!("name '{}' is not defined", name),
            )
        })
    }

    fn store_name(&mut self, name: &str, value: Value) {
        let frame = self.frame();
        match &frame.scope {
            FrameScope::Function { locals, def, .. } if !def.globals.contains(name) => {
                locals.borrow_mut().insert(name.to_string(), value);
            }
            _ => frame.globals.set(name, value),
        }
    }

    /// The binding of `name` in the innermost scope only.
    fn own_binding(&self, name: &str) -> Option<Value> {
        let frame = self.frame();
        match &frame.scope {
            FrameScope::Function { locals, def, .. } if !def.globals.contains(name) => {
                locals.borrow().get(name).cloned()
            }
            _ => frame.globals.get(name),
        }
    }

    fn discard_name(&mut self, name: &str) -> Option<Value> {
        let frame = self.frame();
        match &frame.scope {
            FrameScope::Function { locals, def, .. } if !def.globals.contains(name) => {
                locals.borrow_mut().shift_remove(name)
            }
            _ => frame.globals.remove(name),
        }
    }

    fn delete_name(&mut self, name: &str) -> PyResult<()> {
        if self.discard_name(name).is_some() {
            return Ok(());
        }
        let unbound_local = matches!(
            &self.frame().scope,
            FrameScope::Function { def, .. } if def.locals.contains(name)
        );
        if unbound_local {
            Err(PyException::new(
                ExcType::UnboundLocalError,
                format!(
                    "cannot access local variable '{}' where it is not associated with a value",
                    name
                ),
            ))
        } else {
            Err(PyException::new(
                ExcType::NameError,
                format!("name '{}' is not defined", name),
            ))
        }
    }

    // Targets.

    fn assign(&mut self, target: &Expr, value: Value) -> PyResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.store_name(name, value);
                Ok(())
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let values: Vec<Value> = match value.iter() {
                    Ok(items) => items.collect(),
                    Err(_) => {
                        return type_error(format!(
                            "cannot unpack non-iterable {} object",
                            value.type_name()
                        ))
                    }
                };
                if values.len() > targets.len() {
                    return Err(PyException::new(
                        ExcType::ValueError,
                        format!("too many values to unpack (expected {})", targets.len()),
                    ));
                }
                if values.len() < targets.len() {
                    return Err(PyException::new(
                        ExcType::ValueError,
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            values.len()
                        ),
                    ));
                }
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value)?;
                }
                Ok(())
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval(object)?;
                self.set_attr(&object, attr, value)
            }
            ExprKind::Subscript {
                value: object,
                index,
            } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                set_item(&object, index, value)
            }
            _ => type_error(format!("cannot assign to {}", target.describe())),
        }
    }

    fn delete(&mut self, target: &Expr) -> PyResult<()> {
        match &target.kind {
            ExprKind::Name(name) => self.delete_name(name),
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value)?;
                let index = self.eval_index(index)?;
                del_item(&object, index)
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value)?;
                let removed = match &object {
                    Value::Host(host) => host.attrs.borrow_mut().shift_remove(attr.as_str()),
                    Value::Module(module) => module.attrs.borrow_mut().shift_remove(attr.as_str()),
                    _ => None,
                };
                match removed {
                    Some(_) => Ok(()),
                    None => Err(no_attribute(&object, attr)),
                }
            }
            _ => type_error(format!("cannot delete {}", target.describe())),
        }
    }

    // Expressions.

    fn eval_all(&mut self, exprs: &[Expr]) -> PyResult<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn eval(&mut self, expr: &Expr) -> PyResult<Value> {
        match &expr.kind {
            ExprKind::Name(name) => self.load_name(name),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => Ok(Value::str(s)),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::NoneLit => Ok(Value::None),
            ExprKind::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Field {
                            expr,
                            conversion,
                            spec,
                        } => {
                            let value = self.eval(expr)?;
                            out.push_str(&convert_and_format(&value, *conversion, spec)?);
                        }
                    }
                }
                Ok(Value::str(&out))
            }
            ExprKind::List(items) => Ok(Value::list(self.eval_all(items)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            ExprKind::Dict(pairs) => {
                let mut dict = Dict::default();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right)
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => ops::negate(&value),
                    UnaryOp::Pos => ops::positive(&value),
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                }
            }
            ExprKind::And(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            ExprKind::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            ExprKind::Compare { left, ops: chain } => {
                let mut left = self.eval(left)?;
                for (op, right) in chain {
                    let right = self.eval(right)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::Call { func, args } => {
                let callee = self.eval(func)?;
                let args = self.eval_args(args)?;
                self.call(&callee, args)
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval(value)?;
                self.get_attr(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value)?;
                let index = self.eval_index(index)?;
                get_item(&object, index)
            }
            ExprKind::Slice { .. } => type_error("slice is only valid inside a subscript"),
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            ExprKind::Lambda(def) => self.make_function(def),
            ExprKind::ListComp {
                elt,
                target,
                iter,
                conds,
            } => self.list_comprehension(elt, target, iter, conds),
        }
    }

    fn eval_index(&mut self, index: &Expr) -> PyResult<Index> {
        let ExprKind::Slice { lower, upper, step } = &index.kind else {
            return Ok(Index::Item(self.eval(index)?));
        };
        let mut bound = |part: &Option<Box<Expr>>| -> PyResult<Option<i64>> {
            let Some(expr) = part else {
                return Ok(None);
            };
            match self.eval(expr)? {
                Value::None => Ok(None),
                value => value.as_index().map(Some).ok_or_else(|| {
                    PyException::new(
                        ExcType::TypeError,
                        "slice indices must be integers or None or have an __index__ method",
                    )
                }),
            }
        };
        let lower = bound(lower)?;
        let upper = bound(upper)?;
        let step = bound(step)?;
        Ok(Index::Slice(lower, upper, step))
    }

    fn list_comprehension(
        &mut self,
        elt: &Expr,
        target: &Expr,
        iter: &Expr,
        conds: &[Expr],
    ) -> PyResult<Value> {
        let items = self.eval(iter)?.iter()?;
        let mut names = Vec::new();
        target_names(target, &mut names);
        let saved: Vec<(String, Option<Value>)> = names
            .into_iter()
            .map(|name| {
                let previous = self.own_binding(&name);
                (name, previous)
            })
            .collect();

        let result = self.comprehension_items(elt, target, items, conds);

        for (name, previous) in saved {
            match previous {
                Some(value) => self.store_name(&name, value),
                None => {
                    self.discard_name(&name);
                }
            }
        }
        result.map(Value::list)
    }

    fn comprehension_items(
        &mut self,
        elt: &Expr,
        target: &Expr,
        items: impl Iterator<Item = Value>,
        conds: &[Expr],
    ) -> PyResult<Vec<Value>> {
        let mut out = Vec::new();
        'items: for item in items {
            self.assign(target, item)?;
            for cond in conds {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            out.push(self.eval(elt)?);
        }
        Ok(out)
    }

    // Calls.

    fn eval_args(&mut self, args: &[Arg]) -> PyResult<Args> {
        let mut out = Args::default();
        for arg in args {
            match arg {
                Arg::Positional(expr) => out.positional.push(self.eval(expr)?),
                Arg::Star(expr) => out.positional.extend(self.eval(expr)?.iter()?),
                Arg::Keyword(name, expr) => {
                    let value = self.eval(expr)?;
                    push_keyword(&mut out, name.clone(), value)?;
                }
                Arg::DoubleStar(expr) => match &self.eval(expr)? {
                    Value::Dict(dict) => {
                        for (key, value) in dict.borrow().items() {
                            let Value::Str(key) = &key else {
                                return type_error("keywords must be strings");
                            };
                            push_keyword(&mut out, key.to_string(), value)?;
                        }
                    }
                    other => {
                        return type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        ))
                    }
                },
            }
        }
        Ok(out)
    }

    pub fn call(&mut self, func: &Value, args: Args) -> PyResult<Value> {
        match func {
            Value::Function(function) => self.call_function(function, args),
            Value::Builtin(builtin) => (builtin.call)(self, args),
            Value::Native(native) => (native.call)(self, args),
            Value::Method(method) => {
                builtins::call_method(self, &method.receiver, &method.name, args)
            }
            Value::Type(tag) => builtins::construct(self, *tag, args),
            other => type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            )),
        }
    }

    fn call_function(&mut self, function: &Rc<Function>, args: Args) -> PyResult<Value> {
        if self.frames.len() >= self.recursion_limit {
            return Err(PyException::new(
                ExcType::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let locals = bind_arguments(function, args)?;
        let def = function.def.clone();
        self.frames.push(Frame {
            name: Rc::from(def.name.as_str()),
            line: def.line,
            source: def.source.clone(),
            globals: function.globals.clone(),
            scope: FrameScope::Function {
                locals: Rc::new(std::cell::RefCell::new(locals)),
                closure: function.closure.clone(),
                def: def.clone(),
            },
        });
        let result = self.exec_block(&def.body);
        let frame = self.frames.pop();
        match result {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::None),
            Err(mut exc) => {
                if let Some(frame) = frame {
                    exc.push_frame(frame.name, frame.line, frame.source);
                }
                Err(exc)
            }
        }
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> PyResult<Value> {
        let mut defaults = Vec::new();
        for param in &def.params {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default)?);
            }
        }
        let frame = self.frame();
        let closure = match &frame.scope {
            FrameScope::Module => Vec::new(),
            FrameScope::Function {
                locals, closure, ..
            } => {
                let mut scopes = closure.clone();
                scopes.push(locals.clone());
                scopes
            }
        };
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            globals: frame.globals.clone(),
            closure,
        })))
    }

    // Attributes.

    pub fn get_attr(&self, object: &Value, name: &str) -> PyResult<Value> {
        let found = match object {
            Value::Module(module) => module.attrs.borrow().get(name).cloned(),
            Value::Host(host) => host.attrs.borrow().get(name).cloned(),
            Value::Exception(exc) if name == "args" => Some(Value::tuple(exc.args.clone())),
            Value::Function(function) if name == "__name__" => {
                Some(Value::str(&function.def.name))
            }
            Value::Builtin(builtin) if name == "__name__" => Some(Value::str(builtin.name)),
            Value::Type(tag) if name == "__name__" => Some(Value::str(tag.name())),
            Value::Range(range) => match name {
                "start" => Some(Value::Int(range.start)),
                "stop" => Some(Value::Int(range.stop)),
                "step" => Some(Value::Int(range.step)),
                _ => None,
            },
            other if builtins::has_method(other, name) => {
                Some(Value::Method(Rc::new(BoundMethod {
                    receiver: other.clone(),
                    name: name.to_string(),
                })))
            }
            _ => None,
        };
        found.ok_or_else(|| no_attribute(object, name))
    }

    pub fn set_attr(&mut self, object: &Value, name: &str, value: Value) -> PyResult<()> {
        match object {
            Value::Host(host) => {
                host.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            Value::Module(module) => {
                module.attrs.borrow_mut().insert(name.to_string(), value);
                Ok(())
            }
            other => Err(PyException::new(
                ExcType::AttributeError,
                format!(
                    "'{}' object attribute '{}' is read-only",
                    other.type_name(),
                    name
                ),
            )),
        }
    }
}

fn no_attribute(object: &Value, name: &str) -> PyException {
    let message = match object {
        Value::Module(module) => {
            format!("module '{}' has no attribute '{}'", module.name, name)
        }
        other => format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            name
        ),
    };
    PyException::new(ExcType::AttributeError, message)
}

/// The exception a `raise <value>` statement throws.
fn raised(value: Value) -> PyException {
    match &value {
        Value::Exception(exc) => PyException::from_value(exc.clone()),
        Value::Type(TypeTag::Exc(kind)) => {
            PyException::from_value(Rc::new(ExceptionValue::new(*kind, Vec::new())))
        }
        _ => PyException::new(
            ExcType::TypeError,
            "exceptions must derive from BaseException",
        ),
    }
}

fn exception_matches(exc: &PyException, class: &Value) -> PyResult<bool> {
    match class {
        Value::Type(TypeTag::Exc(kind)) => Ok(exc.kind().is_subclass_of(*kind)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(exc, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => type_error("catching classes that do not inherit from BaseException is not allowed"),
    }
}

fn push_keyword(args: &mut Args, name: String, value: Value) -> PyResult<()> {
    if args.keywords.iter().any(|(existing, _)| *existing == name) {
        return type_error(format!(
            "got multiple values for keyword argument '{}'",
            name
        ));
    }
    args.keywords.push((name, value));
    Ok(())
}

fn quoted_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [first, second] => format!("{} and {}", first, second),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

fn bind_arguments(function: &Function, args: Args) -> PyResult<IndexMap<String, Value>> {
    let def = &function.def;
    let name = def.name.as_str();
    let normal: Vec<&str> = def
        .params
        .iter()
        .filter(|p| p.kind == ParamKind::Normal)
        .map(|p| p.name.as_str())
        .collect();
    let varargs = def.params.iter().find(|p| p.kind == ParamKind::VarArgs);
    let kwargs = def.params.iter().find(|p| p.kind == ParamKind::KwArgs);

    let mut locals = IndexMap::new();
    let given = args.positional.len();
    let mut positional = args.positional.into_iter();
    for param in &normal {
        match positional.next() {
            Some(value) => {
                locals.insert(param.to_string(), value);
            }
            None => break,
        }
    }
    let extra: Vec<Value> = positional.collect();
    match varargs {
        Some(param) => {
            locals.insert(param.name.clone(), Value::tuple(extra));
        }
        None if !extra.is_empty() => {
            let required = normal.len() - function.defaults.len();
            let takes = if required == normal.len() {
                format!("{}", normal.len())
            } else {
                format!("from {} to {}", required, normal.len())
            };
            let noun = if normal.len() == 1 && required == 1 {
                "argument"
            } else {
                "arguments"
            };
            let verb = if given == 1 { "was" } else { "were" };
            return type_error(format!(
                "{}() takes {} positional {} but {} {} given",
                name, takes, noun, given, verb
            ));
        }
        None => {}
    }

    let mut extra_keywords = Dict::default();
    for (keyword, value) in args.keywords {
        if normal.contains(&keyword.as_str()) {
            if locals.contains_key(&keyword) {
                return type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    name, keyword
                ));
            }
            locals.insert(keyword, value);
        } else if kwargs.is_some() {
            extra_keywords.insert(Value::str(&keyword), value)?;
        } else {
            return type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                name, keyword
            ));
        }
    }

    let first_default = normal.len().saturating_sub(function.defaults.len());
    let mut missing = Vec::new();
    for (i, param) in normal.iter().enumerate() {
        if locals.contains_key(*param) {
            continue;
        }
        match i.checked_sub(first_default).and_then(|d| function.defaults.get(d)) {
            Some(default) => {
                locals.insert(param.to_string(), default.clone());
            }
            None => missing.push(*param),
        }
    }
    if !missing.is_empty() {
        let noun = if missing.len() == 1 {
            "argument"
        } else {
            "arguments"
        };
        return type_error(format!(
            "{}() missing {} required positional {}: {}",
            name,
            missing.len(),
            noun,
            quoted_list(&missing)
        ));
    }
    if let Some(param) = kwargs {
        locals.insert(param.name.clone(), Value::dict(extra_keywords));
    }
    Ok(locals)
}

// Subscripts.

fn key_error(key: Value) -> PyException {
    PyException::from_value(Rc::new(ExceptionValue::new(ExcType::KeyError, vec![key])))
}

fn sequence_position(index: &Value, len: usize, what: &str) -> PyResult<usize> {
    let Some(i) = index.as_index() else {
        return type_error(format!(
            "{} indices must be integers or slices, not {}",
            what,
            index.type_name()
        ));
    };
    normalize_index(i, len).ok_or_else(|| {
        PyException::new(ExcType::IndexError, format!("{} index out of range", what))
    })
}

fn get_item(object: &Value, index: Index) -> PyResult<Value> {
    match (object, index) {
        (Value::Dict(dict), Index::Item(key)) => {
            let found = dict.borrow().get(&key)?;
            found.ok_or_else(|| key_error(key))
        }
        (Value::List(items), Index::Item(i)) => {
            let items = items.borrow();
            Ok(items[sequence_position(&i, items.len(), "list")?].clone())
        }
        (Value::Tuple(items), Index::Item(i)) => {
            Ok(items[sequence_position(&i, items.len(), "tuple")?].clone())
        }
        (Value::Str(s), Index::Item(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let position = sequence_position(&i, chars.len(), "string")?;
            Ok(Value::str(chars[position].encode_utf8(&mut [0; 4])))
        }
        (Value::Range(range), Index::Item(i)) => {
            let position = sequence_position(&i, range.len(), "range object")?;
            Ok(Value::Int(range.get(position).unwrap_or(range.start)))
        }
        (Value::List(items), Index::Slice(lo, hi, step)) => {
            let items = items.borrow();
            let picked = slice_indices(items.len(), lo, hi, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Value::Tuple(items), Index::Slice(lo, hi, step)) => {
            let picked = slice_indices(items.len(), lo, hi, step)?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Value::Str(s), Index::Slice(lo, hi, step)) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), lo, hi, step)?;
            let text: String = picked.into_iter().map(|i| chars[i]).collect();
            Ok(Value::str(&text))
        }
        (Value::Range(range), Index::Slice(lo, hi, step)) => {
            Ok(Value::Range(range.slice(lo, hi, step)?))
        }
        (Value::Dict(_), Index::Slice(..)) => type_error("unhashable type: 'slice'"),
        (other, _) => type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        )),
    }
}

/// Contiguous bounds for a step-1 slice assignment.
fn splice_bounds(len: usize, lo: Option<i64>, hi: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |bound: Option<i64>, default: i64| -> i64 {
        match bound {
            None => default,
            Some(v) if v < 0 => (v + len).max(0),
            Some(v) => v.min(len),
        }
    };
    let start = clamp(lo, 0);
    let stop = clamp(hi, len).max(start);
    (start as usize, stop as usize)
}

fn set_item(object: &Value, index: Index, value: Value) -> PyResult<()> {
    match (object, index) {
        (Value::Dict(dict), Index::Item(key)) => dict.borrow_mut().insert(key, value),
        (Value::List(items), Index::Item(i)) => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let position = sequence_position(&i, len, "list").map_err(|e| {
                if e.kind() == ExcType::IndexError {
                    PyException::new(ExcType::IndexError, "list assignment index out of range")
                } else {
                    e
                }
            })?;
            items[position] = value;
            Ok(())
        }
        (Value::List(items), Index::Slice(lo, hi, step)) => {
            let replacement: Vec<Value> = value.iter()?.collect();
            let mut items = items.borrow_mut();
            if step.unwrap_or(1) == 1 {
                let (start, stop) = splice_bounds(items.len(), lo, hi);
                items.splice(start..stop, replacement);
                return Ok(());
            }
            let picked = slice_indices(items.len(), lo, hi, step)?;
            if picked.len() != replacement.len() {
                return Err(PyException::new(
                    ExcType::ValueError,
                    format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        replacement.len(),
                        picked.len()
                    ),
                ));
            }
            for (position, item) in picked.into_iter().zip(replacement) {
                items[position] = item;
            }
            Ok(())
        }
        (other, _) => type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        )),
    }
}

fn del_item(object: &Value, index: Index) -> PyResult<()> {
    match (object, index) {
        (Value::Dict(dict), Index::Item(key)) => {
            let removed = dict.borrow_mut().remove(&key)?;
            removed.map(|_| ()).ok_or_else(|| key_error(key))
        }
        (Value::List(items), Index::Item(i)) => {
            let mut items = items.borrow_mut();
            let position = sequence_position(&i, items.len(), "list").map_err(|e| {
                if e.kind() == ExcType::IndexError {
                    PyException::new(ExcType::IndexError, "list assignment index out of range")
                } else {
                    e
                }
            })?;
            items.remove(position);
            Ok(())
        }
        (Value::List(items), Index::Slice(lo, hi, step)) => {
            let mut items = items.borrow_mut();
            let mut picked = slice_indices(items.len(), lo, hi, step)?;
            picked.sort_unstable_by(|a, b| b.cmp(a));
            for position in picked {
                items.remove(position);
            }
            Ok(())
        }
        (other, _) => type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_module;
    use super::*;

    fn run(namespace: &Namespace, text: &str) -> PyResult<()> {
        let source = SourceText::new("<console>", text);
        let body = parse_module(&source, text).expect("parse");
        Interpreter::new(namespace.clone()).run_module(&body, &source)
    }

    fn get(namespace: &Namespace, name: &str) -> String {
        namespace.get(name).map(|v| v.repr()).unwrap_or_default()
    }

    #[test]
    fn test_closures_and_defaults() {
        let ns = Namespace::new();
        run(
            &ns,
            "def make(n, step=2):\n    def add(x):\n        return x + n * step\n    return add\nr = make(1)(10)\n",
        )
        .unwrap();
        assert_eq!(get(&ns, "r"), "12");
    }

    #[test]
    fn test_padding_and_materialising_are_bounded() {
        let ns = Namespace::new();
        for text in [
            "'a'.center(10**18)",
            "'a'.ljust(10**12)",
            "'7'.zfill(10**12)",
            "x = list(range(10**12))",
        ] {
            let err = run(&ns, text).unwrap_err();
            assert_eq!(err.kind(), ExcType::MemoryError, "{}", text);
        }
        run(&ns, "s = 'a'.center(5, '*')\nz = '-7'.zfill(4)").unwrap();
        assert_eq!(get(&ns, "s"), "'**a**'");
        assert_eq!(get(&ns, "z"), "'-007'");
    }

    #[test]
    fn test_huge_ranges_do_not_wrap() {
        let ns = Namespace::new();
        let err = run(&ns, "n = len(range(-9223372036854775807-1, 9223372036854775807))").unwrap_err();
        assert_eq!(err.kind(), ExcType::OverflowError);
        run(
            &ns,
            "r = range(-9223372036854775807-1, 9223372036854775807)\na = r[9223372036854775806]\nb = r[-1]\nc = r[2**62:][0]\nd = 9223372036854775806 in r\ne = -1e300 in r\nm = len(r[::2**62])",
        )
        .unwrap();
        assert_eq!(get(&ns, "a"), "-2");
        assert_eq!(get(&ns, "b"), "9223372036854775806");
        assert_eq!(get(&ns, "c"), "-4611686018427387904");
        assert_eq!(get(&ns, "d"), "True");
        assert_eq!(get(&ns, "e"), "False");
        assert_eq!(get(&ns, "m"), "4");
    }

    #[test]
    fn test_float_conversions_raise_instead_of_saturating() {
        let ns = Namespace::new();
        for text in ["round(1e300)", "int(1e300)", "int(-1e19)", "'%d' % 1e300"] {
            let err = run(&ns, text).unwrap_err();
            assert_eq!(err.kind(), ExcType::OverflowError, "{}", text);
        }
        run(
            &ns,
            "i = round(2.5)\nj = int(-3.9)\nd = {9223372036854775807: 'int'}\nd[1e300] = 'float'\nn = len(d)",
        )
        .unwrap();
        assert_eq!(get(&ns, "i"), "2");
        assert_eq!(get(&ns, "j"), "-3");
        assert_eq!(get(&ns, "n"), "2");
    }

    #[test]
    fn test_deeply_nested_values() {
        let ns = Namespace::new();
        run(&ns, "x = []\nfor i in range(200000):\n    x = [x]\n").unwrap();
        assert_eq!(run(&ns, "s = repr(x)").unwrap_err().kind(), ExcType::RecursionError);
        assert_eq!(run(&ns, "print(x)").unwrap_err().kind(), ExcType::RecursionError);
        assert_eq!(run(&ns, "s = f'{x!r}'").unwrap_err().kind(), ExcType::RecursionError);
        run(&ns, "del x").unwrap();

        run(
            &ns,
            "t = ()\nfor i in range(200000):\n    t = (t, {'k': t})\nd = {}\nfor i in range(200000):\n    d = {'next': d}\n",
        )
        .unwrap();
        run(&ns, "del t\nd = 0").unwrap();

        run(&ns, "k = ()\nfor i in range(2000):\n    k = (k,)\n").unwrap();
        assert_eq!(run(&ns, "h = {k: 1}").unwrap_err().kind(), ExcType::RecursionError);
        run(&ns, "s = repr([[1, (2,)], {'a': []}])").unwrap();
        assert_eq!(get(&ns, "s"), "\"[[1, (2,)], {'a': []}]\"");
    }

    #[test]
    fn test_unbound_local() {
        let ns = Namespace::new();
        let err = run(&ns, "x = 1\ndef f():\n    print(x)\n    x = 2\nf()\n").unwrap_err();
        assert_eq!(err.kind(), ExcType::UnboundLocalError);
    }

    #[test]
    fn test_global_statement() {
        let ns = Namespace::new();
        run(&ns, "count = 0\ndef bump():\n    global count\n    count += 1\nbump()\nbump()\n").unwrap();
        assert_eq!(get(&ns, "count"), "2");
    }

    #[test]
    fn test_try_except_finally() {
        let ns = Namespace::new();
        run(
            &ns,
            "log = []\ntry:\n    {}['k']\nexcept (IndexError, KeyError) as e:\n    log.append(repr(e))\nelse:\n    log.append('else')\nfinally:\n    log.append('done')\n",
        )
        .unwrap();
        assert_eq!(get(&ns, "log"), "[\"KeyError('k')\", 'done']");
        assert!(!ns.contains("e"));
    }

    #[test]
    fn test_bare_raise_reraises() {
        let ns = Namespace::new();
        let err = run(&ns, "try:\n    1 / 0\nexcept ZeroDivisionError:\n    raise\n").unwrap_err();
        assert_eq!(err.summary(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_traceback_frames() {
        let ns = Namespace::new();
        let err = run(&ns, "def inner():\n    raise ValueError('boom')\n\ninner()\n").unwrap_err();
        let text = err.format();
        assert!(text.starts_with("Traceback (most recent call last):\n"));
        assert!(text.contains("  File \"<console>\", line 4, in <module>\n    inner()\n"));
        assert!(text.contains("  File \"<console>\", line 2, in inner\n    raise ValueError('boom')\n"));
        assert!(text.ends_with("ValueError: boom\n"));
    }

    #[test]
    fn test_recursion_limit() {
        let ns = Namespace::new();
        let source = SourceText::new("<console>", "def f():\n    return f()\nf()\n");
        let body = parse_module(&source, "def f():\n    return f()\nf()\n").unwrap();
        let err = Interpreter::new(ns)
            .with_recursion_limit(20)
            .run_module(&body, &source)
            .unwrap_err();
        assert_eq!(err.kind(), ExcType::RecursionError);
    }

    #[test]
    fn test_argument_errors() {
        let ns = Namespace::new();
        let err = run(&ns, "def f(a, b):\n    pass\nf(1)\n").unwrap_err();
        assert_eq!(
            err.summary(),
            "TypeError: f() missing 1 required positional argument: 'b'"
        );
        let err = run(&ns, "f(1, 2, 3)\n").unwrap_err();
        assert_eq!(
            err.summary(),
            "TypeError: f() takes 2 positional arguments but 3 were given"
        );
        let err = run(&ns, "f(1, c=2)\n").unwrap_err();
        assert_eq!(
            err.summary(),
            "TypeError: f() got an unexpected keyword argument 'c'"
        );
    }

    #[test]
    fn test_star_args_and_comprehension_scope() {
        let ns = Namespace::new();
        run(
            &ns,
            "def f(*args, **kw):\n    return len(args), sorted(kw)\nr = f(1, 2, b=1, a=2)\nsq = [i * i for i in range(5) if i % 2 == 0]\n",
        )
        .unwrap();
        assert_eq!(get(&ns, "r"), "(2, ['a', 'b'])");
        assert_eq!(get(&ns, "sq"), "[0, 4, 16]");
        assert!(!ns.contains("i"));
    }

    #[test]
    fn test_slices_and_unpacking() {
        let ns = Namespace::new();
        run(&ns, "a = [0, 1, 2, 3, 4]\na[1:3] = ['x']\nb = a[::-1]\nx, y = 'ab'\n").unwrap();
        assert_eq!(get(&ns, "a"), "[0, 'x', 3, 4]");
        assert_eq!(get(&ns, "b"), "[4, 3, 'x', 0]");
        assert_eq!(get(&ns, "y"), "'b'");
        let err = run(&ns, "p, q = 1, 2, 3\n").unwrap_err();
        assert_eq!(
            err.summary(),
            "ValueError: too many values to unpack (expected 2)"
        );
    }
}
