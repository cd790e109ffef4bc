//! Small symbolic expression engine implementing [`Residual`].
//!
//! Expressions are plain trees over [`Variable`] leaves.  [`compile`]
//! differentiates every output w.r.t. every variable once, lowers the
//! results to index-addressed nodes and evaluates them on `&[f64]`
//! argument slices.  Smart constructors fold constants so that the
//! derivative trees of typical equations of motion stay small.
//!
//! ```
//! use dircol::expr::{compile, func, deriv, constant};
//! use dircol::residual::Residual;
//!
//! // 0 = x'(t) - a * x(t)
//! let eom = deriv("x") - constant("a") * func("x");
//! let res = compile(&[eom]).unwrap();
//! assert_eq!(res.variables().len(), 3);
//! ```

use crate::residual::{Residual, Variable};
use crate::types::{CollocationError, Result};
use std::ops::{Add, Div, Mul, Neg, Sub};

// ─────────────────────────────────────────────────────────────
//  Expression tree
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
    Tanh,
}

impl Func {
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Exp => x.exp(),
            Self::Ln => x.ln(),
            Self::Sqrt => x.sqrt(),
            Self::Tanh => x.tanh(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Var(Variable),
    Add(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Powi(Box<Expr>, i32),
    Powf(Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

/// `name(t)`.
pub fn func(name: &str) -> Expr {
    Expr::Var(Variable::Function(name.to_string()))
}

/// `d name(t) / dt`.
pub fn deriv(name: &str) -> Expr {
    Expr::Var(Variable::Derivative(name.to_string()))
}

/// Time-invariant parameter `name`.
pub fn constant(name: &str) -> Expr {
    Expr::Var(Variable::Constant(name.to_string()))
}

/// `name(time)`, for instance constraints.
pub fn at(name: &str, time: f64) -> Expr {
    Expr::Var(Variable::Instant { name: name.to_string(), time })
}

pub fn num(value: f64) -> Expr {
    Expr::Num(value)
}

impl Expr {
    fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(v) => Some(*v),
            _ => None,
        }
    }

    fn sum(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x + y),
            (Some(x), None) if x == 0.0 => b,
            (None, Some(y)) if y == 0.0 => a,
            _ => Expr::Add(Box::new(a), Box::new(b)),
        }
    }

    fn product(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x * y),
            (Some(x), _) | (_, Some(x)) if x == 0.0 => Expr::Num(0.0),
            (Some(x), None) if x == 1.0 => b,
            (None, Some(y)) if y == 1.0 => a,
            _ => Expr::Mul(Box::new(a), Box::new(b)),
        }
    }

    fn quotient(a: Expr, b: Expr) -> Expr {
        match (a.as_num(), b.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x / y),
            (Some(x), None) if x == 0.0 => Expr::Num(0.0),
            (None, Some(y)) if y == 1.0 => a,
            _ => Expr::Div(Box::new(a), Box::new(b)),
        }
    }

    fn negated(a: Expr) -> Expr {
        match a {
            Expr::Num(x) => Expr::Num(-x),
            Expr::Neg(inner) => *inner,
            other => Expr::Neg(Box::new(other)),
        }
    }

    pub fn powi(self, k: i32) -> Expr {
        match (self.as_num(), k) {
            (_, 0) => Expr::Num(1.0),
            (_, 1) => self,
            (Some(x), _) => Expr::Num(x.powi(k)),
            _ => Expr::Powi(Box::new(self), k),
        }
    }

    pub fn powf(self, exponent: Expr) -> Expr {
        match (self.as_num(), exponent.as_num()) {
            (Some(x), Some(y)) => Expr::Num(x.powf(y)),
            _ => Expr::Powf(Box::new(self), Box::new(exponent)),
        }
    }

    fn call(f: Func, a: Expr) -> Expr {
        match a.as_num() {
            Some(x) => Expr::Num(f.apply(x)),
            None => Expr::Call(f, Box::new(a)),
        }
    }

    pub fn sin(self) -> Expr {
        Self::call(Func::Sin, self)
    }
    pub fn cos(self) -> Expr {
        Self::call(Func::Cos, self)
    }
    pub fn tan(self) -> Expr {
        Self::call(Func::Tan, self)
    }
    pub fn exp(self) -> Expr {
        Self::call(Func::Exp, self)
    }
    pub fn ln(self) -> Expr {
        Self::call(Func::Ln, self)
    }
    pub fn sqrt(self) -> Expr {
        Self::call(Func::Sqrt, self)
    }
    pub fn tanh(self) -> Expr {
        Self::call(Func::Tanh, self)
    }

    /// Symbolic partial derivative w.r.t. `var`.
    pub fn diff(&self, var: &Variable) -> Expr {
        match self {
            Self::Num(_) => Expr::Num(0.0),
            Self::Var(v) => Expr::Num(if v == var { 1.0 } else { 0.0 }),
            Self::Add(a, b) => Self::sum(a.diff(var), b.diff(var)),
            Self::Mul(a, b) => Self::sum(
                Self::product(a.diff(var), (**b).clone()),
                Self::product((**a).clone(), b.diff(var)),
            ),
            Self::Div(a, b) => {
                // (a' b − a b') / b²
                let num = Self::sum(
                    Self::product(a.diff(var), (**b).clone()),
                    Self::negated(Self::product((**a).clone(), b.diff(var))),
                );
                Self::quotient(num, (**b).clone().powi(2))
            }
            Self::Neg(a) => Self::negated(a.diff(var)),
            Self::Powi(a, k) => Self::product(
                Self::product(Expr::Num(*k as f64), (**a).clone().powi(k - 1)),
                a.diff(var),
            ),
            Self::Powf(a, b) => {
                // a^b (b' ln a + b a' / a)
                let inner = Self::sum(
                    Self::product(b.diff(var), (**a).clone().ln()),
                    Self::quotient(Self::product((**b).clone(), a.diff(var)), (**a).clone()),
                );
                Self::product(self.clone(), inner)
            }
            Self::Call(f, a) => {
                let da = a.diff(var);
                if da.as_num() == Some(0.0) {
                    return Expr::Num(0.0);
                }
                let a = (**a).clone();
                let outer = match f {
                    Func::Sin => a.cos(),
                    Func::Cos => Self::negated(a.sin()),
                    Func::Tan => Self::quotient(Expr::Num(1.0), a.cos().powi(2)),
                    Func::Exp => a.exp(),
                    Func::Ln => Self::quotient(Expr::Num(1.0), a),
                    Func::Sqrt => Self::quotient(Expr::Num(0.5), a.sqrt()),
                    Func::Tanh => Self::sum(Expr::Num(1.0), Self::negated(a.tanh().powi(2))),
                };
                Self::product(outer, da)
            }
        }
    }

    /// Variables in first-seen order, without duplicates.
    pub fn variables(&self) -> Vec<Variable> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<Variable>) {
        match self {
            Self::Num(_) => {}
            Self::Var(v) => {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            Self::Add(a, b) | Self::Mul(a, b) | Self::Div(a, b) | Self::Powf(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            Self::Neg(a) | Self::Powi(a, _) | Self::Call(_, a) => a.collect_variables(out),
        }
    }

    /// Evaluate with a variable lookup.
    pub fn eval(&self, lookup: &dyn Fn(&Variable) -> f64) -> f64 {
        match self {
            Self::Num(v) => *v,
            Self::Var(v) => lookup(v),
            Self::Add(a, b) => a.eval(lookup) + b.eval(lookup),
            Self::Mul(a, b) => a.eval(lookup) * b.eval(lookup),
            Self::Div(a, b) => a.eval(lookup) / b.eval(lookup),
            Self::Neg(a) => -a.eval(lookup),
            Self::Powi(a, k) => a.eval(lookup).powi(*k),
            Self::Powf(a, b) => a.eval(lookup).powf(b.eval(lookup)),
            Self::Call(f, a) => f.apply(a.eval(lookup)),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Operator overloading
// ─────────────────────────────────────────────────────────────

macro_rules! binary_op {
    ($trait:ident, $method:ident, $build:expr) => {
        impl $trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $build(self, rhs)
            }
        }
        impl $trait<f64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f64) -> Expr {
                $build(self, Expr::Num(rhs))
            }
        }
        impl $trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $build(Expr::Num(self), rhs)
            }
        }
    };
}

binary_op!(Add, add, Expr::sum);
binary_op!(Sub, sub, |a, b| Expr::sum(a, Expr::negated(b)));
binary_op!(Mul, mul, Expr::product);
binary_op!(Div, div, Expr::quotient);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::negated(self)
    }
}

// ─────────────────────────────────────────────────────────────
//  Lowering to index-addressed nodes
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Node {
    Num(f64),
    Arg(usize),
    Add(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Neg(Box<Node>),
    Powi(Box<Node>, i32),
    Powf(Box<Node>, Box<Node>),
    Call(Func, Box<Node>),
}

impl Node {
    fn lower(expr: &Expr, variables: &[Variable]) -> Result<Node> {
        let lower = |e: &Expr| Node::lower(e, variables).map(Box::new);
        Ok(match expr {
            Expr::Num(v) => Node::Num(*v),
            Expr::Var(v) => {
                let idx = variables.iter().position(|x| x == v).ok_or_else(|| {
                    CollocationError::Validation(format!(
                        "expression references {v}, which is not in the argument list"
                    ))
                })?;
                Node::Arg(idx)
            }
            Expr::Add(a, b) => Node::Add(lower(a)?, lower(b)?),
            Expr::Mul(a, b) => Node::Mul(lower(a)?, lower(b)?),
            Expr::Div(a, b) => Node::Div(lower(a)?, lower(b)?),
            Expr::Neg(a) => Node::Neg(lower(a)?),
            Expr::Powi(a, k) => Node::Powi(lower(a)?, *k),
            Expr::Powf(a, b) => Node::Powf(lower(a)?, lower(b)?),
            Expr::Call(f, a) => Node::Call(*f, lower(a)?),
        })
    }

    fn eval(&self, args: &[f64]) -> f64 {
        match self {
            Self::Num(v) => *v,
            Self::Arg(i) => args[*i],
            Self::Add(a, b) => a.eval(args) + b.eval(args),
            Self::Mul(a, b) => a.eval(args) * b.eval(args),
            Self::Div(a, b) => a.eval(args) / b.eval(args),
            Self::Neg(a) => -a.eval(args),
            Self::Powi(a, k) => a.eval(args).powi(*k),
            Self::Powf(a, b) => a.eval(args).powf(b.eval(args)),
            Self::Call(f, a) => f.apply(a.eval(args)),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Compiled residual
// ─────────────────────────────────────────────────────────────

/// Column of expressions plus their symbolic Jacobian, ready to evaluate.
#[derive(Debug, Clone)]
pub struct CompiledResidual {
    variables: Vec<Variable>,
    outputs: Vec<Node>,
    /// Row-major `outputs × variables`.
    partials: Vec<Node>,
}

/// Compile with the canonical variable order (derivatives, functions,
/// constants, instants; each by name, instants then by time).
pub fn compile(exprs: &[Expr]) -> Result<CompiledResidual> {
    let mut variables: Vec<Variable> = Vec::new();
    for e in exprs {
        e.collect_variables(&mut variables);
    }
    variables.sort();
    compile_with(exprs, variables)
}

/// Compile with a caller-specified variable order.
pub fn compile_with(exprs: &[Expr], variables: Vec<Variable>) -> Result<CompiledResidual> {
    let mut outputs = Vec::with_capacity(exprs.len());
    let mut partials = Vec::with_capacity(exprs.len() * variables.len());
    for e in exprs {
        outputs.push(Node::lower(e, &variables)?);
        for v in &variables {
            partials.push(Node::lower(&e.diff(v), &variables)?);
        }
    }
    Ok(CompiledResidual { variables, outputs, partials })
}

impl Residual for CompiledResidual {
    fn variables(&self) -> &[Variable] {
        &self.variables
    }

    fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    fn evaluate(&self, args: &[f64], out: &mut [f64]) {
        for (o, node) in out.iter_mut().zip(&self.outputs) {
            *o = node.eval(args);
        }
    }

    fn jacobian(&self, args: &[f64], out: &mut [f64]) {
        for (o, node) in out.iter_mut().zip(&self.partials) {
            *o = node.eval(args);
        }
    }
}
