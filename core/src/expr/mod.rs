//! Typed query IR.
//!
//! Expressions are immutable and shared through [`ExprRef`]. Rewrites build
//! new trees and reuse untouched subtrees, so "did this change" is a pointer
//! comparison (`Arc::ptr_eq`).
//!
//! Lambda parameters carry ids handed out by a [`Scope`]. Ids are unique
//! within one build session, which is how lambdas are identified across
//! rewrites.

mod method;
mod ty;
pub mod visit;

pub use method::{Method, Signature};
pub use ty::Ty;

use compact_str::CompactString;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::error::{GraftError, Result};
use crate::key::MAX_KEY_ARITY;
use crate::value::Value;

pub type ExprRef = Arc<Expr>;
pub type ParamId = u32;

/// A lambda parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub id: ParamId,
    pub name: CompactString,
    pub ty: Ty,
}

impl Param {
    pub fn expr(&self) -> ExprRef {
        Arc::new(Expr::Param(self.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: SmallVec<[Param; 2]>,
    pub body: ExprRef,
}

impl Lambda {
    /// Same lambda, possibly with a rewritten body.
    pub fn same_as(&self, other: &Lambda) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a.id == b.id)
    }

    pub fn binds(&self, id: ParamId) -> bool {
        self.params.iter().any(|p| p.id == id)
    }
}

/// Role of a `(key, data)` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyedKind {
    /// Parent row tagged with the parameters its children depend on.
    Carrier,
    /// Child row tagged with the correlation key of its parent, a key of
    /// `width` components.
    Envelope { width: usize },
}

/// Accessor into a keyed value or grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Part {
    Key,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub const fn is_predicate(self) -> bool {
        !matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant {
        value: Value,
        ty: Ty,
    },
    Param(Param),
    Member {
        object: ExprRef,
        field: CompactString,
        ty: Ty,
    },
    Lambda(Lambda),
    Call {
        method: Method,
        args: SmallVec<[ExprRef; 3]>,
    },
    /// Member-init / constructor projection.
    Record {
        name: CompactString,
        fields: SmallVec<[(CompactString, ExprRef); 4]>,
    },
    /// One level of a synthesized composite key.
    Key(SmallVec<[ExprRef; MAX_KEY_ARITY]>),
    KeyItem {
        key: ExprRef,
        index: usize,
    },
    Keyed {
        kind: KeyedKind,
        key: ExprRef,
        data: ExprRef,
    },
    Part {
        object: ExprRef,
        part: Part,
    },
    Convert {
        operand: ExprRef,
        ty: Ty,
    },
    Unary {
        op: UnaryOp,
        operand: ExprRef,
    },
    Binary {
        op: BinaryOp,
        left: ExprRef,
        right: ExprRef,
    },
    /// Source table scanned by a statement.
    Table {
        name: CompactString,
    },
    /// Read of a published preamble slot; keyed lookups carry the
    /// compiled correlation key.
    Preamble {
        slot: usize,
        key: Option<ExprRef>,
        ty: Ty,
    },
}

impl Expr {
    pub fn ty(&self) -> Ty {
        match self {
            Expr::Constant { ty, .. } | Expr::Member { ty, .. } | Expr::Convert { ty, .. } => {
                ty.clone()
            }
            Expr::Preamble { ty, .. } => ty.clone(),
            Expr::Param(param) => param.ty.clone(),
            Expr::Lambda(lambda) => lambda.body.ty(),
            Expr::Call { method, args } => method.result_ty(args),
            Expr::Record { name, .. } => Ty::Record(name.clone()),
            Expr::Key(items) => Ty::Key(items.iter().map(|item| item.ty()).collect()),
            Expr::KeyItem { key, index } => match key.ty() {
                Ty::Key(items) => items.get(*index).cloned().unwrap_or_default(),
                _ => Ty::Unknown,
            },
            Expr::Keyed { key, data, .. } => Ty::keyed(key.ty(), data.ty()),
            Expr::Part { object, part } => match (object.ty(), part) {
                (Ty::Keyed(key, _), Part::Key) => (*key).clone(),
                (Ty::Keyed(_, data), Part::Data) => (*data).clone(),
                (Ty::Grouping(key, _), Part::Key) => (*key).clone(),
                (Ty::Grouping(_, element), Part::Data) => Ty::Seq(element),
                _ => Ty::Unknown,
            },
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg => operand.ty(),
                UnaryOp::Not | UnaryOp::IsNull => Ty::Bool,
            },
            Expr::Binary { op, left, .. } => {
                if op.is_predicate() {
                    Ty::Bool
                } else {
                    left.ty()
                }
            }
            Expr::Table { name } => Ty::seq(Ty::Entity(name.clone())),
        }
    }

    pub fn as_lambda(&self) -> Option<&Lambda> {
        match self {
            Expr::Lambda(lambda) => Some(lambda),
            _ => None,
        }
    }

    pub fn as_param(&self) -> Option<&Param> {
        match self {
            Expr::Param(param) => Some(param),
            _ => None,
        }
    }

    pub fn call_args(&self) -> Option<&[ExprRef]> {
        match self {
            Expr::Call { args, .. } => Some(args),
            _ => None,
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    pub fn constant(value: impl Into<Value>) -> ExprRef {
        let value = value.into();
        let ty = Ty::from_kind(value.kind());
        Arc::new(Expr::Constant { value, ty })
    }

    pub fn typed_constant(value: impl Into<Value>, ty: Ty) -> ExprRef {
        Arc::new(Expr::Constant {
            value: value.into(),
            ty,
        })
    }

    /// An empty sequence of the given element type.
    pub fn empty_seq(element: Ty) -> ExprRef {
        Arc::new(Expr::Constant {
            value: Value::empty_list(),
            ty: Ty::seq(element),
        })
    }

    pub fn table(name: impl Into<CompactString>) -> ExprRef {
        Arc::new(Expr::Table { name: name.into() })
    }

    pub fn member(object: ExprRef, field: impl Into<CompactString>, ty: Ty) -> ExprRef {
        Arc::new(Expr::Member {
            object,
            field: field.into(),
            ty,
        })
    }

    pub fn lambda(params: impl IntoIterator<Item = Param>, body: ExprRef) -> ExprRef {
        Arc::new(Expr::Lambda(Lambda {
            params: params.into_iter().collect(),
            body,
        }))
    }

    /// A query-operator call, validated against the operator's signature.
    pub fn call(method: Method, args: impl IntoIterator<Item = ExprRef>) -> Result<ExprRef> {
        let args: SmallVec<[ExprRef; 3]> = args.into_iter().collect();
        let signature = method.signature();
        if args.len() < signature.min_args || args.len() > signature.max_args {
            return Err(GraftError::Argument(format!(
                "{method} expects {}..={} arguments, got {}",
                signature.min_args,
                signature.max_args,
                args.len()
            )));
        }
        Ok(Arc::new(Expr::Call { method, args }))
    }

    pub(crate) fn call_unchecked(method: Method, args: impl IntoIterator<Item = ExprRef>) -> ExprRef {
        Arc::new(Expr::Call {
            method,
            args: args.into_iter().collect(),
        })
    }

    pub fn record<N: Into<CompactString>>(
        name: impl Into<CompactString>,
        fields: impl IntoIterator<Item = (N, ExprRef)>,
    ) -> ExprRef {
        Arc::new(Expr::Record {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(field, value)| (field.into(), value))
                .collect(),
        })
    }

    pub fn keyed(kind: KeyedKind, key: ExprRef, data: ExprRef) -> ExprRef {
        Arc::new(Expr::Keyed { kind, key, data })
    }

    pub fn part(object: ExprRef, part: Part) -> ExprRef {
        Arc::new(Expr::Part { object, part })
    }

    pub fn key_item(key: ExprRef, index: usize) -> ExprRef {
        Arc::new(Expr::KeyItem { key, index })
    }

    pub fn convert(operand: ExprRef, ty: Ty) -> ExprRef {
        Arc::new(Expr::Convert { operand, ty })
    }

    pub fn unary(op: UnaryOp, operand: ExprRef) -> ExprRef {
        Arc::new(Expr::Unary { op, operand })
    }

    pub fn binary(op: BinaryOp, left: ExprRef, right: ExprRef) -> ExprRef {
        Arc::new(Expr::Binary { op, left, right })
    }

    pub fn preamble(slot: usize, key: Option<ExprRef>, ty: Ty) -> ExprRef {
        Arc::new(Expr::Preamble { slot, key, ty })
    }
}

// =============================================================================
// Scope
// =============================================================================

/// Hands out lambda parameters for one build session.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    next_id: ParamId,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope whose ids do not collide with any parameter in `expr`.
    pub fn after(expr: &ExprRef) -> Self {
        Self {
            next_id: visit::max_param_id(expr).map_or(0, |id| id + 1),
        }
    }

    pub fn param(&mut self, name: impl Into<CompactString>, ty: Ty) -> Param {
        let id = self.next_id;
        self.next_id += 1;
        Param {
            id,
            name: name.into(),
            ty,
        }
    }
}

// =============================================================================
// Fluent helpers
// =============================================================================

/// Chaining helpers for building query expressions.
///
/// These build unchecked calls with the right arity for each operator.
pub trait ExprExt {
    fn member(&self, field: &str, ty: Ty) -> ExprRef;
    fn equals(&self, rhs: ExprRef) -> ExprRef;
    fn not_equals(&self, rhs: ExprRef) -> ExprRef;
    fn less(&self, rhs: ExprRef) -> ExprRef;
    fn greater(&self, rhs: ExprRef) -> ExprRef;
    fn greater_eq(&self, rhs: ExprRef) -> ExprRef;
    fn and(&self, rhs: ExprRef) -> ExprRef;
    fn or(&self, rhs: ExprRef) -> ExprRef;
    fn plus(&self, rhs: ExprRef) -> ExprRef;

    fn select(&self, param: &Param, body: ExprRef) -> ExprRef;
    fn filter(&self, param: &Param, predicate: ExprRef) -> ExprRef;
    fn select_many(&self, param: &Param, collection: ExprRef) -> ExprRef;
    fn select_many_with(
        &self,
        param: &Param,
        collection: ExprRef,
        result: (&Param, &Param),
        body: ExprRef,
    ) -> ExprRef;
    fn order_by(&self, param: &Param, key: ExprRef) -> ExprRef;
    fn order_by_desc(&self, param: &Param, key: ExprRef) -> ExprRef;
    fn then_by(&self, param: &Param, key: ExprRef) -> ExprRef;
    fn group_by(&self, param: &Param, key: ExprRef) -> ExprRef;
    fn group_join(
        &self,
        inner: ExprRef,
        outer_key: (&Param, ExprRef),
        inner_key: (&Param, ExprRef),
        result: (&Param, &Param),
        body: ExprRef,
    ) -> ExprRef;
    fn distinct(&self) -> ExprRef;
    fn skip(&self, count: i64) -> ExprRef;
    fn take(&self, count: i64) -> ExprRef;
    fn first(&self) -> ExprRef;
    fn first_or_default(&self) -> ExprRef;
    fn count(&self) -> ExprRef;
    fn any(&self) -> ExprRef;
    fn to_list(&self) -> ExprRef;
}

impl ExprExt for ExprRef {
    fn member(&self, field: &str, ty: Ty) -> ExprRef {
        Expr::member(self.clone(), field, ty)
    }

    fn equals(&self, rhs: ExprRef) -> ExprRef {
        Expr::binary(BinaryOp::Eq, self.clone(), rhs)
    }

    fn not_equals(&self, rhs: ExprRef) -> ExprRef {
        Expr::binary(BinaryOp::Ne, self.clone(), rhs)
    }

    fn less(&self, rhs: ExprRef) -> ExprRef {
        Expr::binary(BinaryOp::Lt, self.clone(), rhs)
    }

    fn greater(&self, rhs: ExprRef) -> ExprRef {
        Expr::binary(BinaryOp::Gt, self.clone(), rhs)
    }

    fn greater_eq(&self, rhs: ExprRef) -> ExprRef {
        Expr::binary(BinaryOp::Ge, self.clone(), rhs)
    }

    fn and(&self, rhs: ExprRef) -> ExprRef {
        Expr::binary(BinaryOp::And, self.clone(), rhs)
    }

    fn or(&self, rhs: ExprRef) -> ExprRef {
        Expr::binary(BinaryOp::Or, self.clone(), rhs)
    }

    fn plus(&self, rhs: ExprRef) -> ExprRef {
        Expr::binary(BinaryOp::Add, self.clone(), rhs)
    }

    fn select(&self, param: &Param, body: ExprRef) -> ExprRef {
        Expr::call_unchecked(
            Method::Select,
            [self.clone(), Expr::lambda([param.clone()], body)],
        )
    }

    fn filter(&self, param: &Param, predicate: ExprRef) -> ExprRef {
        Expr::call_unchecked(
            Method::Where,
            [self.clone(), Expr::lambda([param.clone()], predicate)],
        )
    }

    fn select_many(&self, param: &Param, collection: ExprRef) -> ExprRef {
        Expr::call_unchecked(
            Method::SelectMany,
            [self.clone(), Expr::lambda([param.clone()], collection)],
        )
    }

    fn select_many_with(
        &self,
        param: &Param,
        collection: ExprRef,
        result: (&Param, &Param),
        body: ExprRef,
    ) -> ExprRef {
        Expr::call_unchecked(
            Method::SelectMany,
            [
                self.clone(),
                Expr::lambda([param.clone()], collection),
                Expr::lambda([result.0.clone(), result.1.clone()], body),
            ],
        )
    }

    fn order_by(&self, param: &Param, key: ExprRef) -> ExprRef {
        Expr::call_unchecked(Method::OrderBy, [self.clone(), Expr::lambda([param.clone()], key)])
    }

    fn order_by_desc(&self, param: &Param, key: ExprRef) -> ExprRef {
        Expr::call_unchecked(
            Method::OrderByDescending,
            [self.clone(), Expr::lambda([param.clone()], key)],
        )
    }

    fn then_by(&self, param: &Param, key: ExprRef) -> ExprRef {
        Expr::call_unchecked(Method::ThenBy, [self.clone(), Expr::lambda([param.clone()], key)])
    }

    fn group_by(&self, param: &Param, key: ExprRef) -> ExprRef {
        Expr::call_unchecked(Method::GroupBy, [self.clone(), Expr::lambda([param.clone()], key)])
    }

    fn group_join(
        &self,
        inner: ExprRef,
        outer_key: (&Param, ExprRef),
        inner_key: (&Param, ExprRef),
        result: (&Param, &Param),
        body: ExprRef,
    ) -> ExprRef {
        Expr::call_unchecked(
            Method::GroupJoin,
            [
                self.clone(),
                inner,
                Expr::lambda([outer_key.0.clone()], outer_key.1),
                Expr::lambda([inner_key.0.clone()], inner_key.1),
                Expr::lambda([result.0.clone(), result.1.clone()], body),
            ],
        )
    }

    fn distinct(&self) -> ExprRef {
        Expr::call_unchecked(Method::Distinct, [self.clone()])
    }

    fn skip(&self, count: i64) -> ExprRef {
        Expr::call_unchecked(Method::Skip, [self.clone(), Expr::constant(count)])
    }

    fn take(&self, count: i64) -> ExprRef {
        Expr::call_unchecked(Method::Take, [self.clone(), Expr::constant(count)])
    }

    fn first(&self) -> ExprRef {
        Expr::call_unchecked(Method::First, [self.clone()])
    }

    fn first_or_default(&self) -> ExprRef {
        Expr::call_unchecked(Method::FirstOrDefault, [self.clone()])
    }

    fn count(&self) -> ExprRef {
        Expr::call_unchecked(Method::Count, [self.clone()])
    }

    fn any(&self) -> ExprRef {
        Expr::call_unchecked(Method::Any, [self.clone()])
    }

    fn to_list(&self) -> ExprRef {
        Expr::call_unchecked(Method::ToList, [self.clone()])
    }
}
