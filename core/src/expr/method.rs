//! Query-operator registry.
//!
//! Every operator the engine understands is listed here with its argument
//! shape and the rules used by the rewriter and the planner. Result types
//! are derived from argument types, so no runtime re-specialization of
//! generic operators is needed after a rewrite.

use super::{Expr, ExprRef, Ty};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Select,
    Where,
    SelectMany,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    GroupBy,
    /// `(outer, inner, outer_key, inner_key, (outer, group) => result)`
    GroupJoin,
    Distinct,
    Skip,
    Take,
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
    Any,
    Count,
    Sum,
    Min,
    Max,
    Average,
    ToList,
    AsQueryable,
}

/// Argument shape of a query operator.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub min_args: usize,
    pub max_args: usize,
    /// Every output element is an input element.
    pub element_preserving: bool,
    /// The operator can be re-entered per parent inside a batched query.
    pub batchable: bool,
}

const fn sig(min_args: usize, max_args: usize, element_preserving: bool, batchable: bool) -> Signature {
    Signature {
        min_args,
        max_args,
        element_preserving,
        batchable,
    }
}

impl Method {
    pub const fn signature(self) -> Signature {
        match self {
            Method::Select => sig(2, 2, false, true),
            Method::Where => sig(2, 2, true, true),
            Method::SelectMany => sig(2, 3, false, true),
            Method::GroupBy => sig(2, 3, false, true),
            Method::GroupJoin => sig(5, 5, false, true),
            Method::OrderBy
            | Method::OrderByDescending
            | Method::ThenBy
            | Method::ThenByDescending => sig(2, 2, true, false),
            Method::Distinct => sig(1, 1, true, false),
            Method::Skip | Method::Take => sig(2, 2, true, false),
            Method::First
            | Method::FirstOrDefault
            | Method::Single
            | Method::SingleOrDefault
            | Method::Last
            | Method::LastOrDefault => sig(1, 2, true, false),
            Method::Any | Method::Count | Method::Sum | Method::Min | Method::Max | Method::Average => {
                sig(1, 2, false, false)
            }
            Method::ToList | Method::AsQueryable => sig(1, 1, true, true),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Method::Select => "Select",
            Method::Where => "Where",
            Method::SelectMany => "SelectMany",
            Method::OrderBy => "OrderBy",
            Method::OrderByDescending => "OrderByDescending",
            Method::ThenBy => "ThenBy",
            Method::ThenByDescending => "ThenByDescending",
            Method::GroupBy => "GroupBy",
            Method::GroupJoin => "GroupJoin",
            Method::Distinct => "Distinct",
            Method::Skip => "Skip",
            Method::Take => "Take",
            Method::First => "First",
            Method::FirstOrDefault => "FirstOrDefault",
            Method::Single => "Single",
            Method::SingleOrDefault => "SingleOrDefault",
            Method::Last => "Last",
            Method::LastOrDefault => "LastOrDefault",
            Method::Any => "Any",
            Method::Count => "Count",
            Method::Sum => "Sum",
            Method::Min => "Min",
            Method::Max => "Max",
            Method::Average => "Average",
            Method::ToList => "ToList",
            Method::AsQueryable => "AsQueryable",
        }
    }

    pub const fn is_ordering(self) -> bool {
        matches!(
            self,
            Method::OrderBy | Method::OrderByDescending | Method::ThenBy | Method::ThenByDescending
        )
    }

    pub const fn is_descending(self) -> bool {
        matches!(self, Method::OrderByDescending | Method::ThenByDescending)
    }

    /// Operators reducing a sequence to one of its elements.
    pub const fn is_element_reducer(self) -> bool {
        matches!(
            self,
            Method::First
                | Method::FirstOrDefault
                | Method::Single
                | Method::SingleOrDefault
                | Method::Last
                | Method::LastOrDefault
        )
    }

    /// Operators reducing a sequence to a scalar.
    pub const fn is_aggregate(self) -> bool {
        matches!(
            self,
            Method::Any | Method::Count | Method::Sum | Method::Min | Method::Max | Method::Average
        )
    }

    /// Result type of a call with the given arguments.
    pub fn result_ty(self, args: &[ExprRef]) -> Ty {
        let source = args.first().map(|arg| arg.ty()).unwrap_or_default();
        let lambda_result = |index: usize| {
            args.get(index)
                .and_then(|arg| arg.as_lambda())
                .map(|lambda| lambda.body.ty())
        };
        let source_element = || source.element().cloned().unwrap_or_default();

        match self {
            Method::Select => Ty::seq(lambda_result(1).unwrap_or_default()),
            Method::SelectMany => match lambda_result(2) {
                Some(result) => Ty::seq(result),
                None => Ty::seq(
                    lambda_result(1)
                        .and_then(|collection| collection.element().cloned())
                        .unwrap_or_default(),
                ),
            },
            Method::GroupBy => Ty::seq(Ty::grouping(
                lambda_result(1).unwrap_or_default(),
                lambda_result(2).unwrap_or_else(source_element),
            )),
            Method::GroupJoin => Ty::seq(lambda_result(4).unwrap_or_default()),
            Method::Where
            | Method::OrderBy
            | Method::OrderByDescending
            | Method::ThenBy
            | Method::ThenByDescending
            | Method::Distinct
            | Method::Skip
            | Method::Take
            | Method::ToList
            | Method::AsQueryable => source,
            Method::First
            | Method::FirstOrDefault
            | Method::Single
            | Method::SingleOrDefault
            | Method::Last
            | Method::LastOrDefault => source_element(),
            Method::Any => Ty::Bool,
            Method::Count => Ty::Int,
            Method::Average => Ty::Float,
            Method::Sum | Method::Min | Method::Max => {
                lambda_result(1).unwrap_or_else(source_element)
            }
        }
    }
}

impl core::fmt::Display for Method {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl Expr {
    /// Method of a call node.
    pub fn method(&self) -> Option<Method> {
        match self {
            Expr::Call { method, .. } => Some(*method),
            _ => None,
        }
    }
}
