use compact_str::CompactString;
use std::sync::Arc;

use crate::value::ValueKind;

/// Static type of an expression node.
///
/// Sequence, key and keyed types are structural, so a rewritten query's
/// element type can be recomputed from its arguments instead of being
/// re-specialized by hand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Ty {
    #[default]
    Unknown,
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    /// A mapped table row.
    Entity(CompactString),
    /// A projected record.
    Record(CompactString),
    Seq(Arc<Ty>),
    Key(Arc<[Ty]>),
    Keyed(Arc<Ty>, Arc<Ty>),
    Grouping(Arc<Ty>, Arc<Ty>),
}

impl Ty {
    pub fn seq(element: Ty) -> Ty {
        Ty::Seq(Arc::new(element))
    }

    pub fn entity(name: impl Into<CompactString>) -> Ty {
        Ty::Entity(name.into())
    }

    pub fn record(name: impl Into<CompactString>) -> Ty {
        Ty::Record(name.into())
    }

    pub fn keyed(key: Ty, data: Ty) -> Ty {
        Ty::Keyed(Arc::new(key), Arc::new(data))
    }

    pub fn grouping(key: Ty, element: Ty) -> Ty {
        Ty::Grouping(Arc::new(key), Arc::new(element))
    }

    pub fn is_seq(&self) -> bool {
        matches!(self, Ty::Seq(_))
    }

    pub fn is_grouping(&self) -> bool {
        matches!(self, Ty::Grouping(..))
    }

    /// Element type of a sequence or of a grouping's items.
    pub fn element(&self) -> Option<&Ty> {
        match self {
            Ty::Seq(element) | Ty::Grouping(_, element) => Some(element),
            _ => None,
        }
    }

    pub fn as_keyed(&self) -> Option<(&Ty, &Ty)> {
        match self {
            Ty::Keyed(key, data) => Some((key, data)),
            _ => None,
        }
    }

    pub fn entity_name(&self) -> Option<&str> {
        match self {
            Ty::Entity(name) => Some(name),
            _ => None,
        }
    }

    pub fn from_kind(kind: ValueKind) -> Ty {
        match kind {
            ValueKind::Bool => Ty::Bool,
            ValueKind::Int => Ty::Int,
            ValueKind::Float => Ty::Float,
            ValueKind::Text => Ty::Text,
            ValueKind::Bytes => Ty::Bytes,
            ValueKind::List => Ty::seq(Ty::Unknown),
            _ => Ty::Unknown,
        }
    }
}
