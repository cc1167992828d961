//! Runtime mapping metadata: entities, primary keys and associations.

use compact_str::CompactString;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::expr::{Expr, ExprExt, ExprRef, Scope, Ty};

/// A mapped column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: CompactString,
    pub ty: Ty,
}

/// A parent-to-children relation expressed as column equalities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationDescriptor {
    /// Member name on the parent entity.
    pub name: CompactString,
    /// Child table.
    pub target: CompactString,
    /// `(parent column, child column)` pairs.
    pub keys: SmallVec<[(CompactString, CompactString); 2]>,
}

impl AssociationDescriptor {
    pub fn new(name: impl Into<CompactString>, target: impl Into<CompactString>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            keys: SmallVec::new(),
        }
    }

    /// Add a `parent.source_column == child.target_column` condition.
    pub fn on(
        mut self,
        source_column: impl Into<CompactString>,
        target_column: impl Into<CompactString>,
    ) -> Self {
        self.keys.push((source_column.into(), target_column.into()));
        self
    }

    pub fn source_columns(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(source, _)| source.as_str())
    }

    pub fn target_columns(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(_, target)| target.as_str())
    }
}

/// A mapped table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub name: CompactString,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: SmallVec<[CompactString; 2]>,
    pub associations: Vec<AssociationDescriptor>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: SmallVec::new(),
            associations: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<CompactString>, ty: Ty) -> Self {
        self.columns.push(ColumnDescriptor {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<CompactString>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn association(mut self, association: AssociationDescriptor) -> Self {
        self.associations.push(association);
        self
    }

    pub fn column_ty(&self, name: &str) -> Option<&Ty> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| &column.ty)
    }

    pub fn find_association(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.associations
            .iter()
            .find(|association| association.name == name)
    }

    /// Primary-key member reads on `row`, in key order.
    pub fn key_members(&self, row: &ExprRef) -> Vec<ExprRef> {
        self.primary_key
            .iter()
            .map(|column| {
                let ty = self.column_ty(column).cloned().unwrap_or_default();
                row.member(column, ty)
            })
            .collect()
    }
}

/// Entities known to a builder.
#[derive(Debug, Clone, Default)]
pub struct MappingSchema {
    entities: HashMap<CompactString, EntityDescriptor>,
}

impl MappingSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityDescriptor) -> Self {
        self.insert(entity);
        self
    }

    pub fn insert(&mut self, entity: EntityDescriptor) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Expand `parent.association` into the child query it stands for:
    /// `target.Where(x => x.k1 == parent.p1 && ...)`.
    ///
    /// Returns `None` when `parent` is not a mapped entity or has no such
    /// association.
    pub fn expand_association(
        &self,
        parent: &ExprRef,
        association: &str,
        scope: &mut Scope,
    ) -> Option<ExprRef> {
        let parent_ty = parent.ty();
        let owner = self.entity(parent_ty.entity_name()?)?;
        let association = owner.find_association(association)?;
        let child = self.entity(&association.target);

        let row = scope.param(association.target.clone(), Ty::entity(association.target.clone()));
        let predicate = association
            .keys
            .iter()
            .map(|(source, target)| {
                let source_ty = owner.column_ty(source).cloned().unwrap_or_default();
                let target_ty = child
                    .and_then(|child| child.column_ty(target))
                    .cloned()
                    .unwrap_or_default();
                row.expr()
                    .member(target, target_ty)
                    .equals(parent.member(source, source_ty))
            })
            .reduce(|acc, condition| acc.and(condition))
            .unwrap_or_else(|| Expr::constant(true));

        Some(Expr::table(association.target.clone()).filter(&row, predicate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::visit::free_params;

    fn schema() -> MappingSchema {
        MappingSchema::new()
            .with_entity(
                EntityDescriptor::new("customers")
                    .column("id", Ty::Int)
                    .column("name", Ty::Text)
                    .primary_key(["id"])
                    .association(AssociationDescriptor::new("orders", "orders").on("id", "customer_id")),
            )
            .with_entity(
                EntityDescriptor::new("orders")
                    .column("id", Ty::Int)
                    .column("customer_id", Ty::Int)
                    .primary_key(["id"]),
            )
    }

    #[test]
    fn association_expands_to_filtered_child_query() {
        let schema = schema();
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let expanded = schema
            .expand_association(&c.expr(), "orders", &mut scope)
            .unwrap();
        assert_eq!(expanded.ty(), Ty::seq(Ty::entity("orders")));
        let free = free_params(&expanded);
        assert_eq!(free, vec![c]);
    }

    #[test]
    fn unknown_association_is_none() {
        let schema = schema();
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        assert!(schema.expand_association(&c.expr(), "invoices", &mut scope).is_none());
        let n = scope.param("n", Ty::Int);
        assert!(schema.expand_association(&n.expr(), "orders", &mut scope).is_none());
    }

    #[test]
    fn key_members_follow_primary_key() {
        let schema = schema();
        let mut scope = Scope::new();
        let c = scope.param("c", Ty::entity("customers"));
        let members = schema.entity("customers").unwrap().key_members(&c.expr());
        assert_eq!(members, vec![c.expr().member("id", Ty::Int)]);
    }
}
