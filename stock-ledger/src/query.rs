//! List query parameters for the paginated collaborator endpoints.
//!
//! Parameters with empty values are dropped, never sent as `key=`.

use chrono::NaiveDate;
use stock_domain::{CategoryId, MovementKind, OperationId, ProductId};

/// Ordered list of query-string pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pairs: Vec<(String, String)>,
}

impl ListQuery {
    /// Empty query
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter unless its value renders empty
    pub fn push(&mut self, key: &str, value: impl ToString) -> &mut Self {
        let value = value.to_string();
        if !value.trim().is_empty() {
            self.pairs.push((key.to_string(), value));
        }
        self
    }

    /// Add a parameter when present
    pub fn push_opt<V: ToString>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.push(key, value);
        }
        self
    }

    /// Pairs in insertion order
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// No parameters
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Pagination and ordering shared by every list endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paging {
    pub ordering: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl Paging {
    fn extend(&self, query: &mut ListQuery) {
        query
            .push_opt("ordering", self.ordering.as_deref())
            .push_opt("page", self.page)
            .push_opt("page_size", self.page_size);
    }
}

/// Filters for the movement list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub product: Option<ProductId>,
    pub user: Option<i64>,
    pub kind: Option<MovementKind>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
    pub operation_id: Option<OperationId>,
    pub paging: Paging,
}

impl MovementFilter {
    /// Movements of one product
    pub fn for_product(product: ProductId) -> Self {
        Self {
            product: Some(product),
            ..Default::default()
        }
    }

    /// Movement applied under one operation id
    pub fn for_operation(operation_id: &OperationId) -> Self {
        Self {
            operation_id: Some(operation_id.clone()),
            ..Default::default()
        }
    }

    /// Render as query-string pairs
    pub fn to_query(&self) -> ListQuery {
        let mut query = ListQuery::new();
        query
            .push_opt("producto", self.product)
            .push_opt("usuario", self.user)
            .push_opt("tipo", self.kind)
            .push_opt("fecha_inicio", self.from)
            .push_opt("fecha_fin", self.to)
            .push_opt("search", self.search.as_deref())
            .push_opt("operation_id", self.operation_id.as_ref());
        self.paging.extend(&mut query);
        query
    }
}

/// Filters for the product list and the low-stock view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilter {
    pub category: Option<CategoryId>,
    pub q: Option<String>,
    pub is_active: Option<bool>,
    pub low_stock: Option<bool>,
    pub min_stock: Option<i64>,
    pub max_stock: Option<i64>,
    pub paging: Paging,
}

impl ProductFilter {
    /// Render as query-string pairs
    pub fn to_query(&self) -> ListQuery {
        let mut query = ListQuery::new();
        query
            .push_opt("categoria", self.category)
            .push_opt("q", self.q.as_deref())
            .push_opt("is_active", self.is_active)
            .push_opt("bajo_stock", self.low_stock)
            .push_opt("min_stock", self.min_stock)
            .push_opt("max_stock", self.max_stock);
        self.paging.extend(&mut query);
        query
    }
}

/// Filters for the category list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryFilter {
    pub q: Option<String>,
    pub root_only: bool,
    pub paging: Paging,
}

impl CategoryFilter {
    /// Render as query-string pairs
    pub fn to_query(&self) -> ListQuery {
        let mut query = ListQuery::new();
        query.push_opt("q", self.q.as_deref());
        if self.root_only {
            query.push("root", true);
        }
        self.paging.extend(&mut query);
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(query: &ListQuery) -> Vec<&str> {
        query.pairs().iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn test_empty_values_dropped() {
        let mut query = ListQuery::new();
        query.push("q", "").push("search", "   ").push_opt::<i64>("page", None);
        assert!(query.is_empty());
    }

    #[test]
    fn test_movement_filter_params() {
        let filter = MovementFilter {
            product: Some(ProductId::new(3).unwrap()),
            kind: Some(MovementKind::Out),
            from: NaiveDate::from_ymd_opt(2024, 1, 1),
            search: Some(String::new()),
            paging: Paging {
                page: Some(2),
                ..Default::default()
            },
            ..Default::default()
        };

        let query = filter.to_query();
        assert_eq!(keys(&query), vec!["producto", "tipo", "fecha_inicio", "page"]);
        assert_eq!(query.pairs()[1].1, "OUT");
        assert_eq!(query.pairs()[2].1, "2024-01-01");
    }

    #[test]
    fn test_for_operation() {
        let op = OperationId::new("op-9").unwrap();
        let query = MovementFilter::for_operation(&op).to_query();
        assert_eq!(query.pairs(), &[("operation_id".to_string(), "op-9".to_string())]);
    }

    #[test]
    fn test_product_filter_low_stock() {
        let filter = ProductFilter {
            low_stock: Some(true),
            is_active: Some(true),
            ..Default::default()
        };
        let query = filter.to_query();
        assert_eq!(keys(&query), vec!["is_active", "bajo_stock"]);
    }

    #[test]
    fn test_category_root_only() {
        let filter = CategoryFilter {
            root_only: true,
            ..Default::default()
        };
        assert_eq!(filter.to_query().pairs(), &[("root".to_string(), "true".to_string())]);
    }
}
