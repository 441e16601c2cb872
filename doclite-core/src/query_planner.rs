// src/query_planner.rs
// Query planner - index selection and explain output

use serde_json::{json, Map, Value};

use crate::index::{Index, IndexManager, KeyRange, RangeBound, ScanResult};
use crate::query::{Query, QueryOperator};

/// Query plan - describes how to execute a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Full collection scan (no index used)
    CollectionScan,

    /// Equality on the leading index fields, optional range on the next one
    IndexScan {
        index_name: String,
        prefix: Vec<Value>,
        range: Option<KeyRange>,
    },
}

impl QueryPlan {
    pub fn stage(&self) -> &'static str {
        match self {
            QueryPlan::CollectionScan => "COLLSCAN",
            QueryPlan::IndexScan { .. } => "IXSCAN",
        }
    }

    pub fn index_name(&self) -> Option<&str> {
        match self {
            QueryPlan::CollectionScan => None,
            QueryPlan::IndexScan { index_name, .. } => Some(index_name),
        }
    }

    /// Per-field bounds, e.g. `{"genre": "[\"Fiction\", \"Fiction\"]"}`
    pub fn index_bounds(&self, index: &Index) -> Value {
        let (prefix, range) = match self {
            QueryPlan::CollectionScan => return Value::Null,
            QueryPlan::IndexScan { prefix, range, .. } => (prefix, range),
        };

        let mut bounds = Map::new();
        for (i, field) in index.definition.fields.iter().enumerate() {
            let bound = if let Some(value) = prefix.get(i) {
                format!("[{}, {}]", value, value)
            } else if let (Some(range), true) = (range, i == prefix.len()) {
                range.describe()
            } else {
                "[MinKey, MaxKey]".to_string()
            };
            bounds.insert(field.path.clone(), Value::String(bound));
        }
        Value::Object(bounds)
    }
}

/// Query planner - analyzes queries and selects optimal execution plan
pub struct QueryPlanner;

impl QueryPlanner {
    /// Pick the index matching the longest prefix; ties go to the first declared
    pub fn plan(query: &Query, indexes: &IndexManager) -> QueryPlan {
        if query.is_empty() || query.has_logical_operators() {
            return QueryPlan::CollectionScan;
        }

        let mut best: Option<(usize, QueryPlan)> = None;
        for index in indexes.iter() {
            if let Some((matched, plan)) = Self::match_index(query, index) {
                if best.as_ref().map_or(true, |(len, _)| matched > *len) {
                    best = Some((matched, plan));
                }
            }
        }

        match best {
            Some((_, plan)) => {
                log::debug!("planner chose {:?}", plan);
                plan
            }
            None => QueryPlan::CollectionScan,
        }
    }

    /// The query's field set must equal a prefix of the index fields
    fn match_index(query: &Query, index: &Index) -> Option<(usize, QueryPlan)> {
        let conditions: Vec<(&str, &[QueryOperator])> = query.field_conditions().collect();
        let fields = &index.definition.fields;
        if conditions.is_empty() || conditions.len() > fields.len() {
            return None;
        }

        let last = conditions.len() - 1;
        let mut prefix = Vec::with_capacity(conditions.len());
        let mut range = None;

        for (i, field) in fields.iter().take(conditions.len()).enumerate() {
            let (_, operators) = conditions.iter().find(|(path, _)| *path == field.path)?;
            match operators {
                [QueryOperator::Eq(value)] => prefix.push(value.clone()),
                _ if i == last => range = Some(Self::key_range(operators)?),
                _ => return None,
            }
        }

        let plan = QueryPlan::IndexScan {
            index_name: index.name().to_string(),
            prefix,
            range,
        };
        Some((conditions.len(), plan))
    }

    /// At most one lower and one upper bound, nothing else
    fn key_range(operators: &[QueryOperator]) -> Option<KeyRange> {
        let mut range = KeyRange::default();
        for op in operators {
            let (slot, bound) = match op {
                QueryOperator::Gt(v) => (&mut range.lower, RangeBound { value: v.clone(), inclusive: false }),
                QueryOperator::Gte(v) => (&mut range.lower, RangeBound { value: v.clone(), inclusive: true }),
                QueryOperator::Lt(v) => (&mut range.upper, RangeBound { value: v.clone(), inclusive: false }),
                QueryOperator::Lte(v) => (&mut range.upper, RangeBound { value: v.clone(), inclusive: true }),
                _ => return None,
            };
            if slot.is_some() {
                return None;
            }
            *slot = Some(bound);
        }
        Some(range)
    }

    /// Run the index part of a plan; `None` for a collection scan
    pub fn scan(plan: &QueryPlan, indexes: &IndexManager) -> Option<ScanResult> {
        match plan {
            QueryPlan::CollectionScan => None,
            QueryPlan::IndexScan { index_name, prefix, range } => indexes
                .get(index_name)
                .map(|index| index.scan(prefix, range.as_ref())),
        }
    }
}

/// Plan plus execution statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainOutput {
    pub plan: QueryPlan,
    pub index_bounds: Value,
    pub estimated_cost: usize,
    pub keys_examined: usize,
    pub docs_examined: usize,
    pub n_returned: usize,
}

impl ExplainOutput {
    pub fn stage(&self) -> &'static str {
        self.plan.stage()
    }

    pub fn index_name(&self) -> Option<&str> {
        self.plan.index_name()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "queryPlanner": {
                "stage": self.plan.stage(),
                "indexName": self.plan.index_name(),
                "indexBounds": self.index_bounds,
                "estimatedCost": self.estimated_cost,
            },
            "executionStats": {
                "nReturned": self.n_returned,
                "totalKeysExamined": self.keys_examined,
                "totalDocsExamined": self.docs_examined,
            },
        })
    }
}
