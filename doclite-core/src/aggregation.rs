// src/aggregation.rs
// Aggregation pipeline implementation

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::DEFAULT_MAX_EXPRESSION_DEPTH;
use crate::document::{compare_values, copy_path, get_path, paths_overlap, set_path, OrderedValue, ID_FIELD};
use crate::error::{DocLiteError, Result};
use crate::expression::{Expression, Num};
use crate::find_options::SortSpec;
use crate::query::Query;

fn invalid(msg: impl Into<String>) -> DocLiteError {
    DocLiteError::InvalidPipelineStage(msg.into())
}

/// Aggregation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Project(ProjectStage),
    AddFields(ProjectStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(usize),
    Skip(usize),
}

/// $match stage - filter documents
#[derive(Debug, Clone)]
pub struct MatchStage {
    query: Query,
}

/// $project / $addFields stage - reshape documents
#[derive(Debug, Clone)]
pub struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
    id: ProjectField,
    /// All input fields pass through ($addFields or exclusion mode)
    passthrough: bool,
}

#[derive(Debug, Clone)]
pub enum ProjectField {
    Include,
    Exclude,
    Computed(Expression),
}

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: Expression,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Expression),
    Avg(Expression),
    Min(Expression),
    Max(Expression),
    First(Expression),
    Last(Expression),
    Count,
}

/// Running state of one accumulator within one group
#[derive(Debug, Clone)]
enum AccumulatorState {
    Sum(Num),
    Avg { sum: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    First(Option<Value>),
    Last(Value),
    Count(u64),
}

/// $sort stage - sort documents
#[derive(Debug, Clone)]
pub struct SortStage {
    spec: SortSpec,
}

impl Pipeline {
    /// Create pipeline from JSON array
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        Self::from_json_with_depth(pipeline_json, DEFAULT_MAX_EXPRESSION_DEPTH)
    }

    pub fn from_json_with_depth(pipeline_json: &Value, max_depth: usize) -> Result<Self> {
        if let Value::Array(stages_array) = pipeline_json {
            let stages = stages_array
                .iter()
                .map(|stage_json| Stage::from_json(stage_json, max_depth))
                .collect::<Result<Vec<_>>>()?;
            Ok(Pipeline { stages })
        } else {
            Err(invalid("Pipeline must be an array"))
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Filter of a leading `$match`, usable for index selection
    pub fn leading_match(&self) -> Option<&Query> {
        match self.stages.first() {
            Some(Stage::Match(stage)) => Some(&stage.query),
            _ => None,
        }
    }

    /// Execute pipeline on documents
    pub fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        self.execute_from(0, docs)
    }

    /// Execute the stages starting at `start`
    pub fn execute_from(&self, start: usize, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        for stage in self.stages.iter().skip(start) {
            docs = stage.execute(docs)?;
        }
        Ok(docs)
    }
}

impl Stage {
    /// Parse stage from JSON
    fn from_json(stage_json: &Value, max_depth: usize) -> Result<Self> {
        let obj = match stage_json {
            Value::Object(obj) if obj.len() == 1 => obj,
            Value::Object(_) => return Err(invalid("Each stage must have exactly one operator")),
            _ => return Err(invalid("Stage must be an object")),
        };
        let (stage_name, stage_spec) = obj
            .iter()
            .next()
            .ok_or_else(|| invalid("Each stage must have exactly one operator"))?;

        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(MatchStage {
                query: Query::from_json_with_depth(stage_spec, max_depth)?,
            })),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(stage_spec, max_depth, false)?)),
            "$addFields" => Ok(Stage::AddFields(ProjectStage::from_json(stage_spec, max_depth, true)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(stage_spec, max_depth)?)),
            "$sort" => Ok(Stage::Sort(SortStage {
                spec: SortSpec::from_json(stage_spec)?,
            })),
            "$limit" => Ok(Stage::Limit(count_arg("$limit", stage_spec)?)),
            "$skip" => Ok(Stage::Skip(count_arg("$skip", stage_spec)?)),
            _ => Err(invalid(format!("Unknown pipeline stage: {}", stage_name))),
        }
    }

    /// Execute this stage
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(stage) => Ok(docs.into_iter().filter(|d| stage.query.matches_record(d)).collect()),
            Stage::Project(stage) | Stage::AddFields(stage) => {
                docs.iter().map(|doc| stage.project_document(doc)).collect()
            }
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(stage) => {
                let mut docs = docs;
                docs.sort_by(|a, b| stage.spec.compare_records(a, b));
                Ok(docs)
            }
            Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
            Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
        }
    }
}

/// Non-negative integer argument of $limit / $skip
fn count_arg(stage: &str, spec: &Value) -> Result<usize> {
    match spec.as_f64() {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        Some(n) if n < 0.0 => Err(invalid(format!("{} must be non-negative, got {}", stage, spec))),
        _ => Err(invalid(format!("{} must be an integer, got {}", stage, spec))),
    }
}

fn check_output_field(field: &str) -> Result<()> {
    if field.is_empty() || field.starts_with('$') || field.split('.').any(|p| p.is_empty()) {
        return Err(invalid(format!("Invalid output field name: '{}'", field)));
    }
    Ok(())
}

impl ProjectStage {
    fn from_json(spec: &Value, max_depth: usize, add_fields: bool) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| invalid("$project must be an object"))?;

        let mut id = ProjectField::Include;
        let mut fields: Vec<(String, ProjectField)> = Vec::with_capacity(obj.len());

        for (field, value) in obj {
            check_output_field(field)?;
            let project_field = match value {
                _ if add_fields => ProjectField::Computed(Expression::parse(value, max_depth)?),
                Value::Bool(true) => ProjectField::Include,
                Value::Bool(false) => ProjectField::Exclude,
                Value::Number(n) if n.as_f64() == Some(0.0) => ProjectField::Exclude,
                Value::Number(_) => ProjectField::Include,
                _ => ProjectField::Computed(Expression::parse(value, max_depth)?),
            };

            if field == ID_FIELD {
                id = project_field;
                continue;
            }
            if let Some((other, _)) = fields.iter().find(|(f, _)| paths_overlap(f, field)) {
                return Err(invalid(format!("Path collision between '{}' and '{}'", other, field)));
            }
            fields.push((field.clone(), project_field));
        }

        let excludes = fields.iter().any(|(_, f)| matches!(f, ProjectField::Exclude));
        let includes = fields.iter().any(|(_, f)| !matches!(f, ProjectField::Exclude));
        if excludes && includes {
            return Err(invalid("Cannot mix exclusion with inclusion or computed fields"));
        }

        Ok(ProjectStage {
            passthrough: add_fields || excludes || (fields.is_empty() && matches!(id, ProjectField::Exclude)),
            fields,
            id,
        })
    }

    fn project_document(&self, doc: &Value) -> Result<Value> {
        let source = doc.as_object().cloned().unwrap_or_default();
        let mut result = Map::new();

        // _id first, like stored documents
        match &self.id {
            ProjectField::Include => {
                if let Some(id) = source.get(ID_FIELD) {
                    result.insert(ID_FIELD.to_string(), id.clone());
                }
            }
            ProjectField::Exclude => {}
            ProjectField::Computed(expr) => {
                result.insert(ID_FIELD.to_string(), expr.evaluate(doc)?);
            }
        }

        if self.passthrough {
            for (key, value) in &source {
                if key != ID_FIELD {
                    result.insert(key.clone(), value.clone());
                }
            }
        }

        for (field, action) in &self.fields {
            match action {
                ProjectField::Include => copy_path(&source, field, &mut result),
                ProjectField::Exclude => {
                    crate::document::remove_path(&mut result, field);
                }
                ProjectField::Computed(expr) => {
                    // a bare reference to a missing field produces no output field
                    if let Expression::FieldRef(path) = expr {
                        if get_path(doc, path).is_none() {
                            continue;
                        }
                    }
                    let value = expr.evaluate(doc)?;
                    if !set_path(&mut result, field, value) {
                        return Err(invalid(format!("Cannot set '{}': parent is not a document", field)));
                    }
                }
            }
        }

        Ok(Value::Object(result))
    }
}

impl GroupStage {
    fn from_json(spec: &Value, max_depth: usize) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| invalid("$group must be an object"))?;

        let id_value = obj
            .get(ID_FIELD)
            .ok_or_else(|| invalid("Group stage must have _id field"))?;
        let id = Expression::parse(id_value, max_depth)?;

        let mut accumulators = Vec::with_capacity(obj.len() - 1);
        for (field, value) in obj {
            if field == ID_FIELD {
                continue;
            }
            if field.starts_with('$') || field.contains('.') || field.is_empty() {
                return Err(invalid(format!("Invalid accumulator field name: '{}'", field)));
            }
            accumulators.push((field.clone(), Accumulator::from_json(value, max_depth)?));
        }

        Ok(GroupStage { id, accumulators })
    }

    /// One output record per distinct key, in first-seen order
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut positions: BTreeMap<OrderedValue, usize> = BTreeMap::new();
        let mut groups: Vec<(Value, Vec<AccumulatorState>)> = Vec::new();

        for doc in &docs {
            let key = self.id.evaluate(doc)?;
            let position = match positions.get(&OrderedValue(key.clone())) {
                Some(&position) => position,
                None => {
                    let states = self.accumulators.iter().map(|(_, acc)| acc.init()).collect();
                    groups.push((key.clone(), states));
                    positions.insert(OrderedValue(key), groups.len() - 1);
                    groups.len() - 1
                }
            };

            let (_, states) = &mut groups[position];
            for ((_, accumulator), state) in self.accumulators.iter().zip(states.iter_mut()) {
                accumulator.accumulate(state, doc)?;
            }
        }

        log::debug!("$group produced {} groups from {} documents", groups.len(), docs.len());

        Ok(groups
            .into_iter()
            .map(|(key, states)| {
                let mut result = Map::with_capacity(states.len() + 1);
                result.insert(ID_FIELD.to_string(), key);
                for ((field, _), state) in self.accumulators.iter().zip(states) {
                    result.insert(field.clone(), state.finish());
                }
                Value::Object(result)
            })
            .collect())
    }
}

impl Accumulator {
    fn from_json(spec: &Value, max_depth: usize) -> Result<Self> {
        let obj = match spec {
            Value::Object(obj) if obj.len() == 1 => obj,
            _ => return Err(invalid("Accumulator must have exactly one operator")),
        };
        let (op, value) = obj
            .iter()
            .next()
            .ok_or_else(|| invalid("Accumulator must have exactly one operator"))?;

        if op == "$count" {
            return match value {
                Value::Object(args) if args.is_empty() => Ok(Accumulator::Count),
                _ => Err(invalid("$count accumulator takes no arguments")),
            };
        }

        let expr = Expression::parse(value, max_depth)?;
        match op.as_str() {
            "$sum" => Ok(Accumulator::Sum(expr)),
            "$avg" => Ok(Accumulator::Avg(expr)),
            "$min" => Ok(Accumulator::Min(expr)),
            "$max" => Ok(Accumulator::Max(expr)),
            "$first" => Ok(Accumulator::First(expr)),
            "$last" => Ok(Accumulator::Last(expr)),
            _ => Err(invalid(format!("Unknown accumulator: {}", op))),
        }
    }

    fn init(&self) -> AccumulatorState {
        match self {
            Accumulator::Sum(_) => AccumulatorState::Sum(Num::Int(0)),
            Accumulator::Avg(_) => AccumulatorState::Avg { sum: 0.0, count: 0 },
            Accumulator::Min(_) => AccumulatorState::Min(None),
            Accumulator::Max(_) => AccumulatorState::Max(None),
            Accumulator::First(_) => AccumulatorState::First(None),
            Accumulator::Last(_) => AccumulatorState::Last(Value::Null),
            Accumulator::Count => AccumulatorState::Count(0),
        }
    }

    /// Non-numeric values are ignored by $sum/$avg, nulls by $min/$max
    fn accumulate(&self, state: &mut AccumulatorState, doc: &Value) -> Result<()> {
        match (self, state) {
            (Accumulator::Sum(expr), AccumulatorState::Sum(sum)) => {
                if let Value::Number(n) = expr.evaluate(doc)? {
                    *sum = sum.add(Num::from_number(&n));
                }
            }
            (Accumulator::Avg(expr), AccumulatorState::Avg { sum, count }) => {
                if let Value::Number(n) = expr.evaluate(doc)? {
                    *sum += n.as_f64().unwrap_or(0.0);
                    *count += 1;
                }
            }
            (Accumulator::Min(expr), AccumulatorState::Min(current)) => {
                let value = expr.evaluate(doc)?;
                let replace = !value.is_null()
                    && current.as_ref().map_or(true, |c| compare_values(&value, c).is_lt());
                if replace {
                    *current = Some(value);
                }
            }
            (Accumulator::Max(expr), AccumulatorState::Max(current)) => {
                let value = expr.evaluate(doc)?;
                let replace = !value.is_null()
                    && current.as_ref().map_or(true, |c| compare_values(&value, c).is_gt());
                if replace {
                    *current = Some(value);
                }
            }
            (Accumulator::First(expr), AccumulatorState::First(current)) => {
                if current.is_none() {
                    *current = Some(expr.evaluate(doc)?);
                }
            }
            (Accumulator::Last(expr), AccumulatorState::Last(current)) => {
                *current = expr.evaluate(doc)?;
            }
            (Accumulator::Count, AccumulatorState::Count(count)) => *count += 1,
            _ => {}
        }
        Ok(())
    }
}

impl AccumulatorState {
    fn finish(self) -> Value {
        match self {
            AccumulatorState::Sum(sum) => sum.into_value(),
            AccumulatorState::Avg { count: 0, .. } => Value::Null,
            AccumulatorState::Avg { sum, count } => Num::Float(sum / count as f64).into_value(),
            AccumulatorState::Min(v) | AccumulatorState::Max(v) | AccumulatorState::First(v) => {
                v.unwrap_or(Value::Null)
            }
            AccumulatorState::Last(v) => v,
            AccumulatorState::Count(n) => Value::from(n),
        }
    }
}
