//! # Coordinate Query Builder
//!
//! Turns a set of [`ScopePair`]s and a coordinate filter into a structured [`Query`]:
//!
//! ```text
//! (scope disjunction) AND (coordinate conjunction)
//! ```
//!
//! Values never appear in the predicate tree. Every value is carried in
//! [`BoundParams`] and referenced from the tree by parameter name. Only coordinate
//! field names, which come from a format's fixed coordinate schema and are
//! validated here, are part of the structure.
//!
//! List and count queries share one predicate builder and differ only in their
//! [`Projection`]:
//!
//! ```rust
//! use depot_server::query::{self, Projection};
//! use depot_server::types::{CoordinateFilter, Paging, ScopePair};
//!
//! let scopes = vec![ScopePair::new("storage0", "npm-group")?];
//! let filter = CoordinateFilter::new().with("name", "Lodash");
//! let prepared = query::prepare_parameters(&filter, false)?;
//!
//! let list = query::build_coordinates_query(&scopes, &prepared, Paging::unbounded(), None, false)?;
//! let count = query::build_count_query(&scopes, &prepared, false, Projection::Count);
//! assert_eq!(list.predicate, count.predicate);
//! assert_eq!(list.params.get("coordinates_name"), Some("%lodash%"));
//! # Ok::<(), depot_server::AppError>(())
//! ```

use crate::error::{AppError, AppResult};
use crate::types::{CoordinateFilter, Paging, ScopePair};
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Order-by name selecting the artifact's stable identity instead of a coordinate.
pub const IDENTITY_ORDER: &str = "uuid";

const COORDINATE_PARAM_PREFIX: &str = "coordinates_";

/// Attribute of an artifact entry a predicate can refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    StorageId,
    RepositoryId,
    Coordinate(String),
}

/// Left-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Field(Field),
    /// Lower-cased field value
    Lower(Field),
}

/// Predicate tree. Comparisons reference a bound parameter by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    True,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Eq(Operand, String),
    /// SQL `LIKE` semantics: `%` any run, `_` one char, `\` escapes
    Like(Operand, String),
}

impl Predicate {
    /// Conjunction that drops `True` terms and collapses to `True` when empty.
    pub fn all(terms: Vec<Predicate>) -> Predicate {
        let mut terms: Vec<_> = terms
            .into_iter()
            .filter(|t| *t != Predicate::True)
            .collect();
        match terms.len() {
            0 => Predicate::True,
            1 => terms.remove(0),
            _ => Predicate::And(terms),
        }
    }

    /// Disjunction that collapses to `True` when empty.
    pub fn any(mut terms: Vec<Predicate>) -> Predicate {
        match terms.len() {
            0 => Predicate::True,
            1 => terms.remove(0),
            _ => Predicate::Or(terms),
        }
    }
}

/// Ordered parameter bindings passed alongside a predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundParams(Vec<(String, String)>);

impl BoundParams {
    fn bind(&mut self, name: String, value: impl Into<String>) -> String {
        self.0.push((name.clone(), value.into()));
        name
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderBy {
    Identity,
    Coordinate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Rows,
    Count,
    /// Number of distinct coordinate sets among matching entries
    CountDistinctCoordinates,
}

/// A fully built, parameterized query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub projection: Projection,
    pub predicate: Predicate,
    pub params: BoundParams,
    pub order_by: Option<OrderBy>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

/// Coordinate filter after null-dropping, case folding and strict/fuzzy wrapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedCoordinates(IndexMap<String, String>);

impl PreparedCoordinates {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn field_name_regex() -> &'static Regex {
    static FIELD_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    FIELD_NAME_REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").unwrap_or_else(|e| {
            panic!("Failed to compile coordinate field name regex: {e}")
        })
    })
}

/// Check that a coordinate field name is a plain identifier.
pub fn validate_field_name(field: &str) -> AppResult<()> {
    if field_name_regex().is_match(field) {
        Ok(())
    } else {
        Err(AppError::InvalidFilter(format!(
            "Illegal coordinate field name: {field:?}"
        )))
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Normalize a coordinate filter into bindable values.
///
/// `None` values are dropped, values are lower-cased, and in fuzzy mode each value
/// is escaped and wrapped as `%value%` so it matches as a substring.
pub fn prepare_parameters(filter: &CoordinateFilter, strict: bool) -> AppResult<PreparedCoordinates> {
    let mut prepared = IndexMap::new();
    for (field, value) in filter.iter() {
        validate_field_name(field)?;
        let Some(value) = value else {
            continue;
        };
        let value = value.to_lowercase();
        let value = if strict {
            value
        } else {
            format!("%{}%", escape_like(&value))
        };
        prepared.insert(field.to_string(), value);
    }
    Ok(PreparedCoordinates(prepared))
}

fn build_predicate(
    scopes: &[ScopePair],
    coordinates: &PreparedCoordinates,
    strict: bool,
) -> (Predicate, BoundParams) {
    let mut params = BoundParams::default();

    let scope_clauses: Vec<Predicate> = scopes
        .iter()
        .enumerate()
        .map(|(idx, scope)| {
            let storage = params.bind(format!("storageId{idx}"), scope.storage_id());
            let repository = params.bind(format!("repositoryId{idx}"), scope.repository_id());
            Predicate::And(vec![
                Predicate::Eq(Operand::Field(Field::StorageId), storage),
                Predicate::Eq(Operand::Field(Field::RepositoryId), repository),
            ])
        })
        .collect();

    let coordinate_clauses: Vec<Predicate> = coordinates
        .0
        .iter()
        .map(|(field, value)| {
            let param = params.bind(format!("{COORDINATE_PARAM_PREFIX}{field}"), value.as_str());
            let operand = Operand::Lower(Field::Coordinate(field.clone()));
            if strict {
                Predicate::Eq(operand, param)
            } else {
                Predicate::Like(operand, param)
            }
        })
        .collect();

    let predicate = Predicate::all(vec![
        Predicate::any(scope_clauses),
        Predicate::all(coordinate_clauses),
    ]);
    (predicate, params)
}

fn resolve_order_by(order_by: Option<&str>) -> AppResult<Option<OrderBy>> {
    match order_by.map(str::trim) {
        None | Some("") => Ok(None),
        Some(IDENTITY_ORDER) => Ok(Some(OrderBy::Identity)),
        Some(field) => {
            validate_field_name(field)?;
            Ok(Some(OrderBy::Coordinate(field.to_string())))
        }
    }
}

/// Build a row query over `scopes` filtered by `coordinates`.
///
/// `order_by` of [`IDENTITY_ORDER`] orders by entry identity, any other name
/// orders by that coordinate, and `None` or blank leaves the order unspecified.
/// Zero `skip`/`limit` values are not applied.
///
/// # Errors
///
/// Returns `InvalidFilter` when `order_by` is not a plain field name.
pub fn build_coordinates_query(
    scopes: &[ScopePair],
    coordinates: &PreparedCoordinates,
    paging: Paging,
    order_by: Option<&str>,
    strict: bool,
) -> AppResult<Query> {
    let (predicate, params) = build_predicate(scopes, coordinates, strict);
    let query = Query {
        projection: Projection::Rows,
        predicate,
        params,
        order_by: resolve_order_by(order_by)?,
        skip: (paging.skip > 0).then_some(paging.skip),
        limit: (paging.limit > 0).then_some(paging.limit),
    };
    tracing::debug!(query = %query, "Built coordinates query");
    Ok(query)
}

/// Build a scalar count query with exactly the predicate the row query would use.
pub fn build_count_query(
    scopes: &[ScopePair],
    coordinates: &PreparedCoordinates,
    strict: bool,
    projection: Projection,
) -> Query {
    let (predicate, params) = build_predicate(scopes, coordinates, strict);
    let query = Query {
        projection,
        predicate,
        params,
        order_by: None,
        skip: None,
        limit: None,
    };
    tracing::debug!(query = %query, "Built count query");
    query
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::StorageId => f.write_str("storageId"),
            Field::RepositoryId => f.write_str("repositoryId"),
            Field::Coordinate(name) => write!(f, "coordinates.{name}"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field(field) => write!(f, "{field}"),
            Operand::Lower(field) => write!(f, "lower({field})"),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, terms: &[Predicate], op: &str) -> fmt::Result {
            for (i, term) in terms.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                match term {
                    Predicate::And(_) | Predicate::Or(_) => write!(f, "({term})")?,
                    _ => write!(f, "{term}")?,
                }
            }
            Ok(())
        }

        match self {
            Predicate::True => f.write_str("true"),
            Predicate::And(terms) => join(f, terms, "AND"),
            Predicate::Or(terms) => join(f, terms, "OR"),
            Predicate::Eq(operand, param) => write!(f, "{operand} = :{param}"),
            Predicate::Like(operand, param) => write!(f, "{operand} LIKE :{param}"),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let projection = match self.projection {
            Projection::Rows => "*",
            Projection::Count => "count(*)",
            Projection::CountDistinctCoordinates => "count(distinct(coordinates))",
        };
        write!(
            f,
            "SELECT {projection} FROM ArtifactEntry WHERE {}",
            self.predicate
        )?;
        match &self.order_by {
            Some(OrderBy::Identity) => write!(f, " ORDER BY {IDENTITY_ORDER}")?,
            Some(OrderBy::Coordinate(field)) => write!(f, " ORDER BY coordinates.{field}")?,
            None => {}
        }
        if let Some(skip) = self.skip {
            write!(f, " SKIP {skip}")?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}
