//! URI abstract syntax tree.
//!
//! Every node is already resolved against the EDM: segments carry the type
//! they produce, so later stages never re-walk the model to find out what a
//! path addresses. Nodes carry no source positions; two parses of
//! equivalent text compare equal.

use serde::Serialize;

use super::literal::Literal;
use crate::edm::OperationKind;
use crate::expr::Expression;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ODataUri {
    pub service_root: String,
    pub relative: RelativeUri,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelativeUri {
    ServiceDocument { query_options: Vec<QueryOption> },
    Metadata { query_options: Vec<QueryOption> },
    Batch,
    /// `$entity?$id=...`
    EntityId {
        id: String,
        query_options: Vec<QueryOption>,
    },
    ResourcePath(ResourcePathUri),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourcePathUri {
    pub path: Vec<PathSegment>,
    pub query_options: Vec<QueryOption>,
    pub target: PathTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub name: String,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "segment", rename_all = "snake_case")]
pub enum PathSegment {
    EntitySet {
        name: String,
        entity_type: String,
    },
    Singleton {
        name: String,
        entity_type: String,
    },
    Key {
        entity_type: String,
        keys: Vec<KeyValue>,
        /// `(K1=v1,...)` rather than the bare `(v)` form.
        named: bool,
    },
    Navigation {
        name: String,
        target_type: String,
        collection: bool,
    },
    Property {
        name: String,
        type_name: String,
        collection: bool,
    },
    TypeCast {
        type_name: String,
    },
    Operation {
        /// Name as written: an import name or a qualified operation name.
        name: String,
        operation: String,
        kind: OperationKind,
        parameters: Vec<KeyValue>,
    },
    Count,
    Value,
    Ref,
}

/// What a resource path addresses after its last segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    EntityCollection,
    Entity,
    Complex,
    Primitive,
    Count,
    RawValue,
    Reference,
    /// Action without a return type.
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathTarget {
    pub kind: TargetKind,
    pub type_name: Option<String>,
    pub collection: bool,
    /// Entity set the addressed entities belong to, when known.
    pub entity_set: Option<String>,
}

impl PathTarget {
    pub fn is_entity(&self) -> bool {
        matches!(self.kind, TargetKind::Entity | TargetKind::EntityCollection)
    }
}

// =============================================================================
// QUERY OPTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "option", content = "value", rename_all = "snake_case")]
pub enum QueryOption {
    Filter(Expression),
    Expand(Vec<ExpandItem>),
    Select(Vec<SelectItem>),
    OrderBy(Vec<OrderByItem>),
    Top(u64),
    Skip(u64),
    Count(bool),
    Search(String),
    Format(String),
    SkipToken(String),
    Levels(Levels),
    Id(String),
    /// Anything outside the canonical list, including `@alias` parameters.
    Custom { name: String, value: String },
}

impl QueryOption {
    pub fn name(&self) -> &str {
        match self {
            QueryOption::Filter(_) => "$filter",
            QueryOption::Expand(_) => "$expand",
            QueryOption::Select(_) => "$select",
            QueryOption::OrderBy(_) => "$orderby",
            QueryOption::Top(_) => "$top",
            QueryOption::Skip(_) => "$skip",
            QueryOption::Count(_) => "$count",
            QueryOption::Search(_) => "$search",
            QueryOption::Format(_) => "$format",
            QueryOption::SkipToken(_) => "$skiptoken",
            QueryOption::Levels(_) => "$levels",
            QueryOption::Id(_) => "$id",
            QueryOption::Custom { name, .. } => name,
        }
    }

    pub fn value_string(&self) -> String {
        match self {
            QueryOption::Filter(e) => e.to_string(),
            QueryOption::Expand(items) => join(items.iter().map(ExpandItem::to_uri_string), ","),
            QueryOption::Select(items) => join(items.iter().map(SelectItem::to_uri_string), ","),
            QueryOption::OrderBy(items) => join(items.iter().map(OrderByItem::to_uri_string), ","),
            QueryOption::Top(n) | QueryOption::Skip(n) => n.to_string(),
            QueryOption::Count(b) => b.to_string(),
            QueryOption::Search(s)
            | QueryOption::Format(s)
            | QueryOption::SkipToken(s)
            | QueryOption::Id(s) => s.clone(),
            QueryOption::Levels(l) => l.to_string(),
            QueryOption::Custom { value, .. } => value.clone(),
        }
    }

    pub fn is_system(&self) -> bool {
        !matches!(self, QueryOption::Custom { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Levels {
    Max,
    Depth(u32),
}

impl std::fmt::Display for Levels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Levels::Max => f.write_str("max"),
            Levels::Depth(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpandPath {
    All,
    Navigation {
        /// Complex properties traversed, then the navigation property.
        segments: Vec<String>,
        target_type: String,
        collection: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpandItem {
    pub path: ExpandPath,
    /// `Nav/$ref`
    pub ref_only: bool,
    pub options: Vec<QueryOption>,
}

impl ExpandItem {
    pub fn to_uri_string(&self) -> String {
        let mut out = match &self.path {
            ExpandPath::All => "*".to_string(),
            ExpandPath::Navigation { segments, .. } => segments.join("/"),
        };
        if self.ref_only {
            out.push_str("/$ref");
        }
        if !self.options.is_empty() {
            let nested = join(
                self.options
                    .iter()
                    .map(|o| format!("{}={}", o.name(), o.value_string())),
                ";",
            );
            out.push_str(&format!("({nested})"));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum SelectItem {
    All,
    Path(Vec<String>),
}

impl SelectItem {
    pub fn to_uri_string(&self) -> String {
        match self {
            SelectItem::All => "*".to_string(),
            SelectItem::Path(segments) => segments.join("/"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderByItem {
    pub expression: Expression,
    pub descending: bool,
}

impl OrderByItem {
    pub fn to_uri_string(&self) -> String {
        if self.descending {
            format!("{} desc", self.expression)
        } else {
            self.expression.to_string()
        }
    }
}

// =============================================================================
// SERIALISATION
// =============================================================================

fn join(items: impl Iterator<Item = String>, sep: &str) -> String {
    items.collect::<Vec<_>>().join(sep)
}

/// Percent-encode the characters that would otherwise be read as URI
/// delimiters when the text is parsed again.
fn escape(text: &str, extra: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '%' || c == '&' || c == '#' || extra.contains(&c) {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

fn options_string(options: &[QueryOption]) -> String {
    if options.is_empty() {
        return String::new();
    }
    let pairs = options
        .iter()
        .map(|o| format!("{}={}", escape(o.name(), &['=']), escape(&o.value_string(), &[])));
    format!("?{}", join(pairs, "&"))
}

impl PathSegment {
    fn to_uri_string(&self) -> String {
        match self {
            PathSegment::EntitySet { name, .. }
            | PathSegment::Singleton { name, .. }
            | PathSegment::Navigation { name, .. }
            | PathSegment::Property { name, .. } => name.clone(),
            PathSegment::TypeCast { type_name } => type_name.clone(),
            PathSegment::Key { keys, named, .. } => {
                if *named {
                    let pairs = keys
                        .iter()
                        .map(|k| format!("{}={}", k.name, k.value.to_uri_string()));
                    format!("({})", join(pairs, ","))
                } else {
                    let value = keys.first().map(|k| k.value.to_uri_string()).unwrap_or_default();
                    format!("({value})")
                }
            }
            PathSegment::Operation {
                name,
                kind,
                parameters,
                ..
            } => match kind {
                OperationKind::Action => name.clone(),
                OperationKind::Function => {
                    let pairs = parameters
                        .iter()
                        .map(|p| format!("{}={}", p.name, p.value.to_uri_string()));
                    format!("{name}({})", join(pairs, ","))
                }
            },
            PathSegment::Count => "$count".to_string(),
            PathSegment::Value => "$value".to_string(),
            PathSegment::Ref => "$ref".to_string(),
        }
    }
}

impl ResourcePathUri {
    /// Path text relative to the service root, without query options.
    pub fn path_string(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            let text = escape(&segment.to_uri_string(), &['?']);
            if !matches!(segment, PathSegment::Key { .. }) && !out.is_empty() {
                out.push('/');
            }
            out.push_str(&text);
        }
        out
    }

    pub fn option(&self, name: &str) -> Option<&QueryOption> {
        self.query_options.iter().find(|o| o.name() == name)
    }

    pub fn top(&self) -> Option<u64> {
        self.query_options.iter().find_map(|o| match o {
            QueryOption::Top(n) => Some(*n),
            _ => None,
        })
    }

    pub fn skip(&self) -> Option<u64> {
        self.query_options.iter().find_map(|o| match o {
            QueryOption::Skip(n) => Some(*n),
            _ => None,
        })
    }

    pub fn count_requested(&self) -> bool {
        self.query_options
            .iter()
            .any(|o| matches!(o, QueryOption::Count(true)))
    }

    pub fn filter(&self) -> Option<&Expression> {
        self.query_options.iter().find_map(|o| match o {
            QueryOption::Filter(e) => Some(e),
            _ => None,
        })
    }

    /// Key values of the last key segment, if the path ends on one.
    pub fn last_keys(&self) -> Option<&[KeyValue]> {
        self.path.iter().rev().find_map(|s| match s {
            PathSegment::Key { keys, .. } => Some(keys.as_slice()),
            _ => None,
        })
    }
}

impl RelativeUri {
    pub fn query_options(&self) -> &[QueryOption] {
        match self {
            RelativeUri::ServiceDocument { query_options }
            | RelativeUri::Metadata { query_options }
            | RelativeUri::EntityId { query_options, .. } => query_options,
            RelativeUri::ResourcePath(r) => &r.query_options,
            RelativeUri::Batch => &[],
        }
    }

    /// Short label for logs and error targets.
    pub fn describe(&self) -> String {
        match self {
            RelativeUri::ServiceDocument { .. } => "service document".to_string(),
            RelativeUri::Metadata { .. } => "$metadata".to_string(),
            RelativeUri::Batch => "$batch".to_string(),
            RelativeUri::EntityId { id, .. } => format!("$entity({id})"),
            RelativeUri::ResourcePath(r) => r.path_string(),
        }
    }

    pub fn to_uri_string(&self) -> String {
        match self {
            RelativeUri::ServiceDocument { query_options } => options_string(query_options),
            RelativeUri::Metadata { query_options } => {
                format!("$metadata{}", options_string(query_options))
            }
            RelativeUri::Batch => "$batch".to_string(),
            RelativeUri::EntityId { id, query_options } => {
                let mut options = vec![QueryOption::Id(id.clone())];
                options.extend(query_options.iter().cloned());
                format!("$entity{}", options_string(&options))
            }
            RelativeUri::ResourcePath(r) => {
                format!("{}{}", r.path_string(), options_string(&r.query_options))
            }
        }
    }
}

impl ODataUri {
    /// Canonical URI text; parsing it again yields an equal AST.
    pub fn to_uri_string(&self) -> String {
        format!("{}/{}", self.service_root, self.relative.to_uri_string())
    }

    pub fn resource_path(&self) -> Option<&ResourcePathUri> {
        match &self.relative {
            RelativeUri::ResourcePath(r) => Some(r),
            _ => None,
        }
    }

    pub fn query_options(&self) -> &[QueryOption] {
        self.relative.query_options()
    }

    /// Value of `$format`, if given.
    pub fn format(&self) -> Option<&str> {
        self.query_options().iter().find_map(|o| match o {
            QueryOption::Format(f) => Some(f.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers_key(named: bool) -> ResourcePathUri {
        ResourcePathUri {
            path: vec![
                PathSegment::EntitySet {
                    name: "Customers".into(),
                    entity_type: "Demo.Customer".into(),
                },
                PathSegment::Key {
                    entity_type: "Demo.Customer".into(),
                    keys: vec![KeyValue {
                        name: "Id".into(),
                        value: Literal::String("A&B".into()),
                    }],
                    named,
                },
                PathSegment::Navigation {
                    name: "Orders".into(),
                    target_type: "Demo.Order".into(),
                    collection: true,
                },
                PathSegment::Count,
            ],
            query_options: vec![QueryOption::Top(5), QueryOption::Custom {
                name: "x".into(),
                value: "a&b".into(),
            }],
            target: PathTarget {
                kind: TargetKind::Count,
                type_name: Some("Edm.Int64".into()),
                collection: false,
                entity_set: Some("Orders".into()),
            },
        }
    }

    #[test]
    fn key_segments_attach_without_slash() {
        assert_eq!(
            customers_key(false).path_string(),
            "Customers('A%26B')/Orders/$count"
        );
        assert_eq!(
            customers_key(true).path_string(),
            "Customers(Id='A%26B')/Orders/$count"
        );
    }

    #[test]
    fn options_are_escaped() {
        let uri = ODataUri {
            service_root: "/odata.svc".into(),
            relative: RelativeUri::ResourcePath(customers_key(false)),
        };
        assert_eq!(
            uri.to_uri_string(),
            "/odata.svc/Customers('A%26B')/Orders/$count?$top=5&x=a%26b"
        );
    }

    #[test]
    fn pseudo_resources() {
        assert_eq!(RelativeUri::Batch.to_uri_string(), "$batch");
        assert_eq!(
            RelativeUri::Metadata {
                query_options: vec![QueryOption::Format("xml".into())]
            }
            .to_uri_string(),
            "$metadata?$format=xml"
        );
        assert_eq!(
            RelativeUri::ServiceDocument {
                query_options: vec![]
            }
            .to_uri_string(),
            ""
        );
    }

    #[test]
    fn expand_item_with_nested_options() {
        let item = ExpandItem {
            path: ExpandPath::Navigation {
                segments: vec!["Orders".into()],
                target_type: "Demo.Order".into(),
                collection: true,
            },
            ref_only: false,
            options: vec![
                QueryOption::Select(vec![SelectItem::Path(vec!["Id".into()])]),
                QueryOption::Top(2),
            ],
        };
        assert_eq!(item.to_uri_string(), "Orders($select=Id;$top=2)");
    }
}
