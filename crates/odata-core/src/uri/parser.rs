//! Resource path resolution
//!
//! The relative URI is split into `/`-delimited segments (quotes and
//! parentheses protect embedded slashes), each segment is percent-decoded
//! and then resolved against the EDM in order. Every segment is typed as
//! it is resolved; an unknown name fails immediately with its position.

use std::collections::HashMap;

use nom::{
    character::complete::char,
    combinator::{all_consuming, opt},
    multi::{separated_list0, separated_list1},
    sequence::{pair, separated_pair, terminated},
    IResult,
};
use tracing::trace;

use super::ast::{
    KeyValue, ODataUri, PathSegment, PathTarget, QueryOption, RelativeUri, ResourcePathUri,
    TargetKind,
};
use super::literal::{identifier, literal, parse_literal, Literal};
use super::query::{self, QueryContext, RawOption};
use super::UriParseError;
use crate::config::{ServiceRoot, DEFAULT_MAX_EXPAND_DEPTH};
use crate::edm::{EdmType, EntityDataModel, Operation, OperationKind, TypeRef};

type Result<T> = std::result::Result<T, UriParseError>;

pub struct UriParser<'m> {
    model: &'m EntityDataModel,
    root: &'m ServiceRoot,
    max_expand_depth: usize,
}

impl<'m> UriParser<'m> {
    pub fn new(model: &'m EntityDataModel, root: &'m ServiceRoot) -> Self {
        Self {
            model,
            root,
            max_expand_depth: DEFAULT_MAX_EXPAND_DEPTH,
        }
    }

    pub fn with_max_expand_depth(mut self, depth: usize) -> Self {
        self.max_expand_depth = depth;
        self
    }

    /// Parse an absolute or root-relative URI.
    pub fn parse(&self, uri: &str) -> Result<ODataUri> {
        let (service_root, relative) =
            self.root
                .split(uri)
                .ok_or_else(|| UriParseError::MissingServiceRoot {
                    pattern: self.root.pattern().to_string(),
                })?;
        let relative = self.parse_relative(relative)?;
        trace!(uri, target = %relative.describe(), "parsed uri");
        Ok(ODataUri {
            service_root: service_root.to_string(),
            relative,
        })
    }

    /// Parse the part after the service root.
    pub fn parse_relative(&self, relative: &str) -> Result<RelativeUri> {
        let relative = relative.split('#').next().unwrap_or_default();
        let (path, query_text) = match relative.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (relative, None),
        };
        let raw_options = match query_text {
            Some(q) => query::split_query(q)?,
            None => Vec::new(),
        };

        let segments = split_path(path)?;
        let Some((_, first)) = segments.first() else {
            return Ok(RelativeUri::ServiceDocument {
                query_options: self.options(None, raw_options)?,
            });
        };

        match first.as_str() {
            "$metadata" | "$batch" | "$entity" if segments.len() > 1 => {
                Err(UriParseError::InvalidSegment {
                    segment: segments[1].1.clone(),
                    reason: format!("nothing may follow {first}"),
                })
            }
            "$metadata" => Ok(RelativeUri::Metadata {
                query_options: self.options(None, raw_options)?,
            }),
            "$batch" => match raw_options.first() {
                Some(option) => Err(UriParseError::InvalidQueryOption {
                    option: option.name.clone(),
                    value: option.value.clone(),
                    reason: "$batch takes no query options".to_string(),
                }),
                None => Ok(RelativeUri::Batch),
            },
            "$entity" => self.entity_id(raw_options),
            "$all" => Err(UriParseError::Unsupported {
                construct: "$all".to_string(),
            }),
            s if s.starts_with("$crossjoin") => Err(UriParseError::Unsupported {
                construct: "$crossjoin".to_string(),
            }),
            _ => {
                let aliases = aliases(&raw_options);
                let (path, target, subject) = self.resolve_path(&segments, &aliases)?;
                let subject = subject.map(|t| (t, target.collection));
                Ok(RelativeUri::ResourcePath(ResourcePathUri {
                    query_options: self.options(subject, raw_options)?,
                    path,
                    target,
                }))
            }
        }
    }

    fn options(
        &self,
        subject: Option<(String, bool)>,
        raw: Vec<RawOption>,
    ) -> Result<Vec<QueryOption>> {
        let ctx = QueryContext::new(self.model, subject, self.max_expand_depth);
        query::parse_options(&ctx, raw)
    }

    fn entity_id(&self, mut raw: Vec<RawOption>) -> Result<RelativeUri> {
        let index = raw
            .iter()
            .position(|o| o.name == "$id")
            .ok_or_else(|| UriParseError::InvalidSegment {
                segment: "$entity".to_string(),
                reason: "$id query option is required".to_string(),
            })?;
        let id = raw.remove(index).value;
        if raw.iter().any(|o| o.name == "$id") {
            return Err(UriParseError::DuplicateQueryOption {
                option: "$id".to_string(),
            });
        }

        // Type the remaining options by the entity the id points at.
        let id_path = self
            .root
            .split(&id)
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_else(|| id.trim_start_matches('/').to_string());
        let subject = split_path(&id_path)
            .ok()
            .and_then(|segments| self.resolve_path(&segments, &HashMap::new()).ok())
            .and_then(|(_, target, _)| target.type_name.map(|t| (t, false)));

        Ok(RelativeUri::EntityId {
            id,
            query_options: self.options(subject, raw)?,
        })
    }

    // ── Path resolution ──────────────────────────────────────────

    /// Returns the segments, the final target, and the structured or
    /// primitive type query options apply to.
    fn resolve_path(
        &self,
        segments: &[(usize, String)],
        aliases: &HashMap<String, String>,
    ) -> Result<(Vec<PathSegment>, PathTarget, Option<String>)> {
        let mut resolver = Resolver {
            model: self.model,
            aliases,
            path: Vec::new(),
            target: PathTarget {
                kind: TargetKind::EntityCollection,
                type_name: None,
                collection: true,
                entity_set: None,
            },
            subject: None,
            terminal: None,
        };
        for (index, (position, text)) in segments.iter().enumerate() {
            if text.is_empty() {
                // Trailing slash.
                if index + 1 == segments.len() {
                    break;
                }
                return Err(UriParseError::UnknownSegment {
                    segment: String::new(),
                    position: *position,
                });
            }
            let segment = split_segment(text, *position)?;
            if index == 0 {
                resolver.first(segment)?;
            } else {
                resolver.next(segment)?;
            }
        }
        Ok((resolver.path, resolver.target, resolver.subject))
    }
}

/// One decoded segment: `name` plus its parenthesised groups.
struct Segment<'a> {
    name: &'a str,
    groups: Vec<&'a str>,
    position: usize,
}

struct Resolver<'a> {
    model: &'a EntityDataModel,
    aliases: &'a HashMap<String, String>,
    path: Vec<PathSegment>,
    target: PathTarget,
    /// Type that query options are evaluated against.
    subject: Option<String>,
    /// Set once a segment that must be last has been seen.
    terminal: Option<String>,
}

impl<'a> Resolver<'a> {
    fn first(&mut self, segment: Segment<'_>) -> Result<()> {
        let model = self.model;
        let name = segment.name;
        if let Some(set) = model.entity_set(name) {
            self.path.push(PathSegment::EntitySet {
                name: set.name.clone(),
                entity_type: set.entity_type.clone(),
            });
            self.set_target(TargetKind::EntityCollection, &set.entity_type, true);
            self.target.entity_set = Some(set.name.clone());
            return self.key_groups(&segment, &segment.groups);
        }
        if let Some(singleton) = model.singleton(name) {
            no_groups(&segment)?;
            self.path.push(PathSegment::Singleton {
                name: singleton.name.clone(),
                entity_type: singleton.entity_type.clone(),
            });
            self.set_target(TargetKind::Entity, &singleton.entity_type, false);
            return Ok(());
        }
        if let Some(import) = model.function_import(name).or_else(|| model.action_import(name)) {
            let operation = model.unbound_operation(&import.operation).ok_or_else(|| {
                UriParseError::UnknownSegment {
                    segment: name.to_string(),
                    position: segment.position,
                }
            })?;
            self.operation(&segment, operation, import.entity_set.clone())?;
            return Ok(());
        }
        Err(UriParseError::UnknownSegment {
            segment: name.to_string(),
            position: segment.position,
        })
    }

    fn next(&mut self, segment: Segment<'_>) -> Result<()> {
        if let Some(last) = &self.terminal {
            return Err(UriParseError::InvalidSegment {
                segment: segment.name.to_string(),
                reason: format!("no segment may follow {last}"),
            });
        }
        match segment.name {
            "$count" => return self.count(&segment),
            "$value" => return self.raw_value(&segment),
            "$ref" => return self.reference(&segment),
            _ => {}
        }
        if segment.name.contains('.') {
            return self.qualified(segment);
        }

        let current = self.target.type_name.clone().unwrap_or_default();
        if self.target.collection {
            return Err(UriParseError::InvalidSegment {
                segment: segment.name.to_string(),
                reason: format!(
                    "a collection of {current} must be narrowed by a key predicate or an operation first"
                ),
            });
        }
        let model = self.model;
        if let Some(nav) = model.navigation_property(&current, segment.name) {
            let entity_set = self.bound_set(segment.name);
            self.path.push(PathSegment::Navigation {
                name: nav.name.clone(),
                target_type: nav.target.clone(),
                collection: nav.collection,
            });
            if nav.collection {
                self.set_target(TargetKind::EntityCollection, &nav.target, true);
                self.target.entity_set = entity_set;
                return self.key_groups(&segment, &segment.groups);
            }
            no_groups(&segment)?;
            self.set_target(TargetKind::Entity, &nav.target, false);
            self.target.entity_set = entity_set;
            return Ok(());
        }
        if let Some(property) = model.structural_property(&current, segment.name) {
            no_groups(&segment)?;
            let type_ref = property.type_ref.clone();
            self.path.push(PathSegment::Property {
                name: property.name.clone(),
                type_name: type_ref.type_name.clone(),
                collection: type_ref.collection,
            });
            let kind = match model.get_type(&type_ref.type_name) {
                Some(EdmType::Complex(_)) => TargetKind::Complex,
                _ => TargetKind::Primitive,
            };
            self.set_target(kind, &type_ref.type_name, type_ref.collection);
            return Ok(());
        }
        Err(UriParseError::UnknownProperty {
            property: segment.name.to_string(),
            type_name: current,
        })
    }

    fn set_target(&mut self, kind: TargetKind, type_name: &str, collection: bool) {
        self.target.kind = kind;
        self.target.type_name = Some(type_name.to_string());
        self.target.collection = collection;
        if !matches!(kind, TargetKind::Entity | TargetKind::EntityCollection) {
            self.target.entity_set = None;
        }
        self.subject = Some(type_name.to_string());
    }

    /// Entity set a navigation property leads to, from the current set's bindings.
    fn bound_set(&self, navigation: &str) -> Option<String> {
        let set = self.model.entity_set(self.target.entity_set.as_deref()?)?;
        set.navigation_bindings
            .iter()
            .find(|b| b.path == navigation)
            .map(|b| b.target.clone())
    }

    /// Key predicate groups following an entity collection segment.
    fn key_groups(&mut self, segment: &Segment<'_>, groups: &[&str]) -> Result<()> {
        match groups {
            [] => Ok(()),
            [key] => {
                let entity_type = self.target.type_name.clone().unwrap_or_default();
                let raw = parse_key_predicate(key, &entity_type)?;
                let (keys, named) = resolve_keys(self.model, &entity_type, raw)?;
                self.path.push(PathSegment::Key {
                    entity_type: entity_type.clone(),
                    keys,
                    named,
                });
                self.target.kind = TargetKind::Entity;
                self.target.collection = false;
                Ok(())
            }
            _ => Err(UriParseError::InvalidSegment {
                segment: segment.name.to_string(),
                reason: "only one key predicate may follow a collection".to_string(),
            }),
        }
    }

    fn count(&mut self, segment: &Segment<'_>) -> Result<()> {
        no_groups(segment)?;
        let countable = self.target.collection
            && matches!(
                self.target.kind,
                TargetKind::EntityCollection | TargetKind::Complex | TargetKind::Primitive
            );
        if !countable {
            return Err(UriParseError::InvalidSegment {
                segment: "$count".to_string(),
                reason: "only collections can be counted".to_string(),
            });
        }
        self.path.push(PathSegment::Count);
        self.target.kind = TargetKind::Count;
        self.target.type_name = Some("Edm.Int64".to_string());
        self.target.collection = false;
        self.terminal = Some("$count".to_string());
        Ok(())
    }

    fn raw_value(&mut self, segment: &Segment<'_>) -> Result<()> {
        no_groups(segment)?;
        let streamable = match self.target.kind {
            TargetKind::Primitive => !self.target.collection,
            TargetKind::Entity => self
                .target
                .type_name
                .as_deref()
                .and_then(|t| self.model.entity_type(t))
                .is_some_and(|t| t.has_stream),
            _ => false,
        };
        if !streamable {
            return Err(UriParseError::InvalidSegment {
                segment: "$value".to_string(),
                reason: "only single primitive values and media entities have a raw value"
                    .to_string(),
            });
        }
        self.path.push(PathSegment::Value);
        self.target.kind = TargetKind::RawValue;
        self.terminal = Some("$value".to_string());
        Ok(())
    }

    fn reference(&mut self, segment: &Segment<'_>) -> Result<()> {
        no_groups(segment)?;
        if !self.target.is_entity() {
            return Err(UriParseError::InvalidSegment {
                segment: "$ref".to_string(),
                reason: "only entities have references".to_string(),
            });
        }
        self.path.push(PathSegment::Ref);
        self.target.kind = TargetKind::Reference;
        self.terminal = Some("$ref".to_string());
        Ok(())
    }

    /// A qualified name: type cast or bound operation.
    fn qualified(&mut self, segment: Segment<'_>) -> Result<()> {
        let model = self.model;
        let current = self.target.type_name.clone().unwrap_or_default();
        let structured = matches!(
            self.target.kind,
            TargetKind::Entity | TargetKind::EntityCollection | TargetKind::Complex
        );

        if model.get_type(segment.name).is_some() {
            if !structured || !model.is_derived_from(segment.name, &current) {
                return Err(UriParseError::InvalidSegment {
                    segment: segment.name.to_string(),
                    reason: format!("not a type derived from {current}"),
                });
            }
            self.path.push(PathSegment::TypeCast {
                type_name: segment.name.to_string(),
            });
            let (kind, collection) = (self.target.kind, self.target.collection);
            let entity_set = self.target.entity_set.clone();
            self.set_target(kind, segment.name, collection);
            self.target.entity_set = entity_set;
            if kind == TargetKind::EntityCollection {
                return self.key_groups(&segment, &segment.groups);
            }
            return no_groups(&segment);
        }

        if !model.operations(segment.name).is_empty() {
            let operation = model
                .bound_operation(segment.name, &current, self.target.collection)
                .ok_or_else(|| UriParseError::InvalidSegment {
                    segment: segment.name.to_string(),
                    reason: format!(
                        "no overload is bound to {}",
                        TypeRef {
                            collection: self.target.collection,
                            ..TypeRef::new(current.clone())
                        }
                        .display_name()
                    ),
                })?;
            let entity_set = self.target.entity_set.clone();
            return self.operation(&segment, operation, entity_set);
        }

        Err(UriParseError::UnknownSegment {
            segment: segment.name.to_string(),
            position: segment.position,
        })
    }

    fn operation(
        &mut self,
        segment: &Segment<'_>,
        operation: &Operation,
        entity_set: Option<String>,
    ) -> Result<()> {
        let (parameters, rest) = match operation.kind {
            OperationKind::Action => {
                if !segment.groups.is_empty() {
                    return Err(UriParseError::InvalidSegment {
                        segment: segment.name.to_string(),
                        reason: "action parameters are passed in the request body".to_string(),
                    });
                }
                (Vec::new(), &segment.groups[..])
            }
            OperationKind::Function => {
                let Some((params, rest)) = segment.groups.split_first() else {
                    return Err(UriParseError::InvalidSegment {
                        segment: segment.name.to_string(),
                        reason: "function calls require a parameter list".to_string(),
                    });
                };
                (self.function_parameters(segment.name, operation, params)?, rest)
            }
        };

        self.path.push(PathSegment::Operation {
            name: segment.name.to_string(),
            operation: operation.name.full(),
            kind: operation.kind,
            parameters,
        });

        match &operation.return_type {
            None => {
                self.target = PathTarget {
                    kind: TargetKind::Void,
                    type_name: None,
                    collection: false,
                    entity_set: None,
                };
                self.subject = None;
            }
            Some(returns) => {
                let kind = match self.model.get_type(&returns.type_name) {
                    Some(EdmType::Entity(_)) if returns.collection => TargetKind::EntityCollection,
                    Some(EdmType::Entity(_)) => TargetKind::Entity,
                    Some(EdmType::Complex(_)) => TargetKind::Complex,
                    _ => TargetKind::Primitive,
                };
                self.set_target(kind, &returns.type_name, returns.collection);
                if self.target.is_entity() {
                    self.target.entity_set = entity_set;
                }
            }
        }

        if operation.kind == OperationKind::Action || !operation.is_composable {
            if !rest.is_empty() {
                return Err(UriParseError::InvalidSegment {
                    segment: segment.name.to_string(),
                    reason: "operation result cannot be addressed further".to_string(),
                });
            }
            self.terminal = Some(segment.name.to_string());
            return Ok(());
        }
        if self.target.kind == TargetKind::EntityCollection {
            self.key_groups(segment, rest)
        } else if rest.is_empty() {
            Ok(())
        } else {
            Err(UriParseError::InvalidSegment {
                segment: segment.name.to_string(),
                reason: "key predicate on a non-collection result".to_string(),
            })
        }
    }

    fn function_parameters(
        &self,
        name: &str,
        operation: &Operation,
        text: &str,
    ) -> Result<Vec<KeyValue>> {
        let pairs = parse_parameter_list(text).ok_or_else(|| UriParseError::InvalidSegment {
            segment: name.to_string(),
            reason: format!("malformed parameter list '({text})'"),
        })?;

        let mut given: HashMap<&str, Literal> = HashMap::new();
        for (param, value) in pairs {
            let value = match value {
                ParamValue::Literal(l) => l,
                ParamValue::Alias(alias) => {
                    let raw = self.aliases.get(alias).ok_or_else(|| {
                        UriParseError::InvalidSegment {
                            segment: name.to_string(),
                            reason: format!("parameter alias {alias} is not defined"),
                        }
                    })?;
                    parse_literal(raw).map_err(|reason| UriParseError::LiteralType {
                        literal: raw.clone(),
                        target: format!("{name}/{param}"),
                        reason,
                    })?
                }
            };
            if given.insert(param, value).is_some() {
                return Err(UriParseError::InvalidSegment {
                    segment: name.to_string(),
                    reason: format!("parameter '{param}' is given more than once"),
                });
            }
        }

        let mut out = Vec::new();
        for declared in operation.call_parameters() {
            let target = format!("{name}/{}", declared.name);
            match given.remove(declared.name.as_str()) {
                Some(value) => out.push(KeyValue {
                    name: declared.name.clone(),
                    value: coerce_value(self.model, value, &declared.type_ref, &target)?,
                }),
                None if declared.type_ref.nullable => {}
                None => {
                    return Err(UriParseError::InvalidSegment {
                        segment: name.to_string(),
                        reason: format!("missing parameter '{}'", declared.name),
                    })
                }
            }
        }
        if let Some(extra) = given.keys().next() {
            return Err(UriParseError::InvalidSegment {
                segment: name.to_string(),
                reason: format!("'{extra}' is not a parameter of {}", operation.name),
            });
        }
        Ok(out)
    }
}

fn no_groups(segment: &Segment<'_>) -> Result<()> {
    if segment.groups.is_empty() {
        Ok(())
    } else {
        Err(UriParseError::InvalidSegment {
            segment: segment.name.to_string(),
            reason: "parentheses are not allowed here".to_string(),
        })
    }
}

fn aliases(options: &[RawOption]) -> HashMap<String, String> {
    options
        .iter()
        .filter(|o| o.name.starts_with('@'))
        .map(|o| (o.name.clone(), o.value.clone()))
        .collect()
}

// ============================================================================
// Keys
// ============================================================================

/// Validate a key predicate against an entity type's declared keys.
///
/// Returns the keys in declaration order and whether the named form was
/// used. Shared with the `$root` reference in expressions.
pub(crate) fn resolve_keys(
    model: &EntityDataModel,
    entity_type: &str,
    raw: Vec<(Option<String>, Literal)>,
) -> Result<(Vec<KeyValue>, bool)> {
    let invalid = |reason: String| UriParseError::InvalidKey {
        entity_type: entity_type.to_string(),
        reason,
    };
    let declared = model.key_properties(entity_type);
    if declared.is_empty() {
        return Err(invalid("type has no key".to_string()));
    }
    if raw.is_empty() {
        return Err(invalid("empty key predicate".to_string()));
    }

    let named = raw.iter().any(|(name, _)| name.is_some());
    if named && raw.iter().any(|(name, _)| name.is_none()) {
        return Err(invalid("cannot mix named and positional key values".to_string()));
    }

    let mut values: Vec<Option<Literal>> = vec![None; declared.len()];
    if named {
        for (name, value) in raw {
            let name = name.unwrap_or_default();
            let index = declared
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| invalid(format!("'{name}' is not a key property")))?;
            if values[index].replace(value).is_some() {
                return Err(invalid(format!("key '{name}' is given more than once")));
            }
        }
    } else if raw.len() == 1 && declared.len() == 1 {
        values[0] = raw.into_iter().next().map(|(_, v)| v);
    } else {
        return Err(invalid(format!(
            "expected {} named key value(s)",
            declared.len()
        )));
    }

    let mut keys = Vec::with_capacity(declared.len());
    for (property, value) in declared.iter().zip(values) {
        let value =
            value.ok_or_else(|| invalid(format!("missing key property '{}'", property.name)))?;
        if value == Literal::Null {
            return Err(invalid(format!("key '{}' cannot be null", property.name)));
        }
        let target = format!("{entity_type}/{}", property.name);
        keys.push(KeyValue {
            name: property.name.clone(),
            value: coerce_value(model, value, &property.type_ref, &target)?,
        });
    }
    Ok((keys, named))
}

/// Check a literal against a declared type (primitive, type definition or enum).
pub(crate) fn coerce_value(
    model: &EntityDataModel,
    value: Literal,
    type_ref: &TypeRef,
    target: &str,
) -> Result<Literal> {
    let text = value.to_uri_string();
    let mismatch = |reason: String| UriParseError::LiteralType {
        literal: text.clone(),
        target: target.to_string(),
        reason,
    };
    if type_ref.collection {
        return Err(UriParseError::Unsupported {
            construct: format!("collection-valued literal for {target}"),
        });
    }
    if let Some(enum_type) = model.enum_type(&type_ref.type_name) {
        return match &value {
            Literal::Null => Ok(value),
            Literal::Enum { type_name, member }
                if *type_name == type_ref.type_name && enum_type.member(member).is_some() =>
            {
                Ok(value)
            }
            _ => Err(mismatch(format!(
                "expected a member of {}",
                type_ref.type_name
            ))),
        };
    }
    let kind = model
        .primitive_kind(&type_ref.type_name)
        .ok_or_else(|| UriParseError::Unsupported {
            construct: format!("{} literal for {target}", type_ref.type_name),
        })?;
    value.coerce(kind, type_ref.max_length).map_err(mismatch)
}

fn key_predicate<'a>(
    input: &'a str,
) -> IResult<&'a str, Vec<(Option<&'a str>, Literal)>, nom::error::Error<&'a str>> {
    separated_list1(
        char(','),
        pair(opt(terminated(identifier, char('='))), literal),
    )(input)
}

fn parse_key_predicate(text: &str, entity_type: &str) -> Result<Vec<(Option<String>, Literal)>> {
    if text.trim().is_empty() {
        return Err(UriParseError::InvalidKey {
            entity_type: entity_type.to_string(),
            reason: "empty key predicate".to_string(),
        });
    }
    match all_consuming(key_predicate)(text) {
        Ok((_, pairs)) => Ok(pairs
            .into_iter()
            .map(|(name, value)| (name.map(str::to_string), value))
            .collect()),
        Err(_) => Err(UriParseError::InvalidKey {
            entity_type: entity_type.to_string(),
            reason: format!("malformed key predicate '({text})'"),
        }),
    }
}

enum ParamValue<'a> {
    Literal(Literal),
    Alias(&'a str),
}

fn param_value<'a>(input: &'a str) -> IResult<&'a str, ParamValue<'a>, nom::error::Error<&'a str>> {
    if let Some(rest) = input.strip_prefix('@') {
        let (after, _) = identifier::<nom::error::Error<&str>>(rest)?;
        let alias = &input[..input.len() - after.len()];
        return Ok((after, ParamValue::Alias(alias)));
    }
    let (rest, value) = literal::<nom::error::Error<&str>>(input)?;
    Ok((rest, ParamValue::Literal(value)))
}

fn parse_parameter_list(text: &str) -> Option<Vec<(&str, ParamValue<'_>)>> {
    let list = separated_list0(char(','), separated_pair(identifier, char('='), param_value));
    all_consuming(list)(text).ok().map(|(_, pairs)| pairs)
}

// ============================================================================
// Splitting
// ============================================================================

/// Split a relative path on `/` outside quotes and parentheses, then
/// percent-decode each piece. Returns `(byte offset, decoded text)`.
fn split_path(path: &str) -> Result<Vec<(usize, String)>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in path.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            '/' if !quoted && depth == 0 => {
                pieces.push((start, &path[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push((start, &path[start..]));

    pieces
        .into_iter()
        .map(|(offset, raw)| {
            urlencoding::decode(raw)
                .map(|s| (offset, s.into_owned()))
                .map_err(|_| UriParseError::Encoding {
                    fragment: raw.to_string(),
                })
        })
        .collect()
}

/// `Name(...)(...)` into the name and the text inside each group.
fn split_segment(text: &str, position: usize) -> Result<Segment<'_>> {
    let name_end = text.find('(').unwrap_or(text.len());
    let name = &text[..name_end];
    if name.is_empty() {
        return Err(UriParseError::syntax(position, "a segment name", text));
    }

    let mut groups = Vec::new();
    let mut rest = &text[name_end..];
    let mut offset = position + name_end;
    while !rest.is_empty() {
        if !rest.starts_with('(') {
            return Err(UriParseError::syntax(offset, "'('", rest));
        }
        let mut depth = 0usize;
        let mut quoted = false;
        let mut close = None;
        for (i, c) in rest.char_indices() {
            match c {
                '\'' => quoted = !quoted,
                '(' if !quoted => depth += 1,
                ')' if !quoted => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let close = close.ok_or_else(|| UriParseError::syntax(offset + rest.len(), "')'", rest))?;
        groups.push(&rest[1..close]);
        offset += close + 1;
        rest = &rest[close + 1..];
    }
    Ok(Segment {
        name,
        groups,
        position,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edm::build_model;
    use crate::edm::definition::*;
    use pretty_assertions::assert_eq;

    fn model() -> EntityDataModel {
        let address = ComplexDeclaration::new("Demo", "Address")
            .with_property(PropertyDeclaration::new("City", "Edm.String"));
        let customer = EntityDeclaration::new("Demo", "Customer")
            .with_key("Id", "Edm.String")
            .with_property(PropertyDeclaration::new("Name", "Edm.String").max_length(10))
            .with_property(PropertyDeclaration::new("Address", "Demo.Address"))
            .with_property(PropertyDeclaration::new("Tags", "Edm.String").collection())
            .with_navigation(NavigationDeclaration::many("Orders", "Demo.Order"))
            .in_entity_set("Customers")
            .with_binding("Orders", "Orders");
        let vip = EntityDeclaration::new("Demo", "VipCustomer")
            .derived_from("Demo.Customer")
            .with_property(PropertyDeclaration::new("Level", "Edm.Int32"));
        let order = EntityDeclaration::new("Demo", "Order")
            .with_key("Id", "Edm.Int32")
            .with_property(PropertyDeclaration::new("Amount", "Edm.Decimal"))
            .with_navigation(NavigationDeclaration::single("Customer", "Demo.Customer"))
            .in_entity_set("Orders");
        let line = EntityDeclaration::new("Demo", "Line")
            .with_key("OrderId", "Edm.Int32")
            .with_key("Region", "Edm.String")
            .in_entity_set("Lines");
        let top = OperationDeclaration::function("Demo", "TopCustomers")
            .with_parameter(PropertyDeclaration::new("count", "Edm.Int32").not_null())
            .returning("Demo.Customer", true)
            .imported_as("TopCustomers")
            .returning_from("Customers");
        let total = OperationDeclaration::function("Demo", "Total")
            .bound_to("Demo.Customer", false)
            .returning("Edm.Decimal", false);
        let reset = OperationDeclaration::action("Demo", "Reset").imported_as("Reset");
        build_model(
            "Container",
            &[
                address.into(),
                customer.into(),
                vip.into(),
                order.into(),
                line.into(),
                top.into(),
                total.into(),
                reset.into(),
            ],
        )
        .unwrap()
    }

    fn parse(uri: &str) -> Result<ODataUri> {
        let model = model();
        let root = ServiceRoot::new("/odata.svc").unwrap();
        UriParser::new(&model, &root).parse(uri)
    }

    fn target(uri: &str) -> PathTarget {
        parse(uri).unwrap().resource_path().unwrap().target.clone()
    }

    #[test]
    fn entity_set_and_single_key() {
        let uri = parse("http://host/odata.svc/Customers('A1245')").unwrap();
        let path = &uri.resource_path().unwrap().path;
        assert_eq!(path.len(), 2);
        assert_eq!(
            path[1],
            PathSegment::Key {
                entity_type: "Demo.Customer".into(),
                keys: vec![KeyValue {
                    name: "Id".into(),
                    value: Literal::String("A1245".into())
                }],
                named: false,
            }
        );
        assert_eq!(uri.service_root, "http://host/odata.svc");
    }

    #[test]
    fn composite_keys_must_be_named_and_complete() {
        assert!(parse("/odata.svc/Lines(OrderId=1,Region='EU')").is_ok());
        assert!(parse("/odata.svc/Lines(Region='EU',OrderId=1)").is_ok());
        assert!(matches!(
            parse("/odata.svc/Lines(OrderId=1)").unwrap_err(),
            UriParseError::InvalidKey { .. }
        ));
        assert!(matches!(
            parse("/odata.svc/Lines(OrderId=1,Region='EU',Extra=2)").unwrap_err(),
            UriParseError::InvalidKey { .. }
        ));
        assert!(matches!(
            parse("/odata.svc/Lines(1,'EU')").unwrap_err(),
            UriParseError::InvalidKey { .. }
        ));
        assert!(matches!(
            parse("/odata.svc/Lines(OrderId='x',Region='EU')").unwrap_err(),
            UriParseError::LiteralType { .. }
        ));
    }

    #[test]
    fn empty_and_out_of_range_keys_fail() {
        assert!(matches!(
            parse("/odata.svc/Customers()").unwrap_err(),
            UriParseError::InvalidKey { .. }
        ));
        assert!(matches!(
            parse("/odata.svc/Orders(99999999999)").unwrap_err(),
            UriParseError::LiteralType { .. }
        ));
    }

    #[test]
    fn unknown_segment_is_named_with_position() {
        let err = parse("/odata.svc/Nowhere").unwrap_err();
        assert_eq!(
            err,
            UriParseError::UnknownSegment {
                segment: "Nowhere".into(),
                position: 0
            }
        );
        let err = parse("/odata.svc/Customers('A')/Nope").unwrap_err();
        assert!(matches!(err, UriParseError::UnknownProperty { .. }));
    }

    #[test]
    fn collections_need_a_key_before_navigation() {
        assert!(matches!(
            parse("/odata.svc/Customers/Orders").unwrap_err(),
            UriParseError::InvalidSegment { .. }
        ));
        let t = target("/odata.svc/Customers('A')/Orders(3)/Customer");
        assert_eq!(t.kind, TargetKind::Entity);
        assert_eq!(t.type_name.as_deref(), Some("Demo.Customer"));
    }

    #[test]
    fn navigation_follows_bindings() {
        let t = target("/odata.svc/Customers('A')/Orders");
        assert_eq!(t.kind, TargetKind::EntityCollection);
        assert_eq!(t.entity_set.as_deref(), Some("Orders"));
    }

    #[test]
    fn count_value_and_ref() {
        assert_eq!(target("/odata.svc/Customers/$count").kind, TargetKind::Count);
        assert_eq!(target("/odata.svc/Customers('A')/Tags/$count").kind, TargetKind::Count);
        assert_eq!(target("/odata.svc/Customers('A')/Name/$value").kind, TargetKind::RawValue);
        assert_eq!(target("/odata.svc/Customers('A')/Orders/$ref").kind, TargetKind::Reference);
        assert!(parse("/odata.svc/Customers('A')/$count").is_err());
        assert!(parse("/odata.svc/Customers/$count/Name").is_err());
        assert!(parse("/odata.svc/Customers('A')/Address/$value").is_err());
    }

    #[test]
    fn complex_properties_and_casts() {
        let t = target("/odata.svc/Customers('A')/Address/City");
        assert_eq!(t.kind, TargetKind::Primitive);
        assert_eq!(t.type_name.as_deref(), Some("Edm.String"));
        let t = target("/odata.svc/Customers/Demo.VipCustomer('A')");
        assert_eq!(t.type_name.as_deref(), Some("Demo.VipCustomer"));
        assert!(parse("/odata.svc/Orders/Demo.VipCustomer").is_err());
    }

    #[test]
    fn operations() {
        let t = target("/odata.svc/TopCustomers(count=3)");
        assert_eq!(t.kind, TargetKind::EntityCollection);
        assert_eq!(t.entity_set.as_deref(), Some("Customers"));
        let t = target("/odata.svc/TopCustomers(count=@c)?@c=5");
        assert_eq!(t.kind, TargetKind::EntityCollection);
        assert!(parse("/odata.svc/TopCustomers()").is_err());
        assert!(parse("/odata.svc/TopCustomers(count=1,other=2)").is_err());
        let t = target("/odata.svc/Customers('A')/Demo.Total()");
        assert_eq!(t.kind, TargetKind::Primitive);
        assert_eq!(target("/odata.svc/Reset").kind, TargetKind::Void);
        assert!(parse("/odata.svc/Reset/Name").is_err());
        assert!(parse("/odata.svc/Orders(1)/Demo.Total()").is_err());
    }

    #[test]
    fn pseudo_resources() {
        assert!(matches!(
            parse("/odata.svc/").unwrap().relative,
            RelativeUri::ServiceDocument { .. }
        ));
        assert!(matches!(
            parse("/odata.svc").unwrap().relative,
            RelativeUri::ServiceDocument { .. }
        ));
        assert!(matches!(
            parse("/odata.svc/$metadata").unwrap().relative,
            RelativeUri::Metadata { .. }
        ));
        assert_eq!(parse("/odata.svc/$batch").unwrap().relative, RelativeUri::Batch);
        let uri = parse("/odata.svc/$entity?$id=Customers('A')&$select=Name").unwrap();
        assert!(matches!(uri.relative, RelativeUri::EntityId { ref id, .. } if id == "Customers('A')"));
        assert!(parse("/odata.svc/$entity").is_err());
        assert!(parse("/odata.svc/$all").unwrap_err().is_unsupported());
    }

    #[test]
    fn missing_root_fails() {
        assert!(matches!(
            parse("/elsewhere/Customers").unwrap_err(),
            UriParseError::MissingServiceRoot { .. }
        ));
    }

    #[test]
    fn decoding_happens_after_splitting() {
        let uri = parse("/odata.svc/Customers('a%2Fb')").unwrap();
        let keys = uri.resource_path().unwrap().last_keys().unwrap();
        assert_eq!(keys[0].value, Literal::String("a/b".into()));
        let uri = parse("/odata.svc/Customers('x/y')").unwrap();
        assert_eq!(uri.resource_path().unwrap().path.len(), 2);
        assert!(matches!(
            parse("/odata.svc/Customers('%E9')").unwrap_err(),
            UriParseError::Encoding { .. }
        ));
    }

    #[test]
    fn max_length_is_enforced_on_keys() {
        let model = build_model(
            "C",
            &[EntityDeclaration::new("Demo", "Code")
                .with_key_property(PropertyDeclaration::new("Id", "Edm.String").not_null().max_length(3))
                .in_entity_set("Codes")
                .into()],
        )
        .unwrap();
        let root = ServiceRoot::new("/odata.svc").unwrap();
        let parser = UriParser::new(&model, &root);
        assert!(parser.parse("/odata.svc/Codes('abc')").is_ok());
        assert!(matches!(
            parser.parse("/odata.svc/Codes('abcd')").unwrap_err(),
            UriParseError::LiteralType { .. }
        ));
    }

    #[test]
    fn canonical_text_reparses_to_equal_ast() {
        for text in [
            "/odata.svc/Customers('O''Neil')/Orders(3)",
            "/odata.svc/Lines(OrderId=1,Region='EU')",
            "/odata.svc/Customers?$filter=Name eq 'A' and Address/City ne 'B'&$top=3&custom=1",
            "/odata.svc/TopCustomers(count=3)?$orderby=Name desc",
            "/odata.svc/Customers('A')/Orders?$expand=Customer($select=Name;$expand=Orders($top=1))",
        ] {
            let first = parse(text).unwrap();
            let second = parse(&first.to_uri_string()).unwrap();
            assert_eq!(first, second, "{text}");
        }
    }
}
