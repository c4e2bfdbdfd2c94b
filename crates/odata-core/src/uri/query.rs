//! Query option splitting and the per-option sub-parsers.

use std::collections::HashSet;

use super::ast::{ExpandItem, ExpandPath, Levels, QueryOption, SelectItem};
use super::UriParseError;
use crate::edm::{EdmType, EntityDataModel};
use crate::expr::ExpressionParser;

type Result<T> = std::result::Result<T, UriParseError>;

/// Option names with system semantics. Anything else is kept verbatim.
const SYSTEM_OPTIONS: &[&str] = &[
    "$filter",
    "$expand",
    "$select",
    "$orderby",
    "$top",
    "$skip",
    "$count",
    "$search",
    "$format",
    "$skiptoken",
    "$id",
];

/// A decoded `name=value` pair, before dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawOption {
    pub name: String,
    pub value: String,
}

/// What the options of one resource (or one `$expand` item) apply to.
pub(crate) struct QueryContext<'m> {
    model: &'m EntityDataModel,
    /// Structured or primitive type the options address, and whether the
    /// resource is a collection.
    subject: Option<(String, bool)>,
    max_expand_depth: usize,
    /// 0 at the top level, n inside the n-th nested `$expand`.
    depth: usize,
}

impl<'m> QueryContext<'m> {
    pub fn new(
        model: &'m EntityDataModel,
        subject: Option<(String, bool)>,
        max_expand_depth: usize,
    ) -> Self {
        Self {
            model,
            subject,
            max_expand_depth,
            depth: 0,
        }
    }

    fn nested(&self, type_name: &str, collection: bool) -> Self {
        Self {
            model: self.model,
            subject: Some((type_name.to_string(), collection)),
            max_expand_depth: self.max_expand_depth,
            depth: self.depth + 1,
        }
    }

    fn subject_type(&self, option: &str, value: &str) -> Result<&str> {
        self.subject
            .as_ref()
            .map(|(t, _)| t.as_str())
            .ok_or_else(|| invalid(option, value, "not applicable to this resource"))
    }

    fn is_open(&self, type_name: &str) -> bool {
        match self.model.get_type(type_name) {
            Some(EdmType::Entity(t)) => t.is_open,
            Some(EdmType::Complex(t)) => t.is_open,
            _ => false,
        }
    }
}

fn invalid(option: &str, value: &str, reason: impl Into<String>) -> UriParseError {
    UriParseError::InvalidQueryOption {
        option: option.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn decode(text: &str) -> Result<String> {
    urlencoding::decode(text)
        .map(|s| s.into_owned())
        .map_err(|_| UriParseError::Encoding {
            fragment: text.to_string(),
        })
}

/// Split the query string on `&` and each pair at its first `=`, decoding
/// name and value separately.
pub(crate) fn split_query(query: &str) -> Result<Vec<RawOption>> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            Ok(RawOption {
                name: decode(name)?,
                value: decode(value)?,
            })
        })
        .collect()
}

/// Split on `separator` outside parentheses and single-quoted strings.
pub(crate) fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            c if c == separator && !quoted && depth == 0 => {
                out.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&text[start..]);
    out
}

/// Dispatch each option to its sub-parser, preserving request order.
pub(crate) fn parse_options(ctx: &QueryContext<'_>, raw: Vec<RawOption>) -> Result<Vec<QueryOption>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for RawOption { name, value } in raw {
        let system = SYSTEM_OPTIONS.contains(&name.as_str()) || (ctx.depth > 0 && name == "$levels");
        if system && !seen.insert(name.clone()) {
            return Err(UriParseError::DuplicateQueryOption { option: name });
        }
        if !system {
            if ctx.depth > 0 {
                return Err(invalid(&name, &value, "not allowed inside $expand"));
            }
            out.push(QueryOption::Custom { name, value });
            continue;
        }
        out.push(parse_option(ctx, &name, &value)?);
    }
    Ok(out)
}

fn parse_option(ctx: &QueryContext<'_>, name: &str, value: &str) -> Result<QueryOption> {
    let option = match name {
        "$filter" => {
            let it = ctx.subject_type(name, value)?;
            QueryOption::Filter(ExpressionParser::new(ctx.model, it).parse_filter(value)?)
        }
        "$orderby" => {
            let it = ctx.subject_type(name, value)?;
            QueryOption::OrderBy(ExpressionParser::new(ctx.model, it).parse_orderby(value)?)
        }
        "$expand" => QueryOption::Expand(parse_expand(ctx, value)?),
        "$select" => QueryOption::Select(parse_select(ctx, value)?),
        "$top" => QueryOption::Top(non_negative(name, value)?),
        "$skip" => QueryOption::Skip(non_negative(name, value)?),
        "$count" => match value {
            "true" => QueryOption::Count(true),
            "false" => QueryOption::Count(false),
            _ => return Err(invalid(name, value, "must be true or false")),
        },
        "$levels" => QueryOption::Levels(match value {
            "max" => Levels::Max,
            _ => match value.parse::<u32>() {
                Ok(n) if n > 0 => Levels::Depth(n),
                _ => return Err(invalid(name, value, "must be a positive integer or max")),
            },
        }),
        "$search" | "$format" | "$skiptoken" | "$id" if value.is_empty() => {
            return Err(invalid(name, value, "must not be empty"))
        }
        "$search" => QueryOption::Search(value.to_string()),
        "$format" => QueryOption::Format(value.to_string()),
        "$skiptoken" => QueryOption::SkipToken(value.to_string()),
        "$id" => QueryOption::Id(value.to_string()),
        _ => {
            return Ok(QueryOption::Custom {
                name: name.to_string(),
                value: value.to_string(),
            })
        }
    };
    Ok(option)
}

fn non_negative(name: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| invalid(name, value, "must be a non-negative integer"))
}

// ============================================================================
// $expand
// ============================================================================

fn parse_expand(ctx: &QueryContext<'_>, value: &str) -> Result<Vec<ExpandItem>> {
    const OPTION: &str = "$expand";
    let subject = ctx.subject_type(OPTION, value)?.to_string();
    if ctx.depth + 1 > ctx.max_expand_depth {
        return Err(invalid(
            OPTION,
            value,
            format!("nesting exceeds the maximum depth of {}", ctx.max_expand_depth),
        ));
    }

    let mut items = Vec::new();
    for item in split_top_level(value, ',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(invalid(OPTION, value, "empty expand item"));
        }
        let (path_text, nested_text) = match item.find('(') {
            Some(open) if item.ends_with(')') => (&item[..open], Some(&item[open + 1..item.len() - 1])),
            Some(_) => return Err(invalid(OPTION, item, "unbalanced parentheses")),
            None => (item, None),
        };
        let (path_text, ref_only) = match path_text.strip_suffix("/$ref") {
            Some(p) => (p, true),
            None => (path_text, false),
        };

        let path = if path_text == "*" {
            ExpandPath::All
        } else {
            expand_path(ctx, &subject, path_text)?
        };

        let options = match (nested_text, &path) {
            (None, _) => Vec::new(),
            (Some(_), ExpandPath::All) => {
                return Err(invalid(OPTION, item, "'*' takes no nested options"))
            }
            (Some(text), ExpandPath::Navigation { target_type, collection, .. }) => {
                let nested = ctx.nested(target_type, *collection);
                let raw = split_top_level(text, ';')
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .map(|pair| {
                        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                        RawOption {
                            name: name.to_string(),
                            value: value.to_string(),
                        }
                    })
                    .collect();
                let options = parse_options(&nested, raw)?;
                if ref_only {
                    if let Some(bad) = options.iter().find(|o| {
                        matches!(
                            o,
                            QueryOption::Expand(_) | QueryOption::Select(_) | QueryOption::Levels(_)
                        )
                    }) {
                        return Err(invalid(
                            bad.name(),
                            &bad.value_string(),
                            "not allowed on a $ref expansion",
                        ));
                    }
                }
                options
            }
        };

        items.push(ExpandItem {
            path,
            ref_only,
            options,
        });
    }
    Ok(items)
}

/// Complex properties, then a navigation property.
fn expand_path(ctx: &QueryContext<'_>, subject: &str, text: &str) -> Result<ExpandPath> {
    let model = ctx.model;
    let segments: Vec<&str> = text.split('/').collect();
    let mut current = subject.to_string();
    for (index, segment) in segments.iter().enumerate() {
        let last = index + 1 == segments.len();
        if let Some(nav) = model.navigation_property(&current, segment) {
            if !last {
                return Err(invalid(
                    "$expand",
                    text,
                    "navigation must be the last segment of an expand path",
                ));
            }
            return Ok(ExpandPath::Navigation {
                segments: segments.iter().map(|s| s.to_string()).collect(),
                target_type: nav.target.clone(),
                collection: nav.collection,
            });
        }
        match model.structural_property(&current, segment) {
            Some(p) if !last && matches!(model.get_type(&p.type_ref.type_name), Some(EdmType::Complex(_))) => {
                current = p.type_ref.type_name.clone();
            }
            Some(_) => {
                return Err(invalid(
                    "$expand",
                    text,
                    format!("'{segment}' is not a navigation property"),
                ))
            }
            None => {
                return Err(UriParseError::UnknownProperty {
                    property: segment.to_string(),
                    type_name: current,
                })
            }
        }
    }
    Err(invalid("$expand", text, "empty expand path"))
}

// ============================================================================
// $select
// ============================================================================

fn parse_select(ctx: &QueryContext<'_>, value: &str) -> Result<Vec<SelectItem>> {
    const OPTION: &str = "$select";
    let subject = ctx.subject_type(OPTION, value)?.to_string();
    let model = ctx.model;
    let mut items = Vec::new();
    for item in split_top_level(value, ',') {
        let item = item.trim();
        if item == "*" {
            items.push(SelectItem::All);
            continue;
        }
        if item.is_empty() {
            return Err(invalid(OPTION, value, "empty select item"));
        }
        let segments: Vec<String> = item.split('/').map(str::to_string).collect();
        let mut current = Some(subject.clone());
        for (index, segment) in segments.iter().enumerate() {
            let last = index + 1 == segments.len();
            let Some(type_name) = current.take() else {
                // Below a dynamic property nothing is checked.
                break;
            };
            if segment.contains('.') && model.is_derived_from(segment, &type_name) {
                current = Some(segment.clone());
            } else if let Some(p) = model.structural_property(&type_name, segment) {
                current = Some(p.type_ref.type_name.clone());
            } else if model.navigation_property(&type_name, segment).is_some() {
                if !last {
                    return Err(invalid(OPTION, item, "cannot select through a navigation property"));
                }
            } else if !ctx.is_open(&type_name) {
                return Err(UriParseError::UnknownProperty {
                    property: segment.clone(),
                    type_name,
                });
            }
        }
        items.push(SelectItem::Path(segments));
    }
    Ok(items)
}
