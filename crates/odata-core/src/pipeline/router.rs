//! Maps a parsed request (method × addressed resource) to the operation
//! that handles it.

use crate::edm::OperationKind;
use crate::error::ODataError;
use crate::processor::WriteKind;
use crate::request::Method;
use crate::uri::ast::{PathSegment, RelativeUri, ResourcePathUri, TargetKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Service document or `$metadata`; rendered from the model alone.
    Document,
    Read(ResourcePathUri),
    /// `$entity?$id=...`, resolved to a resource path before reading.
    ReadEntityId { id: String },
    Write { kind: WriteKind, resource: ResourcePathUri },
    Batch,
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Route::Document => "document",
            Route::Read(_) | Route::ReadEntityId { .. } => "read",
            Route::Write { .. } => "write",
            Route::Batch => "batch",
        }
    }
}

fn not_allowed(method: Method, relative: &RelativeUri) -> ODataError {
    ODataError::MethodNotAllowed {
        method: method.to_string(),
        target: relative.describe(),
    }
}

pub fn route(method: Method, relative: &RelativeUri) -> Result<Route, ODataError> {
    match relative {
        RelativeUri::ServiceDocument { .. } | RelativeUri::Metadata { .. } => match method {
            Method::Get => Ok(Route::Document),
            _ => Err(not_allowed(method, relative)),
        },
        RelativeUri::Batch => match method {
            Method::Post => Ok(Route::Batch),
            _ => Err(not_allowed(method, relative)),
        },
        RelativeUri::EntityId { id, .. } => match method {
            Method::Get => Ok(Route::ReadEntityId { id: id.clone() }),
            _ => Err(not_allowed(method, relative)),
        },
        RelativeUri::ResourcePath(resource) => {
            resource_route(method, resource).ok_or_else(|| not_allowed(method, relative))
        }
    }
}

fn resource_route(method: Method, resource: &ResourcePathUri) -> Option<Route> {
    let last_operation = resource.path.last().and_then(|s| match s {
        PathSegment::Operation { kind, .. } => Some(*kind),
        _ => None,
    });
    let target = &resource.target;
    let write = |kind| {
        Some(Route::Write {
            kind,
            resource: resource.clone(),
        })
    };
    match (method, last_operation) {
        (Method::Post, Some(OperationKind::Action)) => return write(WriteKind::InvokeAction),
        (_, Some(OperationKind::Action)) => return None,
        (Method::Get, Some(OperationKind::Function)) => return Some(Route::Read(resource.clone())),
        (_, Some(OperationKind::Function)) => return None,
        (_, None) => {}
    }
    match method {
        Method::Get => (target.kind != TargetKind::Void).then(|| Route::Read(resource.clone())),
        Method::Post => match target.kind {
            TargetKind::EntityCollection => write(WriteKind::Create),
            TargetKind::Reference if target.collection => write(WriteKind::AddReference),
            _ => None,
        },
        Method::Put | Method::Patch => match target.kind {
            TargetKind::Entity | TargetKind::Complex | TargetKind::Primitive | TargetKind::RawValue => {
                write(WriteKind::Update {
                    replace: method == Method::Put,
                })
            }
            TargetKind::Reference if !target.collection && method == Method::Put => {
                write(WriteKind::AddReference)
            }
            _ => None,
        },
        Method::Delete => match target.kind {
            TargetKind::Entity | TargetKind::Primitive | TargetKind::Complex => write(WriteKind::Delete),
            TargetKind::Reference => write(WriteKind::RemoveReference),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::ast::PathTarget;

    fn resource(kind: TargetKind, collection: bool, last: Option<PathSegment>) -> RelativeUri {
        let mut path = vec![PathSegment::EntitySet {
            name: "Customers".into(),
            entity_type: "Demo.Customer".into(),
        }];
        path.extend(last);
        RelativeUri::ResourcePath(ResourcePathUri {
            path,
            query_options: vec![],
            target: PathTarget {
                kind,
                type_name: Some("Demo.Customer".into()),
                collection,
                entity_set: Some("Customers".into()),
            },
        })
    }

    fn operation(kind: OperationKind) -> Option<PathSegment> {
        Some(PathSegment::Operation {
            name: "Demo.Op".into(),
            operation: "Demo.Op".into(),
            kind,
            parameters: vec![],
        })
    }

    fn kind_of(route: Result<Route, ODataError>) -> Option<WriteKind> {
        match route {
            Ok(Route::Write { kind, .. }) => Some(kind),
            _ => None,
        }
    }

    #[test]
    fn collections_accept_get_and_post() {
        let customers = resource(TargetKind::EntityCollection, true, None);
        assert!(matches!(route(Method::Get, &customers), Ok(Route::Read(_))));
        assert_eq!(kind_of(route(Method::Post, &customers)), Some(WriteKind::Create));
        let err = route(Method::Delete, &customers).unwrap_err();
        assert_eq!(err.http_status(), 405);
    }

    #[test]
    fn single_entities_accept_updates_but_not_post() {
        let customer = resource(TargetKind::Entity, false, None);
        assert_eq!(
            kind_of(route(Method::Put, &customer)),
            Some(WriteKind::Update { replace: true })
        );
        assert_eq!(
            kind_of(route(Method::Patch, &customer)),
            Some(WriteKind::Update { replace: false })
        );
        assert_eq!(kind_of(route(Method::Delete, &customer)), Some(WriteKind::Delete));
        assert_eq!(route(Method::Post, &customer).unwrap_err().code(), "METHOD_NOT_ALLOWED");
    }

    #[test]
    fn operations_follow_their_kind() {
        let action = resource(TargetKind::Void, false, operation(OperationKind::Action));
        assert_eq!(kind_of(route(Method::Post, &action)), Some(WriteKind::InvokeAction));
        assert!(route(Method::Get, &action).is_err());

        let function = resource(TargetKind::EntityCollection, true, operation(OperationKind::Function));
        assert!(matches!(route(Method::Get, &function), Ok(Route::Read(_))));
        assert!(route(Method::Post, &function).is_err());
    }

    #[test]
    fn references() {
        let refs = resource(TargetKind::Reference, true, Some(PathSegment::Ref));
        assert_eq!(kind_of(route(Method::Post, &refs)), Some(WriteKind::AddReference));
        let single = resource(TargetKind::Reference, false, Some(PathSegment::Ref));
        assert_eq!(kind_of(route(Method::Put, &single)), Some(WriteKind::AddReference));
        assert_eq!(kind_of(route(Method::Delete, &single)), Some(WriteKind::RemoveReference));
    }

    #[test]
    fn pseudo_resources() {
        let metadata = RelativeUri::Metadata { query_options: vec![] };
        assert_eq!(route(Method::Get, &metadata).unwrap(), Route::Document);
        let err = route(Method::Delete, &metadata).unwrap_err();
        assert_eq!(err.to_string(), "method DELETE is not allowed on $metadata");
        assert_eq!(route(Method::Post, &RelativeUri::Batch).unwrap(), Route::Batch);
        assert!(route(Method::Get, &RelativeUri::Batch).is_err());
    }
}
