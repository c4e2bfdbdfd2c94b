//! Shared fixtures for pipeline-level tests: a demo model and an in-memory
//! data source with buffered changesets.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use odata_core::edm::{
    ComplexDeclaration, Declaration, EntityDeclaration, EnumDeclaration, NavigationDeclaration,
    OperationDeclaration, PropertyDeclaration,
};
use odata_core::processor::{
    ChangesetTransaction, DataSource, DataSourceError, ProcessorOutput, ReadRequest, RequestBody,
    WriteKind, WriteRequest,
};
use odata_core::result::entity_path;
use odata_core::uri::ast::{PathSegment, ResourcePathUri, TargetKind};
use odata_core::{ContentNegotiator, EdmRegistry, Pipeline, ServiceConfig};

pub const ROOT: &str = "http://localhost/odata.svc";

pub fn declarations() -> Vec<Declaration> {
    let address = ComplexDeclaration::new("Demo", "Address")
        .with_property(PropertyDeclaration::new("City", "Edm.String"));
    let status = EnumDeclaration::new("Demo", "Status", &["Active", "Dormant"]);
    let customer = EntityDeclaration::new("Demo", "Customer")
        .with_key("Id", "Edm.String")
        .with_property(PropertyDeclaration::new("Name", "Edm.String").max_length(10))
        .with_property(PropertyDeclaration::new("Status", "Demo.Status"))
        .with_property(PropertyDeclaration::new("Address", "Demo.Address"))
        .with_navigation(NavigationDeclaration::many("Orders", "Demo.Order"))
        .in_entity_set("Customers")
        .with_binding("Orders", "Orders");
    let order = EntityDeclaration::new("Demo", "Order")
        .with_key("Id", "Edm.Int32")
        .with_property(PropertyDeclaration::new("Amount", "Edm.Decimal"))
        .with_navigation(NavigationDeclaration::single("Customer", "Demo.Customer"))
        .in_entity_set("Orders")
        .with_binding("Customer", "Customers");
    let top = OperationDeclaration::function("Demo", "TopCustomers")
        .with_parameter(PropertyDeclaration::new("count", "Edm.Int32").not_null())
        .returning("Demo.Customer", true)
        .imported_as("TopCustomers")
        .returning_from("Customers");
    let reset = OperationDeclaration::action("Demo", "Reset")
        .with_parameter(PropertyDeclaration::new("reason", "Edm.String").not_null())
        .imported_as("Reset");
    vec![
        address.into(),
        status.into(),
        customer.into(),
        order.into(),
        top.into(),
        reset.into(),
    ]
}

pub fn registry() -> Arc<EdmRegistry> {
    let registry = EdmRegistry::new("Container");
    registry.register(declarations());
    Arc::new(registry)
}

pub fn seed() -> BTreeMap<String, Vec<Value>> {
    BTreeMap::from([
        (
            "Customers".to_string(),
            vec![
                json!({"Id": "A1", "Name": "Alfreds", "Status": "Active", "Address": {"City": "Berlin"}}),
                json!({"Id": "B2", "Name": "Bottom", "Status": "Dormant", "Address": {"City": "Tsawassen"}}),
                json!({"Id": "C3", "Name": "Chop-suey", "Status": "Active", "Address": null}),
            ],
        ),
        (
            "Orders".to_string(),
            vec![json!({"Id": 1, "Amount": 12.5}), json!({"Id": 2, "Amount": 40})],
        ),
    ])
}

type Tables = BTreeMap<String, Vec<Value>>;

/// Entity sets held in memory. Changesets work on a copy and swap it in on
/// commit.
#[derive(Clone)]
pub struct InMemorySource {
    registry: Arc<EdmRegistry>,
    tables: Arc<Mutex<Tables>>,
    /// Access tokens seen by reads and writes, in arrival order.
    pub tokens: Arc<Mutex<Vec<Option<String>>>>,
}

impl InMemorySource {
    pub fn new(registry: Arc<EdmRegistry>) -> Self {
        Self {
            registry,
            tables: Arc::new(Mutex::new(seed())),
            tokens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn rows(&self, set: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(set)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, token: &Option<String>) {
        self.tokens.lock().unwrap().push(token.clone());
    }
}

fn entity_set(resource: &ResourcePathUri) -> Result<&str, DataSourceError> {
    match resource.path.first() {
        Some(PathSegment::EntitySet { name, .. }) => Ok(name),
        _ => Err(DataSourceError::Unsupported(resource.path_string())),
    }
}

fn matches_keys(entity: &Value, resource: &ResourcePathUri) -> bool {
    resource.last_keys().is_some_and(|keys| {
        keys.iter()
            .all(|k| entity.get(&k.name) == Some(&k.value.to_json()))
    })
}

fn read_tables(tables: &Tables, resource: &ResourcePathUri) -> Result<ProcessorOutput, DataSourceError> {
    if let Some(PathSegment::Operation { .. }) = resource.path.first() {
        let items = tables.get("Customers").cloned().unwrap_or_default();
        return Ok(ProcessorOutput::Entities {
            items,
            total: None,
            next_link: None,
        });
    }
    let set = entity_set(resource)?;
    let rows = tables.get(set).cloned().unwrap_or_default();

    if resource.last_keys().is_none() {
        let total = rows.len() as u64;
        if resource.target.kind == TargetKind::Count {
            return Ok(ProcessorOutput::Count(total));
        }
        let skip = resource.skip().unwrap_or(0) as usize;
        let top = resource.top().map_or(usize::MAX, |t| t as usize);
        let items = rows.into_iter().skip(skip).take(top).collect();
        return Ok(ProcessorOutput::Entities {
            items,
            total: Some(total),
            next_link: None,
        });
    }

    let entity = rows.into_iter().find(|e| matches_keys(e, resource));
    let property = resource.path.iter().rev().find_map(|s| match s {
        PathSegment::Property { name, .. } => Some(name.clone()),
        _ => None,
    });
    match (entity, property) {
        (None, _) => Ok(ProcessorOutput::Entity(None)),
        (Some(entity), Some(name)) => Ok(ProcessorOutput::Property(
            entity.get(&name).cloned().unwrap_or(Value::Null),
        )),
        (Some(entity), None) => Ok(ProcessorOutput::Entity(Some(entity))),
    }
}

fn write_tables(
    registry: &EdmRegistry,
    tables: &mut Tables,
    request: &WriteRequest,
) -> Result<ProcessorOutput, DataSourceError> {
    if request.kind == WriteKind::InvokeAction {
        return match &request.body {
            RequestBody::Parameters(p) if p.get("reason") == Some(&json!("fail")) => {
                Err(DataSourceError::Rejected("reset refused".into()))
            }
            _ => Ok(ProcessorOutput::Empty),
        };
    }
    let resource = &request.resource;
    let set = entity_set(resource)?.to_string();
    let rows = tables.entry(set.clone()).or_default();
    match (request.kind, &request.body) {
        (WriteKind::Create, RequestBody::Entity(props)) => {
            let entity = Value::Object(props.clone());
            let model = registry.entity_data_model().map_err(anyhow::Error::from)?;
            let path = entity_path(&model, &set, &entity)
                .ok_or_else(|| DataSourceError::Rejected("key properties missing".into()))?;
            let id = entity.get("Id");
            if rows.iter().any(|e| e.get("Id") == id) {
                return Err(DataSourceError::Conflict(path));
            }
            rows.push(entity.clone());
            Ok(ProcessorOutput::Created { entity, path })
        }
        (WriteKind::Update { replace }, RequestBody::Entity(props)) => {
            let row = rows
                .iter_mut()
                .find(|e| matches_keys(e, resource))
                .ok_or_else(|| DataSourceError::NotFound(resource.path_string()))?;
            let Value::Object(existing) = row else {
                return Err(DataSourceError::Rejected("stored row is not an object".into()));
            };
            if replace {
                let id = existing.get("Id").cloned().unwrap_or(Value::Null);
                *existing = Map::from_iter([("Id".to_string(), id)]);
            }
            for (k, v) in props {
                existing.insert(k.clone(), v.clone());
            }
            Ok(ProcessorOutput::Updated(Some(row.clone())))
        }
        (WriteKind::Delete, _) => {
            let before = rows.len();
            rows.retain(|e| !matches_keys(e, resource));
            if rows.len() == before {
                return Err(DataSourceError::NotFound(resource.path_string()));
            }
            Ok(ProcessorOutput::Empty)
        }
        (kind, _) => Err(DataSourceError::Unsupported(kind.as_str().to_string())),
    }
}

#[async_trait]
impl DataSource for InMemorySource {
    async fn read(&self, request: &ReadRequest) -> Result<ProcessorOutput, DataSourceError> {
        self.record(&request.access_token);
        let tables = self.tables.lock().unwrap();
        read_tables(&tables, &request.resource)
    }

    async fn write(&self, request: &WriteRequest) -> Result<ProcessorOutput, DataSourceError> {
        self.record(&request.access_token);
        let mut tables = self.tables.lock().unwrap();
        write_tables(&self.registry, &mut tables, request)
    }

    async fn begin_changeset(&self) -> Result<Box<dyn ChangesetTransaction>, DataSourceError> {
        let working = self.tables.lock().unwrap().clone();
        Ok(Box::new(InMemoryChangeset {
            source: self.clone(),
            working,
        }))
    }
}

pub struct InMemoryChangeset {
    source: InMemorySource,
    working: Tables,
}

#[async_trait]
impl ChangesetTransaction for InMemoryChangeset {
    async fn write(&mut self, request: &WriteRequest) -> Result<ProcessorOutput, DataSourceError> {
        self.source.record(&request.access_token);
        write_tables(&self.source.registry, &mut self.working, request)
    }

    async fn commit(self: Box<Self>) -> Result<(), DataSourceError> {
        *self.source.tables.lock().unwrap() = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DataSourceError> {
        Ok(())
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub source: InMemorySource,
}

pub fn harness() -> Harness {
    let registry = registry();
    let source = InMemorySource::new(Arc::clone(&registry));
    let pipeline = Pipeline::new(
        registry,
        ServiceConfig::default(),
        ContentNegotiator::with_defaults(),
        Arc::new(source.clone()),
    )
    .unwrap();
    Harness { pipeline, source }
}

pub fn url(relative: &str) -> String {
    format!("{ROOT}/{relative}")
}
