//! Models and the schema registry.
//!
//! A [`Model`] groups the entities served by one data source. The
//! [`Registry`] freezes every model at build time: field inheritance is
//! applied, structural errors are reported, and lookup tables by type and
//! by name are built so later lookups are O(1).

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Deserialize;

use crate::entity::Entity;
use crate::error::{Error, Result, SchemaErrorKind};
use crate::field::Field;
use crate::relationship::Relationship;

/// Where a model's data lives. Handed to whatever opens the connection.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionInfo {
    pub driver: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("driver", &self.driver)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "******"))
            .finish()
    }
}

/// A named group of entities sharing one data source.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub connection_info: Option<ConnectionInfo>,
    entities: Vec<Entity>,
    by_name: HashMap<String, usize>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection_info: None,
            entities: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn connection_info(mut self, info: ConnectionInfo) -> Self {
        self.connection_info = Some(info);
        self
    }

    pub fn entity(mut self, entity: Entity) -> Self {
        self.by_name.insert(entity.name.clone(), self.entities.len());
        self.entities.push(entity);
        self
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity_named(&self, name: &str) -> Option<&Entity> {
        self.by_name.get(name).map(|&i| &self.entities[i])
    }
}

/// Frozen metadata for every model.
#[derive(Debug)]
pub struct Registry {
    models: Vec<Model>,
    model_by_name: HashMap<String, usize>,
    by_type: HashMap<TypeId, (usize, usize)>,
    by_name: HashMap<String, (usize, usize)>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn model_named(&self, name: &str) -> Option<&Model> {
        self.model_by_name.get(name).map(|&i| &self.models[i])
    }

    /// Entity mapped to the Rust type `T`.
    pub fn entity_for<T: 'static>(&self) -> Option<&Entity> {
        self.entity_for_type(TypeId::of::<T>())
    }

    pub fn entity_for_type(&self, type_id: TypeId) -> Option<&Entity> {
        self.by_type.get(&type_id).map(|&(m, e)| &self.models[m].entities[e])
    }

    pub fn entity_named(&self, name: &str) -> Option<&Entity> {
        self.by_name.get(name).map(|&(m, e)| &self.models[m].entities[e])
    }

    /// The model an entity belongs to.
    pub fn model_for_entity(&self, entity: &str) -> Option<&Model> {
        self.by_name.get(entity).map(|&(m, _)| &self.models[m])
    }

    /// Resolve a relationship's destination in the source entity's model.
    pub fn destination_entity(&self, source: &Entity, relationship: &Relationship) -> Option<&Entity> {
        let destination = self
            .model_for_entity(&source.name)
            .and_then(|model| model.entity_named(&relationship.destination));
        if destination.is_none() {
            tracing::warn!(
                entity = %source.name,
                relationship = %relationship.name,
                destination = %relationship.destination,
                "relationship destination is not in the model"
            );
        }
        destination
    }

    pub fn parent_entity(&self, entity: &Entity) -> Option<&Entity> {
        entity
            .inheritance
            .as_ref()
            .and_then(|inheritance| self.entity_named(&inheritance.parent))
    }

    /// Entities to query for `entity`: itself unless abstract, then every
    /// concrete descendant.
    pub fn queried_entities<'a>(&'a self, entity: &'a Entity) -> Vec<&'a Entity> {
        let own = (!entity.is_abstract()).then_some(entity);
        own.into_iter()
            .chain(
                entity
                    .concrete_descendants()
                    .iter()
                    .filter_map(|name| self.entity_named(name)),
            )
            .collect()
    }
}

/// Collects models and validates them into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<Model>,
}

impl RegistryBuilder {
    pub fn model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    /// Validate and freeze.
    ///
    /// Fails on duplicate model or entity names, a type mapped twice, a
    /// missing or cyclic inheritance parent, a concrete entity without a
    /// primary key, or a discriminator key that is not a field.
    pub fn build(self) -> Result<Registry> {
        let mut models = self.models;
        let mut model_by_name = HashMap::new();
        let mut by_name = HashMap::new();
        let mut by_type = HashMap::new();

        for (m, model) in models.iter().enumerate() {
            if model_by_name.insert(model.name.clone(), m).is_some() {
                return Err(duplicate(format!("model '{}' declared twice", model.name)));
            }
            for (e, entity) in model.entities.iter().enumerate() {
                if by_name.insert(entity.name.clone(), (m, e)).is_some() {
                    return Err(duplicate(format!("entity '{}' declared twice", entity.name)));
                }
                if let Some(type_id) = entity.type_id() {
                    if by_type.insert(type_id, (m, e)).is_some() {
                        return Err(duplicate(format!(
                            "type of entity '{}' is already mapped",
                            entity.name
                        )));
                    }
                }
            }
        }

        for model in &mut models {
            resolve_inheritance(model)?;
        }

        for entity in models.iter().flat_map(|m| m.entities.iter()) {
            if !entity.is_abstract() && entity.primary_key_field().is_none() {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("concrete entity '{}' has no primary key", entity.name),
                ));
            }
            if let Some((key, _)) = entity.discriminator() {
                if entity.field_named(key).is_none() {
                    return Err(Error::schema(
                        SchemaErrorKind::Invalid,
                        format!(
                            "discriminator '{}' of entity '{}' is not a field",
                            key, entity.name
                        ),
                    ));
                }
            }
        }

        tracing::debug!(
            models = models.len(),
            entities = by_name.len(),
            "schema registry built"
        );

        Ok(Registry {
            models,
            model_by_name,
            by_type,
            by_name,
        })
    }
}

fn duplicate(message: String) -> Error {
    Error::schema(SchemaErrorKind::Duplicate, message)
}

/// Ancestor chain of `name`, nearest first.
fn ancestors(model: &Model, name: &str) -> Result<Vec<usize>> {
    let mut chain = Vec::new();
    let mut current = name;
    while let Some(parent) = model
        .entity_named(current)
        .and_then(|e| e.inheritance.as_ref())
        .map(|i| i.parent.as_str())
    {
        let Some(&index) = model.by_name.get(parent) else {
            return Err(Error::schema(
                SchemaErrorKind::NotFound,
                format!("parent '{}' of entity '{}' not found", parent, current),
            ));
        };
        if chain.contains(&index) || chain.len() > model.entities.len() {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                format!("inheritance cycle through entity '{}'", name),
            ));
        }
        chain.push(index);
        current = parent;
    }
    Ok(chain)
}

fn resolve_inheritance(model: &mut Model) -> Result<()> {
    let chains = model
        .entities
        .iter()
        .map(|e| ancestors(model, &e.name))
        .collect::<Result<Vec<_>>>()?;

    // Shallow entities first so parents already carry their inherited fields.
    let mut order: Vec<usize> = (0..model.entities.len()).collect();
    order.sort_by_key(|&i| chains[i].len());
    for i in order {
        if let Some(&parent) = chains[i].first() {
            let parent_fields: Vec<Field> = model.entities[parent].fields().to_vec();
            model.entities[i].inherit_fields(&parent_fields);
        }
    }

    for i in 0..model.entities.len() {
        let mut seen = HashSet::new();
        let mut descendants = Vec::new();
        collect_descendants(model, &model.entities[i].name, &mut seen, &mut descendants);
        model.entities[i].descendants = descendants;
    }
    Ok(())
}

/// DFS over children, keeping concrete ones but recursing through all.
fn collect_descendants(
    model: &Model,
    name: &str,
    seen: &mut HashSet<String>,
    out: &mut Vec<String>,
) {
    for child in &model.entities {
        let is_child = child
            .inheritance
            .as_ref()
            .is_some_and(|i| i.parent == name);
        if is_child && seen.insert(child.name.clone()) {
            if !child.is_abstract() {
                out.push(child.name.clone());
            }
            collect_descendants(model, &child.name, seen, out);
        }
    }
}
