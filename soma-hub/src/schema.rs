/**
 * SCHEMA GENERATOR - Schémas JSON dérivés de l'état courant du nœud
 *
 * RÔLE : Produire les documents servis par /monitor_schema,
 * /execute_schema et /adaptation_options_schema, et valider les
 * payloads entrants contre eux.
 *
 * ARCHITECTURE : Un petit modèle typé (Schema / SchemaType) construit
 * par combinateurs, sérialisé avec l'ordre d'insertion des propriétés.
 * Jamais de concaténation de chaînes. Le schéma monitor est mis en
 * cache, invalidé par la génération du registre.
 */

use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::error::{HubError, HubResult};
use crate::registry::ComponentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    String,
    Number,
    Object,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Object => "object",
        }
    }

    /// Le type JSON de `value` correspond-il ?
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Object => value.is_object(),
        }
    }
}

/// Nœud de schéma. Les propriétés gardent leur ordre d'insertion,
/// c'est lui qui sort dans le JSON sérialisé.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    ty: SchemaType,
    properties: Vec<(String, Schema)>,
    required: Vec<String>,
}

impl Schema {
    pub fn string() -> Self {
        Self {
            ty: SchemaType::String,
            properties: Vec::new(),
            required: Vec::new(),
        }
    }

    pub fn number() -> Self {
        Self {
            ty: SchemaType::Number,
            properties: Vec::new(),
            required: Vec::new(),
        }
    }

    pub fn object() -> Self {
        Self {
            ty: SchemaType::Object,
            properties: Vec::new(),
            required: Vec::new(),
        }
    }

    /// Ajoute une propriété optionnelle. Si le nom existe déjà, la
    /// première déclaration gagne.
    pub fn property(mut self, name: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        if !self.properties.iter().any(|(n, _)| n == &name) {
            self.properties.push((name, schema));
        }
        self
    }

    /// Ajoute une propriété et la marque requise.
    pub fn required_property(mut self, name: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        self = self.property(name.clone(), schema);
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    /// Valide `value` contre ce schéma. Champs requis présents, champs
    /// connus du bon type, champs inconnus tolérés. La première
    /// violation rencontrée est rendue avec le nom du champ fautif.
    pub fn validate(&self, value: &Value) -> HubResult<()> {
        self.validate_value("body", value)
    }

    fn validate_value(&self, field: &str, value: &Value) -> HubResult<()> {
        if !self.ty.matches(value) {
            return Err(HubError::mistyped_field(field, self.ty.as_str()));
        }
        if self.ty == SchemaType::Object {
            // as_object ne peut pas échouer ici, matches vient de passer
            let obj = value.as_object().ok_or_else(|| {
                HubError::mistyped_field(field, "object")
            })?;
            for required in &self.required {
                if !obj.contains_key(required) {
                    return Err(HubError::missing_field(required));
                }
            }
            for (name, schema) in &self.properties {
                if let Some(nested) = obj.get(name) {
                    schema.validate_value(name, nested)?;
                }
            }
        }
        Ok(())
    }
}

// Sérialisation manuelle : serde_json::Map réordonne les clés, on veut
// conserver l'ordre d'insertion du registre dans les documents servis.
impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.ty.as_str())?;
        if self.ty == SchemaType::Object {
            map.serialize_entry("properties", &OrderedProperties(&self.properties))?;
            if !self.required.is_empty() {
                map.serialize_entry("required", &self.required)?;
            }
        }
        map.end()
    }
}

struct OrderedProperties<'a>(&'a [(String, Schema)]);

impl Serialize for OrderedProperties<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, schema) in self.0 {
            map.serialize_entry(name, schema)?;
        }
        map.end()
    }
}

/// Schéma de /monitor : un objet par composant, une propriété number
/// par métrique déclarée, dans l'ordre du registre.
pub fn monitor_schema(shapes: &[(String, Vec<String>)]) -> Schema {
    let mut root = Schema::object();
    for (component, metrics) in shapes {
        let mut node = Schema::object();
        for metric in metrics {
            node = node.property(metric.clone(), Schema::number());
        }
        root = root.property(component.clone(), node);
    }
    root
}

/// Schéma de /execute : `adaptation` et `component` requis, plus les
/// paramètres déclarés par chaque handler. En cas de collision de nom
/// entre deux kinds, la première déclaration gagne.
pub fn execute_schema(param_shapes: &[(String, Vec<(&'static str, SchemaType)>)]) -> Schema {
    let mut root = Schema::object()
        .required_property("adaptation", Schema::string())
        .required_property("component", Schema::string());
    for (_, params) in param_shapes {
        for (name, ty) in params {
            let leaf = match ty {
                SchemaType::String => Schema::string(),
                SchemaType::Number => Schema::number(),
                SchemaType::Object => Schema::object(),
            };
            root = root.property(*name, leaf);
        }
    }
    root
}

/// Schéma de /adaptation_options : une propriété string par kind connu.
pub fn adaptation_options_schema(kinds: &[String]) -> Schema {
    let mut root = Schema::object();
    for kind in kinds {
        root = root.property(kind.clone(), Schema::string());
    }
    root
}

/// Cache du schéma monitor, indexé par génération du registre.
/// Les schémas execute et options sont figés au démarrage (la table des
/// handlers ne bouge plus), seul monitor suit les mouvements du registre.
#[derive(Default)]
pub struct SchemaCache {
    monitor: Mutex<Option<(u64, Schema)>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn monitor(&self, registry: &ComponentRegistry) -> Schema {
        let (generation, shapes) = registry.schema_snapshot();
        let mut slot = self.monitor.lock();
        if let Some((cached, schema)) = slot.as_ref() {
            // Un rebuild concurrent parti d'un snapshot plus récent a pu
            // remplir le cache entre notre snapshot et ici : on sert le
            // plus frais des deux, jamais un mélange.
            if *cached >= generation {
                return schema.clone();
            }
        }
        let schema = monitor_schema(&shapes);
        *slot = Some((generation, schema.clone()));
        schema
    }

    pub fn cached_generation(&self) -> Option<u64> {
        self.monitor.lock().as_ref().map(|(generation, _)| *generation)
    }
}
